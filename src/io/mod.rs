/// I/O operations for reading and writing disc image files

/// Reader implementation for ISO and BIN files
pub mod reader;
/// Writer implementation for ISO and BIN files
pub mod writer;

pub use reader::{is_raw_file, read_image};
pub use writer::write_image;
