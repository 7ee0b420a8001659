/*!
# cdrom

A Rust library for driving an interrupt-based CD-ROM controller and reading
ISO9660 filesystems from the discs it serves.

## Features

- Two-phase (acknowledge/complete) command engine with interrupt callbacks
- Multi-sector read pipeline with bounded retry and cancellation
- Cached ISO9660 volume descriptor, path table and directory records
- Path lookup, directory iteration and whole-file reads
- Multi-session discovery
- Software drive serving `.iso`/`.bin` images for tests and tools

## Quick Start

```rust,no_run
use cdrom::{DiscImage, FileSystem, IsoFileSystem, VirtualDrive};

// Serve an image from a software drive
let image = DiscImage::open("game.iso")?;
let mut drive = VirtualDrive::new(image).into_drive();
drive.init()?;

// Look up a file and read it
let mut fs = IsoFileSystem::new(drive);
println!("Volume: {}", fs.get_volume_label()?);
if let Some(file) = fs.search_file("DATA/LEVEL1.BIN")? {
    println!("{} at {} ({} bytes)", file.name, file.position, file.size);
}
let contents = fs.read_file("SYSTEM.CNF")?;

// Walk a directory
if let Some(dir) = fs.open_dir("DATA")? {
    for entry in dir {
        println!("{}", entry.name);
    }
}
# Ok::<(), cdrom::CdError>(())
```

## Modules

- `command`: controller opcodes and interrupt classes
- `controller`: hardware collaborator trait and the media-changed flag
- `drive`: command engine, callbacks and the read pipeline
- `filesystem`: ISO9660 caches, path resolver and session loader
- `position`: BCD minute/second/sector coordinates
- `image`: in-memory disc images and the ISO9660 image builder
- `emu`: software drive
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Controller opcodes and interrupt classes
pub mod command;
/// Hardware collaborator trait
pub mod controller;
/// Command/response engine and sector read pipeline
pub mod drive;
/// Software CD-ROM drive
pub mod emu;
/// Error types and Result alias
pub mod error;
/// ISO9660 filesystem
pub mod filesystem;
/// Disc image formats and ISO9660 constants
pub mod format;
/// In-memory disc images
pub mod image;
/// I/O operations for reading and writing image files
pub mod io;
/// Disc position codec
pub mod position;
/// Drive status and mode bits
pub mod status;

// Re-export common types
pub use command::{Command, IntrResult};
pub use controller::{Controller, IrqPacket, MediaFlag};
pub use drive::{Callback, CallbackSlot, Drive, IrqContext, ReadStatus, SyncMode};
pub use emu::{DriveStats, VirtualDrive};
pub use error::{CdError, IsoError, Result};
pub use filesystem::{
    DirCursor, FileHandle, FileSystem, FileSystemInfo, FsOptions, IsoFileSystem,
    VolumeDescriptor,
};
pub use format::DiscImageFormat;
pub use image::{DiscImage, IsoBuilder};
pub use position::{btoi, itob, Position};
pub use status::{DriveStatus, ModeFlags};
