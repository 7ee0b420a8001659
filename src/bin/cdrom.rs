/// Interactive CD-ROM console application

use cdrom::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "cat",
                "dir",
                "dirs",
                "exit",
                "export",
                "find",
                "help",
                "info",
                "label",
                "lid",
                "load",
                "ls",
                "mkdemo",
                "open",
                "pos",
                "quit",
                "read",
                "read-sector",
                "save",
                "session",
                "status",
                "swap",
                "toc",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".cdrom_history");
        p
    })
}

type Mounted = IsoFileSystem<VirtualDrive>;

/// Insert a disc into a fresh software drive and mount it
fn mount(image: DiscImage) -> Result<Mounted> {
    let mut drive = VirtualDrive::new(image).into_drive();
    drive.init()?;
    Ok(IsoFileSystem::new(drive))
}

/// Two-session demo disc
fn demo_image() -> Result<DiscImage> {
    IsoBuilder::new("DEMO")
        .file("SYSTEM.CNF", b"BOOT = cdrom:\\MAIN.EXE;1\r\nTCB = 4\r\n".to_vec())
        .file("MAIN.EXE", vec![0x00; 6000])
        .file("DATA/LEVEL1.BIN", (0..4096u32).map(|i| i as u8).collect::<Vec<u8>>())
        .file("DATA/MAPS/WORLD.MAP", b"world".to_vec())
        .directory("MUSIC")
        .session(IsoBuilder::new("UPDATE").file("PATCH.BIN", vec![0xFF; 100]))
        .build()
}

fn main() {
    env_logger::init();

    println!("=== CD-ROM ===");
    println!("Interactive console for exploring ISO9660 discs through a software drive.");
    println!("Type 'help' for available commands\n");

    let mut rl = Editor::new().expect("Failed to create editor");
    rl.set_helper(Some(CommandCompleter::new()));

    // Load history if available
    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut fs: Option<Mounted> = None;

    loop {
        let readline = rl.readline("> ");
        let input = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();

        match command.as_str() {
            "help" => {
                print_help();
            }
            "quit" | "exit" => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                println!("Goodbye!");
                break;
            }
            "open" | "load" => {
                if parts.len() < 2 {
                    println!("Usage: open <path>");
                    continue;
                }
                match DiscImage::open(&parts[1]).and_then(mount) {
                    Ok(mounted) => {
                        println!("Opened: {}", parts[1]);
                        fs = Some(mounted);
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "mkdemo" => match demo_image().and_then(mount) {
                Ok(mounted) => {
                    println!("Created two-session demo disc");
                    fs = Some(mounted);
                }
                Err(e) => println!("Error: {}", e),
            },
            "info" => {
                if let Some(fs) = fs.as_mut() {
                    print_info(fs);
                } else {
                    println!("No disc loaded. Use 'open <path>' or 'mkdemo' first.");
                }
            }
            "label" => {
                if let Some(fs) = fs.as_mut() {
                    match fs.get_volume_label() {
                        Ok(label) => println!("Volume: {}", label),
                        Err(e) => println!("Error: {} ({})", e, fs.iso_error()),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "ls" | "dir" => {
                if let Some(fs) = fs.as_mut() {
                    let path = parts.get(1).map(String::as_str).unwrap_or("\\");
                    list_directory(fs, path);
                } else {
                    println!("No disc loaded.");
                }
            }
            "dirs" => {
                if let Some(fs) = fs.as_mut() {
                    match fs.list_directories() {
                        Ok(paths) => {
                            for (index, path) in paths.iter().enumerate() {
                                println!("{:3}  {}", index + 1, path);
                            }
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "find" => {
                if let Some(fs) = fs.as_mut() {
                    if parts.len() < 2 {
                        println!("Usage: find <path>");
                        continue;
                    }
                    match fs.search_file(&parts[1]) {
                        Ok(Some(file)) => println!(
                            "{}  at {} (LBA {}), {} bytes",
                            file.name,
                            file.position,
                            file.lba(),
                            file.size
                        ),
                        Ok(None) => println!("Not found: {}", parts[1]),
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "read" | "cat" => {
                if let Some(fs) = fs.as_mut() {
                    if parts.len() < 2 {
                        println!("Usage: read <path>");
                        continue;
                    }
                    match fs.read_file(&parts[1]) {
                        Ok(data) => {
                            println!("{} ({} bytes):", parts[1], data.len());
                            print_hex_dump(&data, 256);
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "export" => {
                if let Some(fs) = fs.as_mut() {
                    if parts.len() < 2 {
                        println!("Usage: export <path> [output_path]");
                        continue;
                    }
                    let output = match parts.get(2) {
                        Some(out) => out.clone(),
                        None => host_file_name(&parts[1]),
                    };
                    match fs.read_file(&parts[1]) {
                        Ok(data) => match std::fs::write(&output, &data) {
                            Ok(()) => println!("Exported {} bytes to {}", data.len(), output),
                            Err(e) => println!("Error: {}", e),
                        },
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "session" => {
                if let Some(fs) = fs.as_mut() {
                    let Some(session) = parts.get(1).and_then(|s| s.parse::<u8>().ok()) else {
                        println!("Usage: session <number>");
                        continue;
                    };
                    match fs.load_session(session) {
                        Ok(()) => match fs.get_volume_label() {
                            Ok(label) => println!("Session {} mounted: {}", session, label),
                            Err(e) => println!("Error: {}", e),
                        },
                        Err(e) => println!("Error: {} ({})", e, fs.iso_error()),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "status" => {
                if let Some(fs) = fs.as_ref() {
                    print_status(fs);
                } else {
                    println!("No disc loaded.");
                }
            }
            "toc" => {
                if let Some(fs) = fs.as_mut() {
                    match fs.drive_mut().get_toc() {
                        Ok(toc) => {
                            for entry in toc {
                                println!(
                                    "Track {:2}: {} (LBA {})",
                                    entry.track,
                                    entry,
                                    entry.to_lba()
                                );
                            }
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "read-sector" => {
                if let Some(fs) = fs.as_mut() {
                    if parts.len() < 2 {
                        println!("Usage: read-sector <lba|mm:ss:ff> [count]");
                        continue;
                    }
                    let Some(lba) = parse_location(&parts[1]) else {
                        println!("Invalid location: {}", parts[1]);
                        continue;
                    };
                    let count: usize = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
                    let mode = fs.options().read_mode;

                    match fs.drive_mut().read_sectors(lba, count, mode, 3) {
                        Ok(data) => {
                            println!("{} sector(s) at {} ({} bytes):", count, Position::from_lba(lba), data.len());
                            print_hex_dump(&data, 256);
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "pos" => {
                let Some(lba) = parts.get(1).and_then(|s| parse_location(s)) else {
                    println!("Usage: pos <lba|mm:ss:ff>");
                    continue;
                };
                let position = Position::from_lba(lba);
                let [m, s, f] = position.to_bytes();
                println!("LBA {} = {} (BCD {:02X} {:02X} {:02X})", lba, position, m, s, f);
            }
            "lid" => {
                if let Some(fs) = fs.as_mut() {
                    match parts.get(1).map(String::as_str) {
                        Some("open") => {
                            fs.drive_mut().controller_mut().open_lid();
                            println!("Lid opened");
                        }
                        Some("close") => {
                            fs.drive_mut().controller_mut().close_lid();
                            println!("Lid closed");
                        }
                        _ => println!("Usage: lid <open|close>"),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "swap" => {
                if let Some(fs) = fs.as_mut() {
                    if parts.len() < 2 {
                        println!("Usage: swap <path>");
                        continue;
                    }
                    match DiscImage::open(&parts[1]) {
                        Ok(image) => {
                            fs.drive_mut().controller_mut().swap_disc(Some(image));
                            println!("Inserted: {}", parts[1]);
                        }
                        Err(e) => println!("Error: {}", e),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            "save" => {
                if let Some(fs) = fs.as_ref() {
                    if parts.len() < 2 {
                        println!("Usage: save <path>");
                        continue;
                    }
                    match fs.drive().controller().disc() {
                        Some(disc) => match cdrom::io::write_image(disc, &parts[1]) {
                            Ok(()) => println!("Saved: {}", parts[1]),
                            Err(e) => println!("Error: {}", e),
                        },
                        None => println!("No disc in drive."),
                    }
                } else {
                    println!("No disc loaded.");
                }
            }
            _ => {
                println!("Unknown command: {}. Type 'help' for available commands.", command);
            }
        }
    }
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn print_help() {
    println!("Available commands:");
    println!("  open <path>                  - Open an .iso or .bin image (use quotes for paths with spaces)");
    println!("  mkdemo                       - Create a two-session demo disc in memory");
    println!("  info                         - Show filesystem information");
    println!("  label                        - Show the volume label");
    println!("  ls [dir]                     - List a directory (dir)");
    println!("  dirs                         - List every directory in the path table");
    println!("  find <path>                  - Look up a file");
    println!("  read <path>                  - Read and hex dump a file (cat)");
    println!("  export <path> [output_path]  - Export a file to the host filesystem");
    println!("  session <n>                  - Mount session n of a multi-session disc");
    println!("  status                       - Show drive status and last filesystem error");
    println!("  toc                          - Show the table of contents");
    println!("  read-sector <loc> [count]    - Read and display sectors (LBA or mm:ss:ff)");
    println!("  pos <loc>                    - Convert between LBA and mm:ss:ff");
    println!("  lid <open|close>             - Open or close the drive lid");
    println!("  swap <path>                  - Replace the disc with another image");
    println!("  save <path>                  - Save the disc image to file");
    println!("  help                         - Show this help");
    println!("  quit, exit                   - Exit");
}

fn print_info(fs: &mut Mounted) {
    if let Some(filename) = fs.drive().controller().disc().and_then(DiscImage::filename) {
        println!("Filename: {}", filename);
    }
    match fs.info() {
        Ok(info) => {
            println!("Filesystem: {}", info.fs_type);
            println!("Volume: {}", info.label);
            println!("Volume size: {} sectors of {} bytes", info.volume_sectors, info.block_size);
            println!("Directories: {}", info.directories);
            println!("Session offset: {}", info.session_offset);
        }
        Err(e) => println!("Error: {} ({})", e, fs.iso_error()),
    }
    if let Some(disc) = fs.drive().controller().disc() {
        println!("Capacity: {} bytes", disc.total_capacity());
        println!("Sessions: {:?}", disc.sessions());
    }
}

fn print_status(fs: &Mounted) {
    let drive = fs.drive();
    println!("Status: {}", drive.status());
    println!("Mode: {}", drive.mode());
    println!("Last position: {}", drive.last_position());
    if let Some(command) = drive.last_command() {
        println!("Last command: {}", command.name());
    }
    if !drive.last_response().is_empty() {
        println!("Last completion: {:02X?}", drive.last_response());
    }
    println!("Filesystem error: {}", fs.iso_error());

    let stats = drive.controller().stats();
    println!(
        "Commands sent: {}, sectors delivered: {}",
        stats.commands.len(),
        stats.total_sectors_read()
    );
    println!("Frames waited: {}", drive.controller().frames());
}

fn list_directory(fs: &mut Mounted, path: &str) {
    let cursor = match fs.open_dir(path) {
        Ok(Some(cursor)) => cursor,
        Ok(None) => {
            println!("Directory not found: {}", path);
            return;
        }
        Err(e) => {
            println!("Error: {} ({})", e, fs.iso_error());
            return;
        }
    };

    let mut count = 0;
    for entry in cursor {
        let kind = if entry.is_dir { "<DIR>" } else { "" };
        println!(
            "{:<32} {:>5} {:>10}  {}",
            entry.name,
            kind,
            entry.size,
            entry.position
        );
        count += 1;
    }
    println!("\n{} entries", count);
}

/// Name to export a disc file under: last component, version stripped
fn host_file_name(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.split(';').next().unwrap_or(name).to_string()
}

/// Accept a decimal LBA or `mm:ss:ff`
fn parse_location(s: &str) -> Option<u32> {
    if s.contains(':') {
        let lba = Position::parse_msf(s)?.to_lba();
        u32::try_from(lba).ok()
    } else {
        s.parse().ok()
    }
}

fn print_hex_dump(data: &[u8], max_bytes: usize) {
    let len = data.len().min(max_bytes);

    for (i, chunk) in data[..len].chunks(16).enumerate() {
        print!("{:04X}: ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Pad if less than 16 bytes
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            let c = if (32..127).contains(byte) {
                *byte as char
            } else {
                '.'
            };
            print!("{}", c);
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}
