use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use cabkit::block::DataBlock;
use cabkit::folder::Folder;
use cabkit::{
    ArchiveReader, ArchiveWriter, CabinetHeader, CompressionType, CreateOptions, ExtractOptions,
};

#[derive(Parser)]
#[command(name = "cabkit", about = "Cabinet archive tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cabinet contents
    List {
        archive: PathBuf,
        /// Only show entries matching this wildcard
        pattern: Option<String>,
    },
    /// Show header, folder and block structures
    Dump { archive: PathBuf },
    /// Extract file(s) from a cabinet
    Extract {
        archive: PathBuf,
        /// Wildcard patterns selecting entries (default: everything)
        patterns: Vec<String>,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Overwrite existing files without asking
        #[arg(short, long)]
        overwrite: bool,
        /// Preserve stored path names (default extracts base names)
        #[arg(short = 'p', long)]
        preserve_paths: bool,
        /// Strip this prefix from names when extracting
        #[arg(short = 'P', long = "strip")]
        strip: Vec<String>,
    },
    /// Create a new cabinet
    Create {
        output: PathBuf,
        /// Files or directories to add
        inputs: Vec<PathBuf>,
        /// Compression: none, mszip or lzx:15..21
        #[arg(short = 'm', long, default_value = "mszip")]
        compression: String,
        /// Recurse into subdirectories when adding directories
        #[arg(short, long)]
        recursive: bool,
        /// Preserve path names when storing (default keeps base names)
        #[arg(short = 'p', long)]
        preserve_paths: bool,
        /// Strip this prefix from names when storing
        #[arg(short = 'P', long = "strip")]
        strip: Vec<String>,
        /// Cabinet set id
        #[arg(short = 'i', long, default_value_t = 0)]
        set_id: u16,
        /// Bytes to reserve in the cabinet, e.g. for signing
        #[arg(short = 's', long, default_value_t = 0)]
        reserve: u16,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive, pattern } => {
            let reader = ArchiveReader::open(&archive)?;
            let header = reader.header();
            println!("Listing of cabinet file '{}' (size {})", archive.display(), header.cab_size);
            println!(
                "   {} file(s), {} folder(s), set ID {}, cabinet #{}\n",
                header.file_count, header.folder_count, header.set_id, header.cab_index
            );
            println!("File name                      File size    Date       Time   Attrs");
            println!("-----------------------------  ---------- ---------- -------- -----");
            let entries = match &pattern {
                Some(p) => reader.find(p),
                None => reader.entries().collect(),
            };
            for (_, file) in entries {
                let stamp = file
                    .timestamp()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "----------        ".to_string());
                println!(
                    "   {:<29} {:>8} {}  {}",
                    file.name,
                    file.size,
                    stamp,
                    file.attributes_string()
                );
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { archive } => {
            let mut cab = File::open(&archive)?;
            let header = CabinetHeader::read(&mut cab)?;
            println!("Cabinet Header");
            println!(
                "CFHEADER cab_size={}, files_offset={:08X}h, folders={}, files={}, flags={:04X}h, reserve={}",
                header.cab_size,
                header.files_offset,
                header.folder_count,
                header.file_count,
                header.flags,
                header.cab_reserve
            );

            cab.seek(SeekFrom::Start(u64::from(header.byte_len())))?;
            let mut folders = Vec::new();
            for _ in 0..header.folder_count {
                folders.push(Folder::read(
                    &mut cab,
                    header.folder_reserve,
                    header.block_reserve,
                )?);
            }

            println!("\nCabinet Files");
            cab.seek(SeekFrom::Start(u64::from(header.files_offset)))?;
            for _ in 0..header.file_count {
                let pos = cab.stream_position()?;
                let file = cabkit::entry::FileEntry::read(&mut cab)?;
                println!(
                    "@{:08X}h CFFILE={}, size={}, folder_offset={}, span={}",
                    pos, file.name, file.size, file.folder_offset, file.folder_span
                );
            }

            println!("\nCabinet Folders");
            for folder in &folders {
                println!(
                    "CFFOLDER data_offset={:08X}h, blocks={}, compression={}",
                    folder.data_offset,
                    folder.block_count,
                    folder.compression().name()
                );
                cab.seek(SeekFrom::Start(u64::from(folder.data_offset)))?;
                for _ in 0..folder.block_count {
                    let pos = cab.stream_position()?;
                    let block = DataBlock::read(&mut cab, header.block_reserve)?;
                    let state = if block.checksum == 0 {
                        "absent"
                    } else if block.verify().is_ok() {
                        "ok"
                    } else {
                        "BAD"
                    };
                    println!(
                        "@{:08X}h CFDATA crc={:08X} ({}), u/c size={}/{}",
                        pos, block.checksum, state, block.original_size, block.compressed_size
                    );
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract {
            archive,
            patterns,
            output_dir,
            overwrite,
            preserve_paths,
            strip,
        } => {
            let mut reader = ArchiveReader::open(&archive)?;
            println!("Extracting file(s) from cabinet '{}'", archive.display());
            let opts = ExtractOptions {
                dest: output_dir,
                overwrite,
                strip: strip_rules(preserve_paths, strip),
            };
            let written = reader.extract(&patterns, &opts)?;
            for path in &written {
                println!("   extracting: {}", path.display());
            }
            println!("\n{} file(s) extracted", written.len());
        }

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create {
            output,
            inputs,
            compression,
            recursive,
            preserve_paths,
            strip,
            set_id,
            reserve,
        } => {
            let compression = CompressionType::from_name(&compression)
                .ok_or_else(|| format!("unknown compression type '{compression}'"))?;
            let opts = CreateOptions {
                compression,
                set_id,
                cab_reserve: reserve,
                strip: strip_rules(preserve_paths, strip),
            };
            let mut writer = ArchiveWriter::create(&output, opts)?;
            for input in &inputs {
                if input.is_dir() {
                    for path in writer.add_dir(input, "*", recursive)? {
                        println!("  -- adding: {}", path.display());
                    }
                } else {
                    writer.add_file(input)?;
                    println!("  -- adding: {}", input.display());
                }
            }
            let count = writer.file_count();
            writer.finish()?;
            println!("Created: {} ({} file(s))", output.display(), count);
        }
    }

    Ok(())
}

// Base names are stored unless paths are preserved; explicit prefixes
// strip on top of either.
fn strip_rules(preserve_paths: bool, extra: Vec<String>) -> Vec<String> {
    let mut rules = if preserve_paths {
        Vec::new()
    } else {
        vec!["*".to_string()]
    };
    rules.extend(extra);
    rules
}
