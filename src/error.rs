use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error type.
///
/// Structural errors on load (`BadSignature`, `BadVersion`, truncated
/// reads) are fatal for the whole archive; an `Integrity` failure aborts
/// only the extraction request that hit the bad block; write-side limit
/// violations fail the current add and leave the in-memory model intact.
#[derive(Error, Debug)]
pub enum CabError {
    #[error("not a cabinet: bad signature")]
    BadSignature,
    #[error("unsupported cabinet version {major}.{minor}")]
    BadVersion { major: u8, minor: u8 },
    #[error("data block checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Integrity { stored: u32, computed: u32 },
    #[error("'{0}' is 4 GiB or larger and cannot be stored")]
    FileTooLarge(PathBuf),
    #[error("cabinet cannot hold more than 65534 files")]
    TooManyFiles,
    #[error("item name '{0}' is longer than 255 bytes")]
    NameTooLong(String),
    #[error("folder exceeds the maximum uncompressed size")]
    FolderTooLarge,
    #[error("cabinet exceeds the maximum representable size")]
    CabinetTooLarge,
    #[error("cabinet cannot hold more than 65535 folders")]
    TooManyFolders,
    #[error("unsupported compression code {0:#06x}")]
    UnsupportedCompression(u16),
    #[error("LZX window size {0} out of range 15..=21")]
    BadLzxWindow(u8),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CabError>;
