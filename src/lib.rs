pub mod archive;
pub mod block;
pub mod checksum;
pub mod codec;
pub mod entry;
pub mod error;
pub mod folder;
pub mod header;
pub mod wildcard;

pub use archive::{ArchiveReader, ArchiveWriter, CreateOptions, ExtractOptions};
pub use codec::{Codec, CompressionType};
pub use error::{CabError, Result};
pub use header::CabinetHeader;
