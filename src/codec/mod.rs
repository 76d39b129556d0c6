//! Folder compression adapters.
//!
//! A folder's data blocks are not independent streams: the deflate and
//! LZX codecs carry dictionary state from one 32768-byte chunk to the
//! next, so one adapter instance lives for the whole folder.  Nothing is
//! allocated at construction; codec state starts on the first call and,
//! on the compress side, ends when `is_last` is passed.  The decode side
//! keeps its state past any one block's `is_last` because block and
//! folder boundaries differ — only the folder's end really finishes the
//! stream, and the caller tracks that by dropping the adapter.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use thiserror::Error;

use crate::block::CHUNK_SIZE;
use crate::error::CabError;

/// Growth allowance for compression scratch space.
const SCRATCH: usize = 6144;
/// Marker prepended to every deflate-chunk block.
const BLOCK_MARKER: [u8; 2] = [b'C', b'K'];
/// Length of the fixed "stored" escape block: marker, stored-block
/// header, one full raw chunk.
const ESCAPE_BLOCK_LEN: usize = 2 + 5 + CHUNK_SIZE;

// ── Compression type codes ───────────────────────────────────────────────────

/// The folder descriptor's compression code.  The low byte selects the
/// codec; for LZX the high byte carries the window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Store,
    MsZip,
    Lzx { window: u8 },
}

pub const MIN_LZX_WINDOW: u8 = 15;
pub const MAX_LZX_WINDOW: u8 = 21;

impl CompressionType {
    /// Decodes a descriptor code.  Code 2 is reserved and anything above
    /// 3 unknown; both are rejected, as is an LZX window outside 15..=21.
    pub fn from_code(code: u16) -> Result<Self, CodecError> {
        match code & 0x00FF {
            0 => Ok(CompressionType::Store),
            1 => Ok(CompressionType::MsZip),
            3 => {
                let window = (code >> 8) as u8;
                if !(MIN_LZX_WINDOW..=MAX_LZX_WINDOW).contains(&window) {
                    return Err(CodecError::BadWindow(window));
                }
                Ok(CompressionType::Lzx { window })
            }
            _ => Err(CodecError::Unsupported(code)),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            CompressionType::Store => 0,
            CompressionType::MsZip => 1,
            CompressionType::Lzx { window } => u16::from(window) << 8 | 3,
        }
    }

    /// Parses a CLI name: `none`, `mszip` or `lzx:NN`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        match name.as_str() {
            "none" | "store" => Some(CompressionType::Store),
            "mszip" => Some(CompressionType::MsZip),
            _ => {
                let window: u8 = name.strip_prefix("lzx:")?.parse().ok()?;
                if (MIN_LZX_WINDOW..=MAX_LZX_WINDOW).contains(&window) {
                    Some(CompressionType::Lzx { window })
                } else {
                    None
                }
            }
        }
    }

    /// Display name (diagnostics and listings only).
    pub fn name(self) -> String {
        match self {
            CompressionType::Store => "none".to_string(),
            CompressionType::MsZip => "mszip".to_string(),
            CompressionType::Lzx { window } => format!("lzx:{window}"),
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported compression code {0:#06x}")]
    Unsupported(u16),
    #[error("LZX window size {0} out of range 15..=21")]
    BadWindow(u8),
    #[error("deflate error: {0}")]
    Deflate(String),
    #[error("inflate error: {0}")]
    Inflate(String),
    #[error("LZX decode error: {0}")]
    Lzx(String),
    #[error("block declared {expected} uncompressed bytes, produced {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("codec produced no output")]
    EmptyOutput,
    #[error("LZX compression is not supported when creating cabinets")]
    LzxEncodeUnsupported,
}

impl From<CodecError> for CabError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unsupported(code) => CabError::UnsupportedCompression(code),
            CodecError::BadWindow(window) => CabError::BadLzxWindow(window),
            other => CabError::Codec(other.to_string()),
        }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec {
    /// Compresses one chunk into a framed block payload.  `is_last` marks
    /// the folder's final block and finishes (and frees) the compressor
    /// state.
    fn compress(&mut self, chunk: &[u8], is_last: bool) -> Result<Vec<u8>, CodecError>;

    /// Decompresses one block payload.  `original_size` is the block's
    /// declared uncompressed length.  Decoder state survives `is_last`;
    /// see the module documentation.
    fn decompress(
        &mut self,
        chunk: &[u8],
        original_size: usize,
        is_last: bool,
    ) -> Result<Vec<u8>, CodecError>;

    /// True while codec state is live.
    fn is_initialized(&self) -> bool;
}

/// Builds the adapter for a folder.  Called lazily on first use; one
/// instance must never serve two folders.
pub fn make_codec(ctype: CompressionType) -> Box<dyn Codec> {
    match ctype {
        CompressionType::Store => Box::new(StoreCodec::default()),
        CompressionType::MsZip => Box::new(MsZipCodec::default()),
        CompressionType::Lzx { window } => Box::new(LzxCodec::new(window)),
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Identity adapter: compressed bytes equal original bytes.
#[derive(Default)]
pub struct StoreCodec {
    initialized: bool,
}

impl Codec for StoreCodec {
    fn compress(&mut self, chunk: &[u8], is_last: bool) -> Result<Vec<u8>, CodecError> {
        self.initialized = !is_last;
        Ok(chunk.to_vec())
    }

    fn decompress(
        &mut self,
        chunk: &[u8],
        original_size: usize,
        _is_last: bool,
    ) -> Result<Vec<u8>, CodecError> {
        self.initialized = true;
        if chunk.len() != original_size {
            return Err(CodecError::LengthMismatch {
                expected: original_size,
                actual: chunk.len(),
            });
        }
        Ok(chunk.to_vec())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

// ── Deflate chunks ───────────────────────────────────────────────────────────

/// Streaming raw-deflate adapter.  The deflate stream spans all of a
/// folder's chunks: each block is emitted with a sync flush and only the
/// last one finishes the stream.
#[derive(Default)]
pub struct MsZipCodec {
    deflater: Option<Compress>,
    inflater: Option<Decompress>,
}

impl Codec for MsZipCodec {
    fn compress(&mut self, chunk: &[u8], is_last: bool) -> Result<Vec<u8>, CodecError> {
        let deflater = self
            .deflater
            .get_or_insert_with(|| Compress::new(Compression::new(6), false));
        let flush = if is_last {
            FlushCompress::Finish
        } else {
            FlushCompress::Sync
        };

        let mut out: Vec<u8> = Vec::with_capacity(CHUNK_SIZE + SCRATCH);
        let start_in = deflater.total_in();
        loop {
            let consumed = (deflater.total_in() - start_in) as usize;
            let status = deflater
                .compress_vec(&chunk[consumed..], &mut out, flush)
                .map_err(|e| CodecError::Deflate(e.to_string()))?;
            let consumed = (deflater.total_in() - start_in) as usize;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    // A finishing stream only ends on StreamEnd; a sync
                    // flush is complete once input is gone and the output
                    // buffer wasn't exhausted.
                    if !is_last && consumed == chunk.len() && out.len() < out.capacity() {
                        break;
                    }
                    out.reserve(SCRATCH);
                }
            }
        }
        if is_last {
            self.deflater = None;
        }

        // An incompressible full chunk must never inflate the block: emit
        // the fixed-size stored escape frame instead.
        if out.len() > CHUNK_SIZE && chunk.len() == CHUNK_SIZE {
            let mut escaped = Vec::with_capacity(ESCAPE_BLOCK_LEN);
            escaped.extend_from_slice(&BLOCK_MARKER);
            // BFINAL=1/BTYPE=stored, LEN=0x8000, NLEN=0x7FFF
            escaped.extend_from_slice(&[0x01, 0x00, 0x80, 0xFF, 0x7F]);
            escaped.extend_from_slice(chunk);
            return Ok(escaped);
        }

        let mut framed = Vec::with_capacity(2 + out.len());
        framed.extend_from_slice(&BLOCK_MARKER);
        framed.extend_from_slice(&out);
        Ok(framed)
    }

    fn decompress(
        &mut self,
        chunk: &[u8],
        original_size: usize,
        _is_last: bool,
    ) -> Result<Vec<u8>, CodecError> {
        // A stored escape frame bypasses the inflater entirely.
        if chunk.len() == ESCAPE_BLOCK_LEN && chunk[2] == 0x01 {
            return Ok(chunk[7..].to_vec());
        }
        if chunk.len() < 2 {
            return Err(CodecError::Inflate("block shorter than its marker".into()));
        }

        let inflater = self.inflater.get_or_insert_with(|| Decompress::new(false));
        let data = &chunk[2..];
        let mut out: Vec<u8> = Vec::with_capacity(original_size.max(1));
        let start_in = inflater.total_in();
        loop {
            let consumed = (inflater.total_in() - start_in) as usize;
            let status = inflater
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| CodecError::Inflate(e.to_string()))?;
            let consumed = (inflater.total_in() - start_in) as usize;
            match status {
                Status::StreamEnd => break,
                Status::Ok => {
                    if consumed == data.len() {
                        break;
                    }
                    out.reserve(SCRATCH);
                }
                Status::BufError => {
                    if out.len() == out.capacity() {
                        out.reserve(SCRATCH);
                    } else {
                        return Err(CodecError::Inflate("inflate stalled mid-block".into()));
                    }
                }
            }
        }
        if out.is_empty() && original_size > 0 {
            return Err(CodecError::EmptyOutput);
        }
        Ok(out)
    }

    fn is_initialized(&self) -> bool {
        self.deflater.is_some() || self.inflater.is_some()
    }
}

// ── LZX chunks ───────────────────────────────────────────────────────────────

/// LZX adapter.  Decoding keeps window state across all of a folder's
/// blocks; there is no ecosystem LZX encoder, so compression is refused.
pub struct LzxCodec {
    window: u8,
    decoder: Option<lzxd::Lzxd>,
}

impl LzxCodec {
    pub fn new(window: u8) -> Self {
        Self {
            window,
            decoder: None,
        }
    }

    fn window_size(window: u8) -> lzxd::WindowSize {
        match window {
            15 => lzxd::WindowSize::KB32,
            16 => lzxd::WindowSize::KB64,
            17 => lzxd::WindowSize::KB128,
            18 => lzxd::WindowSize::KB256,
            19 => lzxd::WindowSize::KB512,
            20 => lzxd::WindowSize::MB1,
            _ => lzxd::WindowSize::MB2,
        }
    }
}

impl Codec for LzxCodec {
    fn compress(&mut self, _chunk: &[u8], _is_last: bool) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::LzxEncodeUnsupported)
    }

    fn decompress(
        &mut self,
        chunk: &[u8],
        original_size: usize,
        _is_last: bool,
    ) -> Result<Vec<u8>, CodecError> {
        let window = self.window;
        let decoder = self
            .decoder
            .get_or_insert_with(|| lzxd::Lzxd::new(Self::window_size(window)));
        let out = decoder
            .decompress_next(chunk, original_size)
            .map_err(|e| CodecError::Lzx(format!("{e:?}")))?;
        if out.is_empty() && original_size > 0 {
            return Err(CodecError::EmptyOutput);
        }
        Ok(out.to_vec())
    }

    fn is_initialized(&self) -> bool {
        self.decoder.is_some()
    }
}
