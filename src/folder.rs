use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

use crate::block::{DataBlock, CHUNK_SIZE};
use crate::codec::{make_codec, Codec, CompressionType};
use crate::entry::{FileEntry, ATTR_ARCHIVE, ATTR_READ_ONLY};
use crate::error::{CabError, Result};

/// One folder: a compression unit owning its file entries and the framing
/// of its data blocks.
///
/// The folder never owns the archive stream; every operation borrows it
/// from the caller.  Codec state is created lazily on first use and is
/// strictly per-folder — the decoder for block `n` may depend on every
/// block before it, which is what forces the replay logic in
/// [`Folder::copy_range`].
pub struct Folder {
    /// Absolute offset of the first data block.
    pub data_offset: u32,
    /// Number of data blocks belonging to this folder.
    pub block_count: u16,
    pub entries: Vec<FileEntry>,
    compression: CompressionType,
    /// Per-folder reserved trailer declared in the header.
    reserve: u8,
    /// Per-block reserved prefix declared in the header.
    block_reserve: u8,
    codec: Option<Box<dyn Codec>>,
    /// Where this folder's descriptor was written, for the final rewrite.
    pub(crate) descriptor_pos: u64,
    /// Running uncompressed size; the offset the next added file gets.
    next_offset: u32,
    /// Stream offset of the next undecoded block.
    stream_pos: u64,
    /// Most recently decoded block and its index.
    cached: Option<(u32, Vec<u8>)>,
}

impl Folder {
    pub fn new(compression: CompressionType, reserve: u8, block_reserve: u8) -> Self {
        Self {
            data_offset: 0,
            block_count: 0,
            entries: Vec::new(),
            compression,
            reserve,
            block_reserve,
            codec: None,
            descriptor_pos: 0,
            next_offset: 0,
            stream_pos: 0,
            cached: None,
        }
    }

    /// Reads a descriptor, skipping the reserved trailer when declared.
    pub fn read<R: Read>(input: &mut R, reserve: u8, block_reserve: u8) -> Result<Self> {
        let data_offset = input.read_u32::<LittleEndian>()?;
        let block_count = input.read_u16::<LittleEndian>()?;
        let code = input.read_u16::<LittleEndian>()?;
        let compression = CompressionType::from_code(code)?;
        if reserve > 0 {
            let mut skipped = vec![0u8; usize::from(reserve)];
            input.read_exact(&mut skipped)?;
        }
        let mut folder = Self::new(compression, reserve, block_reserve);
        folder.data_offset = data_offset;
        folder.block_count = block_count;
        folder.stream_pos = u64::from(data_offset);
        Ok(folder)
    }

    pub fn write_descriptor<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.data_offset)?;
        out.write_u16::<LittleEndian>(self.block_count)?;
        out.write_u16::<LittleEndian>(self.compression.code())?;
        if self.reserve > 0 {
            out.write_all(&vec![0u8; usize::from(self.reserve)])?;
        }
        Ok(())
    }

    /// Compression is fixed for the folder's lifetime; entries added later
    /// all share it.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Uncompressed length of the folder stream so far.
    pub fn stream_len(&self) -> u32 {
        self.next_offset
    }

    pub fn descriptor_len(&self) -> usize {
        8 + usize::from(self.reserve)
    }

    // ── Building ─────────────────────────────────────────────────────────────

    /// Appends a source file.  The entry records the file's current size,
    /// timestamp and attributes; bytes are pulled in later by
    /// [`Folder::write_data`].  On any failure the entry list is left
    /// unchanged.
    pub fn add_file(&mut self, path: &Path, strip: &[String]) -> Result<()> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) | Err(_) => return Err(CabError::NotFound(path.display().to_string())),
        };
        if meta.len() > u64::from(u32::MAX) {
            return Err(CabError::FileTooLarge(path.to_owned()));
        }
        let size = meta.len() as u32;
        let next_offset = self
            .next_offset
            .checked_add(size)
            .ok_or(CabError::FolderTooLarge)?;

        let mut entry = FileEntry {
            size,
            folder_offset: self.next_offset,
            ..Default::default()
        };
        entry.set_stored_name(&path.to_string_lossy(), strip)?;
        entry.attributes = ATTR_ARCHIVE;
        if meta.permissions().readonly() {
            entry.attributes |= ATTR_READ_ONLY;
        }
        if let Ok(modified) = meta.modified() {
            entry.set_timestamp(DateTime::<Local>::from(modified).naive_local());
        }
        entry.source = Some(path.to_owned());

        self.entries.push(entry);
        self.next_offset = next_offset;
        Ok(())
    }

    // ── Writing the data blocks ──────────────────────────────────────────────

    /// Streams every entry's bytes through the folder's codec and emits
    /// the data block sequence, then rewrites the descriptor at its
    /// reserved position with the resolved offset and count.
    ///
    /// Chunks are accumulated across file boundaries: one block may hold
    /// the tail of one file and the head of the next.  A block goes out
    /// when the buffer is exactly full, or when the last file drains.
    pub fn write_data<W: Write + Seek>(&mut self, out: &mut W) -> Result<()> {
        self.data_offset = position32(out)?;
        self.block_count = 0;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut pending = 0usize;
        let total = self.entries.len();

        for index in 0..total {
            let last_file = index + 1 == total;
            let (source, size) = {
                let entry = &self.entries[index];
                match &entry.source {
                    Some(source) => (source.clone(), u64::from(entry.size)),
                    None => return Err(CabError::NotFound(entry.name.clone())),
                }
            };
            debug!(path = %source.display(), size, "folding file into data stream");

            let mut file = File::open(&source)?;
            let mut remaining = size;
            while remaining > 0 {
                let want = (CHUNK_SIZE - pending).min(remaining as usize);
                file.read_exact(&mut buf[pending..pending + want])?;
                pending += want;
                remaining -= want as u64;
                if pending == CHUNK_SIZE {
                    let is_last = last_file && remaining == 0;
                    self.emit_block(out, &buf[..CHUNK_SIZE], is_last)?;
                    pending = 0;
                }
            }
            // `file` closes here, before the next entry is touched.
        }

        if pending > 0 {
            self.emit_block(out, &buf[..pending], true)?;
        }

        let end = out.stream_position()?;
        out.seek(SeekFrom::Start(self.descriptor_pos))?;
        self.write_descriptor(out)?;
        out.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn emit_block<W: Write>(&mut self, out: &mut W, chunk: &[u8], is_last: bool) -> Result<()> {
        let compression = self.compression;
        let codec = self.codec.get_or_insert_with(|| make_codec(compression));
        let compressed = codec.compress(chunk, is_last)?;
        let block = DataBlock::new(compressed, chunk.len() as u16);
        block.write(out, self.block_reserve)?;
        self.block_count = self
            .block_count
            .checked_add(1)
            .ok_or(CabError::FolderTooLarge)?;
        trace!(
            block = self.block_count - 1,
            original = block.original_size,
            compressed = block.compressed_size,
            "emitted data block"
        );
        Ok(())
    }

    // ── Random access ────────────────────────────────────────────────────────

    /// Copies `length` bytes starting at `offset` of this folder's logical
    /// uncompressed stream into `out`.
    ///
    /// Decompression is sequential, so reaching an arbitrary offset means
    /// either reusing the cached block, replaying forward from the live
    /// decode position, or dropping codec state and restarting from the
    /// folder's first block (the only way to move backwards).
    pub fn copy_range<R, W>(&mut self, cab: &mut R, out: &mut W, offset: u32, length: u32) -> Result<()>
    where
        R: Read + Seek,
        W: Write + ?Sized,
    {
        if length == 0 {
            return Ok(());
        }
        let start_block = offset / CHUNK_SIZE as u32;
        let cached_hit = matches!(&self.cached, Some((index, _)) if *index == start_block);

        if !cached_hit {
            let live = self.codec.as_ref().is_some_and(|c| c.is_initialized());
            let mut next = match &self.cached {
                Some((index, _)) if live && start_block > *index => *index + 1,
                _ => {
                    if live {
                        debug!(start_block, "target behind decode position, restarting folder");
                    }
                    self.reset_decode_state();
                    0
                }
            };
            // Replay: decode and discard everything up to the target.
            while next < start_block {
                trace!(block = next, "skipping block towards target");
                let data = self.decode_block(cab, next, false)?;
                self.cached = Some((next, data));
                next += 1;
            }
        }

        let mut skip = offset as usize % CHUNK_SIZE;
        let mut remaining = length as usize;
        let mut index = start_block;
        let mut current = if cached_hit { self.cached.take() } else { None };

        while remaining > 0 {
            let (block_index, data) = match current.take() {
                Some(cached) => cached,
                None => {
                    let satisfies = remaining + skip <= CHUNK_SIZE;
                    (index, self.decode_block(cab, index, satisfies)?)
                }
            };
            let end = (skip + remaining).min(data.len());
            if skip < data.len() {
                out.write_all(&data[skip..end])?;
                remaining -= end - skip;
            }
            skip = 0;
            index = block_index + 1;
            self.cached = Some((block_index, data));
        }

        Ok(())
    }

    /// Decodes the block at `index`, which must be the next one in stream
    /// order.  Checksums are enforced here: a present, mismatching
    /// checksum kills the whole request.
    fn decode_block<R: Read + Seek>(
        &mut self,
        cab: &mut R,
        index: u32,
        is_last: bool,
    ) -> Result<Vec<u8>> {
        if index >= u32::from(self.block_count) {
            return Err(CabError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "request runs past the folder's last data block",
            )));
        }
        cab.seek(SeekFrom::Start(self.stream_pos))?;
        let block = DataBlock::read(cab, self.block_reserve)?;
        block.verify()?;
        let compression = self.compression;
        let codec = self.codec.get_or_insert_with(|| make_codec(compression));
        let data = codec.decompress(&block.data, usize::from(block.original_size), is_last)?;
        self.stream_pos = cab.stream_position()?;
        Ok(data)
    }

    fn reset_decode_state(&mut self) {
        self.codec = None;
        self.cached = None;
        self.stream_pos = u64::from(self.data_offset);
    }
}

pub(crate) fn position32<S: Seek>(stream: &mut S) -> Result<u32> {
    let pos = stream.stream_position()?;
    u32::try_from(pos).map_err(|_| CabError::CabinetTooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DataBlock;
    use std::io::Cursor;

    // Builds an in-memory folder data area of store blocks plus a folder
    // positioned at its start.
    fn store_folder(chunks: &[&[u8]]) -> (Folder, Cursor<Vec<u8>>) {
        let mut data = Vec::new();
        for chunk in chunks {
            DataBlock::new(chunk.to_vec(), chunk.len() as u16)
                .write(&mut data, 0)
                .unwrap();
        }
        let mut descriptor = Vec::new();
        descriptor.extend_from_slice(&0u32.to_le_bytes());
        descriptor.extend_from_slice(&(chunks.len() as u16).to_le_bytes());
        descriptor.extend_from_slice(&0u16.to_le_bytes());
        let folder = Folder::read(&mut Cursor::new(&descriptor), 0, 0).unwrap();
        (folder, Cursor::new(data))
    }

    fn pattern(len: usize, salt: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ salt).collect()
    }

    #[test]
    fn full_stream_copy() {
        let a = pattern(CHUNK_SIZE, 1);
        let b = pattern(CHUNK_SIZE, 2);
        let c = pattern(100, 3);
        let (mut folder, mut cab) = store_folder(&[&a, &b, &c]);

        let mut out = Vec::new();
        folder
            .copy_range(&mut cab, &mut out, 0, (CHUNK_SIZE * 2 + 100) as u32)
            .unwrap();
        let mut expected = a.clone();
        expected.extend_from_slice(&b);
        expected.extend_from_slice(&c);
        assert_eq!(out, expected);
    }

    #[test]
    fn mid_block_and_straddling_ranges() {
        let a = pattern(CHUNK_SIZE, 1);
        let b = pattern(CHUNK_SIZE, 2);
        let (mut folder, mut cab) = store_folder(&[&a, &b]);

        // Inside the first block.
        let mut out = Vec::new();
        folder.copy_range(&mut cab, &mut out, 10, 50).unwrap();
        assert_eq!(out, &a[10..60]);

        // Straddling the block boundary.
        let mut out = Vec::new();
        folder
            .copy_range(&mut cab, &mut out, CHUNK_SIZE as u32 - 25, 50)
            .unwrap();
        let mut expected = a[CHUNK_SIZE - 25..].to_vec();
        expected.extend_from_slice(&b[..25]);
        assert_eq!(out, expected);
    }

    #[test]
    fn block_aligned_range() {
        let a = pattern(CHUNK_SIZE, 4);
        let b = pattern(CHUNK_SIZE, 5);
        let (mut folder, mut cab) = store_folder(&[&a, &b]);

        let mut out = Vec::new();
        folder
            .copy_range(&mut cab, &mut out, CHUNK_SIZE as u32, CHUNK_SIZE as u32)
            .unwrap();
        assert_eq!(out, b);
    }

    #[test]
    fn backward_request_restarts_from_folder_start() {
        let a = pattern(CHUNK_SIZE, 6);
        let b = pattern(CHUNK_SIZE, 7);
        let (mut folder, mut cab) = store_folder(&[&a, &b]);

        let mut out = Vec::new();
        folder
            .copy_range(&mut cab, &mut out, CHUNK_SIZE as u32 + 5, 10)
            .unwrap();
        assert_eq!(out, &b[5..15]);

        // Now jump backwards; the decoder must resynchronize.
        let mut out = Vec::new();
        folder.copy_range(&mut cab, &mut out, 5, 10).unwrap();
        assert_eq!(out, &a[5..15]);
    }

    #[test]
    fn sequential_reads_reuse_the_cached_block() {
        let a = pattern(CHUNK_SIZE, 8);
        let (mut folder, mut cab) = store_folder(&[&a]);

        let mut out = Vec::new();
        folder.copy_range(&mut cab, &mut out, 0, 100).unwrap();
        assert_eq!(out, &a[..100]);

        // Truncate the backing stream: a second read of the same block can
        // only succeed through the cache.
        let mut empty = Cursor::new(Vec::new());
        let mut out = Vec::new();
        folder.copy_range(&mut empty, &mut out, 100, 100).unwrap();
        assert_eq!(out, &a[100..200]);
    }

    #[test]
    fn corrupted_checksum_aborts_request() {
        let a = pattern(CHUNK_SIZE, 9);
        let (mut folder, mut cab) = store_folder(&[&a]);
        // Force a wrong, nonzero checksum.
        let raw = cab.get_mut();
        raw[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let mut out = Vec::new();
        let err = folder.copy_range(&mut cab, &mut out, 0, 10).unwrap_err();
        assert!(matches!(err, CabError::Integrity { .. }));
    }

    #[test]
    fn zero_checksum_is_accepted() {
        let a = pattern(200, 10);
        let (mut folder, mut cab) = store_folder(&[&a]);
        let raw = cab.get_mut();
        raw[0..4].copy_from_slice(&0u32.to_le_bytes());

        let mut out = Vec::new();
        folder.copy_range(&mut cab, &mut out, 0, 200).unwrap();
        assert_eq!(out, a);
    }

    #[test]
    fn range_past_folder_end_fails() {
        let a = pattern(100, 11);
        let (mut folder, mut cab) = store_folder(&[&a]);
        let mut out = Vec::new();
        let err = folder
            .copy_range(&mut cab, &mut out, 0, 5000)
            .unwrap_err();
        assert!(matches!(err, CabError::Io(_)));
    }

    #[test]
    fn descriptor_roundtrip() {
        let mut folder = Folder::new(CompressionType::Lzx { window: 18 }, 4, 0);
        folder.data_offset = 0x1000;
        folder.block_count = 7;

        let mut buf = Vec::new();
        folder.write_descriptor(&mut buf).unwrap();
        assert_eq!(buf.len(), folder.descriptor_len());

        let parsed = Folder::read(&mut Cursor::new(&buf), 4, 0).unwrap();
        assert_eq!(parsed.data_offset, 0x1000);
        assert_eq!(parsed.block_count, 7);
        assert_eq!(parsed.compression(), CompressionType::Lzx { window: 18 });
    }
}
