//! High-level cabinet reader and writer.
//!
//! ```no_run
//! use cabkit::{ArchiveReader, ArchiveWriter, CreateOptions, ExtractOptions};
//!
//! // Write
//! let mut cab = ArchiveWriter::create("out.cab", CreateOptions::default())?;
//! cab.add_file("readme.txt")?;
//! cab.finish()?;
//!
//! // Read
//! let mut cab = ArchiveReader::open("out.cab")?;
//! cab.extract(&[], &ExtractOptions::default())?;
//! # Ok::<(), cabkit::CabError>(())
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::codec::CompressionType;
use crate::entry::{self, FileEntry, ATTR_READ_ONLY};
use crate::error::{CabError, Result};
use crate::folder::{position32, Folder};
use crate::header::CabinetHeader;
use crate::wildcard;

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`ArchiveWriter`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub compression: CompressionType,
    pub set_id: u16,
    /// Bytes to reserve in the header, e.g. for signing.
    pub cab_reserve: u16,
    /// Stored-name strip rules; a leading `"*"` keeps base names only.
    pub strip: Vec<String>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            compression: CompressionType::MsZip,
            set_id: 0,
            cab_reserve: 0,
            strip: vec!["*".to_string()],
        }
    }
}

/// Configuration for [`ArchiveReader::extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub dest: PathBuf,
    /// Replace existing files; when unset they are skipped.
    pub overwrite: bool,
    /// Strip rules applied to stored names before writing out.
    pub strip: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dest: PathBuf::from("."),
            overwrite: false,
            strip: vec!["*".to_string()],
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ArchiveReader<R: Read + Seek> {
    cab: R,
    header: CabinetHeader,
    folders: Vec<Folder>,
}

impl ArchiveReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                CabError::NotFound(path.display().to_string())
            } else {
                CabError::Io(err)
            }
        })?;
        Self::new(file)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Parses the header, the folder descriptors sitting right after it,
    /// and the file-entry table, building the folder/file index.
    pub fn new(mut cab: R) -> Result<Self> {
        let header = CabinetHeader::read(&mut cab)?;

        cab.seek(SeekFrom::Start(u64::from(header.byte_len())))?;
        let mut folders = Vec::with_capacity(usize::from(header.folder_count));
        for _ in 0..header.folder_count {
            folders.push(Folder::read(
                &mut cab,
                header.folder_reserve,
                header.block_reserve,
            )?);
        }

        cab.seek(SeekFrom::Start(u64::from(header.files_offset)))?;
        // Entries carry no folder index; a drop in the intra-folder offset
        // marks the start of the next folder.  This assumes the table is
        // offset-ascending per folder, as the matching writers emit it —
        // tables violating that are silently mis-assigned.  Known
        // limitation, kept for compatibility.
        let mut folder_index = 0usize;
        let mut last_offset = 0u32;
        for _ in 0..header.file_count {
            let file = FileEntry::read(&mut cab)?;
            if file.folder_offset < last_offset {
                folder_index += 1;
            }
            last_offset = file.folder_offset;
            match folders.get_mut(folder_index) {
                Some(folder) => folder.entries.push(file),
                None => {
                    return Err(CabError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "file table implies more folders than declared",
                    )))
                }
            }
        }

        debug!(
            folders = folders.len(),
            files = header.file_count,
            "cabinet opened"
        );
        Ok(Self {
            cab,
            header,
            folders,
        })
    }

    pub fn header(&self) -> &CabinetHeader {
        &self.header
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    /// Every entry, paired with the index of its folder.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &FileEntry)> {
        self.folders
            .iter()
            .enumerate()
            .flat_map(|(index, folder)| folder.entries.iter().map(move |e| (index, e)))
    }

    /// Entries whose base name matches the wildcard pattern.  Matching
    /// always runs on the name without its path, even when paths are
    /// stored.
    pub fn find(&self, pattern: &str) -> Vec<(usize, &FileEntry)> {
        self.entries()
            .filter(|(_, e)| wildcard::matches(base_name(&e.name), pattern, true))
            .collect()
    }

    /// Extracts every entry matching any of `patterns` (all of them when
    /// the list is empty) and returns the paths written.
    ///
    /// The selection is processed in ascending intra-folder offset order
    /// so forward-sequential reads hit the folder's block cache.
    pub fn extract(&mut self, patterns: &[String], opts: &ExtractOptions) -> Result<Vec<PathBuf>> {
        let mut selected: Vec<(usize, usize)> = Vec::new();
        for (fi, folder) in self.folders.iter().enumerate() {
            for (ei, file) in folder.entries.iter().enumerate() {
                let wanted = patterns.is_empty()
                    || patterns
                        .iter()
                        .any(|p| wildcard::matches(base_name(&file.name), p, true));
                if wanted {
                    selected.push((fi, ei));
                }
            }
        }
        selected.sort_by_key(|&(fi, ei)| (fi, self.folders[fi].entries[ei].folder_offset));

        let mut written = Vec::new();
        let Self { cab, folders, .. } = self;
        for (fi, ei) in selected {
            let folder = &mut folders[fi];
            let (stored_name, offset, size, attributes) = {
                let file = &folder.entries[ei];
                (
                    file.name.clone(),
                    file.folder_offset,
                    file.size,
                    file.attributes,
                )
            };
            let out_name = entry::derive_stored_name(&stored_name, &opts.strip)?;
            let out_path = opts.dest.join(&out_name);

            if let Some(parent) = out_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            if out_path.exists() && !opts.overwrite {
                debug!(path = %out_path.display(), "exists, skipping");
                continue;
            }

            let mut out = File::create(&out_path)?;
            folder.copy_range(cab, &mut out, offset, size)?;
            drop(out);

            if attributes & ATTR_READ_ONLY != 0 {
                let mut perms = fs::metadata(&out_path)?.permissions();
                perms.set_readonly(true);
                fs::set_permissions(&out_path, perms)?;
            }
            written.push(out_path);
        }
        Ok(written)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ArchiveWriter<W: Write + Seek> {
    out: W,
    header: CabinetHeader,
    folders: Vec<Folder>,
    strip: Vec<String>,
}

impl ArchiveWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P, opts: CreateOptions) -> Result<Self> {
        Self::new(File::create(path)?, opts)
    }
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Starts a cabinet with one folder carrying the chosen compression.
    pub fn new(out: W, opts: CreateOptions) -> Result<Self> {
        let mut header = CabinetHeader::new();
        header.set_id = opts.set_id;
        header.cab_reserve = opts.cab_reserve;
        header.reserve_data = vec![0u8; usize::from(opts.cab_reserve)];

        let mut writer = Self {
            out,
            header,
            folders: Vec::new(),
            strip: opts.strip,
        };
        writer.add_folder(opts.compression);
        Ok(writer)
    }

    /// Starts a new folder; files added afterwards go into it.
    pub fn add_folder(&mut self, compression: CompressionType) {
        self.folders.push(Folder::new(
            compression,
            self.header.folder_reserve,
            self.header.block_reserve,
        ));
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn file_count(&self) -> usize {
        self.folders.iter().map(|f| f.entries.len()).sum()
    }

    /// Adds one source file to the newest folder.  The all-ones file count
    /// is a reserved sentinel, so the 65535th add is refused.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if self.file_count() + 1 >= usize::from(u16::MAX) {
            return Err(CabError::TooManyFiles);
        }
        match self.folders.last_mut() {
            Some(folder) => folder.add_file(path.as_ref(), &self.strip),
            None => Err(CabError::NotFound("cabinet has no folder".to_string())),
        }
    }

    /// Walks `dir` and adds every regular file whose base name matches
    /// `pattern`.  Returns the paths added, in walk order.
    pub fn add_dir<P: AsRef<Path>>(
        &mut self,
        dir: P,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CabError::NotFound(dir.display().to_string()));
        }
        let mut walk = walkdir::WalkDir::new(dir).follow_links(false);
        if !recursive {
            walk = walk.max_depth(1);
        }
        let mut added = Vec::new();
        for dirent in walk.sort_by_file_name() {
            let dirent = dirent.map_err(|e| CabError::Io(e.into()))?;
            if !dirent.file_type().is_file() {
                continue;
            }
            if !wildcard::matches(&dirent.file_name().to_string_lossy(), pattern, true) {
                continue;
            }
            self.add_file(dirent.path())?;
            added.push(dirent.into_path());
        }
        Ok(added)
    }

    /// Writes the whole container: header, folder descriptors, file table,
    /// then every folder's data blocks, and finally rewrites the header
    /// with the resolved total size and counts.
    pub fn finish(mut self) -> Result<()> {
        self.header.folder_count =
            u16::try_from(self.folders.len()).map_err(|_| CabError::TooManyFolders)?;
        self.header.write(&mut self.out)?;

        for folder in &mut self.folders {
            folder.descriptor_pos = self.out.stream_position()?;
            folder.write_descriptor(&mut self.out)?;
        }

        self.header.files_offset = position32(&mut self.out)?;
        let mut file_count = 0u16;
        for folder in &self.folders {
            for file in &folder.entries {
                file.write(&mut self.out)?;
                file_count += 1;
            }
        }
        self.header.file_count = file_count;

        for folder in &mut self.folders {
            folder.write_data(&mut self.out)?;
        }

        self.header.cab_size = position32(&mut self.out)?;
        self.out.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.out)?;
        self.out.flush()?;
        debug!(
            size = self.header.cab_size,
            files = self.header.file_count,
            "cabinet finished"
        );
        Ok(())
    }
}

fn base_name(stored: &str) -> &str {
    stored
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or(stored)
}
