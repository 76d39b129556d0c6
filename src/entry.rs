use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{CabError, Result};

/// Span codes for entries crossing volume boundaries.  Parsed and written
/// back unchanged; volume chaining itself is not implemented.
pub const SPAN_FROM_PREV: u16 = 0xFFFD;
pub const SPAN_TO_NEXT: u16 = 0xFFFE;
pub const SPAN_PREV_AND_NEXT: u16 = 0xFFFF;

/// DOS attribute bits.
pub const ATTR_READ_ONLY: u16 = 0x0001;
pub const ATTR_HIDDEN: u16 = 0x0002;
pub const ATTR_SYSTEM: u16 = 0x0004;
pub const ATTR_ARCHIVE: u16 = 0x0020;

/// Stored names are NUL-terminated and capped at 255 bytes.
pub const MAX_NAME_LEN: usize = 255;

/// One file entry: 16 fixed little-endian bytes followed by the
/// NUL-terminated stored name.
#[derive(Debug, Clone, Default)]
pub struct FileEntry {
    /// Uncompressed file size.
    pub size: u32,
    /// Offset of this file within the folder's decompressed stream.
    pub folder_offset: u32,
    pub folder_span: u16,
    pub dos_date: u16,
    pub dos_time: u16,
    pub attributes: u16,
    /// Archive-relative stored name.
    pub name: String,
    /// Source path the bytes are read from when creating.  Never
    /// serialized.
    pub source: Option<PathBuf>,
}

impl FileEntry {
    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        let size = input.read_u32::<LittleEndian>()?;
        let folder_offset = input.read_u32::<LittleEndian>()?;
        let folder_span = input.read_u16::<LittleEndian>()?;
        let dos_date = input.read_u16::<LittleEndian>()?;
        let dos_time = input.read_u16::<LittleEndian>()?;
        let attributes = input.read_u16::<LittleEndian>()?;

        let mut name = Vec::new();
        loop {
            let byte = input.read_u8()?;
            if byte == 0 {
                break;
            }
            name.push(byte);
            if name.len() > MAX_NAME_LEN {
                return Err(CabError::NameTooLong(
                    String::from_utf8_lossy(&name).into_owned(),
                ));
            }
        }

        Ok(Self {
            size,
            folder_offset,
            folder_span,
            dos_date,
            dos_time,
            attributes,
            name: String::from_utf8_lossy(&name).into_owned(),
            source: None,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_u32::<LittleEndian>(self.size)?;
        out.write_u32::<LittleEndian>(self.folder_offset)?;
        out.write_u16::<LittleEndian>(self.folder_span)?;
        out.write_u16::<LittleEndian>(self.dos_date)?;
        out.write_u16::<LittleEndian>(self.dos_time)?;
        out.write_u16::<LittleEndian>(self.attributes)?;
        out.write_all(self.name.as_bytes())?;
        out.write_u8(0)?;
        Ok(())
    }

    pub fn byte_len(&self) -> usize {
        16 + self.name.len() + 1
    }

    /// Packs a timestamp into the two DOS fields.  Years clamp to the
    /// representable 1980..=2107 range; seconds lose their low bit.
    pub fn set_timestamp(&mut self, when: NaiveDateTime) {
        let year = when.year().clamp(1980, 2107) as u16;
        self.dos_date = (year - 1980) << 9 | (when.month() as u16) << 5 | when.day() as u16;
        self.dos_time =
            (when.hour() as u16) << 11 | (when.minute() as u16) << 5 | (when.second() as u16) >> 1;
    }

    /// Decodes the DOS fields; `None` when they don't form a real date.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(
            1980 + i32::from(self.dos_date >> 9),
            u32::from((self.dos_date >> 5) & 0x0F),
            u32::from(self.dos_date & 0x1F),
        )?;
        date.and_hms_opt(
            u32::from(self.dos_time >> 11),
            u32::from((self.dos_time >> 5) & 0x3F),
            u32::from((self.dos_time & 0x1F) << 1),
        )
    }

    /// Four-column `rash` attribute display used by listings.
    pub fn attributes_string(&self) -> String {
        let mut out = String::with_capacity(4);
        out.push(if self.attributes & ATTR_READ_ONLY != 0 { 'r' } else { '-' });
        out.push(if self.attributes & ATTR_ARCHIVE != 0 { 'a' } else { '-' });
        out.push(if self.attributes & ATTR_SYSTEM != 0 { 's' } else { '-' });
        out.push(if self.attributes & ATTR_HIDDEN != 0 { 'h' } else { '-' });
        out
    }

    /// Derives and sets the stored name from a path, applying the strip
    /// rules.  On failure the entry is left untouched.
    pub fn set_stored_name(&mut self, path: &str, strip: &[String]) -> Result<()> {
        self.name = derive_stored_name(path, strip)?;
        Ok(())
    }
}

/// Applies the strip rules to a path and yields the archive-relative name.
///
/// A leading `"*"` element keeps the base name only; every other element
/// is removed once from the name where it first occurs; rooted-path
/// components are always dropped.  Names longer than 255 bytes are
/// rejected.
pub fn derive_stored_name(path: &str, strip: &[String]) -> Result<String> {
    let mut item = if strip.first().map(String::as_str) == Some("*") {
        Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string())
    } else {
        path.to_string()
    };

    for prefix in strip {
        if prefix.is_empty() {
            continue;
        }
        if let Some(at) = item.find(prefix.as_str()) {
            item.replace_range(at..at + prefix.len(), "");
        }
    }

    if Path::new(&item).has_root() {
        item = Path::new(&item)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect::<PathBuf>()
            .to_string_lossy()
            .into_owned();
    }

    if item.len() > MAX_NAME_LEN {
        return Err(CabError::NameTooLong(item));
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip() {
        let entry = FileEntry {
            size: 90210,
            folder_offset: 32768,
            folder_span: 0,
            dos_date: 0x5AC6,
            dos_time: 0x6C2E,
            attributes: ATTR_READ_ONLY | ATTR_ARCHIVE,
            name: "docs/readme.txt".to_string(),
            source: None,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), entry.byte_len());

        let parsed = FileEntry::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.size, 90210);
        assert_eq!(parsed.folder_offset, 32768);
        assert_eq!(parsed.dos_date, 0x5AC6);
        assert_eq!(parsed.dos_time, 0x6C2E);
        assert_eq!(parsed.attributes, ATTR_READ_ONLY | ATTR_ARCHIVE);
        assert_eq!(parsed.name, "docs/readme.txt");
        assert!(parsed.source.is_none());
    }

    #[test]
    fn span_codes_pass_through() {
        for span in [SPAN_FROM_PREV, SPAN_TO_NEXT, SPAN_PREV_AND_NEXT] {
            let entry = FileEntry {
                folder_span: span,
                name: "x".to_string(),
                ..Default::default()
            };
            let mut buf = Vec::new();
            entry.write(&mut buf).unwrap();
            let parsed = FileEntry::read(&mut Cursor::new(&buf)).unwrap();
            assert_eq!(parsed.folder_span, span);
        }
    }

    #[test]
    fn dos_timestamp_packs_and_unpacks() {
        let mut entry = FileEntry::default();
        let when = NaiveDate::from_ymd_opt(2026, 8, 6)
            .unwrap()
            .and_hms_opt(12, 34, 57)
            .unwrap();
        entry.set_timestamp(when);
        assert_eq!(entry.dos_date, (46 << 9) | (8 << 5) | 6);
        assert_eq!(entry.dos_time, (12 << 11) | (34 << 5) | (57 >> 1));
        // Seconds round down to even.
        let back = entry.timestamp().unwrap();
        assert_eq!(back.date(), when.date());
        assert_eq!(back.hour(), 12);
        assert_eq!(back.minute(), 34);
        assert_eq!(back.second(), 56);
    }

    #[test]
    fn bad_dos_date_yields_none() {
        let entry = FileEntry {
            dos_date: 0, // month and day zero
            ..Default::default()
        };
        assert!(entry.timestamp().is_none());
    }

    #[test]
    fn attribute_display() {
        let entry = FileEntry {
            attributes: ATTR_READ_ONLY | ATTR_HIDDEN,
            ..Default::default()
        };
        assert_eq!(entry.attributes_string(), "r--h");
    }

    #[test]
    fn strip_star_keeps_base_name() {
        let name = derive_stored_name("/tmp/work/report.txt", &["*".to_string()]).unwrap();
        assert_eq!(name, "report.txt");
    }

    #[test]
    fn strip_prefix_removed_once() {
        let strip = vec!["work/".to_string()];
        let name = derive_stored_name("work/sub/work/a.txt", &strip).unwrap();
        assert_eq!(name, "sub/work/a.txt");
    }

    #[test]
    fn rooted_names_lose_their_root() {
        let name = derive_stored_name("/etc/passwd", &[]).unwrap();
        assert_eq!(name, "etc/passwd");
    }

    #[test]
    fn overlong_name_rejected_and_entry_untouched() {
        let mut entry = FileEntry {
            name: "keep.txt".to_string(),
            ..Default::default()
        };
        let long = "x".repeat(300);
        let err = entry.set_stored_name(&long, &[]).unwrap_err();
        assert!(matches!(err, CabError::NameTooLong(_)));
        assert_eq!(entry.name, "keep.txt");
    }

    #[test]
    fn name_at_exactly_255_bytes_is_accepted() {
        let name = "y".repeat(255);
        assert_eq!(derive_stored_name(&name, &[]).unwrap().len(), 255);
    }
}
