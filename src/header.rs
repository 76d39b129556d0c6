use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{CabError, Result};

/// Signature bytes opening every cabinet.
pub const SIGNATURE: [u8; 4] = *b"MSCF";
/// The only format version this crate reads or writes.
pub const VERSION_MINOR: u8 = 3;
pub const VERSION_MAJOR: u8 = 1;
/// Header length without the optional reserve fields.
pub const FIXED_LEN: u32 = 36;

/// This cabinet continues a previous volume.
pub const FLAG_PREV_CABINET: u16 = 0x0001;
/// This cabinet continues into a next volume.
pub const FLAG_NEXT_CABINET: u16 = 0x0002;
/// The optional reserve fields are present.
pub const FLAG_RESERVE_PRESENT: u16 = 0x0004;

/// The cabinet header record.
///
/// Layout (little-endian): signature, 4 reserved bytes, total size, 4
/// reserved, file-table offset, 4 reserved, version minor/major, folder
/// count, file count, flags, set id, volume index; when
/// [`FLAG_RESERVE_PRESENT`] is set, a u16 cabinet-reserve size, u8
/// per-folder reserve size, u8 per-block reserve size and then the raw
/// cabinet reserve area follow.
#[derive(Debug, Clone)]
pub struct CabinetHeader {
    pub cab_size: u32,
    pub files_offset: u32,
    pub version_minor: u8,
    pub version_major: u8,
    pub folder_count: u16,
    pub file_count: u16,
    pub flags: u16,
    pub set_id: u16,
    pub cab_index: u16,
    pub cab_reserve: u16,
    pub folder_reserve: u8,
    pub block_reserve: u8,
    /// Raw cabinet reserve area, preserved byte-for-byte across rewrites.
    pub reserve_data: Vec<u8>,
}

impl CabinetHeader {
    pub fn new() -> Self {
        Self {
            cab_size: 0,
            files_offset: 0,
            version_minor: VERSION_MINOR,
            version_major: VERSION_MAJOR,
            folder_count: 0,
            file_count: 0,
            flags: 0,
            set_id: 0,
            cab_index: 0,
            cab_reserve: 0,
            folder_reserve: 0,
            block_reserve: 0,
            reserve_data: Vec::new(),
        }
    }

    /// Reads and validates a header, consuming the optional reserve fields
    /// and the cabinet reserve area when declared.
    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != SIGNATURE {
            return Err(CabError::BadSignature);
        }
        input.read_u32::<LittleEndian>()?;
        let cab_size = input.read_u32::<LittleEndian>()?;
        input.read_u32::<LittleEndian>()?;
        let files_offset = input.read_u32::<LittleEndian>()?;
        input.read_u32::<LittleEndian>()?;
        let version_minor = input.read_u8()?;
        let version_major = input.read_u8()?;
        if version_minor != VERSION_MINOR || version_major != VERSION_MAJOR {
            return Err(CabError::BadVersion {
                major: version_major,
                minor: version_minor,
            });
        }
        let folder_count = input.read_u16::<LittleEndian>()?;
        let file_count = input.read_u16::<LittleEndian>()?;
        let flags = input.read_u16::<LittleEndian>()?;
        let set_id = input.read_u16::<LittleEndian>()?;
        let cab_index = input.read_u16::<LittleEndian>()?;

        let mut header = Self {
            cab_size,
            files_offset,
            version_minor,
            version_major,
            folder_count,
            file_count,
            flags,
            set_id,
            cab_index,
            cab_reserve: 0,
            folder_reserve: 0,
            block_reserve: 0,
            reserve_data: Vec::new(),
        };

        if flags & FLAG_RESERVE_PRESENT != 0 {
            header.cab_reserve = input.read_u16::<LittleEndian>()?;
            header.folder_reserve = input.read_u8()?;
            header.block_reserve = input.read_u8()?;
            let mut data = vec![0u8; usize::from(header.cab_reserve)];
            input.read_exact(&mut data)?;
            header.reserve_data = data;
        }

        Ok(header)
    }

    pub fn write<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut flags = self.flags;
        if self.has_reserve() {
            flags |= FLAG_RESERVE_PRESENT;
        }
        out.write_all(&SIGNATURE)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(self.cab_size)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(self.files_offset)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u8(self.version_minor)?;
        out.write_u8(self.version_major)?;
        out.write_u16::<LittleEndian>(self.folder_count)?;
        out.write_u16::<LittleEndian>(self.file_count)?;
        out.write_u16::<LittleEndian>(flags)?;
        out.write_u16::<LittleEndian>(self.set_id)?;
        out.write_u16::<LittleEndian>(self.cab_index)?;
        if flags & FLAG_RESERVE_PRESENT != 0 {
            out.write_u16::<LittleEndian>(self.cab_reserve)?;
            out.write_u8(self.folder_reserve)?;
            out.write_u8(self.block_reserve)?;
            let have = usize::from(self.cab_reserve).min(self.reserve_data.len());
            out.write_all(&self.reserve_data[..have])?;
            if have < usize::from(self.cab_reserve) {
                out.write_all(&vec![0u8; usize::from(self.cab_reserve) - have])?;
            }
        }
        Ok(())
    }

    fn has_reserve(&self) -> bool {
        self.flags & FLAG_RESERVE_PRESENT != 0
            || self.cab_reserve > 0
            || self.folder_reserve > 0
            || self.block_reserve > 0
    }

    /// Header length in bytes: the folder descriptors start here.
    pub fn byte_len(&self) -> u32 {
        let mut len = FIXED_LEN;
        if self.has_reserve() {
            len += 4 + u32::from(self.cab_reserve);
        }
        len
    }
}

impl Default for CabinetHeader {
    fn default() -> Self {
        Self::new()
    }
}
