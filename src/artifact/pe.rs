//! PE header surgery for Windows stubs
//!
//! Stubs are distributed with their first two bytes cleared so they are not
//! treated as executables until packed. Packing restores the `MZ` signature
//! and can switch the subsystem field to console. Loading walks the section
//! table to find the first byte past the image, where the data section
//! starts.

use std::io::{self, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;
use tracing::debug;

/// DOS header signature.
pub const DOS_SIGNATURE: [u8; 2] = *b"MZ";

/// File offset of the pointer to the PE header (`e_lfanew`).
pub const PE_POINTER_OFFSET: u64 = 60;

/// `PE\0\0`
pub const PE_SIGNATURE: u32 = 0x0000_4550;

/// Offset of the subsystem word from the PE signature.
pub const SUBSYSTEM_OFFSET: u64 = 92;

pub const SUBSYSTEM_GUI: u16 = 2;
pub const SUBSYSTEM_CONSOLE: u16 = 3;

const FILE_HEADER_LEN: usize = 20;
const SECTION_HEADER_LEN: usize = 40;

/// PE errors
#[derive(Debug, Error)]
pub enum PeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Missing PE signature at offset {offset:#x} (found {found:#010x})")]
    BadSignature { offset: u64, found: u32 },

    #[error("Section {index} ends past the addressable range")]
    SectionOverflow { index: u16 },

    /// Data past the last section; an appended section would not be found
    #[error("Image ends at {image_end:#x} but the file is {file_len:#x} bytes")]
    ImageEndMismatch { image_end: u64, file_len: u64 },
}

/// Result type for PE operations
pub type PeResult<T> = Result<T, PeError>;

/// Write `MZ` over the first two bytes. Idempotent.
pub fn restore_signature<W: Write + Seek>(image: &mut W) -> io::Result<()> {
    image.seek(SeekFrom::Start(0))?;
    image.write_all(&DOS_SIGNATURE)
}

/// Read `e_lfanew` and check the PE signature it points at.
fn pe_header_offset<R: Read + Seek>(image: &mut R) -> PeResult<u64> {
    image.seek(SeekFrom::Start(PE_POINTER_OFFSET))?;
    let offset = u64::from(image.read_u32::<LittleEndian>()?);
    image.seek(SeekFrom::Start(offset))?;
    let found = image.read_u32::<LittleEndian>()?;
    if found != PE_SIGNATURE {
        return Err(PeError::BadSignature { offset, found });
    }
    Ok(offset)
}

/// Overwrite the subsystem word with [`SUBSYSTEM_CONSOLE`]. Returns the
/// file offset of the field.
pub fn set_console_subsystem<F: Read + Write + Seek>(image: &mut F) -> PeResult<u64> {
    let field = pe_header_offset(image)? + SUBSYSTEM_OFFSET;
    image.seek(SeekFrom::Start(field))?;
    image.write_u16::<LittleEndian>(SUBSYSTEM_CONSOLE)?;
    debug!("subsystem set to console at {:#x}", field);
    Ok(field)
}

/// Current subsystem word.
pub fn subsystem<R: Read + Seek>(image: &mut R) -> PeResult<u16> {
    let field = pe_header_offset(image)? + SUBSYSTEM_OFFSET;
    image.seek(SeekFrom::Start(field))?;
    Ok(image.read_u16::<LittleEndian>()?)
}

/// First byte past every section's raw data.
pub fn end_of_sections<R: Read + Seek>(image: &mut R) -> PeResult<u64> {
    pe_header_offset(image)?;

    let mut file_header = [0u8; FILE_HEADER_LEN];
    image.read_exact(&mut file_header)?;
    let sections = (&file_header[2..4]).read_u16::<LittleEndian>()?;
    let optional_header = (&file_header[16..18]).read_u16::<LittleEndian>()?;
    image.seek(SeekFrom::Current(i64::from(optional_header)))?;

    let mut end = 0u64;
    for index in 0..sections {
        let mut header = [0u8; SECTION_HEADER_LEN];
        image.read_exact(&mut header)?;
        let mut fields = &header[16..24];
        let raw_size = fields.read_u32::<LittleEndian>()?;
        let raw_pointer = fields.read_u32::<LittleEndian>()?;
        let section_end = raw_pointer
            .checked_add(raw_size)
            .ok_or(PeError::SectionOverflow { index })?;
        end = end.max(u64::from(section_end));
    }
    debug!("{} sections, image ends at {:#x}", sections, end);
    Ok(end)
}
