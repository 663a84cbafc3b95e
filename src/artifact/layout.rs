//! Binary layout of the appended data section
//!
//! Record lists are a varint count followed by, per record, a varint length
//! and the raw bytes. The same encoding is used for resource records (raw,
//! ahead of the block) and plugin records (inside the block).

use std::io::{self, Read, Write};

use crate::codec::{read_varint, write_varint};

/// Obfuscates the bytecode block length. A corrupted or tampered prefix
/// yields an absurd length and fails the load early.
pub const BYTECODE_LENGTH_XOR: u32 = 0x4C50_4B31;

/// Size of the section-start trailer on platforms without a section table.
pub const TRAILER_LEN: u64 = 8;

/// Upper bound on records in one list.
pub const MAX_RECORDS: u64 = 1 << 16;

/// Upper bound on a single record.
pub const MAX_RECORD_LEN: u64 = 1 << 30;

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Write a record list.
pub fn write_records<W: Write + ?Sized>(
    writer: &mut W,
    records: &[Vec<u8>],
) -> io::Result<()> {
    write_varint(writer, records.len() as u64)?;
    for record in records {
        write_varint(writer, record.len() as u64)?;
        writer.write_all(record)?;
    }
    Ok(())
}

/// Read a record list.
pub fn read_records<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<Vec<u8>>> {
    let count = read_varint(reader)?;
    if count > MAX_RECORDS {
        return Err(invalid(format!("{} records exceeds limit of {}", count, MAX_RECORDS)));
    }

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_varint(reader)?;
        if len > MAX_RECORD_LEN {
            return Err(invalid(format!("record of {} bytes exceeds limit", len)));
        }
        let mut record = Vec::new();
        (&mut *reader).take(len).read_to_end(&mut record)?;
        if record.len() as u64 != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        records.push(record);
    }
    Ok(records)
}

/// Bytes that follow the stub image, minus the trailer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataSection {
    /// Raw resource records owned by the resource embedder
    pub resources: Vec<Vec<u8>>,
    /// Encoded block as produced by the codec
    pub block: Vec<u8>,
}

impl DataSection {
    /// Write the section. Returns the number of bytes written.
    pub fn write_to<W: Write + ?Sized>(
        &self,
        writer: &mut W,
    ) -> io::Result<u64> {
        let len = u32::try_from(self.block.len())
            .map_err(|_| invalid(format!("block of {} bytes too large", self.block.len())))?;

        let mut head = Vec::new();
        write_records(&mut head, &self.resources)?;
        write_varint(&mut head, u64::from(len ^ BYTECODE_LENGTH_XOR))?;
        writer.write_all(&head)?;
        writer.write_all(&self.block)?;
        Ok((head.len() + self.block.len()) as u64)
    }

    /// Read a section. `reader` should be limited to the section's bytes.
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let resources = read_records(reader)?;

        let stored = read_varint(reader)?;
        let stored = u32::try_from(stored)
            .map_err(|_| invalid(format!("bytecode length prefix {:#x} out of range", stored)))?;
        let len = u64::from(stored ^ BYTECODE_LENGTH_XOR);

        let mut block = Vec::new();
        (&mut *reader).take(len).read_to_end(&mut block)?;
        if block.len() as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("bytecode block holds {} of {} bytes", block.len(), len),
            ));
        }
        Ok(Self { resources, block })
    }
}
