//! Artifact reader

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, info};

use crate::codec::{AeadCipher, BytecodeCipher, BytecodeReader};
use crate::engine::{EnginePropertyTable, ScriptEngine};

use super::layout::{read_records, DataSection, TRAILER_LEN};
use super::platform::Platform;
use super::{pe, LoadError, LoadResult};

/// Records handed back after a successful load, for the plugin loader and
/// resource embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArtifact {
    pub section_offset: u64,
    pub resources: Vec<Vec<u8>>,
    pub plugins: Vec<Vec<u8>>,
    /// Whether the bytecode carries debug information
    pub debug: bool,
}

/// Everything in an artifact, decoded without an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArtifact {
    pub section_offset: u64,
    pub block_len: u64,
    pub resources: Vec<Vec<u8>>,
    pub plugins: Vec<Vec<u8>>,
    pub properties: EnginePropertyTable,
    pub bytecode: Vec<u8>,
}

/// Locates and decodes the data section of an artifact.
#[derive(Debug)]
pub struct ArtifactReader<C: BytecodeCipher = AeadCipher> {
    path: PathBuf,
    platform: Platform,
    cipher: C,
}

impl ArtifactReader<AeadCipher> {
    /// Reader for an artifact built for `platform`.
    pub fn open(
        path: impl Into<PathBuf>,
        platform: Platform,
    ) -> Self {
        Self::with_cipher(path, platform, AeadCipher::default())
    }

    /// Reader for the running executable.
    pub fn for_current_exe() -> LoadResult<Self> {
        let platform = Platform::detect().ok_or(LoadError::UnsupportedHost)?;
        let path = std::env::current_exe().map_err(|source| LoadError::Io {
            path: PathBuf::from("<current executable>"),
            source,
        })?;
        Ok(Self::open(path, platform))
    }
}

impl<C: BytecodeCipher> ArtifactReader<C> {
    pub fn with_cipher(
        path: impl Into<PathBuf>,
        platform: Platform,
        cipher: C,
    ) -> Self {
        Self {
            path: path.into(),
            platform,
            cipher,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn io_error(
        &self,
        source: io::Error,
    ) -> LoadError {
        LoadError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn open_image(&self) -> LoadResult<(File, u64)> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let len = file.metadata().map_err(|e| self.io_error(e))?.len();
        Ok((file, len))
    }

    /// Start and end of the data section within `file`.
    fn section_bounds(
        &self,
        file: &mut File,
        len: u64,
    ) -> LoadResult<(u64, u64)> {
        let (start, end) = if self.platform.uses_section_table() {
            let start = pe::end_of_sections(file).map_err(|source| LoadError::Header {
                path: self.path.clone(),
                source,
            })?;
            (start, len)
        } else {
            if len < TRAILER_LEN {
                return Err(LoadError::OffsetOutOfRange { offset: 0, len });
            }
            file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
                .map_err(|e| self.io_error(e))?;
            let start = file
                .read_u64::<LittleEndian>()
                .map_err(|e| self.io_error(e))?;
            (start, len - TRAILER_LEN)
        };

        if start >= end {
            return Err(LoadError::OffsetOutOfRange { offset: start, len });
        }
        Ok((start, end))
    }

    /// Offset of the first byte of the data section.
    pub fn locate_section(&self) -> LoadResult<u64> {
        let (mut file, len) = self.open_image()?;
        let (start, _) = self.section_bounds(&mut file, len)?;
        Ok(start)
    }

    /// Read the raw data section.
    pub fn read_section(&self) -> LoadResult<(u64, DataSection)> {
        let (mut file, len) = self.open_image()?;
        let (start, end) = self.section_bounds(&mut file, len)?;
        debug!("data section at {:#x}..{:#x} in {}", start, end, self.path.display());

        file.seek(SeekFrom::Start(start))
            .map_err(|e| self.io_error(e))?;
        let mut limited = BufReader::new(file).take(end - start);
        let section = DataSection::read_from(&mut limited)
            .map_err(|e| LoadError::from_io("data section", e))?;
        Ok((start, section))
    }

    /// Decrypt the block and read the records stored ahead of the bytecode.
    fn open_block(
        &self,
        block: Vec<u8>,
        property_count: usize,
    ) -> LoadResult<(BytecodeReader, Vec<Vec<u8>>, EnginePropertyTable)> {
        let mut stream = BytecodeReader::new(block, &self.cipher)?;
        let plugins =
            read_records(&mut stream).map_err(|e| LoadError::from_io("plugin records", e))?;
        let properties = EnginePropertyTable::read_from(&mut stream, property_count)
            .map_err(|e| LoadError::from_io("engine property table", e))?;
        Ok((stream, plugins, properties))
    }

    /// Load the artifact into `engine`: apply the stored properties, then
    /// stream the bytecode into the engine's loader.
    pub fn load<E: ScriptEngine + ?Sized>(
        &self,
        engine: &mut E,
    ) -> LoadResult<LoadedArtifact> {
        let (section_offset, section) = self.read_section()?;
        let (mut stream, plugins, properties) =
            self.open_block(section.block, engine.property_count())?;

        properties
            .apply(engine)
            .map_err(LoadError::ProtocolMismatch)?;

        stream.reset_cursor();
        let debug = engine
            .load_bytecode(&mut stream)
            .map_err(|rejected| LoadError::BytecodeRejected {
                offset: rejected.offset,
                cursor: stream.cursor(),
                reason: rejected.reason,
            })?;

        info!(
            "loaded artifact {}: {} resources, {} plugins, {} properties",
            self.path.display(),
            section.resources.len(),
            plugins.len(),
            properties.len()
        );
        Ok(LoadedArtifact {
            section_offset,
            resources: section.resources,
            plugins,
            debug,
        })
    }

    /// Decode everything without an engine. `property_count` must match the
    /// engine the artifact was built for.
    pub fn decode(
        &self,
        property_count: usize,
    ) -> LoadResult<DecodedArtifact> {
        let (section_offset, section) = self.read_section()?;
        let block_len = section.block.len() as u64;
        let (mut stream, plugins, properties) = self.open_block(section.block, property_count)?;

        let bytecode = stream.read_remaining();
        if stream.is_failed() {
            return Err(LoadError::Records {
                what: "bytecode block",
                source: io::Error::new(io::ErrorKind::InvalidData, "corrupt compressed stream"),
            });
        }

        Ok(DecodedArtifact {
            section_offset,
            block_len,
            resources: section.resources,
            plugins,
            properties,
            bytecode,
        })
    }
}
