//! Artifact writer

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::codec::{AeadCipher, BytecodeCipher, BytecodeWriter};
use crate::engine::{EnginePropertyTable, ProgramSource, PROPERTY_COUNT};
use crate::util::config::BuildConfig;
use crate::util::diagnostic::Diagnostics;

use super::layout::{write_records, DataSection};
use super::platform::{default_stub_dir, Platform};
use super::{pe, BuildError, BuildResult};

/// What a successful build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub output: PathBuf,
    pub platform: Platform,
    pub stub: PathBuf,
    /// Stub size, which is also where the data section starts
    pub section_offset: u64,
    /// Bytes appended after the stub, trailer included
    pub appended: u64,
    /// Uncompressed bytes fed through the codec
    pub encoded_len: u64,
    /// Encoded block size as stored
    pub block_len: u64,
    pub debug: bool,
    pub elapsed: Duration,
}

impl BuildReport {
    /// `Release build succeeded in 12ms, saved to game`
    pub fn success_message(&self) -> String {
        format!(
            "{} build succeeded in {}ms, saved to {}",
            if self.debug { "Debug" } else { "Release" },
            self.elapsed.as_millis(),
            self.output.display()
        )
    }
}

/// Packs a compiled program into a copy of a launcher stub.
#[derive(Debug)]
pub struct ArtifactWriter<C: BytecodeCipher = AeadCipher> {
    config: BuildConfig,
    cipher: C,
    properties: EnginePropertyTable,
    plugins: Vec<Vec<u8>>,
    resources: Vec<Vec<u8>>,
}

impl ArtifactWriter<AeadCipher> {
    pub fn new(config: BuildConfig) -> Self {
        Self::with_cipher(config, AeadCipher::default())
    }
}

impl<C: BytecodeCipher> ArtifactWriter<C> {
    /// Writer using `cipher` over the compressed block.
    ///
    /// Plugin records start out as the configured plugin names.
    pub fn with_cipher(
        config: BuildConfig,
        cipher: C,
    ) -> Self {
        let plugins = config
            .plugins
            .iter()
            .map(|name| name.as_bytes().to_vec())
            .collect();
        Self {
            config,
            cipher,
            properties: EnginePropertyTable::baseline(),
            plugins,
            resources: Vec::new(),
        }
    }

    /// Property table stored in the block.
    pub fn properties(
        mut self,
        table: EnginePropertyTable,
    ) -> Self {
        self.properties = table;
        self
    }

    /// Append an opaque plugin record.
    pub fn plugin_record(
        mut self,
        record: Vec<u8>,
    ) -> Self {
        self.plugins.push(record);
        self
    }

    /// Append an opaque resource record.
    pub fn resource(
        mut self,
        record: Vec<u8>,
    ) -> Self {
        self.resources.push(record);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn platform(&self) -> BuildResult<Platform> {
        self.config
            .target_platform()
            .ok_or(BuildError::UnsupportedHost)
    }

    /// Path of the stub for the configured platform and variant.
    pub fn stub_path(&self) -> BuildResult<PathBuf> {
        let platform = self.platform()?;
        let dir = match &self.config.stub_dir {
            Some(dir) => dir.clone(),
            None => default_stub_dir().map_err(|source| BuildError::Io {
                path: PathBuf::from("stub"),
                source,
            })?,
        };
        Ok(dir.join(platform.stub_file_name(self.config.stub_variant.as_deref())))
    }

    /// Where the artifact for `script` will be written.
    pub fn output_path(
        &self,
        script: &Path,
    ) -> BuildResult<PathBuf> {
        Ok(self
            .platform()?
            .output_path(self.config.compiled_basename.as_deref(), script))
    }

    /// Run `program` through the codec: plugin records, then the property
    /// table, then the bytecode. Returns the block and how many
    /// uncompressed bytes went in.
    pub fn encode_block<P: ProgramSource + ?Sized>(
        &self,
        program: &P,
        output: &Path,
    ) -> BuildResult<(Vec<u8>, u64)> {
        if self.properties.len() != PROPERTY_COUNT {
            return Err(BuildError::PropertyCount {
                expected: PROPERTY_COUNT,
                found: self.properties.len(),
            });
        }

        let mut stream = BytecodeWriter::new(self.config.compression_level, &self.cipher)?;

        let mut head = Vec::new();
        write_records(&mut head, &self.plugins)
            .and_then(|_| self.properties.write_to(&mut head))
            .map_err(|source| BuildError::Io {
                path: output.to_path_buf(),
                source,
            })?;
        stream.write_all(&head).map_err(|source| BuildError::Io {
            path: output.to_path_buf(),
            source,
        })?;

        let before = stream.bytes_written();
        program.save_program(&mut stream, !self.config.debug)?;
        if stream.bytes_written() == before {
            return Err(BuildError::EmptyBytecode {
                output: output.to_path_buf(),
            });
        }

        let encoded = stream.bytes_written();
        let block = stream.finish()?;
        if u32::try_from(block.len()).is_err() {
            return Err(BuildError::TooLarge(block.len()));
        }
        debug!("encoded {} bytes into a {}-byte block", encoded, block.len());
        Ok((block, encoded))
    }

    /// Build the artifact for `script`.
    ///
    /// Failures are also recorded in `diagnostics`, and any partially
    /// written output is removed.
    pub fn write<P: ProgramSource + ?Sized>(
        &self,
        program: &P,
        script: &Path,
        diagnostics: &mut Diagnostics,
    ) -> BuildResult<BuildReport> {
        let section = script.display().to_string();
        self.write_inner(program, script).inspect_err(|e| {
            diagnostics.error(&section, e.to_string());
        })
    }

    fn write_inner<P: ProgramSource + ?Sized>(
        &self,
        program: &P,
        script: &Path,
    ) -> BuildResult<BuildReport> {
        let started = Instant::now();
        let platform = self.platform()?;
        let stub = self.stub_path()?;
        if !stub.is_file() {
            return Err(BuildError::StubMissing(stub));
        }
        let output = self.output_path(script)?;
        info!("building {} artifact {} from {}", platform, output.display(), stub.display());

        let (block, encoded_len) = self.encode_block(program, &output)?;

        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| BuildError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        fs::copy(&stub, &output).map_err(|source| BuildError::Copy {
            stub: stub.clone(),
            output: output.clone(),
            source,
        })?;

        let section = DataSection {
            resources: self.resources.clone(),
            block,
        };
        match self.finish_image(platform, &output, &section) {
            Ok((section_offset, appended)) => {
                let report = BuildReport {
                    output,
                    platform,
                    stub,
                    section_offset,
                    appended,
                    encoded_len,
                    block_len: section.block.len() as u64,
                    debug: self.config.debug,
                    elapsed: started.elapsed(),
                };
                if !self.config.quiet {
                    info!("{}", report.success_message());
                }
                Ok(report)
            }
            Err(e) => {
                if let Err(remove) = fs::remove_file(&output) {
                    warn!("could not remove partial output {}: {}", output.display(), remove);
                }
                Err(e)
            }
        }
    }

    /// Patch the copied stub and append the data section. Returns the
    /// section offset and the number of bytes appended.
    fn finish_image(
        &self,
        platform: Platform,
        output: &Path,
        section: &DataSection,
    ) -> BuildResult<(u64, u64)> {
        let io_err = |source| BuildError::Io {
            path: output.to_path_buf(),
            source,
        };
        let patch_err = |source| BuildError::Patch {
            path: output.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(output)
            .map_err(io_err)?;
        let stub_len = file.metadata().map_err(io_err)?.len();
        set_executable(&file).map_err(io_err)?;

        if platform.uses_section_table() {
            pe::restore_signature(&mut file).map_err(io_err)?;
            if self.config.console {
                pe::set_console_subsystem(&mut file).map_err(patch_err)?;
            }
            let image_end = pe::end_of_sections(&mut file).map_err(patch_err)?;
            if image_end != stub_len {
                return Err(patch_err(pe::PeError::ImageEndMismatch {
                    image_end,
                    file_len: stub_len,
                }));
            }
        }

        file.seek(SeekFrom::End(0)).map_err(io_err)?;
        let mut appended = section.write_to(&mut file).map_err(io_err)?;
        if !platform.uses_section_table() {
            file.write_u64::<LittleEndian>(stub_len).map_err(io_err)?;
            appended += super::TRAILER_LEN;
        }
        file.sync_all().map_err(io_err)?;
        debug!("appended {} bytes at {:#x}", appended, stub_len);
        Ok((stub_len, appended))
    }
}

#[cfg(unix)]
fn set_executable(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    file.set_permissions(permissions)
}

#[cfg(not(unix))]
fn set_executable(_file: &File) -> std::io::Result<()> {
    Ok(())
}
