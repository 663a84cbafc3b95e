//! Bytecode codec
//!
//! Streaming transform between the VM's serializer and the bytecode block
//! stored in an artifact:
//!
//! ```text
//! build:  serializer --write--> BytecodeWriter --finish--> zlib + cipher --> block
//! load:   block --> cipher⁻¹ --> BytecodeReader --read--> zlib⁻¹ --> loader
//! ```
//!
//! Both halves implement [`BinaryStream`] (the interface the VM serializer
//! talks to) as well as `std::io::{Read, Write}`. A short return from either
//! side means the compressor or decompressor failed and the artifact must be
//! treated as unusable.

pub mod cipher;
pub mod varint;


pub use cipher::{AeadCipher, BytecodeCipher, PassthroughCipher, DEFAULT_KEY, NONCE_LEN};
pub use varint::{encode_varint, read_varint, write_varint, MAX_VARINT_LEN};

use std::io::{self, Cursor, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::BinaryStream;

/// Initial size of the compressed output buffer.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Highest accepted compression level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Compression level outside 0..=9
    #[error("Invalid compression level {0}, expected 0-9")]
    InvalidLevel(u32),

    /// The compressor failed while accepting input
    #[error("Compression failed after {written} bytes: {source}")]
    Compress {
        written: u64,
        #[source]
        source: io::Error,
    },

    /// The compressor could not be flushed to completion
    #[error("Failed to finish compressed stream: {0}")]
    Finish(#[source] io::Error),

    /// The cipher refused to transform the block
    #[error("Cipher rejected bytecode block: {0}")]
    CipherRejected(String),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Write half: compresses on write, compresses + encrypts on finish.
#[derive(Debug)]
pub struct BytecodeWriter<C: BytecodeCipher> {
    /// Created on the first write.
    encoder: Option<ZlibEncoder<Vec<u8>>>,
    level: Compression,
    cipher: C,
    /// Uncompressed bytes accepted so far.
    written: u64,
    failure: Option<io::Error>,
}

impl<C: BytecodeCipher> BytecodeWriter<C> {
    /// Create a writer at the given compression level.
    pub fn new(
        level: u32,
        cipher: C,
    ) -> CodecResult<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(CodecError::InvalidLevel(level));
        }
        Ok(Self {
            encoder: None,
            level: Compression::new(level),
            cipher,
            written: 0,
            failure: None,
        })
    }

    /// Number of uncompressed bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn encoder(&mut self) -> &mut ZlibEncoder<Vec<u8>> {
        let level = self.level;
        self.encoder
            .get_or_insert_with(|| ZlibEncoder::new(Vec::with_capacity(BUFFER_SIZE), level))
    }

    /// Feed `data` through the compressor. Returns how many bytes were
    /// accepted; anything short of `data.len()` is a failure.
    pub fn write_bytes(
        &mut self,
        data: &[u8],
    ) -> usize {
        if self.failure.is_some() {
            return 0;
        }
        let mut accepted = 0;
        while accepted < data.len() {
            match self.encoder().write(&data[accepted..]) {
                Ok(0) => {
                    self.failure = Some(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "compressor accepted no input",
                    ));
                    break;
                }
                Ok(n) => accepted += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("bytecode compression failed: {}", e);
                    self.failure = Some(e);
                    break;
                }
            }
        }
        self.written += accepted as u64;
        accepted
    }

    /// Flush the compressor to completion and apply the cipher.
    ///
    /// Finishing a writer that never saw a write still yields a valid,
    /// empty compressed stream.
    pub fn finish(mut self) -> CodecResult<Vec<u8>> {
        if let Some(source) = self.failure.take() {
            return Err(CodecError::Compress {
                written: self.written,
                source,
            });
        }
        let level = self.level;
        let compressed = self
            .encoder
            .take()
            .unwrap_or_else(|| ZlibEncoder::new(Vec::new(), level))
            .finish()
            .map_err(CodecError::Finish)?;
        debug!(
            "bytecode block: {} bytes in, {} bytes compressed",
            self.written,
            compressed.len()
        );
        self.cipher.encrypt(compressed)
    }
}

impl<C: BytecodeCipher> BinaryStream for BytecodeWriter<C> {
    fn write(
        &mut self,
        data: &[u8],
    ) -> usize {
        self.write_bytes(data)
    }

    fn read(
        &mut self,
        _buf: &mut [u8],
    ) -> usize {
        0
    }
}

impl<C: BytecodeCipher> Write for BytecodeWriter<C> {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<usize> {
        let n = self.write_bytes(buf);
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::other("bytecode compressor failed"));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read half: decrypts once up front, then decompresses on each read.
#[derive(Debug)]
pub struct BytecodeReader {
    decoder: ZlibDecoder<Cursor<Vec<u8>>>,
    /// Bytes handed out since construction or the last cursor reset.
    cursor: u64,
    /// Bytes handed out in total.
    total: u64,
    failed: bool,
}

impl BytecodeReader {
    /// Decrypt `raw` (the block as stored in the artifact) and prepare to
    /// stream its decompressed contents.
    pub fn new<C: BytecodeCipher + ?Sized>(
        raw: Vec<u8>,
        cipher: &C,
    ) -> CodecResult<Self> {
        let compressed = cipher.decrypt(raw)?;
        debug!("bytecode block: {} bytes after decryption", compressed.len());
        Ok(Self {
            decoder: ZlibDecoder::new(Cursor::new(compressed)),
            cursor: 0,
            total: 0,
            failed: false,
        })
    }

    /// Fill as much of `buf` as the stream allows. A count short of
    /// `buf.len()` means the stream ended or was corrupt.
    pub fn read_bytes(
        &mut self,
        buf: &mut [u8],
    ) -> usize {
        let mut filled = 0;
        while filled < buf.len() && !self.failed {
            match self.decoder.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(
                        "bytecode decompression failed at offset {}: {}",
                        self.cursor + filled as u64,
                        e
                    );
                    self.failed = true;
                }
            }
        }
        self.cursor += filled as u64;
        self.total += filled as u64;
        filled
    }

    /// Bytes read since the last [`BytecodeReader::reset_cursor`].
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Bytes read over the reader's whole lifetime.
    pub fn total_read(&self) -> u64 {
        self.total
    }

    /// Start counting from zero again.
    ///
    /// The loader only reports failures as an offset into the stream it was
    /// given, so the counter is reset once the records stored ahead of the
    /// bytecode have been consumed.
    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Whether the decompressor hit corrupt input.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Drain everything left in the stream.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; BUFFER_SIZE];
        loop {
            let n = self.read_bytes(&mut chunk);
            out.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                break;
            }
        }
        out
    }
}

impl BinaryStream for BytecodeReader {
    fn write(
        &mut self,
        _data: &[u8],
    ) -> usize {
        0
    }

    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> usize {
        self.read_bytes(buf)
    }
}

impl Read for BytecodeReader {
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        let n = self.read_bytes(buf);
        if n == 0 && self.failed && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt bytecode stream",
            ));
        }
        Ok(n)
    }
}
