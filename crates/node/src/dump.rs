//! Block dump files.
//!
//! Layout: `"XIDUMP"`, one version byte, varint total block count, then
//! batches until that many blocks were written. A batch starts with its info
//! (start index, block count, embedded checkpoints, body size in bytes) and
//! is followed by its raw blocks in their wire encoding. The body size lets a
//! reader step over a batch the chain already holds without decoding it.
//!
//! The header is checked before any batch is read, so a dump from another
//! format revision fails without touching the chain.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind, Read, Write};

use xid_consensus::Hash256;
use xid_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use xid_primitives::raw::RawBlock;

use crate::error::SyncError;

pub const DUMP_MAGIC: &[u8; 6] = b"XIDUMP";
pub const DUMP_VERSION: u8 = 1;
/// Blocks between two embedded checkpoints when nothing else is configured.
pub const DEFAULT_CHECKPOINT_DENSITY: u32 = 100;

const MAX_VARINT_LEN: usize = 10;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchInfo {
    pub start_index: u32,
    pub count: u32,
    /// Bytes of the encoded blocks following the info.
    pub binary_size: u64,
    pub checkpoints: BTreeMap<u32, Hash256>,
}

impl BatchInfo {
    pub fn last_index(&self) -> u32 {
        self.start_index + self.count.saturating_sub(1)
    }

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(u64::from(self.start_index));
        encoder.write_varint(u64::from(self.count));
        encoder.write_varint(self.checkpoints.len() as u64);
        for (index, hash) in &self.checkpoints {
            encoder.write_varint(u64::from(*index));
            encoder.write_hash(hash);
        }
        encoder.write_varint(self.binary_size);
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Batch {
    pub info: BatchInfo,
    pub blocks: Vec<RawBlock>,
}

/// What [`DumpReader::next_batch`] did with the next batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchItem {
    Read(Batch),
    Skipped(BatchInfo),
}

pub struct DumpWriter<W: Write> {
    inner: W,
    expected: u64,
    written: u64,
    density: u32,
}

impl<W: Write> DumpWriter<W> {
    /// Writes the header announcing `count` blocks.
    pub fn new(mut inner: W, count: u64) -> Result<Self, SyncError> {
        let mut header = Encoder::with_capacity(DUMP_MAGIC.len() + 1 + MAX_VARINT_LEN);
        header.write_bytes(DUMP_MAGIC);
        header.write_u8(DUMP_VERSION);
        header.write_varint(count);
        inner.write_all(&header.into_inner())?;
        Ok(Self {
            inner,
            expected: count,
            written: 0,
            density: DEFAULT_CHECKPOINT_DENSITY,
        })
    }

    /// Checkpoint every `density` blocks of a batch, in addition to its first
    /// and last block. Zero is treated as one.
    pub fn with_checkpoint_density(mut self, density: u32) -> Self {
        self.density = density.max(1);
        self
    }

    pub fn checkpoint_density(&self) -> u32 {
        self.density
    }

    /// Writes `blocks` as one batch whose first block has index `start`.
    pub fn write_batch(&mut self, start: u32, blocks: &[RawBlock]) -> Result<BatchInfo, SyncError> {
        if blocks.is_empty() {
            return Err(SyncError::EmptyBatch { start });
        }
        let count = u32::try_from(blocks.len())
            .ok()
            .filter(|count| start.checked_add(*count - 1).is_some())
            .ok_or(SyncError::IndexOverflow { start })?;
        if self.written + u64::from(count) > self.expected {
            return Err(SyncError::Truncated {
                expected: self.expected,
                read: self.written + u64::from(count),
            });
        }

        let mut checkpoints = BTreeMap::new();
        let last = count - 1;
        let marked = std::iter::once(0)
            .chain((self.density..last).step_by(self.density as usize))
            .chain(std::iter::once(last));
        for offset in marked {
            let block = &blocks[offset as usize];
            let template = block.template().map_err(|error| SyncError::Decode {
                position: self.written + u64::from(offset),
                error,
            })?;
            checkpoints.insert(start + offset, template.hash());
        }

        let mut body = Encoder::new();
        for block in blocks {
            block.consensus_encode(&mut body);
        }
        let body = body.into_inner();
        let info = BatchInfo {
            start_index: start,
            count,
            binary_size: body.len() as u64,
            checkpoints,
        };
        let mut header = Encoder::new();
        info.encode(&mut header);
        self.inner.write_all(&header.into_inner())?;
        self.inner.write_all(&body)?;
        self.written += u64::from(count);
        Ok(info)
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and hands back the writer. Fails if fewer blocks were written
    /// than the header announced.
    pub fn finish(mut self) -> Result<W, SyncError> {
        if self.written != self.expected {
            return Err(SyncError::Truncated {
                expected: self.expected,
                read: self.written,
            });
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub struct DumpReader<R: Read> {
    inner: R,
    count: u64,
    read: u64,
}

impl<R: Read> DumpReader<R> {
    /// Reads and checks the header.
    pub fn open(mut inner: R) -> Result<Self, SyncError> {
        let mut magic = [0u8; 6];
        inner.read_exact(&mut magic).map_err(|err| match err.kind() {
            ErrorKind::UnexpectedEof => SyncError::BadMagic,
            _ => SyncError::Io(err),
        })?;
        if &magic != DUMP_MAGIC {
            return Err(SyncError::BadMagic);
        }
        let mut version = [0u8; 1];
        inner.read_exact(&mut version)?;
        if version[0] != DUMP_VERSION {
            return Err(SyncError::UnsupportedVersion {
                found: version[0],
                supported: DUMP_VERSION,
            });
        }
        let count = read_varint(&mut inner).map_err(|err| header_error(err, 0))?;
        Ok(Self {
            inner,
            count,
            read: 0,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.count
    }

    /// Blocks read or stepped over so far.
    pub fn blocks_read(&self) -> u64 {
        self.read
    }

    /// Reads the next batch info and then either its blocks or, when `skip`
    /// says so, steps over its body.
    pub fn next_batch(
        &mut self,
        skip: impl FnOnce(&BatchInfo) -> bool,
    ) -> Result<Option<BatchItem>, SyncError> {
        if self.read == self.count {
            return Ok(None);
        }
        let position = self.read;
        let info = self
            .read_info()
            .map_err(|err| self.read_error(err, position))?;
        if info.count == 0 {
            return Err(SyncError::Decode {
                position,
                error: DecodeError::InvalidData("empty dump batch"),
            });
        }
        if position + u64::from(info.count) > self.count {
            return Err(SyncError::Decode {
                position,
                error: DecodeError::InvalidData("batch exceeds the announced block count"),
            });
        }

        let item = if skip(&info) {
            let stepped = io::copy(&mut (&mut self.inner).take(info.binary_size), &mut io::sink())?;
            if stepped != info.binary_size {
                return Err(SyncError::Truncated {
                    expected: self.count,
                    read: position,
                });
            }
            BatchItem::Skipped(info)
        } else {
            let blocks = self
                .read_blocks(&info)
                .map_err(|err| self.read_error(err, position))?;
            BatchItem::Read(Batch { info, blocks })
        };
        self.read = position + match &item {
            BatchItem::Read(batch) => u64::from(batch.info.count),
            BatchItem::Skipped(info) => u64::from(info.count),
        };
        Ok(Some(item))
    }

    fn read_info(&mut self) -> Result<BatchInfo, ReadError> {
        let start_index = read_varint_u32(&mut self.inner)?;
        let count = read_varint_u32(&mut self.inner)?;
        let entries = read_count(&mut self.inner)?;
        let mut checkpoints = BTreeMap::new();
        for _ in 0..entries {
            let index = read_varint_u32(&mut self.inner)?;
            let mut hash = [0u8; 32];
            self.inner.read_exact(&mut hash)?;
            checkpoints.insert(index, hash);
        }
        let binary_size = read_varint(&mut self.inner)?;
        if start_index.checked_add(count.saturating_sub(1)).is_none() {
            return Err(DecodeError::InvalidData("batch runs past the last block index").into());
        }
        Ok(BatchInfo {
            start_index,
            count,
            binary_size,
            checkpoints,
        })
    }

    fn read_blocks(&mut self, info: &BatchInfo) -> Result<Vec<RawBlock>, ReadError> {
        let size = usize::try_from(info.binary_size).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut body = Vec::new();
        (&mut self.inner).take(info.binary_size).read_to_end(&mut body)?;
        if body.len() != size {
            return Err(io::Error::from(ErrorKind::UnexpectedEof).into());
        }
        let mut decoder = Decoder::new(&body);
        let mut blocks = Vec::with_capacity(info.count as usize);
        for _ in 0..info.count {
            blocks.push(RawBlock::consensus_decode(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes.into());
        }
        Ok(blocks)
    }

    fn read_error(&self, err: ReadError, position: u64) -> SyncError {
        match err {
            ReadError::Io(err) if err.kind() == ErrorKind::UnexpectedEof => SyncError::Truncated {
                expected: self.count,
                read: position,
            },
            ReadError::Io(err) => SyncError::Io(err),
            ReadError::Decode(error) => SyncError::Decode { position, error },
        }
    }
}

impl<R: Read> Iterator for DumpReader<R> {
    type Item = Result<Batch, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch(|_| false) {
            Ok(Some(BatchItem::Read(batch))) => Some(Ok(batch)),
            Ok(Some(BatchItem::Skipped(_))) | Ok(None) => None,
            Err(err) => {
                // Stop after the first error.
                self.read = self.count;
                Some(Err(err))
            }
        }
    }
}

enum ReadError {
    Io(io::Error),
    Decode(DecodeError),
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        ReadError::Io(err)
    }
}

impl From<DecodeError> for ReadError {
    fn from(err: DecodeError) -> Self {
        ReadError::Decode(err)
    }
}

fn header_error(err: ReadError, position: u64) -> SyncError {
    match err {
        ReadError::Io(err) => SyncError::Io(err),
        ReadError::Decode(error) => SyncError::Decode { position, error },
    }
}

/// Collects one varint's bytes from the stream and decodes them with the
/// wire codec.
fn varint_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, ReadError> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        bytes.push(byte[0]);
        if byte[0] & 0x80 == 0 {
            return Ok(bytes);
        }
        if bytes.len() == MAX_VARINT_LEN {
            return Err(DecodeError::VarIntOverflow.into());
        }
    }
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u64, ReadError> {
    let bytes = varint_bytes(reader)?;
    Ok(Decoder::new(&bytes).read_varint()?)
}

fn read_varint_u32<R: Read>(reader: &mut R) -> Result<u32, ReadError> {
    let bytes = varint_bytes(reader)?;
    Ok(Decoder::new(&bytes).read_varint_u32()?)
}

fn read_count<R: Read>(reader: &mut R) -> Result<usize, ReadError> {
    let bytes = varint_bytes(reader)?;
    Ok(Decoder::new(&bytes).read_count()?)
}
