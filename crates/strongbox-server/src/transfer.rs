//! Reception of one file split into sequential chunks.
//!
//! Bytes go straight to disk as they arrive and the CRC is computed
//! incrementally, so the full file is never held in memory. Verification is
//! the client's call; this module only reports the CRC.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use strongbox_shared::constants::CHUNK_SIZE;
use strongbox_shared::crypto::Crc32;
use strongbox_shared::FileChunk;
use uuid::Uuid;

use crate::error::{StorageError, TransferError};

/// Number of packets a file of `content_size` bytes is split into.
pub fn expected_packets(content_size: u32) -> u32 {
    content_size.div_ceil(CHUNK_SIZE as u32).max(1)
}

/// Check that `chunk` can open a new transfer.
///
/// Runs before anything is persisted, so it applies every check
/// [`ActiveTransfer::accept`] would apply to packet 1.
pub fn validate_first(chunk: &FileChunk) -> Result<(), TransferError> {
    if chunk.packet_number != 1 {
        return Err(TransferError::UnexpectedPacket {
            expected: 1,
            got: chunk.packet_number,
        });
    }
    let expected = expected_packets(chunk.content_size);
    if u32::from(chunk.total_packets) != expected {
        return Err(TransferError::PacketCount {
            content_size: chunk.content_size,
            announced: chunk.total_packets,
            expected,
        });
    }
    check_chunk_bounds(chunk, 0, chunk.packet_number == chunk.total_packets)?;
    Ok(())
}

/// Size checks for one chunk, given the bytes already received. Returns the
/// new running total.
fn check_chunk_bounds(chunk: &FileChunk, received: u64, last: bool) -> Result<u64, TransferError> {
    if chunk.content.len() > CHUNK_SIZE {
        return Err(TransferError::ChunkTooLarge {
            size: chunk.content.len(),
            max: CHUNK_SIZE,
        });
    }
    let received = received + chunk.content.len() as u64;
    if received > u64::from(chunk.content_size) {
        return Err(TransferError::Overflow {
            received,
            content_size: chunk.content_size,
        });
    }
    if last && received != u64::from(chunk.content_size) {
        return Err(TransferError::ShortTransfer {
            received,
            content_size: chunk.content_size,
        });
    }
    Ok(received)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkProgress {
    /// More packets are expected.
    Partial { received: u64 },
    /// The last packet arrived.
    Complete { received: u64, crc: u32 },
}

#[derive(Debug)]
pub struct ActiveTransfer {
    file_id: Uuid,
    filename: String,
    path: PathBuf,
    file: File,
    content_size: u32,
    total_packets: u16,
    next_packet: u16,
    received: u64,
    crc: Crc32,
    retries: u32,
    awaiting_confirmation: bool,
}

impl ActiveTransfer {
    /// Start tracking a transfer whose first chunk passed [`validate_first`].
    pub fn begin(file_id: Uuid, path: PathBuf, file: File, first: &FileChunk) -> Self {
        Self {
            file_id,
            filename: first.filename.clone(),
            path,
            file,
            content_size: first.content_size,
            total_packets: first.total_packets,
            next_packet: 1,
            received: 0,
            crc: Crc32::new(),
            retries: 0,
            awaiting_confirmation: false,
        }
    }

    pub fn file_id(&self) -> Uuid {
        self.file_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_size(&self) -> u32 {
        self.content_size
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// True once the last packet arrived and a CRC went out.
    pub fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    /// Validate and store the next chunk.
    pub fn accept(&mut self, chunk: &FileChunk) -> Result<ChunkProgress, TransferError> {
        if chunk.filename != self.filename {
            return Err(TransferError::FilenameMismatch {
                expected: self.filename.clone(),
                got: chunk.filename.clone(),
            });
        }
        if self.awaiting_confirmation {
            return Err(TransferError::HeaderChanged("file already complete"));
        }
        if chunk.packet_number != self.next_packet {
            return Err(TransferError::UnexpectedPacket {
                expected: self.next_packet,
                got: chunk.packet_number,
            });
        }
        if chunk.total_packets != self.total_packets {
            return Err(TransferError::HeaderChanged("total_packets"));
        }
        if chunk.content_size != self.content_size {
            return Err(TransferError::HeaderChanged("content_size"));
        }

        let last = chunk.packet_number == self.total_packets;
        let received = check_chunk_bounds(chunk, self.received, last)?;

        self.file
            .write_all(&chunk.content)
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.crc.update(&chunk.content);
        self.received = received;

        if last {
            self.file
                .flush()
                .and_then(|()| self.file.sync_data())
                .map_err(|e| StorageError::io(&self.path, e))?;
            self.awaiting_confirmation = true;
            Ok(ChunkProgress::Complete {
                received,
                crc: self.crc.value(),
            })
        } else {
            self.next_packet += 1;
            Ok(ChunkProgress::Partial { received })
        }
    }

    /// Count a CrcRetry and return the new total. The ceiling is up to the caller.
    pub fn record_retry(&mut self) -> u32 {
        self.retries += 1;
        self.retries
    }

    /// Throw away the received bytes and expect packet 1 again.
    pub fn rewind(&mut self) -> Result<(), TransferError> {
        self.file
            .set_len(0)
            .and_then(|()| self.file.seek(SeekFrom::Start(0)).map(|_| ()))
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.crc.reset();
        self.received = 0;
        self.next_packet = 1;
        self.awaiting_confirmation = false;
        Ok(())
    }
}
