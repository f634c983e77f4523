//! Append-only commit journal.
//!
//! Every committed transaction becomes exactly one frame:
//!
//! ```text
//! | magic (4) | version (2) | kind (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is a CBOR [`CommitBatch`]; the CRC covers header and payload.
//!
//! ## Recovery policy
//!
//! - a frame cut short by the end of the journal is a torn write: it is
//!   dropped and the journal truncated to the last complete frame
//! - a CRC mismatch on the final frame is treated the same way
//! - a CRC mismatch, bad magic, unknown version or undecodable payload
//!   followed by more data is corruption and fails the open

use crate::error::{CoreError, CoreResult};
use crate::schema::TableDescriptor;
use crate::types::{RecordId, SequenceNumber};
use crate::value::Record;
use glyphdb_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Magic bytes opening every frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"GLJN";

/// Current frame format version.
pub const JOURNAL_VERSION: u16 = 1;

const HEADER_SIZE: usize = 11;
const CRC_SIZE: usize = 4;

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A committed batch.
    Commit = 1,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// A structural change to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaOp {
    /// Create a table or replace its descriptor, rebuilding indexes.
    PutTable(TableDescriptor),
    /// Remove a table and its rows.
    DropTable {
        /// Table name.
        table: String,
    },
    /// Remove a column from the descriptor and from every row.
    DropColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

/// One operation inside a committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Catalog change.
    Schema(SchemaOp),
    /// Insert or replace a record. The record carries its id.
    Put {
        /// Table name.
        table: String,
        /// Full record after the write.
        record: Record,
    },
    /// Remove a record.
    Delete {
        /// Table name.
        table: String,
        /// Removed id.
        id: RecordId,
    },
}

/// Everything one transaction changed, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Commit sequence number, strictly increasing.
    pub sequence: SequenceNumber,
    /// Operations in application order.
    pub ops: Vec<JournalOp>,
}

impl CommitBatch {
    /// Encodes the batch as a complete frame.
    ///
    /// # Errors
    ///
    /// Returns a codec error if CBOR encoding fails or the payload does not
    /// fit the 4-byte length field.
    pub fn encode_frame(&self) -> CoreResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            CoreError::codec(format!("commit batch of {} bytes is too large", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(FrameKind::Commit as u8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}

/// Computes a CRC32 (IEEE) checksum.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

/// Outcome of scanning one frame.
enum Scan {
    Frame(CommitBatch, usize),
    TornTail,
}

fn scan_frame(bytes: &[u8], offset: usize) -> CoreResult<Scan> {
    let rest = &bytes[offset..];
    if rest.len() < HEADER_SIZE {
        return Ok(Scan::TornTail);
    }
    if rest[..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption(format!(
            "invalid magic at offset {offset}"
        )));
    }
    let version = u16::from_le_bytes([rest[4], rest[5]]);
    if version > JOURNAL_VERSION {
        return Err(CoreError::journal_corruption(format!(
            "unsupported version {version} at offset {offset}"
        )));
    }
    if FrameKind::from_byte(rest[6]).is_none() {
        return Err(CoreError::journal_corruption(format!(
            "unknown frame kind {} at offset {offset}",
            rest[6]
        )));
    }
    let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
    let total = HEADER_SIZE + len + CRC_SIZE;
    if rest.len() < total {
        return Ok(Scan::TornTail);
    }

    let body = &rest[..HEADER_SIZE + len];
    let stored = u32::from_le_bytes([
        rest[HEADER_SIZE + len],
        rest[HEADER_SIZE + len + 1],
        rest[HEADER_SIZE + len + 2],
        rest[HEADER_SIZE + len + 3],
    ]);
    let computed = compute_crc32(body);
    if stored != computed {
        if rest.len() == total {
            return Ok(Scan::TornTail);
        }
        return Err(CoreError::ChecksumMismatch {
            expected: format!("{stored:08x}"),
            actual: format!("{computed:08x}"),
        });
    }

    let batch: CommitBatch = ciborium::from_reader(&body[HEADER_SIZE..]).map_err(|e| {
        CoreError::journal_corruption(format!("undecodable batch at offset {offset}: {e}"))
    })?;
    Ok(Scan::Frame(batch, total))
}

/// The commit journal over a storage backend.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    // A failed append could not be cut back out of the backend.
    poisoned: bool,
}

impl Journal {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
            poisoned: false,
        }
    }

    /// Reads every committed batch, dropping a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if a frame other than the last is
    /// damaged or sequence numbers do not increase.
    pub fn recover(&mut self) -> CoreResult<Vec<CommitBatch>> {
        let bytes = self.backend.read_all()?;
        let mut batches: Vec<CommitBatch> = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            match scan_frame(&bytes, offset)? {
                Scan::Frame(batch, len) => {
                    if let Some(last) = batches.last() {
                        if batch.sequence <= last.sequence {
                            return Err(CoreError::journal_corruption(format!(
                                "{} follows {} at offset {offset}",
                                batch.sequence, last.sequence
                            )));
                        }
                    }
                    batches.push(batch);
                    offset += len;
                }
                Scan::TornTail => {
                    warn!(
                        offset,
                        dropped = bytes.len() - offset,
                        "journal ends in a torn frame, truncating"
                    );
                    self.backend.truncate(offset as u64)?;
                    break;
                }
            }
        }

        debug!(batches = batches.len(), bytes = offset, "journal recovered");
        Ok(batches)
    }

    /// Appends one batch and makes it durable per configuration.
    ///
    /// A failed append leaves the journal as it was: whatever part of the
    /// frame reached the backend is truncated away, so the next batch may
    /// reuse the sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or any storage call fails, and an
    /// integrity error for every append after a failure that could not be
    /// rolled back.
    pub fn append(&mut self, batch: &CommitBatch) -> CoreResult<()> {
        if self.poisoned {
            return Err(CoreError::journal_corruption(
                "an earlier failed commit is still in the journal; reopen the engine",
            ));
        }
        let frame = batch.encode_frame()?;
        let start = self.backend.size()?;
        let Err(err) = self.write_frame(&frame) else {
            return Ok(());
        };

        match self.backend.truncate(start) {
            Ok(()) => {
                warn!(sequence = %batch.sequence, error = %err, "commit not written, journal rolled back");
            }
            Err(undo) => {
                self.poisoned = true;
                warn!(
                    sequence = %batch.sequence,
                    error = %err,
                    rollback = %undo,
                    "commit not written and journal could not be rolled back"
                );
            }
        }
        Err(err)
    }

    fn write_frame(&mut self, frame: &[u8]) -> CoreResult<()> {
        self.backend.append(frame)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Flushes and syncs the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
