//! Per-object write buffer.
//!
//! An [`ObjectWriteBuffer`] collects the bytes written to one key until the
//! key is flushed.  Its [`BufferState`] moves
//! `Empty -> Accumulating -> Committing`.  After a successful commit the
//! owner drops the buffer; a failed commit hands the bytes back and the
//! buffer returns to `Accumulating`.

use std::num::NonZeroU64;

use bytes::{Bytes, BytesMut};

use crate::errors::FsError;
use crate::uri::ObjectKey;

/// Where a buffer is in its commit cycle.
#[derive(Debug)]
pub enum BufferState {
    /// Nothing written since construction.
    Empty,
    /// Bytes appended by successive writes, in call order.
    Accumulating(BytesMut),
    /// Bytes handed to a flush that has not finished yet.
    Committing {
        size: u64,
        upload_id: Option<String>,
    },
}

/// How a flush commits the buffered bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPath {
    SinglePut,
    Multipart,
}

impl CommitPath {
    /// One PUT when the buffer fits in a part or multipart is disabled.
    pub fn select(size: u64, part_size: NonZeroU64, multipart_enabled: bool) -> Self {
        if multipart_enabled && size > part_size.get() {
            CommitPath::Multipart
        } else {
            CommitPath::SinglePut
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitPath::SinglePut => "single",
            CommitPath::Multipart => "multipart",
        }
    }
}

/// Accumulation buffer for one key.
#[derive(Debug)]
pub struct ObjectWriteBuffer {
    part_size: NonZeroU64,
    multipart_enabled: bool,
    state: BufferState,
}

impl ObjectWriteBuffer {
    pub fn new(part_size: NonZeroU64, multipart_enabled: bool) -> Self {
        Self {
            part_size,
            multipart_enabled,
            state: BufferState::Empty,
        }
    }

    pub fn state(&self) -> &BufferState {
        &self.state
    }

    pub fn part_size(&self) -> NonZeroU64 {
        self.part_size
    }

    pub fn multipart_enabled(&self) -> bool {
        self.multipart_enabled
    }

    /// Bytes appended since construction or the last failed commit began.
    pub fn accumulated_size(&self) -> u64 {
        match &self.state {
            BufferState::Empty => 0,
            BufferState::Accumulating(data) => data.len() as u64,
            BufferState::Committing { size, .. } => *size,
        }
    }

    /// Upload id of the multipart upload driving the current commit, if any.
    pub fn in_flight_upload_id(&self) -> Option<&str> {
        match &self.state {
            BufferState::Committing { upload_id, .. } => upload_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_committing(&self) -> bool {
        matches!(self.state, BufferState::Committing { .. })
    }

    /// Append `data`.
    ///
    /// Without multipart the buffer may never exceed one part; an append
    /// that would is rejected and leaves the buffer as it was.
    pub fn append(&mut self, key: &ObjectKey, data: &[u8]) -> Result<(), FsError> {
        if self.is_committing() {
            return Err(FsError::FlushInProgress {
                key: key.to_string(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let buffered = self.accumulated_size();
        let length = data.len() as u64;
        let ceiling = self.part_size.get();
        if !self.multipart_enabled && buffered.saturating_add(length) > ceiling {
            return Err(FsError::CapacityExceeded {
                key: key.to_string(),
                buffered,
                length,
                ceiling,
            });
        }

        match &mut self.state {
            BufferState::Accumulating(buf) => buf.extend_from_slice(data),
            state => *state = BufferState::Accumulating(BytesMut::from(data)),
        }
        Ok(())
    }

    /// Take the buffered bytes for a flush.  Returns `None` when there is
    /// nothing to commit.
    pub fn begin_commit(&mut self, key: &ObjectKey) -> Result<Option<Bytes>, FsError> {
        match std::mem::replace(&mut self.state, BufferState::Empty) {
            BufferState::Empty => Ok(None),
            BufferState::Accumulating(data) => {
                self.state = BufferState::Committing {
                    size: data.len() as u64,
                    upload_id: None,
                };
                Ok(Some(data.freeze()))
            }
            committing @ BufferState::Committing { .. } => {
                self.state = committing;
                Err(FsError::FlushInProgress {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Commit path for the bytes currently held.
    pub fn commit_path(&self) -> CommitPath {
        CommitPath::select(
            self.accumulated_size(),
            self.part_size,
            self.multipart_enabled,
        )
    }

    /// Remember the multipart upload driving the current commit.
    pub fn record_upload(&mut self, id: &str) {
        if let BufferState::Committing { upload_id, .. } = &mut self.state {
            *upload_id = Some(id.to_string());
        }
    }

    /// The commit failed; restore `data` so the flush can be retried.
    pub fn abandon_commit(&mut self, data: Bytes) {
        self.state = BufferState::Accumulating(BytesMut::from(&data[..]));
    }
}
