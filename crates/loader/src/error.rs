use std::io;

use texpack_codec::CodecError;
use thiserror::Error;

use crate::{BackendError, Category, DeviceError, Range, StateError, StreamRange};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {} bytes at offset {}: {source}", .range.size, .range.offset)]
    Io {
        range: StreamRange,
        #[source]
        source: io::Error,
    },
    #[error("integrity check failed: {0}")]
    Integrity(#[source] CodecError),
    #[error("decompression failed: {0}")]
    Codec(#[source] CodecError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to allocate {name} ({size} bytes)")]
    Allocation {
        name: &'static str,
        size: u64,
        #[source]
        source: DeviceError,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("async decompression failed: {0}")]
    AsyncEngine(#[source] BackendError),
    #[error("the batch has no {0:?} buffer")]
    MissingBuffer(Category),
    #[error("{category:?} range {range:?} exceeds the {size} byte buffer")]
    RangeOutOfBounds {
        category: Category,
        range: Range,
        size: u64,
    },
    #[error("no texture bound to slot {0}")]
    MissingTexture(usize),
    #[error(transparent)]
    State(#[from] StateError),
}

impl LoadError {
    pub fn from_codec(err: CodecError) -> Self {
        if err.is_integrity() {
            LoadError::Integrity(err)
        } else {
            LoadError::Codec(err)
        }
    }

    pub fn from_backend(err: BackendError) -> Self {
        match err {
            BackendError::Decode(err) => LoadError::from_codec(err),
            err => LoadError::Backend(err),
        }
    }

    /// Batch-level errors abort the whole execution; the others only fail one task.
    pub fn is_batch_fatal(&self) -> bool {
        !matches!(
            self,
            LoadError::Io { .. }
                | LoadError::Integrity(_)
                | LoadError::Codec(_)
                | LoadError::Backend(_)
        )
    }
}
