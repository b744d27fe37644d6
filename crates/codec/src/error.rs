use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid stream header: {0}")]
    BadHeader(&'static str),

    #[error("stream is truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("stream holds {stream_tiles} tiles but {expected_len} output bytes need {tiles}")]
    SizeMismatch {
        expected_len: usize,
        tiles: usize,
        stream_tiles: usize,
    },

    #[error("tile {tile} is corrupt: {source}")]
    Corrupt {
        tile: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("tile {tile} decodes to more than {expected} bytes")]
    TileOverrun { tile: usize, expected: usize },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("stream failed verification: {0}")]
    Unverified(#[source] Box<CodecError>),

    #[error("payload of {0} bytes does not fit a tile stream")]
    TooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True when a checksummed stream did not reproduce its recorded bytes,
    /// whether it decoded to something else or did not decode at all.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            CodecError::ChecksumMismatch { .. } | CodecError::Unverified(_)
        )
    }
}
