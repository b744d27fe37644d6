use std::ops::Range;

use crate::CodecError;

/// Uncompressed bytes covered by one tile. The last tile of a stream may be shorter.
pub const TILE_SIZE: usize = 64 * 1024;

/// Fixed part of the header: id, !id, reserved u16, tile count u32.
pub const STREAM_HEADER_SIZE: usize = 8;

pub(crate) const STREAM_ID: u8 = 0x54;

pub fn tile_count(uncompressed_size: u64) -> u64 {
    uncompressed_size.div_ceil(TILE_SIZE as u64)
}

/// Size of the header that precedes the tile payload. Depends only on the
/// uncompressed size, so loaders can split header and payload before parsing.
pub fn header_size(uncompressed_size: u64) -> u64 {
    STREAM_HEADER_SIZE as u64 + 4 * tile_count(uncompressed_size)
}

/// Parsed stream header: one end offset per tile, relative to the payload start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    tile_ends: Vec<u32>,
}

impl StreamHeader {
    pub(crate) fn from_tile_ends(tile_ends: Vec<u32>) -> Self {
        Self { tile_ends }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < STREAM_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: STREAM_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != STREAM_ID || bytes[1] != !STREAM_ID {
            return Err(CodecError::BadHeader("unknown stream id"));
        }

        let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let needed = STREAM_HEADER_SIZE + count * 4;
        if bytes.len() < needed {
            return Err(CodecError::Truncated {
                needed,
                actual: bytes.len(),
            });
        }

        let tile_ends: Vec<u32> = bytes[STREAM_HEADER_SIZE..needed]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if tile_ends.windows(2).any(|w| w[1] < w[0]) {
            return Err(CodecError::BadHeader("tile offsets are not monotonic"));
        }

        Ok(Self { tile_ends })
    }

    pub fn tile_count(&self) -> usize {
        self.tile_ends.len()
    }

    /// Bytes occupied by this header in the stream.
    pub fn encoded_len(&self) -> usize {
        STREAM_HEADER_SIZE + 4 * self.tile_ends.len()
    }

    /// Bytes of tile data that follow the header.
    pub fn payload_len(&self) -> usize {
        self.tile_ends.last().copied().unwrap_or(0) as usize
    }

    pub(crate) fn tile_range(&self, tile: usize) -> Range<usize> {
        let start = if tile == 0 {
            0
        } else {
            self.tile_ends[tile - 1] as usize
        };
        start..self.tile_ends[tile] as usize
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.push(STREAM_ID);
        out.push(!STREAM_ID);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.tile_ends.len() as u32).to_le_bytes());
        for end in &self.tile_ends {
            out.extend_from_slice(&end.to_le_bytes());
        }
    }
}
