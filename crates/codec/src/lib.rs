//! Tiled deflate streams for packed texture-set payloads.
//!
//! A stream is a small header followed by independently deflated 64 KiB tiles.
//! The header size only depends on the uncompressed size, which lets a loader
//! read the header into host memory and route the payload elsewhere.

mod error;
mod header;

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

pub use error::*;
pub use header::{STREAM_HEADER_SIZE, StreamHeader, TILE_SIZE, header_size, tile_count};

/// Deflate effort, 0 (stored) to 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level(u32);

impl Level {
    pub const STORE: Level = Level(0);
    pub const FAST: Level = Level(1);
    pub const BEST: Level = Level(9);

    pub fn new(level: u32) -> Self {
        Level(level.min(9))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Level(6)
    }
}

/// CRC-32 of the uncompressed bytes, as stored next to a footprint.
pub fn checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub fn compress(data: &[u8], level: Level) -> Result<Vec<u8>, CodecError> {
    let mut tiles = Vec::new();
    let mut tile_ends = Vec::with_capacity(data.len().div_ceil(TILE_SIZE));

    for chunk in data.chunks(TILE_SIZE) {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level.get()));
        encoder.write_all(chunk)?;
        tiles.extend_from_slice(&encoder.finish()?);
        let end = u32::try_from(tiles.len()).map_err(|_| CodecError::TooLarge(data.len()))?;
        tile_ends.push(end);
    }

    let header = StreamHeader::from_tile_ends(tile_ends);
    let mut stream = Vec::with_capacity(header.encoded_len() + tiles.len());
    header.write(&mut stream);
    stream.extend_from_slice(&tiles);
    Ok(stream)
}

/// Decodes a whole stream into `out`, which must be exactly the uncompressed size.
/// When `expected_checksum` is set the decoded bytes are verified against it, and a
/// stream that fails to decode is reported as `Unverified`.
pub fn decompress(
    stream: &[u8],
    out: &mut [u8],
    expected_checksum: Option<u32>,
) -> Result<(), CodecError> {
    let Some(expected) = expected_checksum else {
        return decode(stream, out);
    };
    decode(stream, out).map_err(|err| CodecError::Unverified(Box::new(err)))?;

    let actual = checksum(out);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

fn decode(stream: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
    let header = StreamHeader::parse(stream)?;
    let (header_bytes, payload) = stream.split_at(header.encoded_len());
    decompress_split(header_bytes, payload, out)
}

/// Decodes a stream whose header and payload live in separate memory.
pub fn decompress_split(header: &[u8], payload: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
    let header = StreamHeader::parse(header)?;

    let tiles = tile_count(out.len() as u64) as usize;
    if header.tile_count() != tiles {
        return Err(CodecError::SizeMismatch {
            expected_len: out.len(),
            tiles,
            stream_tiles: header.tile_count(),
        });
    }
    if payload.len() < header.payload_len() {
        return Err(CodecError::Truncated {
            needed: header.payload_len(),
            actual: payload.len(),
        });
    }

    for (tile, dst) in out.chunks_mut(TILE_SIZE).enumerate() {
        inflate_tile(tile, &payload[header.tile_range(tile)], dst)?;
    }
    Ok(())
}

fn inflate_tile(tile: usize, input: &[u8], out: &mut [u8]) -> Result<(), CodecError> {
    let mut decoder = DeflateDecoder::new(input);
    decoder
        .read_exact(out)
        .map_err(|source| CodecError::Corrupt { tile, source })?;

    let mut trailing = [0u8; 1];
    match decoder.read(&mut trailing) {
        Ok(0) => Ok(()),
        Ok(_) => Err(CodecError::TileOverrun {
            tile,
            expected: out.len(),
        }),
        Err(source) => Err(CodecError::Corrupt { tile, source }),
    }
}
