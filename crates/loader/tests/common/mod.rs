#![allow(dead_code)]

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use texpack_loader::device::soft::{SoftBuffer, SoftTextureDesc};
use texpack_loader::{BufferTask, LatentTextureDesc, Range};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sample(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 13) ^ (i >> 7)) as u8 ^ seed)
        .collect()
}

/// Stream whose reads fail when they touch `fail_at`.
pub struct FaultyStream {
    inner: Cursor<Vec<u8>>,
    fail_at: u64,
}

impl FaultyStream {
    pub fn new(data: Vec<u8>, fail_at: u64) -> Self {
        Self {
            inner: Cursor::new(data),
            fail_at,
        }
    }
}

impl Read for FaultyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.inner.position();
        if start <= self.fail_at && self.fail_at < start + buf.len() as u64 {
            return Err(io::Error::other("injected read failure"));
        }
        self.inner.read(buf)
    }
}

impl Seek for FaultyStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

pub fn range_bytes(buffer: &SoftBuffer, range: Range) -> Vec<u8> {
    buffer.contents()[range.byte_offset as usize..range.end() as usize].to_vec()
}

/// Final range of each planned task, before execution clears failed ones.
pub fn final_ranges(tasks: &[BufferTask]) -> Vec<Option<Range>> {
    tasks.iter().map(|t| t.pipeline.final_range()).collect()
}

pub const BYTES_PER_TEXEL: u32 = 4;

pub const LATENT_DESC: LatentTextureDesc = LatentTextureDesc {
    width: 8,
    height: 8,
    mip_levels: 3,
    array_size: 2,
    bytes_per_texel: BYTES_PER_TEXEL,
};

pub fn soft_texture_desc() -> SoftTextureDesc {
    SoftTextureDesc {
        width: LATENT_DESC.width,
        height: LATENT_DESC.height,
        mip_levels: LATENT_DESC.mip_levels,
        array_size: LATENT_DESC.array_size,
        bytes_per_texel: BYTES_PER_TEXEL,
    }
}

/// Latent rows padded to `row_pitch`, plus the tightly packed rows a texture should end up with.
pub struct LatentData {
    pub rows: Vec<u8>,
    pub row_pitch: u32,
    pub tight: Vec<u8>,
}

pub fn latent_data(mip: u32, layer: u32, padding: u32) -> LatentData {
    let (width, height) = LATENT_DESC.mip_extent(mip);
    let row_bytes = width * BYTES_PER_TEXEL;
    let row_pitch = row_bytes + padding;
    let seed = (mip * 16 + layer) as u8;

    let rows = sample((row_pitch * height) as usize, seed);
    let tight = rows
        .chunks(row_pitch as usize)
        .flat_map(|row| row[..row_bytes as usize].to_vec())
        .collect();
    LatentData {
        rows,
        row_pitch,
        tight,
    }
}
