use std::sync::Arc;

/// Codecs a pack can store payloads with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    TiledDeflate,
}

impl CodecId {
    /// Size of the header the codec prepends to the payload.
    pub fn header_size(self, uncompressed_size: u64) -> u64 {
        match self {
            CodecId::TiledDeflate => texpack_codec::header_size(uncompressed_size),
        }
    }

    pub(crate) fn tag(self) -> u32 {
        match self {
            CodecId::TiledDeflate => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(CodecId::TiledDeflate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionKind {
    #[default]
    None,
    Codec(CodecId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamRange {
    pub offset: u64,
    pub size: u64,
}

/// Where the bytes of one buffer or subresource live in the source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footprint {
    pub range_in_stream: StreamRange,
    pub uncompressed_size: u64,
    pub compression: CompressionKind,
    /// CRC-32 of the uncompressed bytes.
    pub checksum: Option<u32>,
}

impl Footprint {
    pub fn uncompressed(offset: u64, size: u64) -> Self {
        Self {
            range_in_stream: StreamRange { offset, size },
            uncompressed_size: size,
            compression: CompressionKind::None,
            checksum: None,
        }
    }

    pub fn compressed(
        range_in_stream: StreamRange,
        uncompressed_size: u64,
        codec: CodecId,
        checksum: Option<u32>,
    ) -> Self {
        Self {
            range_in_stream,
            uncompressed_size,
            compression: CompressionKind::Codec(codec),
            checksum,
        }
    }

    /// Zero uncompressed bytes means "not present".
    pub fn is_present(&self) -> bool {
        self.uncompressed_size != 0
    }

    pub fn header_size(&self) -> u64 {
        match self.compression {
            CompressionKind::None => 0,
            CompressionKind::Codec(codec) => codec.header_size(self.uncompressed_size),
        }
    }

    /// Checks the size relations every pipeline relies on.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self.compression {
            CompressionKind::None if self.range_in_stream.size != self.uncompressed_size => {
                Err("stored size differs from uncompressed size")
            }
            CompressionKind::Codec(_) if self.range_in_stream.size < self.header_size() => {
                Err("stored size is smaller than the codec header")
            }
            _ => Ok(()),
        }
    }
}

/// Footprint of one latent texture subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureFootprint {
    pub buffer: Footprint,
    pub width: u32,
    pub height: u32,
    /// Bytes between rows in the uncompressed data.
    pub row_pitch: u32,
}

impl TextureFootprint {
    /// Bytes a row-pitched upload of this subresource reads.
    pub fn upload_size(&self, bytes_per_texel: u32) -> u64 {
        if self.height == 0 {
            return 0;
        }
        u64::from(self.row_pitch) * u64::from(self.height - 1)
            + u64::from(self.width) * u64::from(bytes_per_texel)
    }

    /// Checks the buffer sizes and that every row fits both the data and mip `mip` of `desc`.
    pub fn validate(&self, desc: &LatentTextureDesc, mip: u32) -> Result<(), &'static str> {
        self.buffer.validate()?;
        if desc.bytes_per_texel == 0 {
            return Err("latent format has no texel size");
        }
        if self.width == 0 || self.height == 0 {
            return Err("empty subresource extent");
        }
        let (mip_width, mip_height) = desc.mip_extent(mip);
        if self.width > mip_width || self.height > mip_height {
            return Err("extent exceeds the mip level");
        }
        if u64::from(self.row_pitch) < u64::from(self.width) * u64::from(desc.bytes_per_texel) {
            return Err("row pitch is shorter than a row");
        }
        if self.upload_size(desc.bytes_per_texel) > self.buffer.uncompressed_size {
            return Err("rows overrun the uncompressed data");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatentTextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub bytes_per_texel: u32,
}

impl LatentTextureDesc {
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        (
            (self.width >> mip).max(1),
            (self.height >> mip).max(1),
        )
    }

    /// D3D-style flat subresource index.
    pub fn subresource_index(&self, mip: u32, layer: u32) -> u32 {
        mip + layer * self.mip_levels
    }

    pub fn subresource_count(&self) -> u64 {
        u64::from(self.mip_levels) * u64::from(self.array_size)
    }
}

/// Read-only view of the buffers of a texture set.
pub trait BufferFootprints {
    fn buffer_count(&self) -> usize;

    /// Bytes that are already in host memory and need no stream access.
    fn resident_buffer(&self, _index: usize) -> Option<Arc<[u8]>> {
        None
    }

    /// `None` when the buffer is not present.
    fn buffer_footprint(&self, index: usize) -> Option<Footprint>;
}

/// Read-only view of the latent texture of a texture set.
pub trait LatentFootprints {
    fn latent_desc(&self) -> LatentTextureDesc;

    fn latent_footprint(&self, mip: u32, layer: u32) -> Option<TextureFootprint>;
}
