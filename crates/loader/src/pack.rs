use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use bytemuck::{Pod, Zeroable};
use texpack_codec::Level;

use crate::{
    BufferFootprints, CodecId, CompressionKind, Footprint, LatentFootprints, LatentTextureDesc,
    StreamRange, TextureFootprint,
};

const PACK_MAGIC: [u8; 4] = *b"TXPK";
const PACK_VERSION: u32 = 1;

const FLAG_PRESENT: u32 = 1;
const FLAG_CHECKSUM: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PackHeader {
    magic: [u8; 4],
    version: u32,
    buffer_count: u32,
    latent_count: u32,
    latent_width: u32,
    latent_height: u32,
    latent_mips: u32,
    latent_layers: u32,
    latent_texel_size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct EntryRecord {
    offset: u64,
    size: u64,
    uncompressed_size: u64,
    codec: u32,
    checksum: u32,
    flags: u32,
    width: u32,
    height: u32,
    row_pitch: u32,
    mip: u32,
    layer: u32,
}

impl EntryRecord {
    fn from_footprint(footprint: Option<&Footprint>) -> Self {
        let Some(fp) = footprint else {
            return Self::zeroed();
        };
        let mut flags = FLAG_PRESENT;
        if fp.checksum.is_some() {
            flags |= FLAG_CHECKSUM;
        }
        Self {
            offset: fp.range_in_stream.offset,
            size: fp.range_in_stream.size,
            uncompressed_size: fp.uncompressed_size,
            codec: match fp.compression {
                CompressionKind::None => 0,
                CompressionKind::Codec(codec) => codec.tag(),
            },
            checksum: fp.checksum.unwrap_or(0),
            flags,
            ..Self::zeroed()
        }
    }

    fn footprint(&self) -> Result<Option<Footprint>> {
        if self.flags & FLAG_PRESENT == 0 {
            return Ok(None);
        }
        let compression = match self.codec {
            0 => CompressionKind::None,
            tag => match CodecId::from_tag(tag) {
                Some(codec) => CompressionKind::Codec(codec),
                None => bail!("unknown codec tag {tag}"),
            },
        };
        Ok(Some(Footprint {
            range_in_stream: StreamRange {
                offset: self.offset,
                size: self.size,
            },
            uncompressed_size: self.uncompressed_size,
            compression,
            checksum: (self.flags & FLAG_CHECKSUM != 0).then_some(self.checksum),
        }))
    }
}

#[derive(Debug, Clone, Default)]
enum BufferEntry {
    #[default]
    Absent,
    Resident(Arc<[u8]>),
    Stored(Footprint),
}

/// Table des footprints d'un pack : buffers puis sous-ressources latentes.
/// Les offsets pointent dans le flux renvoyé avec l'index.
#[derive(Debug, Clone, Default)]
pub struct PackIndex {
    buffers: Vec<BufferEntry>,
    latent_desc: LatentTextureDesc,
    /// Indexé par `mip + layer * mip_levels`.
    latents: Vec<Option<TextureFootprint>>,
}

impl PackIndex {
    /// Ouvre un pack écrit par [`PackBuilder::write_to`].
    /// Le fichier renvoyé sert de flux d'entrée pour l'exécution.
    pub fn open(path: &Path) -> Result<(File, PackIndex)> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open pack {:?}", path))?;

        let mut bytes = [0u8; size_of::<PackHeader>()];
        file.read_exact(&mut bytes)
            .with_context(|| format!("failed to read pack header of {:?}", path))?;
        let header: PackHeader = bytemuck::pod_read_unaligned(&bytes);
        if header.magic != PACK_MAGIC {
            bail!("{:?} is not a texture pack", path);
        }
        if header.version != PACK_VERSION {
            bail!("{:?} has unsupported pack version {}", path, header.version);
        }

        let latent_desc = LatentTextureDesc {
            width: header.latent_width,
            height: header.latent_height,
            mip_levels: header.latent_mips,
            array_size: header.latent_layers,
            bytes_per_texel: header.latent_texel_size,
        };
        if u64::from(header.latent_count) != latent_desc.subresource_count() {
            bail!(
                "{:?} lists {} latents for {} subresources",
                path,
                header.latent_count,
                latent_desc.subresource_count()
            );
        }
        let table_len = (u64::from(header.buffer_count) + u64::from(header.latent_count))
            * size_of::<EntryRecord>() as u64;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat pack {:?}", path))?
            .len();
        if table_len > file_len.saturating_sub(size_of::<PackHeader>() as u64) {
            bail!("{:?} is truncated: its table needs {} bytes", path, table_len);
        }

        let mut table = vec![0u8; table_len as usize];
        file.read_exact(&mut table)
            .with_context(|| format!("failed to read pack table of {:?}", path))?;
        let records: Vec<EntryRecord> = table
            .chunks_exact(size_of::<EntryRecord>())
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let (buffer_records, latent_records) = records.split_at(header.buffer_count as usize);

        let mut index = PackIndex {
            latent_desc,
            ..Default::default()
        };
        for record in buffer_records {
            index.buffers.push(match record.footprint()? {
                Some(fp) => BufferEntry::Stored(fp),
                None => BufferEntry::Absent,
            });
        }
        index.latents = vec![None; index.latent_desc.subresource_count() as usize];
        for record in latent_records {
            let Some(buffer) = record.footprint()? else {
                continue;
            };
            if record.mip >= latent_desc.mip_levels || record.layer >= latent_desc.array_size {
                bail!("latent mip {} layer {} is outside the texture", record.mip, record.layer);
            }
            let slot = latent_desc.subresource_index(record.mip, record.layer) as usize;
            let Some(entry) = index.latents.get_mut(slot) else {
                bail!("latent mip {} layer {} is outside the texture", record.mip, record.layer);
            };
            *entry = Some(TextureFootprint {
                buffer,
                width: record.width,
                height: record.height,
                row_pitch: record.row_pitch,
            });
        }

        log::info!(
            "Opened pack {:?}: {} buffers, {} latent subresources",
            path,
            index.buffers.len(),
            index.latents.iter().flatten().count()
        );
        Ok((file, index))
    }
}

impl BufferFootprints for PackIndex {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn resident_buffer(&self, index: usize) -> Option<Arc<[u8]>> {
        match self.buffers.get(index)? {
            BufferEntry::Resident(data) => Some(Arc::clone(data)),
            _ => None,
        }
    }

    fn buffer_footprint(&self, index: usize) -> Option<Footprint> {
        match self.buffers.get(index)? {
            BufferEntry::Stored(fp) => Some(*fp),
            _ => None,
        }
    }
}

impl LatentFootprints for PackIndex {
    fn latent_desc(&self) -> LatentTextureDesc {
        self.latent_desc
    }

    fn latent_footprint(&self, mip: u32, layer: u32) -> Option<TextureFootprint> {
        if mip >= self.latent_desc.mip_levels || layer >= self.latent_desc.array_size {
            return None;
        }
        let slot = self.latent_desc.subresource_index(mip, layer) as usize;
        self.latents.get(slot).copied().flatten()
    }
}

/// Construit un pack en mémoire : les données sont concaténées dans l'ordre
/// d'ajout, compressées ou non.
#[derive(Debug, Default)]
pub struct PackBuilder {
    data: Vec<u8>,
    index: PackIndex,
    level: Level,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    fn store(&mut self, data: &[u8], compress: bool) -> Result<Footprint> {
        let offset = self.data.len() as u64;
        if !compress {
            self.data.extend_from_slice(data);
            return Ok(Footprint::uncompressed(offset, data.len() as u64));
        }

        let stream = texpack_codec::compress(data, self.level)
            .with_context(|| format!("failed to compress {} bytes", data.len()))?;
        self.data.extend_from_slice(&stream);
        Ok(Footprint::compressed(
            StreamRange {
                offset,
                size: stream.len() as u64,
            },
            data.len() as u64,
            CodecId::TiledDeflate,
            Some(texpack_codec::checksum(data)),
        ))
    }

    fn push(&mut self, entry: BufferEntry) -> usize {
        self.index.buffers.push(entry);
        self.index.buffers.len() - 1
    }

    pub fn add_uncompressed(&mut self, data: &[u8]) -> usize {
        let fp = Footprint::uncompressed(self.data.len() as u64, data.len() as u64);
        self.data.extend_from_slice(data);
        self.push(BufferEntry::Stored(fp))
    }

    pub fn add_compressed(&mut self, data: &[u8]) -> Result<usize> {
        let fp = self.store(data, true)?;
        Ok(self.push(BufferEntry::Stored(fp)))
    }

    /// Buffer déjà en mémoire, chargé par copie directe.
    pub fn add_resident(&mut self, data: impl Into<Arc<[u8]>>) -> usize {
        self.push(BufferEntry::Resident(data.into()))
    }

    pub fn add_absent(&mut self) -> usize {
        self.push(BufferEntry::Absent)
    }

    pub fn set_latent_texture(&mut self, desc: LatentTextureDesc) {
        self.index.latent_desc = desc;
        self.index.latents = vec![None; desc.subresource_count() as usize];
    }

    /// Ajoute une sous-ressource latente dont les lignes sont espacées de `row_pitch`.
    pub fn add_latent(
        &mut self,
        mip: u32,
        layer: u32,
        data: &[u8],
        row_pitch: u32,
        compress: bool,
    ) -> Result<()> {
        let desc = self.index.latent_desc;
        if mip >= desc.mip_levels || layer >= desc.array_size {
            bail!("latent mip {mip} layer {layer} is outside the texture");
        }
        let (width, height) = desc.mip_extent(mip);
        let buffer = self.store(data, compress)?;
        self.index.latents[desc.subresource_index(mip, layer) as usize] = Some(TextureFootprint {
            buffer,
            width,
            height,
            row_pitch,
        });
        Ok(())
    }

    /// Renvoie le flux et son index, pour un chargement depuis la mémoire.
    pub fn finish(self) -> (Vec<u8>, PackIndex) {
        (self.data, self.index)
    }

    /// Ecrit le pack sur disque. Les buffers résidents y sont stockés non compressés.
    pub fn write_to(self, path: &Path) -> Result<()> {
        let PackBuilder {
            mut data,
            mut index,
            ..
        } = self;

        for entry in &mut index.buffers {
            if let BufferEntry::Resident(bytes) = entry {
                let fp = Footprint::uncompressed(data.len() as u64, bytes.len() as u64);
                data.extend_from_slice(bytes);
                *entry = BufferEntry::Stored(fp);
            }
        }

        let desc = index.latent_desc;
        let latent_records: Vec<EntryRecord> = (0..desc.array_size)
            .flat_map(|layer| (0..desc.mip_levels).map(move |mip| (mip, layer)))
            .map(|(mip, layer)| {
                let fp = index.latent_footprint(mip, layer);
                EntryRecord {
                    width: fp.map_or(0, |f| f.width),
                    height: fp.map_or(0, |f| f.height),
                    row_pitch: fp.map_or(0, |f| f.row_pitch),
                    mip,
                    layer,
                    ..EntryRecord::from_footprint(fp.as_ref().map(|f| &f.buffer))
                }
            })
            .collect();

        let header = PackHeader {
            magic: PACK_MAGIC,
            version: PACK_VERSION,
            buffer_count: index.buffers.len() as u32,
            latent_count: latent_records.len() as u32,
            latent_width: desc.width,
            latent_height: desc.height,
            latent_mips: desc.mip_levels,
            latent_layers: desc.array_size,
            latent_texel_size: desc.bytes_per_texel,
        };
        let base = (size_of::<PackHeader>()
            + (index.buffers.len() + latent_records.len()) * size_of::<EntryRecord>())
            as u64;

        let mut records: Vec<EntryRecord> = index
            .buffers
            .iter()
            .map(|entry| match entry {
                BufferEntry::Stored(fp) => EntryRecord::from_footprint(Some(fp)),
                _ => EntryRecord::zeroed(),
            })
            .chain(latent_records)
            .collect();
        for record in &mut records {
            if record.flags & FLAG_PRESENT != 0 {
                record.offset += base;
            }
        }

        let file = File::create(path).with_context(|| format!("failed to create pack {:?}", path))?;
        let mut out = BufWriter::new(file);
        out.write_all(bytemuck::bytes_of(&header))
            .and_then(|()| out.write_all(bytemuck::cast_slice(&records)))
            .and_then(|()| out.write_all(&data))
            .and_then(|()| out.flush())
            .with_context(|| format!("failed to write pack {:?}", path))?;

        log::debug!("Wrote pack {:?} ({} data bytes)", path, data.len());
        Ok(())
    }
}
