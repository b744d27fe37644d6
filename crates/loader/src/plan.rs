use crate::{
    BackendCaps, BatchSizes, BufferFootprints, BufferPipeline, BufferTask, Category, Footprint,
    LatentFootprints, LatentTextureDesc, PipelineKind, RangeAllocator, TextureFootprint, TexturePipeline,
    TextureTask, select_pipeline,
};

/// Buffer tasks of one texture set plus the buffer sizes they need.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferPlan {
    pub tasks: Vec<BufferTask>,
    pub sizes: BatchSizes,
}

/// Builds one task per buffer of `provider`, in index order.
/// Planning is pure: the same inputs give the same tasks and ranges.
pub fn plan_buffer_tasks(provider: &dyn BufferFootprints, caps: BackendCaps) -> BufferPlan {
    let mut alloc = RangeAllocator::new();
    let mut tasks = Vec::with_capacity(provider.buffer_count());

    for index in 0..provider.buffer_count() {
        let task = match provider.resident_buffer(index).filter(|b| !b.is_empty()) {
            Some(source) => {
                let size = source.len() as u64;
                BufferTask {
                    index,
                    footprint: Footprint::uncompressed(0, size),
                    pipeline: BufferPipeline::DirectCopy {
                        source,
                        staging: alloc.append(Category::Staging, size),
                        final_range: alloc.append(Category::Final, size),
                    },
                }
            }
            None => plan_stored_buffer(index, provider.buffer_footprint(index), caps, &mut alloc),
        };
        log::trace!("Buffer {index} loads with {:?}", task.kind());
        tasks.push(task);
    }

    BufferPlan {
        tasks,
        sizes: alloc.sizes(),
    }
}

fn plan_stored_buffer(
    index: usize,
    footprint: Option<Footprint>,
    caps: BackendCaps,
    alloc: &mut RangeAllocator,
) -> BufferTask {
    let footprint = footprint.unwrap_or_default();
    let kind = checked_pipeline(&footprint, caps, || format!("buffer {index}"));

    let stored = footprint.range_in_stream.size;
    let uncompressed = footprint.uncompressed_size;
    let pipeline = match kind {
        PipelineKind::None | PipelineKind::DirectCopy => BufferPipeline::None,
        PipelineKind::ReadUncompressed => BufferPipeline::ReadUncompressed {
            staging: alloc.append(Category::Staging, stored),
            final_range: alloc.append(Category::Final, uncompressed),
        },
        PipelineKind::DecompressOnCpu => BufferPipeline::DecompressOnCpu {
            compressed: vec![0; stored as usize],
            uncompressed: vec![0; uncompressed as usize],
            staging: alloc.append(Category::Staging, uncompressed),
            final_range: alloc.append(Category::Final, uncompressed),
        },
        PipelineKind::DecompressWithGpuExtension => {
            let header = footprint.header_size();
            BufferPipeline::DecompressWithGpuExtension {
                header: vec![0; header as usize],
                staging: alloc.append(Category::Staging, stored - header),
                temp: alloc.append(Category::Temp, uncompressed),
                final_range: alloc.append(Category::Final, uncompressed),
            }
        }
        PipelineKind::DecompressWithAsyncEngine => BufferPipeline::DecompressWithAsyncEngine {
            compressed: vec![0; stored as usize],
            final_range: alloc.append(Category::Final, uncompressed),
        },
    };

    BufferTask {
        index,
        footprint,
        pipeline,
    }
}

/// Pipeline for a stored footprint, or `None` when its sizes are inconsistent.
fn checked_pipeline(
    footprint: &Footprint,
    caps: BackendCaps,
    what: impl FnOnce() -> String,
) -> PipelineKind {
    let kind = select_pipeline(Some(footprint), caps);
    if kind == PipelineKind::None {
        return kind;
    }
    match footprint.validate() {
        Ok(()) => kind,
        Err(reason) => {
            log::warn!("Skipping {}: {reason}", what());
            PipelineKind::None
        }
    }
}

/// Latent texture tasks of one or more texture sets sharing a batch.
/// Each `add_texture` call binds the next texture slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LatentPlan {
    pub tasks: Vec<TextureTask>,
    alloc: RangeAllocator,
    textures: usize,
}

impl LatentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the tasks of one latent texture, mip-major from `first_mip`,
    /// and returns the slot its texture must be bound to at execution.
    pub fn add_texture(
        &mut self,
        provider: &dyn LatentFootprints,
        first_mip: u32,
        caps: BackendCaps,
    ) -> usize {
        let slot = self.textures;
        self.textures += 1;

        let desc = provider.latent_desc();
        for mip in first_mip..desc.mip_levels {
            for layer in 0..desc.array_size {
                let footprint = provider.latent_footprint(mip, layer).unwrap_or_default();
                let pipeline = self.plan_subresource(&footprint, &desc, caps, slot, mip, layer);
                self.tasks.push(TextureTask {
                    slot,
                    mip,
                    layer,
                    mip_levels: desc.mip_levels,
                    footprint,
                    pipeline,
                });
            }
        }
        slot
    }

    fn plan_subresource(
        &mut self,
        footprint: &TextureFootprint,
        desc: &LatentTextureDesc,
        caps: BackendCaps,
        slot: usize,
        mip: u32,
        layer: u32,
    ) -> TexturePipeline {
        let what = || format!("latent mip {mip} layer {layer} of texture {slot}");
        let buffer = &footprint.buffer;
        let mut kind = checked_pipeline(buffer, caps, what);
        if kind != PipelineKind::None {
            if let Err(reason) = footprint.validate(desc, mip) {
                log::warn!("Skipping {}: {reason}", what());
                kind = PipelineKind::None;
            }
        }

        let stored = buffer.range_in_stream.size;
        let uncompressed = buffer.uncompressed_size;
        match kind {
            PipelineKind::None | PipelineKind::DirectCopy => TexturePipeline::None,
            PipelineKind::ReadUncompressed => TexturePipeline::ReadUncompressed {
                data: vec![0; stored as usize],
            },
            PipelineKind::DecompressOnCpu => TexturePipeline::DecompressOnCpu {
                compressed: vec![0; stored as usize],
                uncompressed: vec![0; uncompressed as usize],
            },
            PipelineKind::DecompressWithGpuExtension => {
                let header = buffer.header_size();
                TexturePipeline::DecompressWithGpuExtension {
                    header: vec![0; header as usize],
                    payload: vec![0; (stored - header) as usize],
                    compressed: self.alloc.append(Category::Compressed, stored - header),
                    decompressed: self.alloc.append(Category::Decompressed, uncompressed),
                }
            }
            PipelineKind::DecompressWithAsyncEngine => TexturePipeline::DecompressWithAsyncEngine {
                compressed: vec![0; stored as usize],
            },
        }
    }

    pub fn sizes(&self) -> BatchSizes {
        self.alloc.sizes()
    }

    /// Number of texture slots the executor expects.
    pub fn texture_count(&self) -> usize {
        self.textures
    }
}
