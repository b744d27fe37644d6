use std::sync::Arc;

use crate::{Footprint, PipelineKind, Range, TextureFootprint};

// -----------------------------------------------------------------------------
// Buffers

/// Per-pipeline data of a buffer task. Ranges point into the batch buffers,
/// `Vec`s are host memory owned by the task.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BufferPipeline {
    #[default]
    None,
    DirectCopy {
        source: Arc<[u8]>,
        staging: Range,
        final_range: Range,
    },
    ReadUncompressed {
        staging: Range,
        final_range: Range,
    },
    DecompressOnCpu {
        compressed: Vec<u8>,
        uncompressed: Vec<u8>,
        staging: Range,
        final_range: Range,
    },
    DecompressWithGpuExtension {
        header: Vec<u8>,
        /// Compressed payload.
        staging: Range,
        /// Decompression output, copied into the final range.
        temp: Range,
        final_range: Range,
    },
    DecompressWithAsyncEngine {
        compressed: Vec<u8>,
        final_range: Range,
    },
}

impl BufferPipeline {
    pub fn kind(&self) -> PipelineKind {
        match self {
            BufferPipeline::None => PipelineKind::None,
            BufferPipeline::DirectCopy { .. } => PipelineKind::DirectCopy,
            BufferPipeline::ReadUncompressed { .. } => PipelineKind::ReadUncompressed,
            BufferPipeline::DecompressOnCpu { .. } => PipelineKind::DecompressOnCpu,
            BufferPipeline::DecompressWithGpuExtension { .. } => {
                PipelineKind::DecompressWithGpuExtension
            }
            BufferPipeline::DecompressWithAsyncEngine { .. } => {
                PipelineKind::DecompressWithAsyncEngine
            }
        }
    }

    pub fn final_range(&self) -> Option<Range> {
        match self {
            BufferPipeline::None => None,
            BufferPipeline::DirectCopy { final_range, .. }
            | BufferPipeline::ReadUncompressed { final_range, .. }
            | BufferPipeline::DecompressOnCpu { final_range, .. }
            | BufferPipeline::DecompressWithGpuExtension { final_range, .. }
            | BufferPipeline::DecompressWithAsyncEngine { final_range, .. } => Some(*final_range),
        }
    }

    pub fn staging_range(&self) -> Option<Range> {
        match self {
            BufferPipeline::DirectCopy { staging, .. }
            | BufferPipeline::ReadUncompressed { staging, .. }
            | BufferPipeline::DecompressOnCpu { staging, .. }
            | BufferPipeline::DecompressWithGpuExtension { staging, .. } => Some(*staging),
            _ => None,
        }
    }
}

/// Loads buffer `index` of a texture set into its final range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferTask {
    pub index: usize,
    pub footprint: Footprint,
    pub pipeline: BufferPipeline,
}

impl BufferTask {
    pub fn kind(&self) -> PipelineKind {
        self.pipeline.kind()
    }
}

// -----------------------------------------------------------------------------
// Latent textures

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TexturePipeline {
    #[default]
    None,
    ReadUncompressed {
        data: Vec<u8>,
    },
    DecompressOnCpu {
        compressed: Vec<u8>,
        uncompressed: Vec<u8>,
    },
    DecompressWithGpuExtension {
        header: Vec<u8>,
        payload: Vec<u8>,
        /// Where the payload is uploaded.
        compressed: Range,
        /// Decompression output, copied into the subresource.
        decompressed: Range,
    },
    DecompressWithAsyncEngine {
        compressed: Vec<u8>,
    },
}

impl TexturePipeline {
    pub fn kind(&self) -> PipelineKind {
        match self {
            TexturePipeline::None => PipelineKind::None,
            TexturePipeline::ReadUncompressed { .. } => PipelineKind::ReadUncompressed,
            TexturePipeline::DecompressOnCpu { .. } => PipelineKind::DecompressOnCpu,
            TexturePipeline::DecompressWithGpuExtension { .. } => {
                PipelineKind::DecompressWithGpuExtension
            }
            TexturePipeline::DecompressWithAsyncEngine { .. } => {
                PipelineKind::DecompressWithAsyncEngine
            }
        }
    }
}

/// Loads one subresource of the latent texture in slot `slot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureTask {
    pub slot: usize,
    pub mip: u32,
    pub layer: u32,
    /// Mip count of the target texture, for flat subresource indices.
    pub mip_levels: u32,
    pub footprint: TextureFootprint,
    pub pipeline: TexturePipeline,
}

impl TextureTask {
    pub fn kind(&self) -> PipelineKind {
        self.pipeline.kind()
    }

    pub fn subresource_index(&self) -> u32 {
        self.mip + self.layer * self.mip_levels
    }
}
