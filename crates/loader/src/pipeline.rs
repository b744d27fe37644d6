use crate::{BackendCaps, CompressionKind, Footprint};

/// How one buffer or subresource travels from the stream to the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Nothing to load.
    None,
    /// Copy from bytes already resident in host memory.
    DirectCopy,
    ReadUncompressed,
    DecompressOnCpu,
    /// Decompress on the GPU with the vendor extension while the batch executes.
    DecompressWithGpuExtension,
    /// Hand the compressed bytes to the asynchronous engine after the batch.
    DecompressWithAsyncEngine,
}

impl PipelineKind {
    pub fn is_deferred(self) -> bool {
        self == PipelineKind::DecompressWithAsyncEngine
    }
}

/// Picks the pipeline for a footprint given what the backend can do.
///
/// Absent footprints load nothing, uncompressed ones are read as is, and
/// compressed ones prefer the GPU extension, then the async engine, then the CPU.
pub fn select_pipeline(footprint: Option<&Footprint>, caps: BackendCaps) -> PipelineKind {
    let Some(footprint) = footprint.filter(|f| f.is_present()) else {
        return PipelineKind::None;
    };

    match footprint.compression {
        CompressionKind::None => PipelineKind::ReadUncompressed,
        CompressionKind::Codec(_) if caps.gpu_extension_decompression => {
            PipelineKind::DecompressWithGpuExtension
        }
        CompressionKind::Codec(_) if caps.async_engine => PipelineKind::DecompressWithAsyncEngine,
        CompressionKind::Codec(_) => PipelineKind::DecompressOnCpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CodecId, StreamRange};

    fn compressed() -> Footprint {
        Footprint::compressed(
            StreamRange { offset: 0, size: 64 },
            256,
            CodecId::TiledDeflate,
            None,
        )
    }

    fn caps(gpu: bool, engine: bool) -> BackendCaps {
        BackendCaps {
            gpu_extension_decompression: gpu,
            async_engine: engine,
        }
    }

    #[test]
    fn absent_footprints_load_nothing() {
        let all = [caps(false, false), caps(true, false), caps(false, true), caps(true, true)];
        for c in all {
            assert_eq!(select_pipeline(None, c), PipelineKind::None);
            assert_eq!(
                select_pipeline(Some(&Footprint::default()), c),
                PipelineKind::None
            );
        }
    }

    #[test]
    fn uncompressed_ignores_capabilities() {
        let fp = Footprint::uncompressed(0, 100);
        for c in [caps(false, false), caps(true, true)] {
            assert_eq!(select_pipeline(Some(&fp), c), PipelineKind::ReadUncompressed);
        }
    }

    #[test]
    fn compressed_preference_order() {
        let fp = compressed();
        assert_eq!(
            select_pipeline(Some(&fp), caps(true, true)),
            PipelineKind::DecompressWithGpuExtension
        );
        assert_eq!(
            select_pipeline(Some(&fp), caps(false, true)),
            PipelineKind::DecompressWithAsyncEngine
        );
        assert_eq!(
            select_pipeline(Some(&fp), caps(false, false)),
            PipelineKind::DecompressOnCpu
        );
    }
}
