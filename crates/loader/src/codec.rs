use texpack_codec::CodecError;

use crate::CodecId;

/// Host-side decoder used by the `DecompressOnCpu` pipeline.
/// Shared across worker threads when CPU decompression runs in parallel.
pub trait CpuDecompressor: Send + Sync {
    fn decompress(
        &self,
        codec: CodecId,
        compressed: &[u8],
        out: &mut [u8],
        checksum: Option<u32>,
    ) -> Result<(), CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCodecs;

impl CpuDecompressor for BuiltinCodecs {
    fn decompress(
        &self,
        codec: CodecId,
        compressed: &[u8],
        out: &mut [u8],
        checksum: Option<u32>,
    ) -> Result<(), CodecError> {
        match codec {
            CodecId::TiledDeflate => texpack_codec::decompress(compressed, out, checksum),
        }
    }
}
