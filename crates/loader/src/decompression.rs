use texpack_codec::CodecError;
use thiserror::Error;

use crate::device::{BufferSlice, GpuDevice, TextureRegion};

/// What the device offers beyond plain copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCaps {
    pub gpu_extension_decompression: bool,
    pub async_engine: bool,
}

impl BackendCaps {
    pub const CPU_ONLY: BackendCaps = BackendCaps {
        gpu_extension_decompression: false,
        async_engine: false,
    };
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0} is not available on this device")]
    Unavailable(&'static str),
    #[error("decompression call rejected: {0}")]
    Rejected(String),
    #[error("async engine failure: {0}")]
    Engine(String),
    #[error("engine could not decode the stream: {0}")]
    Decode(#[source] CodecError),
}

/// Request of the last submit that the engine could not complete.
#[derive(Debug)]
pub struct AsyncFailure {
    /// Position of the request in enqueue order since the previous submit.
    pub request: usize,
    pub error: BackendError,
}

/// Vendor extension that decompresses on the GPU as part of a command list.
pub trait GpuDecompression<D: GpuDevice> {
    fn is_available(&self) -> bool {
        true
    }

    /// Records a decompression of `compressed` into `decompressed`.
    /// The header stays in host memory and is consumed at record time.
    fn decompress_on_gpu(
        &self,
        commands: &mut D::CommandList,
        header: &[u8],
        uncompressed_size: u64,
        compressed: BufferSlice<'_, D::Buffer>,
        decompressed: BufferSlice<'_, D::Buffer>,
    ) -> Result<(), BackendError>;
}

pub enum AsyncTarget<'a, D: GpuDevice> {
    Buffer {
        buffer: &'a D::Buffer,
        offset: u64,
        size: u64,
    },
    Texture {
        texture: &'a D::Texture,
        /// `mip + layer * mip_levels`.
        subresource_index: u32,
        region: TextureRegion,
    },
}

/// Asynchronous decompression engine fed after the batch command list ran.
pub trait AsyncDecompression<D: GpuDevice> {
    fn is_available(&self) -> bool {
        true
    }

    fn enqueue(
        &mut self,
        compressed: &[u8],
        target: AsyncTarget<'_, D>,
        uncompressed_size: u64,
    ) -> Result<(), BackendError>;

    /// Kicks off everything enqueued since the last submit.
    fn submit(&mut self) -> Result<(), BackendError>;

    /// Blocks until the last submit has completed and returns the requests
    /// that failed. `Err` means the submit as a whole was lost.
    fn wait(&mut self) -> Result<Vec<AsyncFailure>, BackendError>;
}

/// Stand-in for a backend the device does not have.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl<D: GpuDevice> GpuDecompression<D> for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn decompress_on_gpu(
        &self,
        _commands: &mut D::CommandList,
        _header: &[u8],
        _uncompressed_size: u64,
        _compressed: BufferSlice<'_, D::Buffer>,
        _decompressed: BufferSlice<'_, D::Buffer>,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unavailable("GPU decompression"))
    }
}

impl<D: GpuDevice> AsyncDecompression<D> for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn enqueue(
        &mut self,
        _compressed: &[u8],
        _target: AsyncTarget<'_, D>,
        _uncompressed_size: u64,
    ) -> Result<(), BackendError> {
        Err(BackendError::Unavailable("async decompression engine"))
    }

    fn submit(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unavailable("async decompression engine"))
    }

    fn wait(&mut self) -> Result<Vec<AsyncFailure>, BackendError> {
        Ok(Vec::new())
    }
}

/// Optional backends handed to the executor.
pub struct Backends<'a, D: GpuDevice> {
    pub gpu: Option<&'a dyn GpuDecompression<D>>,
    pub async_engine: Option<&'a mut dyn AsyncDecompression<D>>,
}

impl<'a, D: GpuDevice> Backends<'a, D> {
    pub fn cpu_only() -> Self {
        Self {
            gpu: None,
            async_engine: None,
        }
    }

    pub fn with_gpu(mut self, gpu: &'a dyn GpuDecompression<D>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_async_engine(mut self, engine: &'a mut dyn AsyncDecompression<D>) -> Self {
        self.async_engine = Some(engine);
        self
    }

    pub fn caps(&self) -> BackendCaps {
        BackendCaps {
            gpu_extension_decompression: self.gpu.is_some_and(|g| g.is_available()),
            async_engine: self.async_engine.as_ref().is_some_and(|e| e.is_available()),
        }
    }
}

impl<D: GpuDevice> Default for Backends<'_, D> {
    fn default() -> Self {
        Self::cpu_only()
    }
}
