//! Turns planned tasks into reads, CPU work and recorded GPU commands.
//!
//! A batch runs in fixed phases: every read first, then CPU decompression,
//! then command recording and one submit. Tasks routed to the async engine
//! are handed over after the device went idle, so the call only returns once
//! all of the batch's data is in place.

mod buffers;
mod textures;

use std::fmt;

use texpack_codec::CodecError;

use crate::device::{BufferDesc, BufferUsage, GpuDevice};
use crate::{
    BackendCaps, Backends, BatchSizes, BufferPipeline, BufferTask, BuiltinCodecs, Category,
    CodecId, CompressionKind, CpuDecompressor, LoadError, Range, StreamRange, TexturePipeline,
    TextureTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecuteOptions {
    /// Clear the destination of failed tasks instead of leaving it undefined.
    pub zero_fill_failed: bool,
    /// Spread CPU decompression over the rayon pool. Needs the `parallel` feature.
    pub parallel_cpu_decompression: bool,
}

// -----------------------------------------------------------------------------
// Report

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskId {
    Buffer(usize),
    Texture { slot: usize, mip: u32, layer: u32 },
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Buffer(index) => write!(f, "buffer {index}"),
            TaskId::Texture { slot, mip, layer } => {
                write!(f, "latent mip {mip} layer {layer} of texture {slot}")
            }
        }
    }
}

#[derive(Debug)]
pub struct TaskFailure {
    pub task: TaskId,
    pub range_in_stream: StreamRange,
    pub error: LoadError,
}

/// Outcome of a batch that did not hit a batch-level error.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Tasks whose data reached its destination.
    pub completed: usize,
    /// Tasks the async engine finished, included in `completed`.
    pub deferred: usize,
    /// Tasks with nothing to load.
    pub skipped: usize,
    pub failures: Vec<TaskFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, task: TaskId) -> Option<&LoadError> {
        self.failures
            .iter()
            .find(|f| f.task == task)
            .map(|f| &f.error)
    }

    fn record_failure(&mut self, task: TaskId, range_in_stream: StreamRange, error: LoadError) {
        log::warn!(
            "Failed to load {task} ({} bytes at offset {}): {error}",
            range_in_stream.size,
            range_in_stream.offset
        );
        self.failures.push(TaskFailure {
            task,
            range_in_stream,
            error,
        });
    }
}

// -----------------------------------------------------------------------------
// Batch buffers

fn allocate<D: GpuDevice>(
    device: &D,
    name: &'static str,
    size: u64,
    usage: BufferUsage,
) -> Result<Option<D::Buffer>, LoadError> {
    if size == 0 {
        return Ok(None);
    }
    log::debug!("Creating {name} ({size} bytes)");
    device
        .create_buffer(&BufferDesc { name, size, usage })
        .map(Some)
        .map_err(|source| {
            log::error!("Could not create {name} ({size} bytes): {source}");
            LoadError::Allocation { name, size, source }
        })
}

fn checked<'b, B>(
    buffer: Option<&'b B>,
    sizes: &BatchSizes,
    category: Category,
    range: Range,
) -> Result<&'b B, LoadError> {
    let buffer = buffer.ok_or(LoadError::MissingBuffer(category))?;
    let size = sizes.get(category);
    if range.end() > size {
        return Err(LoadError::RangeOutOfBounds {
            category,
            range,
            size,
        });
    }
    Ok(buffer)
}

fn host_range(
    mapping: Option<&mut [u8]>,
    category: Category,
    range: Range,
) -> Result<&mut [u8], LoadError> {
    let mapping = mapping.ok_or(LoadError::MissingBuffer(category))?;
    let size = mapping.len() as u64;
    if range.end() > size {
        return Err(LoadError::RangeOutOfBounds {
            category,
            range,
            size,
        });
    }
    Ok(&mut mapping[range.as_usize()])
}

/// Staging, temp and final buffers of a buffer batch.
/// Categories the plan does not use are not allocated.
pub struct BufferBatch<D: GpuDevice> {
    pub staging: Option<D::Buffer>,
    pub temp: Option<D::Buffer>,
    pub final_buffer: Option<D::Buffer>,
    sizes: BatchSizes,
}

impl<D: GpuDevice> BufferBatch<D> {
    pub fn create(device: &D, sizes: BatchSizes) -> Result<Self, LoadError> {
        Ok(Self {
            staging: allocate(
                device,
                "Staging Buffer",
                sizes.get(Category::Staging),
                BufferUsage::Upload,
            )?,
            temp: allocate(
                device,
                "Temp Buffer",
                sizes.get(Category::Temp),
                BufferUsage::Storage,
            )?,
            final_buffer: allocate(
                device,
                "Final Buffer",
                sizes.get(Category::Final),
                BufferUsage::Storage,
            )?,
            sizes,
        })
    }

    pub fn sizes(&self) -> BatchSizes {
        self.sizes
    }

    /// Keeps the final buffer, releasing the intermediate ones.
    pub fn into_final(self) -> Option<D::Buffer> {
        self.final_buffer
    }

    fn get(&self, category: Category, range: Range) -> Result<&D::Buffer, LoadError> {
        let buffer = match category {
            Category::Staging => self.staging.as_ref(),
            Category::Temp => self.temp.as_ref(),
            Category::Final => self.final_buffer.as_ref(),
            _ => None,
        };
        checked(buffer, &self.sizes, category, range)
    }
}

/// GPU-side buffers for latent payloads decompressed with the GPU extension.
pub struct LatentBatch<D: GpuDevice> {
    pub compressed: Option<D::Buffer>,
    pub decompressed: Option<D::Buffer>,
    sizes: BatchSizes,
}

impl<D: GpuDevice> LatentBatch<D> {
    pub fn create(device: &D, sizes: BatchSizes) -> Result<Self, LoadError> {
        Ok(Self {
            compressed: allocate(
                device,
                "Compressed Latents Buffer",
                sizes.get(Category::Compressed),
                BufferUsage::Storage,
            )?,
            decompressed: allocate(
                device,
                "Decompressed Latents Buffer",
                sizes.get(Category::Decompressed),
                BufferUsage::Storage,
            )?,
            sizes,
        })
    }

    pub fn sizes(&self) -> BatchSizes {
        self.sizes
    }

    fn get(&self, category: Category, range: Range) -> Result<&D::Buffer, LoadError> {
        let buffer = match category {
            Category::Compressed => self.compressed.as_ref(),
            Category::Decompressed => self.decompressed.as_ref(),
            _ => None,
        };
        checked(buffer, &self.sizes, category, range)
    }
}

// -----------------------------------------------------------------------------
// CPU decompression

struct CpuJob<'t> {
    codec: CodecId,
    compressed: &'t [u8],
    out: &'t mut [u8],
    checksum: Option<u32>,
}

trait CpuWork: Send {
    fn cpu_job(&mut self) -> Option<CpuJob<'_>>;
}

impl CpuWork for BufferTask {
    fn cpu_job(&mut self) -> Option<CpuJob<'_>> {
        match (&mut self.pipeline, self.footprint.compression) {
            (
                BufferPipeline::DecompressOnCpu {
                    compressed,
                    uncompressed,
                    ..
                },
                CompressionKind::Codec(codec),
            ) => Some(CpuJob {
                codec,
                compressed,
                out: uncompressed,
                checksum: self.footprint.checksum,
            }),
            _ => None,
        }
    }
}

impl CpuWork for TextureTask {
    fn cpu_job(&mut self) -> Option<CpuJob<'_>> {
        match (&mut self.pipeline, self.footprint.buffer.compression) {
            (
                TexturePipeline::DecompressOnCpu {
                    compressed,
                    uncompressed,
                },
                CompressionKind::Codec(codec),
            ) => Some(CpuJob {
                codec,
                compressed,
                out: uncompressed,
                checksum: self.footprint.buffer.checksum,
            }),
            _ => None,
        }
    }
}

/// Runs every `DecompressOnCpu` task and returns the per-task error, in task order.
fn run_cpu_jobs<T: CpuWork>(
    tasks: &mut [T],
    codec: &dyn CpuDecompressor,
    parallel: bool,
) -> Vec<Option<CodecError>> {
    let run = |task: &mut T| {
        let job = task.cpu_job()?;
        codec
            .decompress(job.codec, job.compressed, job.out, job.checksum)
            .err()
    };

    #[cfg(feature = "parallel")]
    if parallel {
        use rayon::prelude::*;
        return tasks.par_iter_mut().map(&run).collect();
    }
    #[cfg(not(feature = "parallel"))]
    if parallel {
        log::debug!("Parallel CPU decompression requested without the `parallel` feature");
    }

    tasks.iter_mut().map(&run).collect()
}

// -----------------------------------------------------------------------------
// Executor

/// Executes planned batches against one device.
pub struct Executor<'a, D: GpuDevice> {
    device: &'a D,
    backends: Backends<'a, D>,
    codec: &'a dyn CpuDecompressor,
    options: ExecuteOptions,
}

impl<'a, D: GpuDevice> Executor<'a, D> {
    pub fn new(device: &'a D, backends: Backends<'a, D>) -> Self {
        Self {
            device,
            backends,
            codec: &BuiltinCodecs,
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_codec(mut self, codec: &'a dyn CpuDecompressor) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Capabilities to plan with so every selected pipeline can run here.
    pub fn caps(&self) -> BackendCaps {
        self.backends.caps()
    }

    pub fn options(&self) -> ExecuteOptions {
        self.options
    }
}
