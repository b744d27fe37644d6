use super::{BatchReport, BufferBatch, Executor, TaskId, host_range, run_cpu_jobs};
use crate::device::{BufferSlice, CommandRecorder, GpuDevice};
use crate::stream::read_parts;
use crate::{
    AsyncTarget, BackendError, BufferPipeline, BufferTask, Category, InputStream, LoadError,
    PipelineKind, Range,
};

impl<D: GpuDevice> Executor<'_, D> {
    /// Loads every buffer task of a plan into `batch.final_buffer`.
    ///
    /// Per-task failures are logged, reported and leave the other tasks
    /// untouched. Only batch-level errors come back as `Err`.
    pub fn execute_buffers(
        &mut self,
        stream: &mut dyn InputStream,
        tasks: &mut [BufferTask],
        batch: &BufferBatch<D>,
    ) -> Result<BatchReport, LoadError> {
        let mut report = BatchReport {
            skipped: tasks
                .iter()
                .filter(|t| t.kind() == PipelineKind::None)
                .count(),
            ..Default::default()
        };
        let live = tasks.len() - report.skipped;
        let mut failed = Vec::new();

        let device = self.device;
        let mut staging = match batch.staging.as_ref() {
            Some(buffer) => Some(device.map_buffer(buffer)?),
            None => None,
        };

        for task in tasks.iter_mut() {
            if let Err(error) = read_buffer_task(stream, task, staging.as_deref_mut()) {
                fail_buffer(task, error, &mut report, &mut failed)?;
            }
        }

        let results = run_cpu_jobs(tasks, self.codec, self.options.parallel_cpu_decompression);
        for (task, result) in tasks.iter_mut().zip(results) {
            if let Some(error) = result {
                fail_buffer(task, LoadError::from_codec(error), &mut report, &mut failed)?;
            }
        }

        let mut commands = device.create_command_list()?;
        let mut deferred = 0;
        for task in tasks.iter_mut() {
            match self.record_buffer_task(&mut commands, task, batch, staging.as_deref_mut()) {
                Ok(true) => deferred += 1,
                Ok(false) => {}
                Err(error) => fail_buffer(task, error, &mut report, &mut failed)?,
            }
        }

        drop(staging);
        device.execute(commands)?;
        log::debug!(
            "Executed buffer batch: {live} tasks, {} failed, {deferred} deferred",
            report.failures.len()
        );

        if deferred > 0 {
            report.deferred = self.drain_buffers(tasks, batch, &mut report, &mut failed)?;
        }

        if self.options.zero_fill_failed && !failed.is_empty() {
            let mut commands = self.device.create_command_list()?;
            for range in &failed {
                let buffer = batch.get(Category::Final, *range)?;
                commands.clear_buffer(buffer, range.byte_offset, range.byte_size);
            }
            self.device.execute(commands)?;
        }

        report.completed = live - report.failures.len();
        Ok(report)
    }

    /// Records the GPU side of one task. Returns `true` when the task is
    /// deferred to the async engine.
    fn record_buffer_task(
        &self,
        commands: &mut D::CommandList,
        task: &BufferTask,
        batch: &BufferBatch<D>,
        staging: Option<&mut [u8]>,
    ) -> Result<bool, LoadError> {
        let (staging_range, final_range) = match &task.pipeline {
            BufferPipeline::None => return Ok(false),
            BufferPipeline::DecompressWithAsyncEngine { .. } => return Ok(true),
            BufferPipeline::DirectCopy {
                source,
                staging: range,
                final_range,
            } => {
                host_range(staging, Category::Staging, *range)?.copy_from_slice(source);
                (*range, *final_range)
            }
            BufferPipeline::ReadUncompressed {
                staging: range,
                final_range,
            } => (*range, *final_range),
            BufferPipeline::DecompressOnCpu {
                uncompressed,
                staging: range,
                final_range,
                ..
            } => {
                host_range(staging, Category::Staging, *range)?.copy_from_slice(uncompressed);
                (*range, *final_range)
            }
            BufferPipeline::DecompressWithGpuExtension {
                header,
                staging: range,
                temp,
                final_range,
            } => {
                let gpu = self
                    .backends
                    .gpu
                    .ok_or(BackendError::Unavailable("GPU decompression"))?;
                let payload = batch.get(Category::Staging, *range)?;
                let decompressed = batch.get(Category::Temp, *temp)?;
                gpu.decompress_on_gpu(
                    commands,
                    header,
                    task.footprint.uncompressed_size,
                    BufferSlice {
                        buffer: payload,
                        offset: range.byte_offset,
                        size: range.byte_size,
                    },
                    BufferSlice {
                        buffer: decompressed,
                        offset: temp.byte_offset,
                        size: temp.byte_size,
                    },
                )?;
                let dst = batch.get(Category::Final, *final_range)?;
                commands.copy_buffer(
                    dst,
                    final_range.byte_offset,
                    decompressed,
                    temp.byte_offset,
                    temp.byte_size,
                );
                return Ok(false);
            }
        };

        let src = batch.get(Category::Staging, staging_range)?;
        let dst = batch.get(Category::Final, final_range)?;
        commands.copy_buffer(
            dst,
            final_range.byte_offset,
            src,
            staging_range.byte_offset,
            staging_range.byte_size,
        );
        Ok(false)
    }

    /// Hands deferred tasks to the async engine once the batch's copies are done.
    fn drain_buffers(
        &mut self,
        tasks: &mut [BufferTask],
        batch: &BufferBatch<D>,
        report: &mut BatchReport,
        failed: &mut Vec<Range>,
    ) -> Result<usize, LoadError> {
        let Some(engine) = self.backends.async_engine.as_deref_mut() else {
            for task in tasks.iter_mut().filter(|t| t.kind().is_deferred()) {
                let error = BackendError::Unavailable("async decompression engine");
                fail_buffer(task, error.into(), report, failed)?;
            }
            return Ok(0);
        };

        self.device.wait_for_idle()?;

        // task position of each request, in enqueue order
        let mut requests = Vec::new();
        for (position, task) in tasks.iter_mut().enumerate() {
            let BufferPipeline::DecompressWithAsyncEngine {
                compressed,
                final_range,
            } = &task.pipeline
            else {
                continue;
            };
            let target = AsyncTarget::Buffer {
                buffer: batch.get(Category::Final, *final_range)?,
                offset: final_range.byte_offset,
                size: final_range.byte_size,
            };
            match engine.enqueue(compressed, target, task.footprint.uncompressed_size) {
                Ok(()) => requests.push(position),
                Err(error) => fail_buffer(task, LoadError::from_backend(error), report, failed)?,
            }
        }

        engine.submit().map_err(LoadError::AsyncEngine)?;
        let failures = engine.wait().map_err(LoadError::AsyncEngine)?;
        let finished = requests.len().saturating_sub(failures.len());
        for failure in failures {
            let task = requests
                .get(failure.request)
                .and_then(|&position| tasks.get_mut(position))
                .ok_or_else(|| {
                    LoadError::AsyncEngine(BackendError::Engine(format!(
                        "unknown request {} reported",
                        failure.request
                    )))
                })?;
            fail_buffer(task, LoadError::from_backend(failure.error), report, failed)?;
        }
        log::debug!("Async engine finished {finished} buffer tasks");
        Ok(finished)
    }
}

fn read_buffer_task(
    stream: &mut dyn InputStream,
    task: &mut BufferTask,
    staging: Option<&mut [u8]>,
) -> Result<(), LoadError> {
    let range = task.footprint.range_in_stream;
    let read_error = |source| LoadError::Io { range, source };

    match &mut task.pipeline {
        BufferPipeline::None | BufferPipeline::DirectCopy { .. } => Ok(()),
        BufferPipeline::ReadUncompressed {
            staging: staging_range,
            ..
        } => {
            let dst = host_range(staging, Category::Staging, *staging_range)?;
            read_parts(stream, range.offset, &mut [dst]).map_err(read_error)
        }
        BufferPipeline::DecompressOnCpu { compressed, .. }
        | BufferPipeline::DecompressWithAsyncEngine { compressed, .. } => {
            read_parts(stream, range.offset, &mut [compressed.as_mut_slice()]).map_err(read_error)
        }
        BufferPipeline::DecompressWithGpuExtension {
            header,
            staging: staging_range,
            ..
        } => {
            let payload = host_range(staging, Category::Staging, *staging_range)?;
            read_parts(stream, range.offset, &mut [header.as_mut_slice(), payload])
                .map_err(read_error)
        }
    }
}

/// Reports a per-task failure and turns the task into a no-op.
/// Batch-level errors are passed through instead.
fn fail_buffer(
    task: &mut BufferTask,
    error: LoadError,
    report: &mut BatchReport,
    failed: &mut Vec<Range>,
) -> Result<(), LoadError> {
    if error.is_batch_fatal() {
        return Err(error);
    }
    if let Some(range) = task.pipeline.final_range() {
        failed.push(range);
    }
    report.record_failure(
        TaskId::Buffer(task.index),
        task.footprint.range_in_stream,
        error,
    );
    task.pipeline = BufferPipeline::None;
    Ok(())
}
