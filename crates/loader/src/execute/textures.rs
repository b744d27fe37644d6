use super::{BatchReport, Executor, LatentBatch, TaskId, run_cpu_jobs};
use crate::device::{BufferSlice, CommandRecorder, GpuDevice, TextureRegion};
use crate::stream::read_parts;
use crate::{
    AsyncTarget, BackendError, Category, InputStream, LoadError, PipelineKind, ResourceState,
    ResourceStateTracker, TexturePipeline, TextureTask,
};

fn region(task: &TextureTask) -> TextureRegion {
    TextureRegion {
        mip: task.mip,
        layer: task.layer,
        width: task.footprint.width,
        height: task.footprint.height,
        row_pitch: task.footprint.row_pitch,
    }
}

fn task_id(task: &TextureTask) -> TaskId {
    TaskId::Texture {
        slot: task.slot,
        mip: task.mip,
        layer: task.layer,
    }
}

impl<D: GpuDevice> Executor<'_, D> {
    /// Loads latent subresources into `textures`, indexed by the slots
    /// `LatentPlan::add_texture` returned.
    ///
    /// Every texture referenced by `tasks` ends the call in its permanent
    /// shader-resource state, whether or not its tasks succeeded.
    pub fn execute_latents(
        &mut self,
        stream: &mut dyn InputStream,
        tasks: &mut [TextureTask],
        textures: &[&D::Texture],
        batch: &LatentBatch<D>,
    ) -> Result<BatchReport, LoadError> {
        if let Some(task) = tasks.iter().find(|t| t.slot >= textures.len()) {
            return Err(LoadError::MissingTexture(task.slot));
        }

        let mut report = BatchReport {
            skipped: tasks
                .iter()
                .filter(|t| t.kind() == PipelineKind::None)
                .count(),
            ..Default::default()
        };
        let live = tasks.len() - report.skipped;
        let mut failed = Vec::new();

        for (position, task) in tasks.iter_mut().enumerate() {
            if let Err(error) = read_texture_task(stream, task) {
                fail_texture(task, position, error, &mut report, &mut failed)?;
            }
        }

        let results = run_cpu_jobs(tasks, self.codec, self.options.parallel_cpu_decompression);
        for (position, (task, result)) in tasks.iter_mut().zip(results).enumerate() {
            if let Some(error) = result {
                fail_texture(task, position, LoadError::from_codec(error), &mut report, &mut failed)?;
            }
        }

        let device = self.device;
        let mut tracker = ResourceStateTracker::new(textures.len());
        let mut commands = device.create_command_list()?;
        let mut deferred = 0;
        for (position, task) in tasks.iter_mut().enumerate() {
            if task.kind() == PipelineKind::None {
                continue;
            }
            let texture = textures[task.slot];
            if tracker.begin_write(task.slot)? {
                commands.begin_texture_writes(texture);
            }
            match self.record_texture_task(&mut commands, task, texture, batch) {
                Ok(true) => deferred += 1,
                Ok(false) => {}
                Err(error) => fail_texture(task, position, error, &mut report, &mut failed)?,
            }
        }
        device.execute(commands)?;
        log::debug!(
            "Executed latent batch: {live} tasks, {} failed, {deferred} deferred",
            report.failures.len()
        );

        let drained = if deferred > 0 {
            self.drain_latents(tasks, textures, &mut report, &mut failed)
        } else {
            Ok(0)
        };
        // Textures are finalized even when the drain failed.
        let finalized = self.finalize_textures(tasks, textures, &mut tracker, &failed);
        report.deferred = drained?;
        finalized?;

        report.completed = live - report.failures.len();
        Ok(report)
    }

    /// Zero-fills failed subresources when asked to, then moves every texture
    /// of the batch, loaded or not, to its permanent state.
    fn finalize_textures(
        &self,
        tasks: &[TextureTask],
        textures: &[&D::Texture],
        tracker: &mut ResourceStateTracker,
        failed: &[usize],
    ) -> Result<(), LoadError> {
        let mut commands = self.device.create_command_list()?;
        if self.options.zero_fill_failed {
            for &position in failed {
                let task = &tasks[position];
                let texture = textures[task.slot];
                if tracker.begin_write(task.slot)? {
                    commands.begin_texture_writes(texture);
                }
                let zeros = vec![0u8; task.footprint.buffer.uncompressed_size as usize];
                commands.write_texture(texture, region(task), &zeros);
            }
        }

        let mut slots: Vec<usize> = tasks.iter().map(|t| t.slot).collect();
        slots.sort_unstable();
        slots.dedup();
        for slot in slots {
            let texture = textures[slot];
            if tracker.state(slot) == Some(ResourceState::NotStarted) {
                tracker.begin_write(slot)?;
                commands.begin_texture_writes(texture);
            }
            if tracker.finalize(slot)? {
                commands.finalize_texture(texture);
            }
        }
        self.device.execute(commands)?;
        Ok(())
    }

    fn record_texture_task(
        &self,
        commands: &mut D::CommandList,
        task: &TextureTask,
        texture: &D::Texture,
        batch: &LatentBatch<D>,
    ) -> Result<bool, LoadError> {
        match &task.pipeline {
            TexturePipeline::None => {}
            TexturePipeline::DecompressWithAsyncEngine { .. } => return Ok(true),
            TexturePipeline::ReadUncompressed { data } => {
                commands.write_texture(texture, region(task), data);
            }
            TexturePipeline::DecompressOnCpu { uncompressed, .. } => {
                commands.write_texture(texture, region(task), uncompressed);
            }
            TexturePipeline::DecompressWithGpuExtension {
                header,
                payload,
                compressed,
                decompressed,
            } => {
                let gpu = self
                    .backends
                    .gpu
                    .ok_or(BackendError::Unavailable("GPU decompression"))?;
                let src = batch.get(Category::Compressed, *compressed)?;
                let dst = batch.get(Category::Decompressed, *decompressed)?;

                commands.write_buffer(src, compressed.byte_offset, payload);
                gpu.decompress_on_gpu(
                    commands,
                    header,
                    task.footprint.buffer.uncompressed_size,
                    BufferSlice {
                        buffer: src,
                        offset: compressed.byte_offset,
                        size: compressed.byte_size,
                    },
                    BufferSlice {
                        buffer: dst,
                        offset: decompressed.byte_offset,
                        size: decompressed.byte_size,
                    },
                )?;
                commands.copy_buffer_to_texture(dst, decompressed.byte_offset, texture, region(task));
            }
        }
        Ok(false)
    }

    fn drain_latents(
        &mut self,
        tasks: &mut [TextureTask],
        textures: &[&D::Texture],
        report: &mut BatchReport,
        failed: &mut Vec<usize>,
    ) -> Result<usize, LoadError> {
        let Some(engine) = self.backends.async_engine.as_deref_mut() else {
            for (position, task) in tasks.iter_mut().enumerate() {
                if task.kind().is_deferred() {
                    let error = BackendError::Unavailable("async decompression engine");
                    fail_texture(task, position, error.into(), report, failed)?;
                }
            }
            return Ok(0);
        };

        self.device.wait_for_idle()?;

        // task position of each request, in enqueue order
        let mut requests = Vec::new();
        for (position, task) in tasks.iter_mut().enumerate() {
            let TexturePipeline::DecompressWithAsyncEngine { compressed } = &task.pipeline else {
                continue;
            };
            let target = AsyncTarget::Texture {
                texture: textures[task.slot],
                subresource_index: task.subresource_index(),
                region: region(task),
            };
            match engine.enqueue(compressed, target, task.footprint.buffer.uncompressed_size) {
                Ok(()) => requests.push(position),
                Err(error) => {
                    fail_texture(task, position, LoadError::from_backend(error), report, failed)?
                }
            }
        }

        engine.submit().map_err(LoadError::AsyncEngine)?;
        let failures = engine.wait().map_err(LoadError::AsyncEngine)?;
        let finished = requests.len().saturating_sub(failures.len());
        for failure in failures {
            let Some(&position) = requests.get(failure.request) else {
                return Err(LoadError::AsyncEngine(BackendError::Engine(format!(
                    "unknown request {} reported",
                    failure.request
                ))));
            };
            let error = LoadError::from_backend(failure.error);
            fail_texture(&mut tasks[position], position, error, report, failed)?;
        }
        log::debug!("Async engine finished {finished} latent tasks");
        Ok(finished)
    }
}

fn read_texture_task(stream: &mut dyn InputStream, task: &mut TextureTask) -> Result<(), LoadError> {
    let range = task.footprint.buffer.range_in_stream;
    let mut parts: Vec<&mut [u8]> = match &mut task.pipeline {
        TexturePipeline::None => return Ok(()),
        TexturePipeline::ReadUncompressed { data } => vec![data.as_mut_slice()],
        TexturePipeline::DecompressOnCpu { compressed, .. }
        | TexturePipeline::DecompressWithAsyncEngine { compressed } => {
            vec![compressed.as_mut_slice()]
        }
        TexturePipeline::DecompressWithGpuExtension {
            header, payload, ..
        } => vec![header.as_mut_slice(), payload.as_mut_slice()],
    };
    read_parts(stream, range.offset, &mut parts).map_err(|source| LoadError::Io { range, source })
}

/// Reports a per-task failure by position and turns the task into a no-op.
fn fail_texture(
    task: &mut TextureTask,
    position: usize,
    error: LoadError,
    report: &mut BatchReport,
    failed: &mut Vec<usize>,
) -> Result<(), LoadError> {
    if error.is_batch_fatal() {
        return Err(error);
    }
    report.record_failure(task_id(task), task.footprint.buffer.range_in_stream, error);
    task.pipeline = TexturePipeline::None;
    failed.push(position);
    Ok(())
}
