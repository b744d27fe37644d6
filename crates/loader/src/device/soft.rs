//! Host-memory device. Commands are recorded and replayed on `execute`,
//! textures keep their state history so batches can be inspected afterwards.
//! It also provides a GPU-extension decompressor and a threaded async engine.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;

use crossbeam_channel::Receiver;

use super::{
    BufferDesc, BufferSlice, BufferUsage, CommandRecorder, DeviceError, GpuDevice, TextureRegion,
};
use crate::{AsyncDecompression, AsyncFailure, AsyncTarget, BackendError, GpuDecompression};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// -----------------------------------------------------------------------------
// Buffers

struct BufferStorage {
    name: &'static str,
    usage: BufferUsage,
    bytes: Mutex<Vec<u8>>,
    mapped: AtomicBool,
}

#[derive(Clone)]
pub struct SoftBuffer {
    inner: Arc<BufferStorage>,
}

impl SoftBuffer {
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn usage(&self) -> BufferUsage {
        self.inner.usage
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.bytes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.inner.mapped.load(Ordering::Acquire)
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.inner.bytes).clone()
    }

    fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, String> {
        let bytes = lock(&self.inner.bytes);
        let range = offset as usize..(offset + size) as usize;
        bytes
            .get(range)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| format!("read of {size} bytes at {offset} exceeds {}", self.name()))
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), String> {
        let mut bytes = lock(&self.inner.bytes);
        let range = offset as usize..offset as usize + data.len();
        match bytes.get_mut(range) {
            Some(dst) => {
                dst.copy_from_slice(data);
                Ok(())
            }
            None => Err(format!(
                "write of {} bytes at {offset} exceeds {}",
                data.len(),
                self.name()
            )),
        }
    }
}

impl std::fmt::Debug for SoftBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftBuffer")
            .field("name", &self.inner.name)
            .field("usage", &self.inner.usage)
            .field("len", &self.len())
            .finish()
    }
}

/// Host view of an upload buffer.
pub struct SoftMapping<'a> {
    buffer: &'a SoftBuffer,
    bytes: MutexGuard<'a, Vec<u8>>,
}

impl Deref for SoftMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for SoftMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for SoftMapping<'_> {
    fn drop(&mut self) {
        self.buffer.inner.mapped.store(false, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// Textures

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftTextureState {
    Common,
    CopyDest,
    ShaderResource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftTextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub bytes_per_texel: u32,
}

struct TextureStorage {
    desc: SoftTextureDesc,
    /// Tightly packed rows, indexed by `mip + layer * mip_levels`.
    subresources: Vec<Vec<u8>>,
    state: SoftTextureState,
    transitions: Vec<SoftTextureState>,
    violations: Vec<String>,
}

#[derive(Clone)]
pub struct SoftTexture {
    inner: Arc<Mutex<TextureStorage>>,
}

impl SoftTexture {
    pub fn new(desc: SoftTextureDesc) -> Self {
        let mut subresources = Vec::with_capacity((desc.mip_levels * desc.array_size) as usize);
        for _layer in 0..desc.array_size {
            for mip in 0..desc.mip_levels {
                let width = (desc.width >> mip).max(1);
                let height = (desc.height >> mip).max(1);
                subresources.push(vec![0; (width * height * desc.bytes_per_texel) as usize]);
            }
        }
        Self {
            inner: Arc::new(Mutex::new(TextureStorage {
                desc,
                subresources,
                state: SoftTextureState::Common,
                transitions: Vec::new(),
                violations: Vec::new(),
            })),
        }
    }

    pub fn desc(&self) -> SoftTextureDesc {
        lock(&self.inner).desc
    }

    pub fn state(&self) -> SoftTextureState {
        lock(&self.inner).state
    }

    /// Every state the texture was moved into, in order.
    pub fn transitions(&self) -> Vec<SoftTextureState> {
        lock(&self.inner).transitions.clone()
    }

    /// Writes that happened outside the copy-destination state or out of bounds.
    pub fn violations(&self) -> Vec<String> {
        lock(&self.inner).violations.clone()
    }

    pub fn subresource(&self, mip: u32, layer: u32) -> Vec<u8> {
        let storage = lock(&self.inner);
        let index = (mip + layer * storage.desc.mip_levels) as usize;
        storage.subresources.get(index).cloned().unwrap_or_default()
    }

    fn transition(&self, state: SoftTextureState) {
        let mut storage = lock(&self.inner);
        storage.state = state;
        storage.transitions.push(state);
    }

    fn write_rows(&self, subresource_index: u32, region: TextureRegion, data: &[u8]) {
        let mut storage = lock(&self.inner);
        if storage.state != SoftTextureState::CopyDest {
            let state = storage.state;
            storage.violations.push(format!(
                "write to mip {} layer {} in state {state:?}",
                region.mip, region.layer
            ));
            return;
        }

        let desc = storage.desc;
        let mip_width = (desc.width >> region.mip).max(1);
        let tight_row = (mip_width * desc.bytes_per_texel) as usize;
        let row_bytes = (region.width.min(mip_width) * desc.bytes_per_texel) as usize;
        let pitch = region.row_pitch as usize;

        let TextureStorage {
            subresources,
            violations,
            ..
        } = &mut *storage;
        let Some(dst) = subresources.get_mut(subresource_index as usize) else {
            violations.push(format!("no subresource {subresource_index}"));
            return;
        };
        for y in 0..region.height as usize {
            let src = data.get(y * pitch..y * pitch + row_bytes);
            let out = dst.get_mut(y * tight_row..y * tight_row + row_bytes);
            match (src, out) {
                (Some(src), Some(out)) => out.copy_from_slice(src),
                _ => {
                    violations.push(format!(
                        "row {y} of mip {} layer {} is out of bounds",
                        region.mip, region.layer
                    ));
                    return;
                }
            }
        }
    }
}

impl std::fmt::Debug for SoftTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = lock(&self.inner);
        f.debug_struct("SoftTexture")
            .field("desc", &storage.desc)
            .field("state", &storage.state)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Commands

enum SoftCommand {
    CopyBuffer {
        dst: SoftBuffer,
        dst_offset: u64,
        src: SoftBuffer,
        src_offset: u64,
        size: u64,
    },
    WriteBuffer {
        dst: SoftBuffer,
        dst_offset: u64,
        data: Vec<u8>,
    },
    ClearBuffer {
        dst: SoftBuffer,
        offset: u64,
        size: u64,
    },
    WriteTexture {
        dst: SoftTexture,
        region: TextureRegion,
        data: Vec<u8>,
    },
    CopyBufferToTexture {
        src: SoftBuffer,
        src_offset: u64,
        dst: SoftTexture,
        region: TextureRegion,
    },
    Transition {
        texture: SoftTexture,
        state: SoftTextureState,
    },
    Decompress {
        header: Vec<u8>,
        src: SoftBuffer,
        src_offset: u64,
        src_size: u64,
        dst: SoftBuffer,
        dst_offset: u64,
        size: u64,
    },
}

#[derive(Default)]
pub struct SoftCommandList {
    commands: Vec<SoftCommand>,
}

impl SoftCommandList {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn subresource_index(texture: &SoftTexture, region: &TextureRegion) -> u32 {
    region.mip + region.layer * texture.desc().mip_levels
}

impl CommandRecorder for SoftCommandList {
    type Buffer = SoftBuffer;
    type Texture = SoftTexture;

    fn copy_buffer(
        &mut self,
        dst: &SoftBuffer,
        dst_offset: u64,
        src: &SoftBuffer,
        src_offset: u64,
        size: u64,
    ) {
        self.commands.push(SoftCommand::CopyBuffer {
            dst: dst.clone(),
            dst_offset,
            src: src.clone(),
            src_offset,
            size,
        });
    }

    fn write_buffer(&mut self, dst: &SoftBuffer, dst_offset: u64, data: &[u8]) {
        self.commands.push(SoftCommand::WriteBuffer {
            dst: dst.clone(),
            dst_offset,
            data: data.to_vec(),
        });
    }

    fn clear_buffer(&mut self, dst: &SoftBuffer, offset: u64, size: u64) {
        self.commands.push(SoftCommand::ClearBuffer {
            dst: dst.clone(),
            offset,
            size,
        });
    }

    fn write_texture(&mut self, dst: &SoftTexture, region: TextureRegion, data: &[u8]) {
        self.commands.push(SoftCommand::WriteTexture {
            dst: dst.clone(),
            region,
            data: data.to_vec(),
        });
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &SoftBuffer,
        src_offset: u64,
        dst: &SoftTexture,
        region: TextureRegion,
    ) {
        self.commands.push(SoftCommand::CopyBufferToTexture {
            src: src.clone(),
            src_offset,
            dst: dst.clone(),
            region,
        });
    }

    fn begin_texture_writes(&mut self, texture: &SoftTexture) {
        self.commands.push(SoftCommand::Transition {
            texture: texture.clone(),
            state: SoftTextureState::CopyDest,
        });
    }

    fn finalize_texture(&mut self, texture: &SoftTexture) {
        self.commands.push(SoftCommand::Transition {
            texture: texture.clone(),
            state: SoftTextureState::ShaderResource,
        });
    }
}

// -----------------------------------------------------------------------------
// Device

/// Device whose memory is host memory.
#[derive(Default)]
pub struct SoftDevice {
    memory_limit: Option<u64>,
    allocated: AtomicU64,
    submissions: AtomicUsize,
    idle_waits: AtomicUsize,
    faults: Mutex<Vec<String>>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer creation fails once `bytes` have been allocated.
    pub fn with_memory_limit(bytes: u64) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    pub fn create_texture(&self, desc: SoftTextureDesc) -> SoftTexture {
        SoftTexture::new(desc)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn idle_waits(&self) -> usize {
        self.idle_waits.load(Ordering::Relaxed)
    }

    /// Commands that could not run, like out-of-bounds copies or undecodable payloads.
    pub fn faults(&self) -> Vec<String> {
        lock(&self.faults).clone()
    }

    fn run(&self, command: SoftCommand) -> Result<(), String> {
        match command {
            SoftCommand::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let data = src.read(src_offset, size)?;
                dst.write(dst_offset, &data)
            }
            SoftCommand::WriteBuffer {
                dst,
                dst_offset,
                data,
            } => dst.write(dst_offset, &data),
            SoftCommand::ClearBuffer { dst, offset, size } => {
                dst.write(offset, &vec![0; size as usize])
            }
            SoftCommand::WriteTexture { dst, region, data } => {
                dst.write_rows(subresource_index(&dst, &region), region, &data);
                Ok(())
            }
            SoftCommand::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                region,
            } => {
                let size = u64::from(region.row_pitch) * u64::from(region.height);
                let data = src.read(src_offset, size)?;
                dst.write_rows(subresource_index(&dst, &region), region, &data);
                Ok(())
            }
            SoftCommand::Transition { texture, state } => {
                texture.transition(state);
                Ok(())
            }
            SoftCommand::Decompress {
                header,
                src,
                src_offset,
                src_size,
                dst,
                dst_offset,
                size,
            } => {
                let payload = src.read(src_offset, src_size)?;
                let mut out = vec![0; size as usize];
                texpack_codec::decompress_split(&header, &payload, &mut out)
                    .map_err(|err| format!("GPU decompression failed: {err}"))?;
                dst.write(dst_offset, &out)
            }
        }
    }
}

impl GpuDevice for SoftDevice {
    type Buffer = SoftBuffer;
    type Texture = SoftTexture;
    type CommandList = SoftCommandList;
    type Mapping<'a> = SoftMapping<'a>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<SoftBuffer, DeviceError> {
        let allocated = self.allocated.fetch_add(desc.size, Ordering::Relaxed) + desc.size;
        if self.memory_limit.is_some_and(|limit| allocated > limit) {
            self.allocated.fetch_sub(desc.size, Ordering::Relaxed);
            return Err(DeviceError::BufferCreation {
                name: desc.name,
                size: desc.size,
                reason: "out of device memory".into(),
            });
        }
        log::trace!("Soft buffer {:?}: {} bytes", desc.name, desc.size);
        Ok(SoftBuffer {
            inner: Arc::new(BufferStorage {
                name: desc.name,
                usage: desc.usage,
                bytes: Mutex::new(vec![0; desc.size as usize]),
                mapped: AtomicBool::new(false),
            }),
        })
    }

    fn map_buffer<'a>(&'a self, buffer: &'a SoftBuffer) -> Result<SoftMapping<'a>, DeviceError> {
        if buffer.usage() != BufferUsage::Upload {
            return Err(DeviceError::Map(format!("{} is not host-visible", buffer.name())));
        }
        let bytes = match buffer.inner.bytes.try_lock() {
            Ok(bytes) => bytes,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                return Err(DeviceError::Map(format!("{} is already mapped", buffer.name())));
            }
        };
        buffer.inner.mapped.store(true, Ordering::Release);
        Ok(SoftMapping { buffer, bytes })
    }

    fn create_command_list(&self) -> Result<SoftCommandList, DeviceError> {
        Ok(SoftCommandList::default())
    }

    fn execute(&self, commands: SoftCommandList) -> Result<(), DeviceError> {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        for command in commands.commands {
            if let Err(fault) = self.run(command) {
                log::error!("Soft device fault: {fault}");
                lock(&self.faults).push(fault);
            }
        }
        Ok(())
    }

    fn wait_for_idle(&self) -> Result<(), DeviceError> {
        self.idle_waits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Decompression backends

/// GPU-extension decompressor. Validates the header when recording and
/// decodes when the command list runs.
#[derive(Debug, Default)]
pub struct SoftGpuDecompressor {
    calls: AtomicUsize,
}

impl SoftGpuDecompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl GpuDecompression<SoftDevice> for SoftGpuDecompressor {
    fn decompress_on_gpu(
        &self,
        commands: &mut SoftCommandList,
        header: &[u8],
        uncompressed_size: u64,
        compressed: BufferSlice<'_, SoftBuffer>,
        decompressed: BufferSlice<'_, SoftBuffer>,
    ) -> Result<(), BackendError> {
        let parsed = texpack_codec::StreamHeader::parse(header)
            .map_err(|err| BackendError::Rejected(err.to_string()))?;
        if parsed.tile_count() as u64 != texpack_codec::tile_count(uncompressed_size) {
            return Err(BackendError::Rejected(format!(
                "header describes {} tiles, {uncompressed_size} bytes need {}",
                parsed.tile_count(),
                texpack_codec::tile_count(uncompressed_size)
            )));
        }
        if decompressed.size < uncompressed_size {
            return Err(BackendError::Rejected(format!(
                "{} byte destination for {uncompressed_size} bytes",
                decompressed.size
            )));
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        commands.commands.push(SoftCommand::Decompress {
            header: header.to_vec(),
            src: compressed.buffer.clone(),
            src_offset: compressed.offset,
            src_size: compressed.size,
            dst: decompressed.buffer.clone(),
            dst_offset: decompressed.offset,
            size: uncompressed_size,
        });
        Ok(())
    }
}

enum AsyncDestination {
    Buffer {
        buffer: SoftBuffer,
        offset: u64,
    },
    Texture {
        texture: SoftTexture,
        subresource_index: u32,
        region: TextureRegion,
    },
}

struct AsyncRequest {
    compressed: Vec<u8>,
    destination: AsyncDestination,
    uncompressed_size: u64,
}

impl AsyncRequest {
    fn run(self) -> Result<(), BackendError> {
        let mut out = vec![0; self.uncompressed_size as usize];
        texpack_codec::decompress(&self.compressed, &mut out, None)
            .map_err(BackendError::Decode)?;
        match self.destination {
            AsyncDestination::Buffer { buffer, offset } => {
                buffer.write(offset, &out).map_err(BackendError::Rejected)
            }
            AsyncDestination::Texture {
                texture,
                subresource_index,
                region,
            } => {
                texture.write_rows(subresource_index, region, &out);
                Ok(())
            }
        }
    }
}

struct Completion {
    requests: usize,
    failures: Vec<AsyncFailure>,
}

/// Async engine that decodes each submission on a worker thread.
#[derive(Default)]
pub struct SoftAsyncEngine {
    queue: Vec<AsyncRequest>,
    in_flight: Option<Receiver<Completion>>,
    submits: usize,
    completed: usize,
}

impl SoftAsyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submits(&self) -> usize {
        self.submits
    }

    /// Requests finished by completed waits.
    pub fn completed(&self) -> usize {
        self.completed
    }
}

impl AsyncDecompression<SoftDevice> for SoftAsyncEngine {
    fn enqueue(
        &mut self,
        compressed: &[u8],
        target: AsyncTarget<'_, SoftDevice>,
        uncompressed_size: u64,
    ) -> Result<(), BackendError> {
        let destination = match target {
            AsyncTarget::Buffer {
                buffer,
                offset,
                size,
            } => {
                if size < uncompressed_size {
                    return Err(BackendError::Rejected(format!(
                        "{size} byte destination for {uncompressed_size} bytes"
                    )));
                }
                AsyncDestination::Buffer {
                    buffer: buffer.clone(),
                    offset,
                }
            }
            AsyncTarget::Texture {
                texture,
                subresource_index,
                region,
            } => AsyncDestination::Texture {
                texture: texture.clone(),
                subresource_index,
                region,
            },
        };
        self.queue.push(AsyncRequest {
            compressed: compressed.to_vec(),
            destination,
            uncompressed_size,
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BackendError> {
        if self.in_flight.is_some() {
            let dropped = self.wait()?;
            if !dropped.is_empty() {
                log::warn!("{} async requests failed without a wait", dropped.len());
            }
        }
        let requests = std::mem::take(&mut self.queue);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("soft-async-engine".into())
            .spawn(move || {
                let count = requests.len();
                let failures = requests
                    .into_iter()
                    .enumerate()
                    .filter_map(|(request, pending)| {
                        pending.run().err().map(|error| AsyncFailure { request, error })
                    })
                    .collect();
                let _ = sender.send(Completion {
                    requests: count,
                    failures,
                });
            })
            .map_err(|err| BackendError::Engine(err.to_string()))?;

        self.submits += 1;
        self.in_flight = Some(receiver);
        Ok(())
    }

    fn wait(&mut self) -> Result<Vec<AsyncFailure>, BackendError> {
        let Some(receiver) = self.in_flight.take() else {
            return Ok(Vec::new());
        };
        let completion = receiver
            .recv()
            .map_err(|_| BackendError::Engine("worker exited without signaling".into()))?;
        self.completed += completion.requests - completion.failures.len();
        Ok(completion.failures)
    }
}
