//! wgpu backend. Upload buffers are shadowed in host memory and pushed with
//! `Queue::write_buffer` when the mapping is dropped. wgpu has no vendor
//! decompression, so plans made for this device only use CPU pipelines.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{BufferDesc, BufferUsage, CommandRecorder, DeviceError, GpuDevice, TextureRegion};
use crate::round_up4;

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

pub struct WgpuCommandList {
    encoder: wgpu::CommandEncoder,
    queue: Arc<wgpu::Queue>,
}

fn texel_copy_texture<'t>(
    texture: &'t wgpu::Texture,
    region: &TextureRegion,
) -> wgpu::TexelCopyTextureInfo<'t> {
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: region.mip,
        origin: wgpu::Origin3d {
            x: 0,
            y: 0,
            z: region.layer,
        },
        aspect: wgpu::TextureAspect::All,
    }
}

fn extent(region: &TextureRegion) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: region.width,
        height: region.height,
        depth_or_array_layers: 1,
    }
}

impl CommandRecorder for WgpuCommandList {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;

    fn copy_buffer(
        &mut self,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        src: &wgpu::Buffer,
        src_offset: u64,
        size: u64,
    ) {
        // Batch ranges start on 4-byte boundaries and own their padding.
        self.encoder
            .copy_buffer_to_buffer(src, src_offset, dst, dst_offset, round_up4(size));
    }

    fn write_buffer(&mut self, dst: &wgpu::Buffer, dst_offset: u64, data: &[u8]) {
        if data.len() % 4 == 0 {
            self.queue.write_buffer(dst, dst_offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(round_up4(data.len() as u64) as usize, 0);
            self.queue.write_buffer(dst, dst_offset, &padded);
        }
    }

    fn clear_buffer(&mut self, dst: &wgpu::Buffer, offset: u64, size: u64) {
        self.encoder.clear_buffer(dst, offset, Some(round_up4(size)));
    }

    fn write_texture(&mut self, dst: &wgpu::Texture, region: TextureRegion, data: &[u8]) {
        self.queue.write_texture(
            texel_copy_texture(dst, &region),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.row_pitch),
                rows_per_image: Some(region.height),
            },
            extent(&region),
        );
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Texture,
        region: TextureRegion,
    ) {
        self.encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: src,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: src_offset,
                    bytes_per_row: Some(region.row_pitch),
                    rows_per_image: Some(region.height),
                },
            },
            texel_copy_texture(dst, &region),
            extent(&region),
        );
    }

    // wgpu tracks texture usage itself.
    fn begin_texture_writes(&mut self, texture: &wgpu::Texture) {
        log::trace!("Texture {:?} now writable", texture.size());
    }

    fn finalize_texture(&mut self, texture: &wgpu::Texture) {
        log::trace!("Texture {:?} finalized", texture.size());
    }
}

/// Host shadow of an upload buffer.
pub struct ShadowMapping<'a> {
    queue: &'a wgpu::Queue,
    buffer: &'a wgpu::Buffer,
    bytes: Vec<u8>,
}

impl Deref for ShadowMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for ShadowMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for ShadowMapping<'_> {
    fn drop(&mut self) {
        self.queue.write_buffer(self.buffer, 0, &self.bytes);
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type CommandList = WgpuCommandList;
    type Mapping<'a> = ShadowMapping<'a>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<wgpu::Buffer, DeviceError> {
        let usage = match desc.usage {
            BufferUsage::Upload => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Storage => {
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.name),
            size: round_up4(desc.size),
            usage,
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::BufferCreation {
                name: desc.name,
                size: desc.size,
                reason: error.to_string(),
            });
        }
        Ok(buffer)
    }

    fn map_buffer<'a>(
        &'a self,
        buffer: &'a wgpu::Buffer,
    ) -> Result<ShadowMapping<'a>, DeviceError> {
        if buffer.usage() != (wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST) {
            return Err(DeviceError::Map(format!(
                "buffer with usage {:?} is not an upload buffer",
                buffer.usage()
            )));
        }
        Ok(ShadowMapping {
            queue: &self.queue,
            buffer,
            bytes: vec![0; buffer.size() as usize],
        })
    }

    fn create_command_list(&self) -> Result<WgpuCommandList, DeviceError> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texpack upload"),
            });
        Ok(WgpuCommandList {
            encoder,
            queue: Arc::clone(&self.queue),
        })
    }

    fn execute(&self, commands: WgpuCommandList) -> Result<(), DeviceError> {
        self.queue.submit(std::iter::once(commands.encoder.finish()));
        Ok(())
    }

    fn wait_for_idle(&self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|err| DeviceError::Wait(err.to_string()))
    }
}
