//! Minimal GPU abstraction the executor records into.

pub mod soft;
#[cfg(feature = "backend_wgpu")]
pub mod wgpu_device;

use std::ops::DerefMut;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create buffer {name:?} ({size} bytes): {reason}")]
    BufferCreation {
        name: &'static str,
        size: u64,
        reason: String,
    },
    #[error("failed to map buffer: {0}")]
    Map(String),
    #[error("command list error: {0}")]
    CommandList(String),
    #[error("waiting for the device failed: {0}")]
    Wait(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Host-writable through `map_buffer`, copy source.
    Upload,
    /// Device-local, raw access from shaders, copy source and destination.
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub name: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

pub struct BufferSlice<'a, B> {
    pub buffer: &'a B,
    pub offset: u64,
    pub size: u64,
}

/// Destination of a texture write: one subresource, starting at its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip: u32,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
    /// Bytes between rows of the source data.
    pub row_pitch: u32,
}

pub trait CommandRecorder {
    type Buffer;
    type Texture;

    fn copy_buffer(
        &mut self,
        dst: &Self::Buffer,
        dst_offset: u64,
        src: &Self::Buffer,
        src_offset: u64,
        size: u64,
    );

    /// Uploads host bytes into a buffer before the following commands run.
    fn write_buffer(&mut self, dst: &Self::Buffer, dst_offset: u64, data: &[u8]);

    fn clear_buffer(&mut self, dst: &Self::Buffer, offset: u64, size: u64);

    fn write_texture(&mut self, dst: &Self::Texture, region: TextureRegion, data: &[u8]);

    fn copy_buffer_to_texture(
        &mut self,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Texture,
        region: TextureRegion,
    );

    /// Moves every subresource of `texture` into the copy-destination state.
    fn begin_texture_writes(&mut self, texture: &Self::Texture);

    /// Moves `texture` into its permanent shader-resource state.
    fn finalize_texture(&mut self, texture: &Self::Texture);
}

pub trait GpuDevice {
    type Buffer;
    type Texture;
    type CommandList: CommandRecorder<Buffer = Self::Buffer, Texture = Self::Texture>;
    /// Host view of an upload buffer. Dropping it unmaps the buffer.
    type Mapping<'a>: DerefMut<Target = [u8]>
    where
        Self: 'a;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, DeviceError>;

    fn map_buffer<'a>(&'a self, buffer: &'a Self::Buffer)
    -> Result<Self::Mapping<'a>, DeviceError>;

    fn create_command_list(&self) -> Result<Self::CommandList, DeviceError>;

    fn execute(&self, commands: Self::CommandList) -> Result<(), DeviceError>;

    fn wait_for_idle(&self) -> Result<(), DeviceError>;
}
