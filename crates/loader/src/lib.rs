//! Streaming loader for packed texture sets.
//!
//! Loading happens in two steps. Planning turns the footprints of a texture
//! set into tasks, picking a pipeline per buffer or latent subresource and
//! sub-allocating ranges in a few batch buffers. Execution then reads the
//! stream, decompresses on the CPU where needed, records GPU commands for one
//! submit and hands the rest to the async engine when the device has one.

mod codec;
mod decompression;
pub mod device;
mod error;
mod execute;
mod footprint;
mod pack;
mod pipeline;
mod plan;
mod ranges;
mod state;
mod stream;
mod task;

pub use codec::*;
pub use decompression::*;
pub use device::{
    BufferDesc, BufferSlice, BufferUsage, CommandRecorder, DeviceError, GpuDevice, TextureRegion,
};
pub use error::*;
pub use execute::*;
pub use footprint::*;
pub use pack::*;
pub use pipeline::*;
pub use plan::*;
pub use ranges::*;
pub use state::*;
pub use stream::InputStream;
pub use task::*;
