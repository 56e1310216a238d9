//! Frame orchestration over a [`ze_gfx::backend::Device`]
//!
//! Owns the command queues and their fences, recycles command lists and allocators once the GPU
//! is done with them, hands out persistent and per-frame descriptors, per-frame upload memory
//! and defers resource destruction until no buffered frame can reference them anymore.

pub mod barrier;
pub mod command_list;
pub mod command_queue;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod graveyard;
pub mod resource;
pub mod upload;

pub use barrier::{BarrierBatcher, BarrierResource};
pub use command_list::CommandList;
pub use command_queue::CommandQueue;
pub use config::ContextConfig;
pub use context::GpuContext;
pub use descriptor::{
    DescriptorRange, FrameDescriptorAllocator, PersistentDescriptor, PersistentDescriptorHeap,
};
pub use graveyard::{BufferGrave, Grave, Graveyard, TextureGrave};
pub use resource::{Buffer, ResourceFactory, Texture};
pub use upload::{DynamicAllocation, PagePool, UploadBuffer};

#[cfg(test)]
mod tests;
