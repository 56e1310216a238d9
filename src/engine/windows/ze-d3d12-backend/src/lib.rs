//! Direct3D 12 implementation of [`ze_gfx::backend::Device`].
//!
//! Native objects are released as soon as their handle drops, retirement is up to the caller.
//! The crate is empty on anything but Windows.

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod backend;
        mod device;
        mod utils;

        pub use backend::D3D12Backend;
        pub use device::D3D12Device;
    }
}
