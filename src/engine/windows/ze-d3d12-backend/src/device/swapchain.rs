use crate::device::queue::D3D12Queue;
use crate::device::resources::D3D12Texture;
use crate::utils::*;
use raw_window_handle::RawWindowHandle;
use std::sync::Arc;
use windows::core::Interface;
use windows::Win32::Foundation::{BOOL, HWND};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use ze_gfx::backend::*;

pub(crate) struct D3D12SwapChain {
    pub swapchain: SendableIUnknown<IDXGISwapChain3>,
    pub textures: Vec<Arc<Texture>>,
}

fn back_buffers(
    swapchain: &IDXGISwapChain3,
    desc: &SwapChainDesc,
) -> Result<Vec<Arc<Texture>>, DeviceError> {
    let mut textures = Vec::with_capacity(desc.buffer_count as usize);
    for i in 0..desc.buffer_count {
        let buffer: ID3D12Resource = unsafe { swapchain.GetBuffer::<ID3D12Resource>(i) }
            .map_err(convert_d3d_error_to_ze_device_error)?;
        if let Ok(object) = buffer.cast::<ID3D12Object>() {
            set_resource_name(&object, &format!("Swapchain Texture {}", i));
        }

        let mut texture_desc = TextureDesc::new_2d(
            desc.width,
            desc.height,
            desc.format,
            TextureUsageFlagBits::RenderTarget.into(),
        );
        texture_desc.default_resource_state = ResourceState::Present;

        textures.push(Arc::new(Texture::new(
            texture_desc,
            Box::new(D3D12Texture {
                resource: buffer.into(),
            }),
        )));
    }
    Ok(textures)
}

pub(crate) fn create_swapchain(
    factory: &IDXGIFactory4,
    desc: &SwapChainDesc,
    window: Option<RawWindowHandle>,
    queue: &CommandQueue,
    old_swapchain: Option<SwapChain>,
) -> Result<SwapChain, DeviceError> {
    if desc.buffer_count < 2 {
        return Err(DeviceError::InvalidParameters);
    }

    // Resizing needs every back buffer reference gone
    if let Some(old_swapchain) = old_swapchain {
        let swapchain = native::<D3D12SwapChain>(old_swapchain.backend_data.as_ref())
            .swapchain
            .clone();
        drop(old_swapchain);

        unsafe {
            swapchain
                .ResizeBuffers(
                    desc.buffer_count,
                    desc.width,
                    desc.height,
                    get_swapchain_storage_format(desc.format),
                    0,
                )
                .map_err(convert_d3d_error_to_ze_device_error)?;
        }

        let textures = back_buffers(&swapchain, desc)?;
        return Ok(SwapChain::new(
            *desc,
            Box::new(D3D12SwapChain { swapchain, textures }),
        ));
    }

    let Some(RawWindowHandle::Win32(hwnd)) = window else {
        return Err(DeviceError::Unsupported);
    };

    let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: desc.width,
        Height: desc.height,
        Format: get_swapchain_storage_format(desc.format),
        Stereo: BOOL::from(false),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: desc.buffer_count,
        Scaling: DXGI_SCALING_STRETCH,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
        Flags: 0,
    };

    let queue = native::<D3D12Queue>(queue.backend_data.as_ref());
    let swapchain = unsafe {
        factory.CreateSwapChainForHwnd(
            &*queue.queue,
            HWND(hwnd.hwnd as isize),
            &swapchain_desc,
            None,
            None,
        )
    }
    .map_err(convert_d3d_error_to_ze_device_error)?;

    let swapchain: IDXGISwapChain3 = swapchain
        .cast()
        .map_err(convert_d3d_error_to_ze_device_error)?;

    let textures = back_buffers(&swapchain, desc)?;
    Ok(SwapChain::new(
        *desc,
        Box::new(D3D12SwapChain {
            swapchain: swapchain.into(),
            textures,
        }),
    ))
}

pub(crate) fn present(swapchain: &SwapChain) -> Result<(), DeviceError> {
    let swapchain = native::<D3D12SwapChain>(swapchain.backend_data.as_ref());
    unsafe { swapchain.swapchain.Present(1, 0) }
        .ok()
        .map_err(convert_d3d_error_to_ze_device_error)
}
