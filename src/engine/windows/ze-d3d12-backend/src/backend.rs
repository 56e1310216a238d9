use crate::device::D3D12Device;
use crate::utils::SendableIUnknown;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use ze_core::{ze_info, ze_warn};
use ze_gfx::backend::*;

#[cfg(debug_assertions)]
const ENABLE_DEBUG_LAYERS: bool = true;

#[cfg(not(debug_assertions))]
const ENABLE_DEBUG_LAYERS: bool = false;

pub struct D3D12Backend {
    factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
    devices: Mutex<Vec<Weak<D3D12Device>>>,
}

impl D3D12Backend {
    pub fn new() -> Result<Arc<D3D12Backend>, BackendError> {
        if ENABLE_DEBUG_LAYERS {
            let debug_controller: Option<ID3D12Debug1> = unsafe {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => debug.and_then(|debug| debug.cast().ok()),
                    Err(_) => None,
                }
            };

            match debug_controller {
                Some(debug) => {
                    unsafe {
                        debug.EnableDebugLayer();
                        debug.SetEnableGPUBasedValidation(false);
                    }
                    ze_info!("Using D3D12 debug layer");
                }
                None => ze_warn!("D3D12 debug layer requested but not installed"),
            }
        }

        let factory: IDXGIFactory4 = unsafe {
            let mut flags = 0;
            if ENABLE_DEBUG_LAYERS {
                flags |= DXGI_CREATE_FACTORY_DEBUG;
            }
            CreateDXGIFactory2::<IDXGIFactory4>(flags).map_err(|_| BackendError::Unsupported)?
        };

        Ok(Arc::new(D3D12Backend {
            factory: Arc::new(Mutex::new(factory.into())),
            devices: Default::default(),
        }))
    }
}

impl Drop for D3D12Backend {
    fn drop(&mut self) {
        for device in self.devices.lock().iter() {
            assert_eq!(device.strong_count(), 0, "D3D12 device outlived its backend");
        }

        if ENABLE_DEBUG_LAYERS {
            unsafe {
                if let Ok(debug) = DXGIGetDebugInterface1::<IDXGIDebug1>(0) {
                    let _ = debug.ReportLiveObjects(
                        DXGI_DEBUG_ALL,
                        DXGI_DEBUG_RLO_FLAGS(
                            DXGI_DEBUG_RLO_DETAIL.0 | DXGI_DEBUG_RLO_IGNORE_INTERNAL.0,
                        ),
                    );
                }
            }
        }
    }
}

impl Backend for D3D12Backend {
    fn create_device(&self) -> Result<Arc<dyn Device>, BackendError> {
        let factory = self.factory.lock();

        let mut adapter_index = 0;
        while let Ok(adapter) = unsafe { factory.EnumAdapters1(adapter_index) } {
            adapter_index += 1;

            let Ok(desc) = (unsafe { adapter.GetDesc1() }) else {
                continue;
            };

            if DXGI_ADAPTER_FLAG(desc.Flags) & DXGI_ADAPTER_FLAG_SOFTWARE
                == DXGI_ADAPTER_FLAG_SOFTWARE
            {
                continue;
            }

            let adapter_name = String::from_utf16_lossy(&desc.Description);
            let adapter_name = adapter_name.trim_matches(char::from(0)).to_string();

            let mut device: Option<ID3D12Device> = None;
            if unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, &mut device) }.is_err()
            {
                ze_info!("Skipping adapter {}: no feature level 12.0", adapter_name);
                continue;
            }

            let Some(device) = device else {
                continue;
            };

            let device = match D3D12Device::new(self.factory.clone(), device, adapter_name) {
                Ok(device) => Arc::new(device),
                Err(error) => {
                    ze_warn!("Failed to initialize D3D12 device: {}", error);
                    continue;
                }
            };

            ze_info!("Using adapter {}", device.name());
            self.devices.lock().push(Arc::downgrade(&device));
            return Ok(device);
        }

        Err(BackendError::Unsupported)
    }

    fn name(&self) -> &str {
        "D3D12"
    }
}
