use crate::utils::*;
use parking_lot::Mutex;
use std::time::Duration;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use ze_gfx::backend::DeviceError;

const INFINITE: u32 = u32::MAX;

pub(crate) struct D3D12Queue {
    pub queue: SendableIUnknown<ID3D12CommandQueue>,
}

pub(crate) struct D3D12CommandAllocator {
    pub allocator: SendableIUnknown<ID3D12CommandAllocator>,
}

pub(crate) struct D3D12Fence {
    pub fence: SendableIUnknown<ID3D12Fence>,

    /// Only one thread can arm the event at a time
    event: Mutex<HANDLE>,
}

unsafe impl Send for D3D12Fence {}
unsafe impl Sync for D3D12Fence {}

impl D3D12Fence {
    pub fn new(fence: ID3D12Fence) -> Result<Self, DeviceError> {
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(convert_d3d_error_to_ze_device_error)?;

        Ok(Self {
            fence: fence.into(),
            event: Mutex::new(event),
        })
    }

    /// `u64::MAX` is what a removed device reports
    pub fn completed_value(&self) -> Result<u64, DeviceError> {
        match unsafe { self.fence.GetCompletedValue() } {
            u64::MAX => Err(DeviceError::DeviceLost),
            value => Ok(value),
        }
    }

    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> Result<(), DeviceError> {
        if self.completed_value()? >= value {
            return Ok(());
        }

        let event = self.event.lock();
        unsafe {
            self.fence
                .SetEventOnCompletion(value, *event)
                .map_err(convert_d3d_error_to_ze_device_error)?;
        }

        let millis = timeout.map_or(INFINITE, |timeout| {
            timeout.as_millis().min((INFINITE - 1) as u128) as u32
        });

        match unsafe { WaitForSingleObject(*event, millis) } {
            WAIT_OBJECT_0 => self.completed_value().map(|_| ()),
            WAIT_TIMEOUT => Err(DeviceError::DeviceLost),
            _ => Err(DeviceError::Unknown),
        }
    }
}

impl Drop for D3D12Fence {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(*self.event.get_mut());
        }
    }
}
