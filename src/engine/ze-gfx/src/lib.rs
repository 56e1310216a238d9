use enumflags2::{bitflags, BitFlags};
use serde_derive::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PixelFormat {
    Unknown,
    B8G8R8A8UnormSrgb,
    B8G8R8A8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,

    R8Unorm,
    R16Uint,
    R32Uint,
    R32Float,
    R16G16Float,
    R32G32Uint,
    R32G32Float,
    R32G32B32Float,
    R11G11B10Float,
    R16G16B16A16Float,
    R32G32B32A32Float,

    D16Unorm,
    D24UnormS8Uint,
    D32Float,
}

impl PixelFormat {
    pub fn bytes_size(&self) -> u64 {
        match self {
            PixelFormat::Unknown => 0,
            PixelFormat::R8Unorm => 1,
            PixelFormat::R16Uint | PixelFormat::D16Unorm => 2,
            PixelFormat::B8G8R8A8UnormSrgb
            | PixelFormat::B8G8R8A8Unorm
            | PixelFormat::R8G8B8A8Unorm
            | PixelFormat::R8G8B8A8UnormSrgb
            | PixelFormat::R32Uint
            | PixelFormat::R32Float
            | PixelFormat::R16G16Float
            | PixelFormat::R11G11B10Float
            | PixelFormat::D24UnormS8Uint
            | PixelFormat::D32Float => 4,
            PixelFormat::R32G32Uint | PixelFormat::R32G32Float | PixelFormat::R16G16B16A16Float => 8,
            PixelFormat::R32G32B32Float => 12,
            PixelFormat::R32G32B32A32Float => 16,
        }
    }

    pub fn texture_size_in_bytes(&self, width: u32, height: u32) -> u64 {
        (width as u64) * (height as u64) * self.bytes_size()
    }

    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            PixelFormat::D16Unorm | PixelFormat::D24UnormS8Uint | PixelFormat::D32Float
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, PixelFormat::D24UnormS8Uint)
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::B8G8R8A8UnormSrgb => write!(f, "BGRA 8-bit (unorm, sRGB)"),
            PixelFormat::B8G8R8A8Unorm => write!(f, "BGRA 8-bit (unorm)"),
            PixelFormat::R8G8B8A8Unorm => write!(f, "RGBA 8-bit (unorm)"),
            PixelFormat::R16G16B16A16Float => write!(f, "RGBA 16-bit (float)"),
            PixelFormat::R32G32B32A32Float => write!(f, "RGBA 32-bit (float)"),
            PixelFormat::D24UnormS8Uint => write!(f, "Depth 24-bit (unorm), stencil 8-bit"),
            _ => write!(f, "{:?}", self),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SampleDesc {
    pub count: u32,
    pub quality: u32,
}

impl Default for SampleDesc {
    fn default() -> Self {
        Self {
            count: 1,
            quality: 0,
        }
    }
}

#[bitflags]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ShaderStageFlagBits {
    Vertex = 1 << 0,
    Pixel = 1 << 1,
    Domain = 1 << 2,
    Hull = 1 << 3,
    Geometry = 1 << 4,
    Mesh = 1 << 5,
    Amplification = 1 << 6,
    Compute = 1 << 7,
}
pub type ShaderStageFlags = BitFlags<ShaderStageFlagBits>;

pub mod backend;
pub mod null;
pub mod utils;
