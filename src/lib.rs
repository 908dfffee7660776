pub mod config;
pub mod device;
pub(crate) mod env_config;
pub mod error;
pub mod image;
pub mod interop;
pub mod keyed_mutex;
pub mod platform;
pub mod present;
pub mod swapchain;

#[cfg(test)]
mod test_support;

pub use config::{HandoffConfig, HandoffConfigBuilder};
pub use device::{ExportedHandle, ImageDevice, RenderTarget, SharingFlags, TextureDesc};
pub use error::{HandoffError, HandoffErrorClass, HandoffResult};
pub use image::{BackendKind, ImageState, PixelSize, SHARED_IMAGE_FORMAT, SharedImage};
pub use interop::{
    CompositionInterop, DrawingSurface, ExternalImageFormat, ExternalImageHandleType,
    ExternalImageProperties, ExternalMutexSync, PlatformHandle,
};
pub use keyed_mutex::{AcquireTimeout, KeyedMutex, MutexKey};
pub use present::{PendingPresent, PresentCompleter, PresentStatus};
pub use swapchain::{DrawSession, HandoffSwapchain};

#[cfg(target_os = "windows")]
pub use platform::windows::{
    D3D11ImageDevice, D3D11KeyedMutex, D3D11RenderTarget, D3D11SharedHandle, D3D11Texture,
};
