use bitflags::bitflags;

use crate::error::HandoffResult;
use crate::image::{BackendKind, PixelSize};
use crate::interop::{ExternalImageFormat, ExternalImageHandleType};
use crate::keyed_mutex::KeyedMutex;

bitflags! {
    /// How a shared texture may be opened by another device.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SharingFlags: u32 {
        const SHARED = 1 << 0;
        /// Export through an NT handle instead of a global shared handle.
        const NT_HANDLE = 1 << 1;
        /// Bind a keyed mutex to the resource.
        const KEYED_MUTEX = 1 << 2;
    }
}

impl SharingFlags {
    pub fn for_backend(backend: BackendKind) -> Self {
        match backend {
            BackendKind::Native => Self::SHARED | Self::KEYED_MUTEX,
            BackendKind::CrossApi => Self::SHARED | Self::NT_HANDLE | Self::KEYED_MUTEX,
        }
    }
}

/// Single-sample, single-mip, single-slice, render target plus shader
/// resource binding, no CPU access. Only size, format and sharing vary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub size: PixelSize,
    pub format: ExternalImageFormat,
    pub sharing: SharingFlags,
}

pub trait RenderTarget {
    fn size(&self) -> PixelSize;
}

/// Owning wrapper around an exported OS handle. Dropping it closes the
/// handle when the exporting side owns one (NT handles).
pub trait ExportedHandle {
    fn raw(&self) -> isize;
    fn kind(&self) -> ExternalImageHandleType;
}

/// The GPU device the application renders with.
pub trait ImageDevice {
    type Texture;
    type KeyedMutex: KeyedMutex;
    type SharedHandle: ExportedHandle;
    type RenderTarget: RenderTarget;

    fn create_texture(&self, desc: &TextureDesc) -> HandoffResult<Self::Texture>;

    /// Fails with `Unsupported` when the texture was not created with a
    /// keyed mutex.
    fn open_keyed_mutex(&self, texture: &Self::Texture) -> HandoffResult<Self::KeyedMutex>;

    /// `CrossApi` creates a read/write NT handle; `Native` reads the
    /// global handle the texture already carries.
    fn export_shared_handle(
        &self,
        texture: &Self::Texture,
        backend: BackendKind,
    ) -> HandoffResult<Self::SharedHandle>;

    fn create_render_target(&self, texture: &Self::Texture) -> HandoffResult<Self::RenderTarget>;
}
