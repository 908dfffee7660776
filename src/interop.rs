//! Contract with the external compositor.
//!
//! The compositor is split in two the way windowing layers usually are:
//! a [`CompositionInterop`] that knows which external handle types it can
//! import, and a [`DrawingSurface`] that can be updated asynchronously
//! from an imported image.

use std::fmt;

use crate::error::HandoffResult;
use crate::image::PixelSize;
use crate::keyed_mutex::MutexKey;
use crate::present::PendingPresent;

/// Well-known external image handle tags a compositor may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalImageHandleType {
    /// Legacy `IDXGIResource::GetSharedHandle` handle. Not a real kernel
    /// object and never closed by the holder.
    D3D11TextureGlobalSharedHandle,
    /// NT handle from `IDXGIResource1::CreateSharedHandle`.
    D3D11TextureNtHandle,
    VulkanOpaqueNtHandle,
    VulkanOpaqueKmtHandle,
    VulkanOpaquePosixFileDescriptor,
}

impl ExternalImageHandleType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::D3D11TextureGlobalSharedHandle => "D3D11TextureGlobalSharedHandle",
            Self::D3D11TextureNtHandle => "D3D11TextureNtHandle",
            Self::VulkanOpaqueNtHandle => "VulkanOpaqueNtHandle",
            Self::VulkanOpaqueKmtHandle => "VulkanOpaqueKmtHandle",
            Self::VulkanOpaquePosixFileDescriptor => "VulkanOpaquePosixFileDescriptor",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalImageFormat {
    B8G8R8A8UNorm,
    R8G8B8A8UNorm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalImageProperties {
    pub width: u32,
    pub height: u32,
    pub format: ExternalImageFormat,
    pub memory_offset: u64,
    pub topleft_origin: bool,
}

impl ExternalImageProperties {
    pub fn for_size(size: PixelSize, format: ExternalImageFormat) -> Self {
        Self {
            width: size.width,
            height: size.height,
            format,
            memory_offset: 0,
            topleft_origin: true,
        }
    }
}

/// A raw OS handle value tagged with how the compositor must open it.
///
/// This is a borrowed view; the exporting image keeps ownership of the
/// underlying handle for as long as the imported image exists.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformHandle {
    raw: isize,
    kind: ExternalImageHandleType,
}

impl PlatformHandle {
    pub const fn new(raw: isize, kind: ExternalImageHandleType) -> Self {
        Self { raw, kind }
    }

    pub const fn raw(&self) -> isize {
        self.raw
    }

    pub const fn kind(&self) -> ExternalImageHandleType {
        self.kind
    }
}

impl fmt::Debug for PlatformHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#x})", self.kind.as_str(), self.raw as usize)
    }
}

/// Deferred keyed-mutex operation run by the compositor on its own thread.
pub type MutexSyncFn = Box<dyn FnOnce() -> HandoffResult<()> + Send + 'static>;

/// The acquire/release pair a cross-API compositor runs around its read.
///
/// `acquire` must complete before the compositor's GPU work reads the
/// image and `release` must run after that work has been submitted.
pub struct ExternalMutexSync {
    pub acquire: MutexSyncFn,
    pub release: MutexSyncFn,
}

impl fmt::Debug for ExternalMutexSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalMutexSync").finish_non_exhaustive()
    }
}

pub trait CompositionInterop {
    /// Opaque reference the compositor uses after importing a handle.
    type ImportedImage;

    fn supported_image_handle_types(&self) -> Vec<ExternalImageHandleType>;

    /// Import must be called at most once per shared image; the result is
    /// reused for every later present.
    fn import_image(
        &self,
        handle: PlatformHandle,
        properties: &ExternalImageProperties,
    ) -> HandoffResult<Self::ImportedImage>;
}

pub trait DrawingSurface<I> {
    /// Native fast path: the compositor acquires `acquire_key`, reads the
    /// image, and releases `release_key` itself.
    fn update_with_keyed_mutex(
        &self,
        image: &I,
        acquire_key: MutexKey,
        release_key: MutexKey,
    ) -> HandoffResult<PendingPresent>;

    /// Cross-API path: the compositor runs the supplied callbacks at the
    /// points its own driver submission requires.
    fn update_with_external_keyed_mutex(
        &self,
        image: &I,
        sync: ExternalMutexSync,
    ) -> HandoffResult<PendingPresent>;
}
