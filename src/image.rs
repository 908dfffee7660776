//! A single shared texture and the keyed-mutex handoff around it.
//!
//! The application and the compositor take turns owning the texture:
//!
//! ```text
//!   Idle ──begin_draw──► AppOwned ──present──► Presenting ──begin_draw──► AppOwned ...
//!           acquire(0)            release(1)              acquire(0) blocks until
//!                                 import (once)           the compositor has run
//!                                 update (async)          acquire(1) .. release(0)
//! ```
//!
//! Any failure inside the protocol moves the image to `Faulted`: the key
//! sequence can no longer be trusted and the image must be retired.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::HandoffConfig;
use crate::device::{ExportedHandle, ImageDevice, RenderTarget, SharingFlags, TextureDesc};
use crate::error::{HandoffError, HandoffResult};
use crate::interop::{
    CompositionInterop, DrawingSurface, ExternalImageFormat, ExternalImageHandleType,
    ExternalImageProperties, ExternalMutexSync, PlatformHandle,
};
use crate::keyed_mutex::{AcquireTimeout, KeyedMutex, MutexKey};
use crate::present::{PendingPresent, PresentStatus};

/// Every shared image is created and imported in this format.
pub const SHARED_IMAGE_FORMAT: ExternalImageFormat = ExternalImageFormat::B8G8R8A8UNorm;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for PixelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which export/synchronization path an image uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Global shared handle; the compositor flips the keys itself.
    Native,
    /// NT handle; the compositor runs our acquire/release callbacks,
    /// typically because it sits on a different graphics API.
    CrossApi,
}

impl BackendKind {
    /// Depends only on the compositor's capabilities, never on the image.
    pub fn select(supported: &[ExternalImageHandleType]) -> Self {
        if supported.contains(&ExternalImageHandleType::D3D11TextureGlobalSharedHandle) {
            Self::Native
        } else {
            Self::CrossApi
        }
    }

    pub const fn handle_type(self) -> ExternalImageHandleType {
        match self {
            Self::Native => ExternalImageHandleType::D3D11TextureGlobalSharedHandle,
            Self::CrossApi => ExternalImageHandleType::D3D11TextureNtHandle,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::CrossApi => "cross-api",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageState {
    /// Freshly created; key 0 is free.
    Idle,
    /// The application holds key 0 and may write.
    AppOwned,
    /// Key 1 was handed to the compositor; its read may still be running.
    Presenting,
    Faulted,
}

/// One shared texture plus everything bound to it.
///
/// Fields drop in declaration order, so the render target view, the
/// imported reference and the keyed mutex are released before the shared
/// handle is closed and the texture itself goes away.
pub struct SharedImage<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    render_target: D::RenderTarget,
    imported: Option<C::ImportedImage>,
    keyed_mutex: D::KeyedMutex,
    shared_handle: D::SharedHandle,
    texture: D::Texture,
    last_present: Option<PendingPresent>,
    interop: Arc<C>,
    target: Arc<S>,
    size: PixelSize,
    backend: BackendKind,
    properties: ExternalImageProperties,
    state: ImageState,
    config: HandoffConfig,
}

impl<D, C, S> SharedImage<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    /// Creates the texture, keyed mutex, shared handle and render target
    /// view. Either every resource is created or none is kept.
    pub fn new(
        device: &D,
        size: PixelSize,
        interop: Arc<C>,
        target: Arc<S>,
        config: HandoffConfig,
    ) -> HandoffResult<Self> {
        if size.is_empty() {
            return Err(HandoffError::InvalidSize(size.width, size.height));
        }

        let backend = if config.force_cross_api {
            BackendKind::CrossApi
        } else {
            BackendKind::select(&interop.supported_image_handle_types())
        };

        let desc = TextureDesc {
            size,
            format: SHARED_IMAGE_FORMAT,
            sharing: SharingFlags::for_backend(backend),
        };
        let texture = device.create_texture(&desc)?;
        let keyed_mutex = device.open_keyed_mutex(&texture)?;
        let shared_handle = device.export_shared_handle(&texture, backend)?;
        if shared_handle.kind() != backend.handle_type() {
            return Err(HandoffError::Unsupported(format!(
                "device exported a {} for the {} backend",
                shared_handle.kind().as_str(),
                backend.as_str()
            )));
        }
        let properties = ExternalImageProperties::for_size(size, SHARED_IMAGE_FORMAT);
        let render_target = device.create_render_target(&texture)?;

        debug!(
            %size,
            backend = backend.as_str(),
            forced = config.force_cross_api,
            "created shared image"
        );

        Ok(Self {
            render_target,
            imported: None,
            keyed_mutex,
            shared_handle,
            texture,
            last_present: None,
            interop,
            target,
            size,
            backend,
            properties,
            state: ImageState::Idle,
            config,
        })
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub fn properties(&self) -> &ExternalImageProperties {
        &self.properties
    }

    pub fn render_target(&self) -> &D::RenderTarget {
        &self.render_target
    }

    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    pub fn shared_handle(&self) -> &D::SharedHandle {
        &self.shared_handle
    }

    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }

    pub fn imported_image(&self) -> Option<&C::ImportedImage> {
        self.imported.as_ref()
    }

    pub fn last_present(&mut self) -> Option<&mut PendingPresent> {
        self.last_present.as_mut()
    }

    /// Status of the last present, or `None` if the image was never
    /// presented.
    pub fn present_status(&mut self) -> Option<PresentStatus> {
        self.last_present.as_mut().map(PendingPresent::poll)
    }

    /// Acquires the application key, blocking until the compositor has
    /// released it after reading the previous frame.
    pub fn begin_draw(&mut self) -> HandoffResult<&D::RenderTarget> {
        match self.state {
            ImageState::Idle | ImageState::Presenting => {}
            state => {
                return Err(HandoffError::InvalidState {
                    operation: "begin draw",
                    state,
                });
            }
        }

        trace!(key = ?MutexKey::APPLICATION, size = %self.size, "acquiring keyed mutex");
        if let Err(err) = self
            .keyed_mutex
            .acquire(MutexKey::APPLICATION, self.config.acquire_timeout)
        {
            self.state = ImageState::Faulted;
            return Err(err);
        }
        self.state = ImageState::AppOwned;
        Ok(&self.render_target)
    }

    /// Hands the texture to the compositor. Returns once the update has
    /// been scheduled; the read itself completes asynchronously.
    pub fn present(&mut self) -> HandoffResult<()> {
        if self.state != ImageState::AppOwned {
            return Err(HandoffError::InvalidState {
                operation: "present",
                state: self.state,
            });
        }

        match self.hand_off() {
            Ok(pending) => {
                self.last_present = Some(pending);
                self.state = ImageState::Presenting;
                Ok(())
            }
            Err(err) => {
                self.state = ImageState::Faulted;
                Err(err)
            }
        }
    }

    fn hand_off(&mut self) -> HandoffResult<PendingPresent> {
        trace!(key = ?MutexKey::COMPOSITOR, size = %self.size, "releasing keyed mutex");
        self.keyed_mutex.release(MutexKey::COMPOSITOR)?;

        let imported = match &mut self.imported {
            Some(imported) => imported,
            slot => {
                let handle = PlatformHandle::new(self.shared_handle.raw(), self.backend.handle_type());
                debug!(?handle, size = %self.size, "importing shared image into compositor");
                slot.insert(self.interop.import_image(handle, &self.properties)?)
            }
        };

        match self.backend {
            BackendKind::CrossApi => {
                let acquire_mutex = self.keyed_mutex.clone();
                let release_mutex = self.keyed_mutex.clone();
                let sync = ExternalMutexSync {
                    acquire: Box::new(move || {
                        trace!(key = ?MutexKey::COMPOSITOR, "compositor acquiring keyed mutex");
                        acquire_mutex.acquire(MutexKey::COMPOSITOR, AcquireTimeout::Infinite)
                    }),
                    release: Box::new(move || {
                        trace!(key = ?MutexKey::APPLICATION, "compositor releasing keyed mutex");
                        release_mutex.release(MutexKey::APPLICATION)
                    }),
                };
                self.target.update_with_external_keyed_mutex(imported, sync)
            }
            BackendKind::Native => self.target.update_with_keyed_mutex(
                imported,
                MutexKey::COMPOSITOR,
                MutexKey::APPLICATION,
            ),
        }
    }

    /// Waits for the last present (bounded by the configured teardown
    /// wait) and releases every GPU resource. Failures of the pending
    /// present are logged and otherwise ignored.
    pub fn dispose(mut self) {
        self.drain_last_present();
    }

    fn drain_last_present(&mut self) {
        let Some(mut pending) = self.last_present.take() else {
            return;
        };

        let outcome = match self.config.teardown_wait {
            Some(limit) => pending.wait_timeout(limit),
            None => Some(pending.wait()),
        };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                warn!(size = %self.size, error = %err, "ignoring failed present during teardown");
            }
            None => {
                warn!(
                    size = %self.size,
                    wait = ?self.config.teardown_wait,
                    "abandoning wait for outstanding present during teardown"
                );
            }
        }
    }
}

impl<D, C, S> Drop for SharedImage<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    fn drop(&mut self) {
        self.drain_last_present();
    }
}

impl<D, C, S> fmt::Debug for SharedImage<D, C, S>
where
    D: ImageDevice,
    C: CompositionInterop,
    S: DrawingSurface<C::ImportedImage>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedImage")
            .field("size", &self.size)
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("imported", &self.imported.is_some())
            .field("render_target_size", &self.render_target.size())
            .finish_non_exhaustive()
    }
}
