use anyhow::Context;
use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, E_INVALIDARG, HANDLE};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_RESOURCE_MISC_SHARED, D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX,
    D3D11_RESOURCE_MISC_SHARED_NTHANDLE, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_DEFAULT, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext,
    ID3D11RenderTargetView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_SHARED_RESOURCE_READ, DXGI_SHARED_RESOURCE_WRITE, IDXGIAdapter, IDXGIKeyedMutex,
    IDXGIResource, IDXGIResource1,
};
use windows::core::{Interface, PCWSTR};

use super::keyed_mutex::D3D11KeyedMutex;
use crate::device::{ExportedHandle, ImageDevice, RenderTarget, SharingFlags, TextureDesc};
use crate::error::{HandoffError, HandoffResult};
use crate::image::{BackendKind, PixelSize};
use crate::interop::{ExternalImageFormat, ExternalImageHandleType};

/// [`ImageDevice`] backed by a D3D11 device.
#[derive(Clone, Debug)]
pub struct D3D11ImageDevice {
    device: ID3D11Device,
}

impl D3D11ImageDevice {
    /// Wraps an existing device. It must not have been created with
    /// `D3D11_CREATE_DEVICE_SINGLETHREADED` if the compositor takes the
    /// cross-API path.
    pub fn new(device: ID3D11Device) -> Self {
        Self { device }
    }

    /// Creates a BGRA-capable device on the default hardware adapter,
    /// returning its immediate context for drawing.
    pub fn create_default() -> HandoffResult<(Self, ID3D11DeviceContext)> {
        Self::create(None)
    }

    /// Creates a device on `adapter`, typically the one the compositor
    /// runs on.
    pub fn create_for_adapter(
        adapter: &IDXGIAdapter,
    ) -> HandoffResult<(Self, ID3D11DeviceContext)> {
        Self::create(Some(adapter))
    }

    // Never single-threaded: cross-API compositors run the keyed-mutex
    // callbacks on their own thread.
    fn create(adapter: Option<&IDXGIAdapter>) -> HandoffResult<(Self, ID3D11DeviceContext)> {
        let driver_type: D3D_DRIVER_TYPE = match adapter {
            Some(_) => D3D_DRIVER_TYPE_UNKNOWN,
            None => D3D_DRIVER_TYPE_HARDWARE,
        };
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        unsafe {
            D3D11CreateDevice(
                adapter,
                driver_type,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&[D3D_FEATURE_LEVEL_11_0]),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        }
        .context("creating D3D11 device for shared images")
        .map_err(HandoffError::Platform)?;

        match (device, context) {
            (Some(device), Some(context)) => Ok((Self::new(device), context)),
            _ => Err(HandoffError::Platform(anyhow::anyhow!(
                "D3D11CreateDevice succeeded without returning a device and context"
            ))),
        }
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }
}

impl ImageDevice for D3D11ImageDevice {
    type Texture = D3D11Texture;
    type KeyedMutex = D3D11KeyedMutex;
    type SharedHandle = D3D11SharedHandle;
    type RenderTarget = D3D11RenderTarget;

    fn create_texture(&self, desc: &TextureDesc) -> HandoffResult<D3D11Texture> {
        let texture_desc = texture_desc(desc);
        let mut texture: Option<ID3D11Texture2D> = None;
        if let Err(err) =
            unsafe { self.device.CreateTexture2D(&texture_desc, None, Some(&mut texture)) }
        {
            if err.code() == E_INVALIDARG {
                return Err(HandoffError::Unsupported(format!(
                    "device rejected {} texture with sharing {:?}: {err}",
                    desc.size, desc.sharing
                )));
            }
            return Err(HandoffError::Platform(
                anyhow::Error::new(err).context("CreateTexture2D failed for shared image"),
            ));
        }
        let texture = texture
            .context("CreateTexture2D did not return a texture")
            .map_err(HandoffError::Platform)?;
        debug!(size = %desc.size, misc = texture_desc.MiscFlags, "created shared texture");
        Ok(D3D11Texture {
            texture,
            size: desc.size,
        })
    }

    fn open_keyed_mutex(&self, texture: &D3D11Texture) -> HandoffResult<D3D11KeyedMutex> {
        let mutex = texture.texture.cast::<IDXGIKeyedMutex>().map_err(|err| {
            HandoffError::Unsupported(format!("texture has no keyed mutex: {err}"))
        })?;
        Ok(D3D11KeyedMutex::new(mutex))
    }

    fn export_shared_handle(
        &self,
        texture: &D3D11Texture,
        backend: BackendKind,
    ) -> HandoffResult<D3D11SharedHandle> {
        match backend {
            BackendKind::CrossApi => {
                let resource: IDXGIResource1 = texture
                    .texture
                    .cast()
                    .context("shared texture does not expose IDXGIResource1")
                    .map_err(HandoffError::Platform)?;
                let handle = unsafe {
                    resource.CreateSharedHandle(
                        None,
                        DXGI_SHARED_RESOURCE_READ | DXGI_SHARED_RESOURCE_WRITE,
                        PCWSTR::null(),
                    )
                }
                .context("IDXGIResource1::CreateSharedHandle failed")
                .map_err(HandoffError::Platform)?;
                Ok(D3D11SharedHandle::owned_nt(handle))
            }
            BackendKind::Native => {
                let resource: IDXGIResource = texture
                    .texture
                    .cast()
                    .context("shared texture does not expose IDXGIResource")
                    .map_err(HandoffError::Platform)?;
                let handle = unsafe { resource.GetSharedHandle() }
                    .context("IDXGIResource::GetSharedHandle failed")
                    .map_err(HandoffError::Platform)?;
                Ok(D3D11SharedHandle::global(handle))
            }
        }
    }

    fn create_render_target(&self, texture: &D3D11Texture) -> HandoffResult<D3D11RenderTarget> {
        let mut view: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&texture.texture, None, Some(&mut view))
        }
        .context("CreateRenderTargetView failed for shared image")
        .map_err(HandoffError::Platform)?;
        let view = view
            .context("CreateRenderTargetView did not return a view")
            .map_err(HandoffError::Platform)?;
        Ok(D3D11RenderTarget {
            view,
            size: texture.size,
        })
    }
}

#[derive(Clone, Debug)]
pub struct D3D11Texture {
    texture: ID3D11Texture2D,
    size: PixelSize,
}

impl D3D11Texture {
    pub fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }
}

#[derive(Clone, Debug)]
pub struct D3D11RenderTarget {
    view: ID3D11RenderTargetView,
    size: PixelSize,
}

impl D3D11RenderTarget {
    pub fn view(&self) -> &ID3D11RenderTargetView {
        &self.view
    }
}

impl RenderTarget for D3D11RenderTarget {
    fn size(&self) -> PixelSize {
        self.size
    }
}

/// A handle exported from a shared texture. NT handles are owned and
/// closed on drop; global handles belong to the texture.
#[derive(Debug)]
pub struct D3D11SharedHandle {
    handle: HANDLE,
    kind: ExternalImageHandleType,
}

// A HANDLE is a plain kernel object identifier.
unsafe impl Send for D3D11SharedHandle {}
unsafe impl Sync for D3D11SharedHandle {}

impl D3D11SharedHandle {
    fn owned_nt(handle: HANDLE) -> Self {
        Self {
            handle,
            kind: ExternalImageHandleType::D3D11TextureNtHandle,
        }
    }

    fn global(handle: HANDLE) -> Self {
        Self {
            handle,
            kind: ExternalImageHandleType::D3D11TextureGlobalSharedHandle,
        }
    }

    pub fn handle(&self) -> HANDLE {
        self.handle
    }
}

impl ExportedHandle for D3D11SharedHandle {
    fn raw(&self) -> isize {
        self.handle.0 as isize
    }

    fn kind(&self) -> ExternalImageHandleType {
        self.kind
    }
}

impl Drop for D3D11SharedHandle {
    fn drop(&mut self) {
        if self.kind != ExternalImageHandleType::D3D11TextureNtHandle || self.handle.is_invalid() {
            return;
        }
        if let Err(err) = unsafe { CloseHandle(self.handle) } {
            debug!(error = %err, "closing shared NT handle failed");
        }
    }
}

fn texture_desc(desc: &TextureDesc) -> D3D11_TEXTURE2D_DESC {
    D3D11_TEXTURE2D_DESC {
        Width: desc.size.width,
        Height: desc.size.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: dxgi_format(desc.format),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: misc_flags(desc.sharing),
    }
}

fn dxgi_format(format: ExternalImageFormat) -> DXGI_FORMAT {
    match format {
        ExternalImageFormat::B8G8R8A8UNorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        ExternalImageFormat::R8G8B8A8UNorm => DXGI_FORMAT_R8G8B8A8_UNORM,
    }
}

/// D3D11 rejects MISC_SHARED combined with MISC_SHARED_KEYEDMUTEX; the
/// keyed-mutex flag already implies sharing.
fn misc_flags(sharing: SharingFlags) -> u32 {
    let mut flags = 0;
    if sharing.contains(SharingFlags::KEYED_MUTEX) {
        flags |= D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0;
    } else if sharing.contains(SharingFlags::SHARED) {
        flags |= D3D11_RESOURCE_MISC_SHARED.0;
    }
    if sharing.contains(SharingFlags::NT_HANDLE) {
        flags |= D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0;
    }
    flags as u32
}
