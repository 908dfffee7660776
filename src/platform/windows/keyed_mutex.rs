use anyhow::Context;
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;
use windows::core::{HRESULT, Interface};

use crate::error::{HandoffError, HandoffResult};
use crate::keyed_mutex::{AcquireTimeout, KeyedMutex, MutexKey};

// AcquireSync reports these as success codes, so `HRESULT::ok` would
// swallow them.
const WAIT_ABANDONED: HRESULT = HRESULT(0x0000_0080);
const WAIT_TIMEOUT: HRESULT = HRESULT(0x0000_0102);

/// Keyed mutex of a shared D3D11 texture.
///
/// Holds its own COM reference, so it stays valid until dropped even if
/// the texture is released first.
#[derive(Clone, Debug)]
pub struct D3D11KeyedMutex {
    mutex: IDXGIKeyedMutex,
}

// IDXGIKeyedMutex is free-threaded; the cross-API path calls it from the
// compositor's thread.
unsafe impl Send for D3D11KeyedMutex {}
unsafe impl Sync for D3D11KeyedMutex {}

impl D3D11KeyedMutex {
    pub(crate) fn new(mutex: IDXGIKeyedMutex) -> Self {
        Self { mutex }
    }

    pub fn raw(&self) -> &IDXGIKeyedMutex {
        &self.mutex
    }
}

impl KeyedMutex for D3D11KeyedMutex {
    fn acquire(&self, key: MutexKey, timeout: AcquireTimeout) -> HandoffResult<()> {
        let hr = unsafe {
            (Interface::vtable(&self.mutex).AcquireSync)(
                Interface::as_raw(&self.mutex),
                key.value(),
                timeout.as_millis_u32(),
            )
        };
        match hr {
            WAIT_TIMEOUT => Err(HandoffError::Timeout),
            WAIT_ABANDONED => Err(HandoffError::AcquireAbandoned),
            hr => hr
                .ok()
                .with_context(|| format!("IDXGIKeyedMutex::AcquireSync({key:?}) failed"))
                .map_err(HandoffError::Platform),
        }
    }

    fn release(&self, key: MutexKey) -> HandoffResult<()> {
        unsafe { self.mutex.ReleaseSync(key.value()) }
            .with_context(|| format!("IDXGIKeyedMutex::ReleaseSync({key:?}) failed"))
            .map_err(HandoffError::Platform)
    }
}
