//! In-memory device and compositor used by the unit tests.
//!
//! `ModelKeyedMutex` follows DXGI semantics: a fresh mutex can be acquired
//! with key 0, and after `release(k)` only `acquire(k)` succeeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing_subscriber::EnvFilter;

use crate::device::{ExportedHandle, ImageDevice, RenderTarget, SharingFlags, TextureDesc};
use crate::error::{HandoffError, HandoffResult};
use crate::image::{BackendKind, PixelSize};
use crate::interop::{
    CompositionInterop, DrawingSurface, ExternalImageHandleType, ExternalImageProperties,
    ExternalMutexSync, PlatformHandle,
};
use crate::keyed_mutex::{AcquireTimeout, KeyedMutex, MutexKey};
use crate::present::{PendingPresent, PresentCompleter};

/// Routes log output through the test harness; `RUST_LOG` selects levels.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn native_types() -> Vec<ExternalImageHandleType> {
    vec![
        ExternalImageHandleType::D3D11TextureGlobalSharedHandle,
        ExternalImageHandleType::D3D11TextureNtHandle,
    ]
}

pub(crate) fn vulkan_types() -> Vec<ExternalImageHandleType> {
    vec![
        ExternalImageHandleType::D3D11TextureNtHandle,
        ExternalImageHandleType::VulkanOpaqueNtHandle,
        ExternalImageHandleType::VulkanOpaqueKmtHandle,
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MutexEvent {
    Acquired(MutexKey),
    Released(MutexKey),
}

#[derive(Debug)]
struct MutexModel {
    /// Key that the next acquire must use. `None` while someone holds it.
    free_key: Option<MutexKey>,
    events: Vec<MutexEvent>,
}

#[derive(Clone, Debug)]
pub(crate) struct ModelKeyedMutex {
    inner: Arc<(Mutex<MutexModel>, Condvar)>,
}

impl ModelKeyedMutex {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(MutexModel {
                    free_key: Some(MutexKey::APPLICATION),
                    events: Vec::new(),
                }),
                Condvar::new(),
            )),
        }
    }

    pub(crate) fn events(&self) -> Vec<MutexEvent> {
        self.inner.0.lock().unwrap().events.clone()
    }
}

impl KeyedMutex for ModelKeyedMutex {
    fn acquire(&self, key: MutexKey, timeout: AcquireTimeout) -> HandoffResult<()> {
        let (lock, ready) = &*self.inner;
        let guard = lock.lock().unwrap();
        let mut model = match timeout.as_duration() {
            None => ready
                .wait_while(guard, |model| model.free_key != Some(key))
                .unwrap(),
            Some(limit) => {
                let (model, result) = ready
                    .wait_timeout_while(guard, limit, |model| model.free_key != Some(key))
                    .unwrap();
                if result.timed_out() {
                    return Err(HandoffError::Timeout);
                }
                model
            }
        };
        model.free_key = None;
        model.events.push(MutexEvent::Acquired(key));
        Ok(())
    }

    fn release(&self, key: MutexKey) -> HandoffResult<()> {
        let (lock, ready) = &*self.inner;
        let mut model = lock.lock().unwrap();
        if model.free_key.is_some() {
            return Err(HandoffError::Platform(anyhow::anyhow!(
                "released {key:?} without holding the keyed mutex"
            )));
        }
        model.free_key = Some(key);
        model.events.push(MutexEvent::Released(key));
        ready.notify_all();
        Ok(())
    }
}

/// Maps exported raw handles back to their mutex, standing in for the
/// compositor opening the shared resource on its own device.
type HandleRegistry = Arc<Mutex<HashMap<isize, ModelKeyedMutex>>>;

#[derive(Debug)]
pub(crate) struct MockTexture {
    pub(crate) desc: TextureDesc,
    pub(crate) mutex: ModelKeyedMutex,
    live: Arc<AtomicUsize>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct MockHandle {
    raw: isize,
    kind: ExternalImageHandleType,
    open_nt_handles: Arc<AtomicUsize>,
}

impl ExportedHandle for MockHandle {
    fn raw(&self) -> isize {
        self.raw
    }

    fn kind(&self) -> ExternalImageHandleType {
        self.kind
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if self.kind == ExternalImageHandleType::D3D11TextureNtHandle {
            self.open_nt_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Debug)]
pub(crate) struct MockRenderTarget {
    size: PixelSize,
}

impl RenderTarget for MockRenderTarget {
    fn size(&self) -> PixelSize {
        self.size
    }
}

#[derive(Debug)]
pub(crate) struct MockDevice {
    registry: HandleRegistry,
    next_handle: AtomicIsize,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
    open_nt_handles: Arc<AtomicUsize>,
    fail_texture: AtomicBool,
    fail_mutex: AtomicBool,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        init_tracing();
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicIsize::new(0x100),
            created: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            open_nt_handles: Arc::new(AtomicUsize::new(0)),
            fail_texture: AtomicBool::new(false),
            fail_mutex: AtomicBool::new(false),
        }
    }

    /// Compositor that can open the handles this device exports.
    pub(crate) fn compositor(
        &self,
        supported: Vec<ExternalImageHandleType>,
        mode: CompositorMode,
    ) -> Arc<MockCompositor> {
        MockCompositor::with_registry(supported, mode, self.registry.clone())
    }

    pub(crate) fn fail_texture_creation(&self, fail: bool) {
        self.fail_texture.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_keyed_mutex(&self, fail: bool) {
        self.fail_mutex.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn textures_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn live_textures(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Outlives the device, for checks after the owner is consumed.
    pub(crate) fn live_counter(&self) -> Arc<AtomicUsize> {
        self.live.clone()
    }

    pub(crate) fn open_nt_handles(&self) -> usize {
        self.open_nt_handles.load(Ordering::SeqCst)
    }
}

impl ImageDevice for MockDevice {
    type Texture = MockTexture;
    type KeyedMutex = ModelKeyedMutex;
    type SharedHandle = MockHandle;
    type RenderTarget = MockRenderTarget;

    fn create_texture(&self, desc: &TextureDesc) -> HandoffResult<MockTexture> {
        if self.fail_texture.load(Ordering::SeqCst) {
            return Err(HandoffError::Platform(anyhow::anyhow!(
                "CreateTexture2D failed: E_OUTOFMEMORY"
            )));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockTexture {
            desc: *desc,
            mutex: ModelKeyedMutex::new(),
            live: self.live.clone(),
        })
    }

    fn open_keyed_mutex(&self, texture: &MockTexture) -> HandoffResult<ModelKeyedMutex> {
        if self.fail_mutex.load(Ordering::SeqCst)
            || !texture.desc.sharing.contains(SharingFlags::KEYED_MUTEX)
        {
            return Err(HandoffError::Unsupported(
                "texture does not expose a keyed mutex".to_string(),
            ));
        }
        Ok(texture.mutex.clone())
    }

    fn export_shared_handle(
        &self,
        texture: &MockTexture,
        backend: BackendKind,
    ) -> HandoffResult<MockHandle> {
        let raw = self.next_handle.fetch_add(4, Ordering::SeqCst);
        self.registry
            .lock()
            .unwrap()
            .insert(raw, texture.mutex.clone());
        let kind = backend.handle_type();
        if kind == ExternalImageHandleType::D3D11TextureNtHandle {
            self.open_nt_handles.fetch_add(1, Ordering::SeqCst);
        }
        Ok(MockHandle {
            raw,
            kind,
            open_nt_handles: self.open_nt_handles.clone(),
        })
    }

    fn create_render_target(&self, texture: &MockTexture) -> HandoffResult<MockRenderTarget> {
        Ok(MockRenderTarget {
            size: texture.desc.size,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MockImported {
    pub(crate) id: u64,
    pub(crate) handle: PlatformHandle,
    pub(crate) properties: ExternalImageProperties,
}

#[derive(Clone, Debug)]
pub(crate) enum UpdateCall {
    KeyPair {
        image: u64,
        acquire: MutexKey,
        release: MutexKey,
    },
    Callbacks {
        image: u64,
    },
}

impl UpdateCall {
    pub(crate) fn image_id(&self) -> u64 {
        match self {
            Self::KeyPair { image, .. } | Self::Callbacks { image } => *image,
        }
    }

    pub(crate) fn is_callback_form(&self) -> bool {
        matches!(self, Self::Callbacks { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompositorMode {
    /// Runs the compositor side of the key sequence inside the update call.
    Immediate,
    /// Queues the work until `run_pending` or `abandon_pending`.
    Deferred,
    /// Runs the key sequence but resolves the present as failed.
    Failing,
}

enum Work {
    Keys {
        mutex: ModelKeyedMutex,
        acquire: MutexKey,
        release: MutexKey,
        completer: PresentCompleter,
    },
    Callbacks {
        sync: ExternalMutexSync,
        completer: PresentCompleter,
    },
}

pub(crate) struct MockCompositor {
    supported: Vec<ExternalImageHandleType>,
    mode: CompositorMode,
    registry: HandleRegistry,
    imports: AtomicUsize,
    fail_imports: AtomicBool,
    completed: AtomicUsize,
    calls: Mutex<Vec<UpdateCall>>,
    queue: Mutex<Vec<Work>>,
}

impl MockCompositor {
    fn with_registry(
        supported: Vec<ExternalImageHandleType>,
        mode: CompositorMode,
        registry: HandleRegistry,
    ) -> Arc<Self> {
        Arc::new(Self {
            supported,
            mode,
            registry,
            imports: AtomicUsize::new(0),
            fail_imports: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn fail_imports(&self, fail: bool) {
        self.fail_imports.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn update_calls(&self) -> Vec<UpdateCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Executes every queued read in submission order.
    pub(crate) fn run_pending(&self) {
        let queued: Vec<Work> = std::mem::take(&mut *self.queue.lock().unwrap());
        for work in queued {
            self.execute(work, false);
        }
    }

    /// Drops queued work without running it or resolving the presents.
    pub(crate) fn abandon_pending(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn execute(&self, work: Work, fail: bool) {
        let (result, completer) = match work {
            Work::Keys {
                mutex,
                acquire,
                release,
                completer,
            } => {
                let result = mutex
                    .acquire(acquire, AcquireTimeout::Infinite)
                    .and_then(|()| mutex.release(release));
                (result, completer)
            }
            Work::Callbacks { sync, completer } => {
                let result = (sync.acquire)().and_then(|()| (sync.release)());
                (result, completer)
            }
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(()) if fail => completer.fail(HandoffError::PresentFailed(
                "simulated compositor failure".to_string(),
            )),
            other => completer.resolve(other),
        }
    }

    fn submit(&self, build: impl FnOnce(PresentCompleter) -> Work) -> PendingPresent {
        let (completer, pending) = PendingPresent::channel();
        let work = build(completer);
        match self.mode {
            CompositorMode::Immediate => self.execute(work, false),
            CompositorMode::Failing => self.execute(work, true),
            CompositorMode::Deferred => self.queue.lock().unwrap().push(work),
        }
        pending
    }
}

impl CompositionInterop for MockCompositor {
    type ImportedImage = MockImported;

    fn supported_image_handle_types(&self) -> Vec<ExternalImageHandleType> {
        self.supported.clone()
    }

    fn import_image(
        &self,
        handle: PlatformHandle,
        properties: &ExternalImageProperties,
    ) -> HandoffResult<MockImported> {
        if self.fail_imports.load(Ordering::SeqCst) {
            return Err(HandoffError::ImportFailed(format!(
                "{} is not importable",
                handle.kind().as_str()
            )));
        }
        if !self.supported.contains(&handle.kind()) {
            return Err(HandoffError::ImportFailed(format!(
                "{} is not advertised",
                handle.kind().as_str()
            )));
        }
        let id = self.imports.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(MockImported {
            id,
            handle,
            properties: *properties,
        })
    }
}

impl DrawingSurface<MockImported> for MockCompositor {
    fn update_with_keyed_mutex(
        &self,
        image: &MockImported,
        acquire_key: MutexKey,
        release_key: MutexKey,
    ) -> HandoffResult<PendingPresent> {
        self.calls.lock().unwrap().push(UpdateCall::KeyPair {
            image: image.id,
            acquire: acquire_key,
            release: release_key,
        });
        let mutex = self
            .registry
            .lock()
            .unwrap()
            .get(&image.handle.raw())
            .cloned()
            .ok_or_else(|| {
                HandoffError::PresentFailed(format!("unknown shared handle {:?}", image.handle))
            })?;
        Ok(self.submit(|completer| Work::Keys {
            mutex,
            acquire: acquire_key,
            release: release_key,
            completer,
        }))
    }

    fn update_with_external_keyed_mutex(
        &self,
        image: &MockImported,
        sync: ExternalMutexSync,
    ) -> HandoffResult<PendingPresent> {
        self.calls
            .lock()
            .unwrap()
            .push(UpdateCall::Callbacks { image: image.id });
        Ok(self.submit(|completer| Work::Callbacks { sync, completer }))
    }
}
