//! Render targets, resize notifications, and scale computation.
//!
//! A [`Viewport`] is where a session's [`Surface`] is shown. Besides
//! holding the surface it reports its measured size and hands out
//! [`ResizeSubscription`]s: explicit handles, each owned by exactly one
//! session and released exactly once.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::display::{DisplaySize, Surface};

// ── Scale ────────────────────────────────────────────────────────

/// Measured client size of a viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Largest scale at which the whole display fits the viewport with its
/// aspect ratio preserved: `min(vw / lw, vh / lh)`.
///
/// Returns `None` while the display size is unknown (either dimension
/// zero); callers skip the rescale rather than apply `NaN`/`inf`.
pub fn compute_scale(viewport: ViewportSize, display: DisplaySize) -> Option<f64> {
    if !display.is_known() {
        return None;
    }
    let horizontal = f64::from(viewport.width) / f64::from(display.width);
    let vertical = f64::from(viewport.height) / f64::from(display.height);
    Some(horizontal.min(vertical))
}

// ── Viewport ─────────────────────────────────────────────────────

/// Render-target capability of a UI container.
pub trait Viewport: Send + Sync {
    /// Show `surface` in the container, after whatever is already there.
    fn attach(&self, surface: Surface);

    /// Remove everything from the container.
    fn detach(&self);

    /// Current measured client size.
    fn client_size(&self) -> ViewportSize;

    /// Register for size-change notifications.
    fn subscribe_resize(&self) -> ResizeSubscription;
}

// ── ResizeHub ────────────────────────────────────────────────────

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<u64, watch::Sender<ViewportSize>>,
}

/// Fan-out point for resize notifications of one window/container.
///
/// Each listener receives only the latest size, so bursts of
/// notifications coalesce naturally.
#[derive(Clone, Default)]
pub struct ResizeHub {
    inner: Arc<Mutex<HubInner>>,
}

impl ResizeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, seeded with `current`.
    pub fn subscribe(&self, current: ViewportSize) -> ResizeSubscription {
        let (tx, rx) = watch::channel(current);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, tx);
        ResizeSubscription {
            id,
            hub: Arc::downgrade(&self.inner),
            sizes: rx,
            released: false,
        }
    }

    /// Deliver a new size to every listener.
    pub fn notify(&self, size: ViewportSize) {
        for tx in self.inner.lock().listeners.values() {
            tx.send_replace(size);
        }
    }

    /// Registered listeners. Non-zero after every session is stopped
    /// means a leak.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle for one resize registration.
///
/// [`release`](Self::release) deregisters it; dropping it does the same
/// if that has not happened yet.
pub struct ResizeSubscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
    sizes: watch::Receiver<ViewportSize>,
    released: bool,
}

impl ResizeSubscription {
    /// Wait for the next size change. Returns `None` once the hub is gone
    /// or the subscription was released.
    pub async fn changed(&mut self) -> Option<ViewportSize> {
        if self.released {
            return None;
        }
        self.sizes.changed().await.ok()?;
        Some(*self.sizes.borrow_and_update())
    }

    /// Most recent size, marking it seen.
    pub fn latest(&mut self) -> ViewportSize {
        *self.sizes.borrow_and_update()
    }

    pub fn release(mut self) {
        self.deregister();
    }

    fn deregister(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().listeners.remove(&self.id);
        }
    }
}

impl Drop for ResizeSubscription {
    fn drop(&mut self) {
        self.deregister();
    }
}

// ── MemoryViewport ───────────────────────────────────────────────

#[derive(Default)]
struct Attached {
    surfaces: Vec<Surface>,
    max_simultaneous: usize,
    attach_calls: usize,
}

/// Headless viewport: keeps attached surfaces in memory and lets the
/// owner drive resizes.
pub struct MemoryViewport {
    size: Mutex<ViewportSize>,
    attached: Mutex<Attached>,
    hub: ResizeHub,
}

impl MemoryViewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new(ViewportSize::new(width, height)),
            attached: Mutex::new(Attached::default()),
            hub: ResizeHub::new(),
        }
    }

    /// Change the measured size and notify listeners.
    pub fn resize(&self, width: u32, height: u32) {
        let size = ViewportSize::new(width, height);
        *self.size.lock() = size;
        self.hub.notify(size);
    }

    pub fn hub(&self) -> &ResizeHub {
        &self.hub
    }

    /// Surfaces currently shown.
    pub fn attached(&self) -> Vec<Surface> {
        self.attached.lock().surfaces.clone()
    }

    /// Highest number of surfaces ever shown at the same time.
    pub fn max_simultaneous(&self) -> usize {
        self.attached.lock().max_simultaneous
    }

    pub fn attach_calls(&self) -> usize {
        self.attached.lock().attach_calls
    }
}

impl Viewport for MemoryViewport {
    fn attach(&self, surface: Surface) {
        let mut attached = self.attached.lock();
        attached.surfaces.push(surface);
        attached.attach_calls += 1;
        attached.max_simultaneous = attached.max_simultaneous.max(attached.surfaces.len());
    }

    fn detach(&self) {
        self.attached.lock().surfaces.clear();
    }

    fn client_size(&self) -> ViewportSize {
        *self.size.lock()
    }

    fn subscribe_resize(&self) -> ResizeSubscription {
        self.hub.subscribe(self.client_size())
    }
}
