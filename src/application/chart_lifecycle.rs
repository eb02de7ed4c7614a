//! Chart-library instance lifecycle: mount with a bounded wait for layout,
//! resize without recreation, full and incremental series pushes, and a
//! teardown that releases everything acquired.

use crate::config::ChartConfig;
use crate::domain::chart::{
    ChartBackend, ChartContainer, ChartInstance, ListenerHandle, SeriesSnapshot, SeriesUpdate,
    TailUpdate,
};
use crate::domain::errors::{AppError, ChartResult};
use crate::domain::logging::LogComponent;
use crate::time_utils::{Scheduler, TimerHandle};
use crate::{log_debug, log_error, log_info, log_warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const COMPONENT: LogComponent = LogComponent::Application("ChartLifecycle");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPhase {
    Unmounted,
    /// Container had no width yet; `attempt` checks made so far.
    WaitingForLayout { attempt: u32 },
    Mounted,
    /// Layout never arrived or the library failed to initialize.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountSettings {
    pub retry_ms: u32,
    pub max_attempts: u32,
    /// Used when the container reports zero height.
    pub fallback_height: u32,
}

impl From<&ChartConfig> for MountSettings {
    fn from(config: &ChartConfig) -> Self {
        Self {
            retry_ms: config.mount_retry_ms,
            max_attempts: config.mount_attempts.max(1),
            fallback_height: config.height,
        }
    }
}

/// Removes the instance unless disarmed; covers every early return in mount.
struct InstanceGuard(Option<Box<dyn ChartInstance>>);

impl InstanceGuard {
    fn disarm(mut self) -> Option<Box<dyn ChartInstance>> {
        self.0.take()
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Some(mut instance) = self.0.take() {
            log_debug!(COMPONENT, "releasing half-mounted chart instance");
            instance.remove();
        }
    }
}

struct ControllerState {
    phase: MountPhase,
    settings: MountSettings,
    backend: Rc<dyn ChartBackend>,
    scheduler: Rc<dyn Scheduler>,
    container: Option<Rc<dyn ChartContainer>>,
    instance: Option<Box<dyn ChartInstance>>,
    resize_listener: Option<ListenerHandle>,
    retry_timer: Option<TimerHandle>,
    last_error: Option<AppError>,
    width: u32,
}

impl ControllerState {
    fn release(&mut self) {
        self.retry_timer = None;
        if let Some(listener) = self.resize_listener.take() {
            listener.remove();
        }
        if let Some(mut instance) = self.instance.take() {
            instance.remove();
        }
    }

    fn active_handles(&self) -> usize {
        usize::from(self.instance.is_some())
            + usize::from(self.resize_listener.is_some())
            + usize::from(self.retry_timer.is_some())
    }

    fn mounted_instance(&mut self) -> ChartResult<&mut Box<dyn ChartInstance>> {
        match (self.phase, self.instance.as_mut()) {
            (MountPhase::Mounted, Some(instance)) => Ok(instance),
            _ => Err(AppError::ChartError(format!("chart is not mounted ({:?})", self.phase))),
        }
    }
}

type ReadyCallback = Rc<dyn Fn()>;

struct ControllerInner {
    state: RefCell<ControllerState>,
    ready: RefCell<Vec<(u64, ReadyCallback)>>,
    next_ready_id: Cell<u64>,
}

/// Owns one chart-library instance for one container.
#[derive(Clone)]
pub struct ChartLifecycleController {
    inner: Rc<ControllerInner>,
}

impl ChartLifecycleController {
    pub fn new(
        backend: Rc<dyn ChartBackend>,
        scheduler: Rc<dyn Scheduler>,
        settings: MountSettings,
    ) -> Self {
        Self {
            inner: Rc::new(ControllerInner {
                state: RefCell::new(ControllerState {
                    phase: MountPhase::Unmounted,
                    settings,
                    backend,
                    scheduler,
                    container: None,
                    instance: None,
                    resize_listener: None,
                    retry_timer: None,
                    last_error: None,
                    width: 0,
                }),
                ready: RefCell::new(Vec::new()),
                next_ready_id: Cell::new(0),
            }),
        }
    }

    /// Called after every successful mount, e.g. to push the current series,
    /// for as long as the returned registration is alive.
    pub fn on_ready(&self, callback: impl Fn() + 'static) -> ReadyRegistration {
        let id = self.inner.next_ready_id.get();
        self.inner.next_ready_id.set(id + 1);
        self.inner.ready.borrow_mut().push((id, Rc::new(callback)));
        ReadyRegistration { inner: Rc::downgrade(&self.inner), id }
    }

    pub fn ready_callback_count(&self) -> usize {
        self.inner.ready.borrow().len()
    }

    /// Create the chart sized to `container`. A container without width is
    /// re-checked on a timer up to the configured number of attempts.
    pub fn mount(&self, container: Rc<dyn ChartContainer>) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.release();
            state.container = Some(container);
            state.last_error = None;
            state.phase = MountPhase::WaitingForLayout { attempt: 0 };
        }
        try_mount(&self.inner);
    }

    /// Push full replacement data to every series.
    pub fn set_series(&self, snapshot: &SeriesSnapshot) -> ChartResult<()> {
        let mut state = self.inner.state.borrow_mut();
        let instance = state.mounted_instance()?;
        instance.set_candles(&snapshot.candles)?;
        instance.set_volumes(&snapshot.volumes)?;
        for series in &snapshot.derived {
            instance.set_line(series)?;
        }
        Ok(())
    }

    /// Push the newest candle, volume bar and derived points.
    pub fn apply_tail(&self, update: &TailUpdate) -> ChartResult<()> {
        let mut state = self.inner.state.borrow_mut();
        let instance = state.mounted_instance()?;
        instance.update_candle(&update.candle)?;
        instance.update_volume(&update.volume)?;
        for (window, point) in &update.derived {
            instance.update_line(*window, point)?;
        }
        Ok(())
    }

    /// Re-apply width on the live instance.
    pub fn resize(&self, width: u32) {
        resize(&self.inner, width);
    }

    /// Release listener, timer and instance. Idempotent.
    pub fn unmount(&self) {
        let mut state = self.inner.state.borrow_mut();
        if state.phase != MountPhase::Unmounted || state.active_handles() > 0 {
            log_info!(COMPONENT, "🧹 Unmounting chart");
        }
        state.release();
        state.container = None;
        state.phase = MountPhase::Unmounted;
    }

    pub fn phase(&self) -> MountPhase {
        self.inner.state.borrow().phase
    }

    pub fn is_mounted(&self) -> bool {
        self.phase() == MountPhase::Mounted
    }

    pub fn width(&self) -> u32 {
        self.inner.state.borrow().width
    }

    pub fn last_error(&self) -> Option<AppError> {
        self.inner.state.borrow().last_error.clone()
    }

    /// Timers, listeners and instances currently held.
    pub fn active_handles(&self) -> usize {
        self.inner.state.borrow().active_handles()
    }
}

impl std::fmt::Debug for ChartLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartLifecycleController").field("phase", &self.phase()).finish()
    }
}

fn resize(inner: &Rc<ControllerInner>, width: u32) {
    let mut state = inner.state.borrow_mut();
    if width == 0 || width == state.width {
        return;
    }
    if let Ok(instance) = state.mounted_instance() {
        instance.apply_width(width);
        state.width = width;
        log_debug!(COMPONENT, "resized to {}px", width);
    }
}

fn try_mount(inner: &Rc<ControllerInner>) {
    let mounted = {
        let mut state = inner.state.borrow_mut();
        let MountPhase::WaitingForLayout { attempt } = state.phase else {
            return;
        };
        state.retry_timer = None;
        let Some(container) = state.container.clone() else {
            return;
        };
        let width = container.width();
        if width == 0 {
            let attempt = attempt + 1;
            if attempt >= state.settings.max_attempts {
                log_warn!(COMPONENT, "⚠️ Container still has no width after {} checks", attempt);
                state.last_error = Some(AppError::ChartError(
                    "container never received a width".to_string(),
                ));
                state.phase = MountPhase::GaveUp;
                return;
            }
            log_debug!(COMPONENT, "container not laid out yet, retry {}", attempt);
            state.phase = MountPhase::WaitingForLayout { attempt };
            let weak: Weak<ControllerInner> = Rc::downgrade(inner);
            let timer = state.scheduler.timeout(
                state.settings.retry_ms,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        try_mount(&inner);
                    }
                }),
            );
            state.retry_timer = Some(timer);
            return;
        }

        match create_instance(inner, &mut state, &*container, width) {
            Ok(()) => true,
            Err(err) => {
                log_error!(COMPONENT, "❌ Chart mount failed: {}", err);
                state.last_error = Some(err);
                state.phase = MountPhase::GaveUp;
                false
            }
        }
    };

    if mounted {
        let callbacks: Vec<ReadyCallback> =
            inner.ready.borrow().iter().map(|(_, callback)| callback.clone()).collect();
        for callback in callbacks {
            callback();
        }
    }
}

fn create_instance(
    inner: &Rc<ControllerInner>,
    state: &mut ControllerState,
    container: &dyn ChartContainer,
    width: u32,
) -> ChartResult<()> {
    let height = match container.height() {
        0 => state.settings.fallback_height,
        height => height,
    };
    let guard = InstanceGuard(Some(state.backend.create(width, height)?));

    let weak = Rc::downgrade(inner);
    let listener = container.observe_resize(Box::new(move |width| {
        if let Some(inner) = weak.upgrade() {
            resize(&inner, width);
        }
    }))?;

    state.instance = guard.disarm();
    state.resize_listener = Some(listener);
    state.width = width;
    state.phase = MountPhase::Mounted;
    log_info!(COMPONENT, "📊 Chart mounted at {}x{}", width, height);
    Ok(())
}

/// Keeps a ready callback registered; dropping it unregisters the callback.
#[must_use = "dropping the registration removes the callback"]
pub struct ReadyRegistration {
    inner: Weak<ControllerInner>,
    id: u64,
}

impl Drop for ReadyRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ready.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Forwards a view's series updates to a controller, re-sending the full
/// series whenever the chart (re)mounts. Dropping the binding detaches it.
pub struct ChartBinding {
    controller: ChartLifecycleController,
    _ready: ReadyRegistration,
}

impl ChartBinding {
    pub fn new(
        controller: ChartLifecycleController,
        snapshot: impl Fn() -> Option<SeriesSnapshot> + 'static,
    ) -> Self {
        let weak = Rc::downgrade(&controller.inner);
        let ready = controller.on_ready(move || {
            let Some(inner) = weak.upgrade() else { return };
            if let Some(snapshot) = snapshot() {
                let controller = ChartLifecycleController { inner };
                if let Err(err) = controller.set_series(&snapshot) {
                    log_warn!(COMPONENT, "initial series push failed: {}", err);
                }
            }
        });
        Self { controller, _ready: ready }
    }

    pub fn apply(&self, update: &SeriesUpdate) {
        if !self.controller.is_mounted() {
            return;
        }
        let result = match update {
            SeriesUpdate::Replaced(snapshot) => self.controller.set_series(snapshot),
            SeriesUpdate::Tail(tail) => self.controller.apply_tail(tail),
            SeriesUpdate::Failed(_) => self.controller.set_series(&SeriesSnapshot::default()),
            SeriesUpdate::Loading => Ok(()),
        };
        if let Err(err) = result {
            log_warn!(COMPONENT, "series push failed: {}", err);
        }
    }

    pub fn controller(&self) -> &ChartLifecycleController {
        &self.controller
    }
}
