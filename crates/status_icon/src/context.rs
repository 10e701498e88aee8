//! Process wide state shared by every status icon of one application.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::sync::broadcast;

use crate::{
    bus::{NameRequest, SessionBusRef},
    error::{Error, Result},
    names,
    tray::{self, TrayFactoryRef},
    types::StatusIconState,
};

/// Consecutive failures to own the native bus name before that tier is given up.
pub const MAX_NAME_FAILS: u32 = 3;
/// How long discovery waits for `ListNames`.
pub const LIST_NAMES_TIMEOUT: Duration = Duration::from_millis(3000);

/// Events about the process wide native name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NativeEvent {
    NameLost(String),
}

/// Outcome of asking for the native owner name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameStatus {
    AlreadyOwned,
    Acquired,
    Unavailable,
}

/// The shared object manager and the bus name that goes with it.
#[derive(Debug, Default)]
struct Exporter {
    users: usize,
    owned_name: Option<String>,
    lost_watch: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Debug)]
struct ContextInner {
    bus: SessionBusRef,
    tray_factory: TrayFactoryRef,
    allow_sni: bool,
    list_names_timeout: Duration,
    program_name: String,
    state: Mutex<StatusIconState>,
    exporter: tokio::sync::Mutex<Exporter>,
    native_events: broadcast::Sender<NativeEvent>,
    next_native_index: AtomicU32,
    next_sni_index: AtomicU32,
    native_successes: AtomicU32,
}

/// Everything the icons of one process share: the bus, the process state, the object manager
/// exporting native icons and the owned bus name.
///
/// Cheap to clone. Pass it to [`crate::StatusIcon::new`] for every icon.
#[derive(Debug, Clone)]
pub struct StatusIconContext {
    inner: Arc<ContextInner>,
}

pub struct ContextBuilder {
    bus: SessionBusRef,
    tray_factory: Option<TrayFactoryRef>,
    allow_sni: bool,
    list_names_timeout: Duration,
    program_name: Option<String>,
}

impl ContextBuilder {
    pub fn tray_factory(mut self, factory: TrayFactoryRef) -> Self {
        self.tray_factory = Some(factory);
        self
    }

    /// Whether icons may use the StatusNotifierItem tier.
    pub fn allow_sni(mut self, allow: bool) -> Self {
        self.allow_sni = allow;
        self
    }

    pub fn list_names_timeout(mut self, timeout: Duration) -> Self {
        self.list_names_timeout = timeout;
        self
    }

    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = Some(name.into());
        self
    }

    pub fn build(self) -> StatusIconContext {
        let (native_events, _) = broadcast::channel(16);
        StatusIconContext {
            inner: Arc::new(ContextInner {
                bus: self.bus,
                tray_factory: self.tray_factory.unwrap_or_else(tray::default_factory),
                allow_sni: self.allow_sni,
                list_names_timeout: self.list_names_timeout,
                program_name: self.program_name.unwrap_or_else(names::program_name),
                state: Mutex::new(StatusIconState::NoSupport),
                exporter: tokio::sync::Mutex::new(Exporter::default()),
                native_events,
                next_native_index: AtomicU32::new(0),
                next_sni_index: AtomicU32::new(0),
                native_successes: AtomicU32::new(0),
            }),
        }
    }
}

impl StatusIconContext {
    pub fn builder(bus: SessionBusRef) -> ContextBuilder {
        ContextBuilder {
            bus,
            tray_factory: None,
            allow_sni: true,
            list_names_timeout: LIST_NAMES_TIMEOUT,
            program_name: None,
        }
    }

    pub fn new(bus: SessionBusRef) -> Self {
        StatusIconContext::builder(bus).build()
    }

    /// A context on the session bus.
    pub async fn session() -> Result<Self> {
        let bus = crate::bus::DbusSession::new().await?;
        Ok(StatusIconContext::new(Arc::new(bus)))
    }

    pub fn bus(&self) -> &SessionBusRef {
        &self.inner.bus
    }

    pub fn state(&self) -> StatusIconState {
        *self.inner.state.lock().unwrap() // unwrap: mutex poisoning is okay
    }

    pub(crate) fn set_state(&self, state: StatusIconState) {
        let mut current = self.inner.state.lock().unwrap(); // unwrap: mutex poisoning is okay
        if *current != state {
            log::debug!("process icon state is now {}", state);
            *current = state;
        }
    }

    pub fn allow_sni(&self) -> bool {
        self.inner.allow_sni
    }

    pub fn program_name(&self) -> &str {
        &self.inner.program_name
    }

    pub(crate) fn tray_factory(&self) -> &TrayFactoryRef {
        &self.inner.tray_factory
    }

    pub(crate) fn list_names_timeout(&self) -> Duration {
        self.inner.list_names_timeout
    }

    pub(crate) fn next_native_path(&self) -> String {
        names::native_icon_path(self.inner.next_native_index.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_sni_index(&self) -> u32 {
        self.inner.next_sni_index.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn subscribe_native(&self) -> broadcast::Receiver<NativeEvent> {
        self.inner.native_events.subscribe()
    }

    pub(crate) fn record_native_success(&self) {
        self.inner.native_successes.fetch_add(1, Ordering::Relaxed);
    }

    /// How many times an icon of this process went live on the native protocol.
    pub fn native_successes(&self) -> u32 {
        self.inner.native_successes.load(Ordering::Relaxed)
    }

    /// Whether any panel applet consuming native icons is on the bus.
    pub async fn any_monitors(&self) -> Result<bool> {
        let names = tokio::time::timeout(self.inner.list_names_timeout, self.inner.bus.list_names())
            .await
            .map_err(|_| Error::Timeout("ListNames"))??;
        Ok(names.iter().any(|name| names::in_namespace(name, names::MONITOR_NAME_PREFIX)))
    }

    /// Take a reference on the shared object manager, exporting it for the first user.
    pub(crate) async fn acquire_exporter(&self) -> Result<()> {
        let mut exporter = self.inner.exporter.lock().await;
        if exporter.users == 0 {
            log::debug!("exporting object manager at {}", names::ICON_BASE_PATH);
            self.inner.bus.export_object_manager().await?;
        }
        exporter.users += 1;
        Ok(())
    }

    /// Drop a reference on the shared object manager. The last one unexports it and gives up the
    /// owned bus name.
    pub(crate) async fn release_exporter(&self) -> Result<()> {
        let mut exporter = self.inner.exporter.lock().await;
        match exporter.users {
            0 => {
                log::warn!("object manager released more often than acquired");
                return Ok(());
            }
            1 => {}
            _ => {
                exporter.users -= 1;
                return Ok(());
            }
        }
        exporter.users = 0;
        log::debug!("last native icon gone, tearing down the object manager");
        if let Some(task) = exporter.lost_watch.take() {
            task.abort();
        }
        let owned_name = exporter.owned_name.take();
        drop(exporter);

        if let Some(name) = owned_name {
            if let Err(e) = self.inner.bus.release_name(&name).await {
                log::warn!("failed to release {}: {}", name, e);
            }
        }
        self.inner.bus.unexport_object_manager().await
    }

    /// Number of native icons holding the object manager.
    pub fn exporter_users(&self) -> usize {
        self.inner.exporter.try_lock().map(|exporter| exporter.users).unwrap_or_default()
    }

    pub async fn owned_name(&self) -> Option<String> {
        self.inner.exporter.lock().await.owned_name.clone()
    }

    /// Own `name` for the process unless some name is already owned.
    pub(crate) async fn own_name(&self, name: &str) -> Result<NameStatus> {
        let mut exporter = self.inner.exporter.lock().await;
        if exporter.owned_name.is_some() {
            return Ok(NameStatus::AlreadyOwned);
        }
        log::debug!("attempting to own name on bus '{}'", name);
        match self.inner.bus.request_name(name).await? {
            NameRequest::Unavailable => Ok(NameStatus::Unavailable),
            NameRequest::Acquired => {
                exporter.owned_name = Some(name.to_owned());
                if exporter.lost_watch.is_none() {
                    exporter.lost_watch = Some(self.spawn_lost_watch().await?);
                }
                Ok(NameStatus::Acquired)
            }
        }
    }

    async fn spawn_lost_watch(&self) -> Result<tokio::task::JoinHandle<()>> {
        let mut lost = self.inner.bus.watch_name_lost().await?;
        let weak = Arc::downgrade(&self.inner);
        Ok(tokio::spawn(async move {
            while let Some(name) = lost.next().await {
                let Some(inner) = weak.upgrade() else { break };
                let mut exporter = inner.exporter.lock().await;
                if exporter.owned_name.as_deref() == Some(name.as_str()) {
                    log::warn!("lost presence on the bus as {}, refreshing icons", name);
                    exporter.owned_name = None;
                    drop(exporter);
                    let _ = inner.native_events.send(NativeEvent::NameLost(name));
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, FakeHub};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn object_manager_lives_as_long_as_its_users() {
        let hub = FakeHub::new();
        let (ctx, bus, _tray) = testing::context(&hub);

        ctx.acquire_exporter().await.unwrap();
        ctx.acquire_exporter().await.unwrap();
        assert_eq!(ctx.own_name("org.x.StatusIcon.test_app").await.unwrap(), NameStatus::Acquired);
        assert_eq!(ctx.own_name("org.x.StatusIcon.other").await.unwrap(), NameStatus::AlreadyOwned);
        assert_eq!(ctx.exporter_users(), 2);

        ctx.release_exporter().await.unwrap();
        assert!(hub.has_object_manager(bus.unique()));
        assert_eq!(ctx.owned_name().await.as_deref(), Some("org.x.StatusIcon.test_app"));

        ctx.release_exporter().await.unwrap();
        assert!(!hub.has_object_manager(bus.unique()));
        assert_eq!(ctx.owned_name().await, None);
        assert_eq!(hub.owner_of("org.x.StatusIcon.test_app"), None);

        // extra releases are harmless
        ctx.release_exporter().await.unwrap();
        assert_eq!(ctx.exporter_users(), 0);
    }

    #[tokio::test]
    async fn taken_names_are_unavailable() {
        let hub = FakeHub::new();
        hub.add_name("org.x.StatusIcon.test_app");
        let (ctx, _bus, _tray) = testing::context(&hub);
        assert_eq!(ctx.own_name("org.x.StatusIcon.test_app").await.unwrap(), NameStatus::Unavailable);
        assert_eq!(ctx.owned_name().await, None);
    }

    #[tokio::test]
    async fn monitors_are_found_by_namespace() {
        let hub = FakeHub::new();
        let (ctx, _bus, _tray) = testing::context(&hub);
        assert!(!ctx.any_monitors().await.unwrap());
        hub.add_name("org.x.StatusIconMonitorish");
        assert!(!ctx.any_monitors().await.unwrap());
        hub.add_name("org.x.StatusIconMonitor.PID-1-0");
        assert!(ctx.any_monitors().await.unwrap());
    }
}
