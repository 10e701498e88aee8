//! The `org.kde.StatusNotifierWatcher` service and its lifecycle.

use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use tokio::{sync::watch, time::Instant};
use xapp_shared_util::{paths, settings::Settings};
use xapp_status_icon::{
    bus::{DbusSession, NameOwnerChange, SessionBus},
    names,
};
use zbus::{
    dbus_interface,
    fdo::{RequestNameFlags, RequestNameReply},
    SignalContext,
};

use crate::{
    item::{Bridge, SnItemStarter},
    lifecycle::ExitCause,
    presence::{Presence, PresenceAction},
    registry::{Claim, ItemKey, Registry},
};

/// A registered item, as far as the watcher is concerned.
#[async_trait::async_trait]
pub trait TrackedItem: fmt::Debug + Send {
    /// Stop mirroring the item and wait until the mirror is gone.
    async fn close(self: Box<Self>);
}

/// Sets up newly registered items.
#[async_trait::async_trait]
pub trait ItemStarter: fmt::Debug + Send + Sync {
    async fn start(&self, key: ItemKey) -> zbus::fdo::Result<Box<dyn TrackedItem>>;
}

#[derive(Debug)]
struct Shared {
    registry: Mutex<Registry<Box<dyn TrackedItem>>>,
    host_registered: AtomicBool,
    starter: Box<dyn ItemStarter>,
}

/// An instance of [`org.kde.StatusNotifierWatcher`] that mirrors every registered item as a
/// native status icon.
///
/// Cheap to clone, clones share their state. One clone is served on the bus while the lifecycle
/// loop keeps another.
///
/// [`org.kde.StatusNotifierWatcher`]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierWatcher/
#[derive(Debug, Clone)]
pub struct Watcher {
    shared: Arc<Shared>,
}

#[dbus_interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    /// RegisterStatusNotifierItem method
    async fn register_status_notifier_item(
        &self,
        service: &str,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
        #[zbus(signal_context)] ctxt: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = hdr.sender()?.map(|sender| sender.to_string());
        if self.register(service, sender.as_deref()).await?.is_some() {
            self.registered_status_notifier_items_changed(&ctxt).await?;
            Watcher::status_notifier_item_registered(&ctxt, service).await?;
        }
        Ok(())
    }

    /// RegisterStatusNotifierHost method. Hosts are not tracked.
    fn register_status_notifier_host(&self, service: &str) {
        log::debug!("ignoring host registration of {}", service);
    }

    /// StatusNotifierItemRegistered signal
    #[dbus_interface(signal)]
    async fn status_notifier_item_registered(ctxt: &SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierItemUnregistered signal
    #[dbus_interface(signal)]
    async fn status_notifier_item_unregistered(ctxt: &SignalContext<'_>, service: &str) -> zbus::Result<()>;

    /// StatusNotifierHostRegistered signal
    #[dbus_interface(signal)]
    async fn status_notifier_host_registered(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    /// RegisteredStatusNotifierItems property
    #[dbus_interface(property)]
    fn registered_status_notifier_items(&self) -> Vec<String> {
        self.items()
    }

    /// IsStatusNotifierHostRegistered property
    #[dbus_interface(property)]
    fn is_status_notifier_host_registered(&self) -> bool {
        self.shared.host_registered.load(Ordering::SeqCst)
    }

    /// ProtocolVersion property
    #[dbus_interface(property)]
    fn protocol_version(&self) -> i32 {
        0
    }
}

impl Watcher {
    pub fn new(starter: impl ItemStarter + 'static) -> Self {
        Watcher {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                host_registered: AtomicBool::new(false),
                starter: Box::new(starter),
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry<Box<dyn TrackedItem>>> {
        self.shared.registry.lock().unwrap() // unwrap: mutex poisoning is okay
    }

    /// Keys of the live items.
    pub fn items(&self) -> Vec<String> {
        self.registry().published()
    }

    /// Track the item `service` refers to, as registered by `sender`.
    ///
    /// Returns the key of a newly tracked item, or `None` if the item is already tracked or still
    /// being set up by an earlier registration.
    pub async fn register(&self, service: &str, sender: Option<&str>) -> zbus::fdo::Result<Option<ItemKey>> {
        let key = ItemKey::parse(service, sender).map_err(|e| {
            log::warn!("{}", e);
            e
        })?;

        if self.registry().begin(&key) == Claim::AlreadyTracked {
            log::debug!("new item: {} (duplicate)", key);
            return Ok(None);
        }

        let item = match self.shared.starter.start(key.clone()).await {
            Ok(item) => item,
            Err(e) => {
                self.registry().abort(&key);
                log::warn!("could not set up item {}: {}", key, e);
                return Err(e);
            }
        };

        let completed = self.registry().complete(&key, item);
        if let Err(item) = completed {
            item.close().await;
            return Err(zbus::fdo::Error::Failed(format!("{} went away while it was being registered", key)));
        }
        log::info!("new item: {}", key);
        Ok(Some(key))
    }

    /// Forget every item exported by `bus_name`, returning the keys of the live ones.
    pub async fn forget_bus(&self, bus_name: &str) -> Vec<ItemKey> {
        let removed = self.registry().remove_bus(bus_name);
        let mut keys = Vec::with_capacity(removed.len());
        for (key, item) in removed {
            log::info!("gone item: {}", key);
            item.close().await;
            keys.push(key);
        }
        keys
    }

    /// Set `IsStatusNotifierHostRegistered`, announcing a host when it becomes true.
    async fn set_host_registered(&self, ctxt: &SignalContext<'_>, registered: bool) -> zbus::Result<()> {
        self.shared.host_registered.store(registered, Ordering::SeqCst);
        self.is_status_notifier_host_registered_changed(ctxt).await?;
        if registered {
            Watcher::status_notifier_host_registered(ctxt).await?;
        }
        Ok(())
    }

    /// [`Watcher::forget_bus`], announced on the bus.
    async fn remove_bus(&self, ctxt: &SignalContext<'_>, bus_name: &str) -> zbus::Result<()> {
        let removed = self.forget_bus(bus_name).await;
        if removed.is_empty() {
            return Ok(());
        }
        for key in removed {
            Watcher::status_notifier_item_unregistered(ctxt, &key.to_string()).await?;
        }
        self.registered_status_notifier_items_changed(ctxt).await
    }

    async fn clear(&self) {
        let items = self.registry().clear();
        futures::future::join_all(items.into_iter().map(|item| item.close())).await;
    }
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// Take the watcher name from a running instance.
    pub replace: bool,
    /// How long to keep running once the last consumer left.
    pub inactivity_timeout: Duration,
}

/// Consumer presence and the inactivity deadline that follows from it.
#[derive(Debug)]
struct Lifetime {
    presence: Presence,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Lifetime {
    fn new(bus_names: Vec<String>, timeout: Duration) -> (Self, PresenceAction) {
        let (presence, action) = Presence::new(bus_names);
        let mut lifetime = Lifetime { presence, timeout, deadline: None };
        lifetime.track(action);
        (lifetime, action)
    }

    /// Feed an owner change. Names outside the consumer namespace give `None`.
    fn owner_changed(&mut self, change: &NameOwnerChange) -> Option<PresenceAction> {
        if !names::in_namespace(&change.name, names::MONITOR_NAME_PREFIX) {
            return None;
        }
        let action = if change.appeared() {
            self.presence.monitor_appeared(&change.name)
        } else {
            self.presence.monitor_vanished(&change.name)
        };
        self.track(action);
        Some(action)
    }

    fn track(&mut self, action: PresenceAction) {
        match action {
            PresenceAction::Nothing => {}
            PresenceAction::StartCountdown => {
                log::debug!("no consumers left, exiting in {:?} unless one appears", self.timeout);
                self.deadline = Some(Instant::now() + self.timeout);
            }
            PresenceAction::ContinueStartup | PresenceAction::CancelCountdown => self.deadline = None,
        }
    }
}

/// Resolves at `deadline`, or never.
async fn countdown(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// What the lifecycle loop drives.
#[async_trait::async_trait]
trait Lifecycle: Send {
    async fn owner_changed(&mut self, change: NameOwnerChange) -> Result<()>;

    /// When the inactivity countdown runs out, if it is armed.
    fn deadline(&self) -> Option<Instant>;
}

/// Handle owner changes until the watcher name is lost, the countdown runs out or an exit is
/// requested.
async fn serve(
    service: &mut impl Lifecycle,
    mut owner_changes: impl Stream<Item = NameOwnerChange> + Unpin,
    mut name_lost: impl Stream<Item = String> + Unpin,
) -> ExitCause {
    crate::loop_select_exiting! {
        Some(change) = owner_changes.next() => {
            if let Err(e) = service.owner_changed(change).await {
                log::error!("{:?}", e);
                break ExitCause::Failed;
            }
        }
        Some(name) = name_lost.next() => {
            if name == names::WATCHER_BUS {
                break ExitCause::NameLost;
            }
        }
        _ = countdown(service.deadline()) => {
            break ExitCause::Inactive;
        }
    }
}

struct Service {
    session: DbusSession,
    watcher: Watcher,
    settings: watch::Receiver<Settings>,
    icon_dir: PathBuf,
    replace: bool,
    lifetime: Lifetime,
    exported: bool,
}

impl Service {
    fn con(&self) -> &zbus::Connection {
        self.session.connection()
    }

    fn signal_context(&self) -> zbus::Result<SignalContext<'static>> {
        SignalContext::new(self.con(), names::WATCHER_OBJECT)
    }

    fn advertise_host(&self) -> bool {
        self.settings.borrow().sn_watcher_advertise_host
    }

    /// Export the watcher object and claim its name.
    async fn continue_startup(&mut self) -> Result<()> {
        if !self.con().object_server().at(names::WATCHER_OBJECT, self.watcher.clone()).await? {
            anyhow::bail!("Object already exists at {} on this connection", names::WATCHER_OBJECT);
        }
        self.exported = true;

        let mut flags = RequestNameFlags::AllowReplacement | RequestNameFlags::DoNotQueue;
        if self.replace {
            flags |= RequestNameFlags::ReplaceExisting;
        }
        match self.con().request_name_with_flags(names::WATCHER_BUS, flags).await {
            Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {}
            Ok(_) | Err(zbus::Error::NameTaken) => anyhow::bail!("{} is owned by another process", names::WATCHER_BUS),
            Err(e) => return Err(e).context("Failed to request the watcher name"),
        }
        log::info!("acquired {}", names::WATCHER_BUS);

        let ctxt = self.signal_context()?;
        self.watcher.set_host_registered(&ctxt, self.advertise_host()).await?;
        Ok(())
    }

    async fn apply(&mut self, action: PresenceAction) -> Result<()> {
        match action {
            PresenceAction::Nothing => {}
            PresenceAction::ContinueStartup => self.continue_startup().await?,
            PresenceAction::StartCountdown => {
                if self.exported {
                    let ctxt = self.signal_context()?;
                    self.watcher.set_host_registered(&ctxt, false).await?;
                }
            }
            PresenceAction::CancelCountdown => {
                log::debug!("consumer appeared, cancelling shutdown");
                let ctxt = self.signal_context()?;
                self.watcher.set_host_registered(&ctxt, self.advertise_host()).await?;
            }
        }
        Ok(())
    }

    async fn shutdown(self) -> Result<()> {
        log::info!("shutting down");
        self.watcher.clear().await;
        if self.exported {
            let ctxt = self.signal_context()?;
            if let Err(e) = self.watcher.set_host_registered(&ctxt, false).await {
                log::debug!("could not announce shutdown: {}", e);
            }
            if let Err(e) = self.con().release_name(names::WATCHER_BUS).await {
                log::debug!("could not release {}: {}", names::WATCHER_BUS, e);
            }
            self.con().object_server().remove::<Watcher, _>(names::WATCHER_OBJECT).await?;
        }
        let removed = paths::remove_stale_icons(&self.icon_dir);
        log::debug!("removed {} temporary icons", removed);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Lifecycle for Service {
    async fn owner_changed(&mut self, change: NameOwnerChange) -> Result<()> {
        if let Some(action) = self.lifetime.owner_changed(&change) {
            return self.apply(action).await;
        }
        if change.vanished() && self.exported {
            let ctxt = self.signal_context()?;
            self.watcher.remove_bus(&ctxt, &change.name).await?;
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Instant> {
        self.lifetime.deadline
    }
}

/// Serve the watcher until the last consumer has been gone for the inactivity timeout, the
/// watcher name is lost or an exit is requested.
pub async fn run(session: DbusSession, bridge: Bridge, options: WatcherOptions) -> Result<ExitCause> {
    let owner_changes = session.watch_name_owners("").await?;
    let name_lost = session.watch_name_lost().await?;
    let (lifetime, action) = Lifetime::new(session.list_names().await?, options.inactivity_timeout);

    let mut service = Service {
        settings: bridge.settings.clone(),
        icon_dir: bridge.icon_dir.clone(),
        watcher: Watcher::new(SnItemStarter::new(bridge, session.connection().clone())),
        session,
        replace: options.replace,
        lifetime,
        exported: false,
    };
    if let Err(e) = service.apply(action).await {
        service.shutdown().await?;
        return Err(e);
    }

    let cause = serve(&mut service, owner_changes, name_lost).await;
    service.shutdown().await?;
    Ok(cause)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::channel::mpsc;
    use pretty_assertions::assert_eq;
    use tokio::sync::Semaphore;

    use super::*;

    const MONITOR: &str = "org.x.StatusIconMonitor.cinnamon_0";

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..2000 {
            if condition() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        condition()
    }

    fn key(bus_name: &str, path: &str) -> ItemKey {
        ItemKey { bus_name: bus_name.to_owned(), path: path.to_owned() }
    }

    #[derive(Debug)]
    struct FakeItem {
        key: ItemKey,
        closed: Arc<Mutex<Vec<ItemKey>>>,
    }

    #[async_trait::async_trait]
    impl TrackedItem for FakeItem {
        async fn close(self: Box<Self>) {
            self.closed.lock().unwrap().push(self.key.clone());
        }
    }

    /// Starts items once a permit is available. Bus names in `missing` are not on the bus.
    #[derive(Debug, Clone)]
    struct FakeStarter {
        permits: Arc<Semaphore>,
        starts: Arc<AtomicUsize>,
        closed: Arc<Mutex<Vec<ItemKey>>>,
        missing: Vec<String>,
    }

    impl FakeStarter {
        fn new(permits: usize) -> Self {
            FakeStarter {
                permits: Arc::new(Semaphore::new(permits)),
                starts: Arc::default(),
                closed: Arc::default(),
                missing: Vec::new(),
            }
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn closed(&self) -> Vec<ItemKey> {
            self.closed.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ItemStarter for FakeStarter {
        async fn start(&self, key: ItemKey) -> zbus::fdo::Result<Box<dyn TrackedItem>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.missing.contains(&key.bus_name) {
                return Err(zbus::fdo::Error::ServiceUnknown(format!("{} is not on the bus", key.bus_name)));
            }
            self.permits.acquire().await.map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?.forget();
            Ok(Box::new(FakeItem { key, closed: self.closed.clone() }))
        }
    }

    #[tokio::test]
    async fn registering_twice_while_pending_tracks_one_item() {
        let starter = FakeStarter::new(0);
        let watcher = Watcher::new(starter.clone());
        let first = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.register("/StatusNotifierItem", Some(":1.23")).await }
        });
        assert!(eventually(|| starter.starts() == 1).await);

        assert_eq!(watcher.register("/StatusNotifierItem", Some(":1.23")).await.unwrap(), None);
        assert!(watcher.items().is_empty());

        starter.permits.add_permits(1);
        assert_eq!(first.await.unwrap().unwrap(), Some(key(":1.23", "/StatusNotifierItem")));
        assert_eq!(watcher.items(), vec![":1.23/StatusNotifierItem".to_owned()]);

        // the bus name form names the same item
        assert_eq!(watcher.register(":1.23", Some(":1.23")).await.unwrap(), None);
        assert_eq!(starter.starts(), 1);
    }

    #[tokio::test]
    async fn items_leave_with_their_bus_name() {
        let starter = FakeStarter::new(10);
        let watcher = Watcher::new(starter.clone());
        watcher.register("/StatusNotifierItem", Some(":1.23")).await.unwrap();
        watcher.register("/org/ayatana/NotificationItem/nm", Some(":1.23")).await.unwrap();
        watcher.register("/StatusNotifierItem", Some(":1.230")).await.unwrap();

        let removed = watcher.forget_bus(":1.23").await;
        assert_eq!(
            removed,
            vec![key(":1.23", "/StatusNotifierItem"), key(":1.23", "/org/ayatana/NotificationItem/nm")]
        );
        assert_eq!(starter.closed(), removed);
        assert_eq!(watcher.items(), vec![":1.230/StatusNotifierItem".to_owned()]);
        assert!(watcher.forget_bus(":1.23").await.is_empty());
    }

    #[tokio::test]
    async fn owner_leaving_mid_registration_fails_it() {
        let starter = FakeStarter::new(0);
        let watcher = Watcher::new(starter.clone());
        let registration = tokio::spawn({
            let watcher = watcher.clone();
            async move { watcher.register("/StatusNotifierItem", Some(":1.7")).await }
        });
        assert!(eventually(|| starter.starts() == 1).await);

        assert!(watcher.forget_bus(":1.7").await.is_empty());
        starter.permits.add_permits(1);
        let result = registration.await.unwrap();
        assert!(matches!(result, Err(zbus::fdo::Error::Failed(_))), "{:?}", result);
        assert_eq!(starter.closed(), vec![key(":1.7", "/StatusNotifierItem")]);
        assert!(watcher.items().is_empty());
    }

    #[tokio::test]
    async fn failed_setup_frees_the_key() {
        let mut starter = FakeStarter::new(10);
        starter.missing.push(":1.8".to_owned());
        let watcher = Watcher::new(starter.clone());

        for _ in 0..2 {
            let result = watcher.register("/StatusNotifierItem", Some(":1.8")).await;
            assert!(matches!(result, Err(zbus::fdo::Error::ServiceUnknown(_))), "{:?}", result);
        }
        assert_eq!(starter.starts(), 2);
        assert!(watcher.items().is_empty());

        let result = watcher.register("not a bus name", Some(":1.8")).await;
        assert!(matches!(result, Err(zbus::fdo::Error::InvalidArgs(_))), "{:?}", result);
        assert_eq!(starter.starts(), 2);
    }

    fn appeared(name: &str) -> NameOwnerChange {
        NameOwnerChange { name: name.to_owned(), old_owner: None, new_owner: Some(":1.50".to_owned()) }
    }

    fn vanished(name: &str) -> NameOwnerChange {
        NameOwnerChange { name: name.to_owned(), old_owner: Some(":1.50".to_owned()), new_owner: None }
    }

    #[test]
    fn countdown_follows_consumers() {
        let timeout = Duration::from_secs(30);
        let (mut lifetime, action) = Lifetime::new(vec![":1.4".to_owned()], timeout);
        assert_eq!(action, PresenceAction::StartCountdown);
        assert!(lifetime.deadline.is_some());

        assert_eq!(lifetime.owner_changed(&appeared(MONITOR)), Some(PresenceAction::ContinueStartup));
        assert_eq!(lifetime.deadline, None);
        assert_eq!(lifetime.owner_changed(&vanished(":1.9")), None);
        assert_eq!(lifetime.owner_changed(&vanished(MONITOR)), Some(PresenceAction::StartCountdown));
        assert!(lifetime.deadline.is_some());
        assert_eq!(lifetime.owner_changed(&appeared(MONITOR)), Some(PresenceAction::CancelCountdown));
        assert_eq!(lifetime.deadline, None);
    }

    /// Drives [`serve`] with presence tracking only. Changes of `failing` report an error.
    #[derive(Debug)]
    struct FakeService {
        lifetime: Lifetime,
        failing: Option<String>,
    }

    impl FakeService {
        fn new(bus_names: Vec<String>, timeout: Duration) -> Self {
            FakeService { lifetime: Lifetime::new(bus_names, timeout).0, failing: None }
        }
    }

    #[async_trait::async_trait]
    impl Lifecycle for FakeService {
        async fn owner_changed(&mut self, change: NameOwnerChange) -> Result<()> {
            if self.failing.as_deref() == Some(change.name.as_str()) {
                anyhow::bail!("could not handle {}", change.name);
            }
            self.lifetime.owner_changed(&change);
            Ok(())
        }

        fn deadline(&self) -> Option<Instant> {
            self.lifetime.deadline
        }
    }

    #[tokio::test]
    async fn losing_the_watcher_name_exits() {
        let mut service = FakeService::new(vec![MONITOR.to_owned()], Duration::from_secs(30));
        let (_owners_tx, owners) = mpsc::unbounded();
        let (lost_tx, lost) = mpsc::unbounded();
        lost_tx.unbounded_send("org.x.StatusIcon.other".to_owned()).unwrap();
        lost_tx.unbounded_send(names::WATCHER_BUS.to_owned()).unwrap();

        let cause = tokio::time::timeout(Duration::from_secs(5), serve(&mut service, owners, lost)).await.unwrap();
        assert_eq!(cause, ExitCause::NameLost);
    }

    #[tokio::test]
    async fn exits_once_the_last_consumer_stays_away() {
        let mut service = FakeService::new(vec![MONITOR.to_owned()], Duration::from_millis(20));
        let (owners_tx, owners) = mpsc::unbounded();
        let (_lost_tx, lost) = mpsc::unbounded();
        owners_tx.unbounded_send(vanished(MONITOR)).unwrap();

        let cause = tokio::time::timeout(Duration::from_secs(5), serve(&mut service, owners, lost)).await.unwrap();
        assert_eq!(cause, ExitCause::Inactive);
    }

    #[tokio::test]
    async fn returning_consumer_keeps_the_watcher_running() {
        let mut service = FakeService::new(Vec::new(), Duration::from_millis(100));
        let (owners_tx, owners) = mpsc::unbounded();
        let (_lost_tx, lost) = mpsc::unbounded();
        owners_tx.unbounded_send(appeared(MONITOR)).unwrap();
        owners_tx.unbounded_send(vanished(MONITOR)).unwrap();
        owners_tx.unbounded_send(appeared("org.x.StatusIconMonitor.mate_0")).unwrap();

        let still_running = tokio::time::timeout(Duration::from_millis(300), serve(&mut service, owners, lost)).await;
        assert!(still_running.is_err());
        assert_eq!(service.lifetime.deadline, None);
    }

    #[tokio::test]
    async fn failing_to_handle_a_change_exits_with_an_error() {
        let mut service = FakeService::new(vec![MONITOR.to_owned()], Duration::from_secs(30));
        service.failing = Some(":1.99".to_owned());
        let (owners_tx, owners) = mpsc::unbounded();
        let (_lost_tx, lost) = mpsc::unbounded();
        owners_tx.unbounded_send(vanished(":1.99")).unwrap();

        let cause = tokio::time::timeout(Duration::from_secs(5), serve(&mut service, owners, lost)).await.unwrap();
        assert_eq!(cause, ExitCause::Failed);
    }
}
