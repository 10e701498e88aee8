//! An in-memory session bus and legacy tray for driving icons in tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use futures::{stream::BoxStream, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::{
    bus::{
        CallSender, InboundCall, ManagedIconChange, NameOwnerChange, NameRequest, NativeIconWatch, NativeProperties,
        NativeUpdate, RemoteIcon, RemoteStatusIcon, SessionBus, SessionBusRef, SniProperties, SniUpdate,
    },
    context::StatusIconContext,
    error::{Error, Result},
    menu::{Menu, MenuItem, MenuPlacement, MenuRef},
    names,
    tray::{LegacyTray, TrayEvent, TrayEvents, TrayFactory, TrayImage},
    types::{PanelPosition, ScrollDirection},
};

type Key = (String, String);

#[derive(Debug, Default)]
struct HubState {
    next_id: u32,
    names: BTreeMap<String, String>,
    connections: BTreeSet<String>,
    object_managers: BTreeSet<String>,
    native: BTreeMap<Key, (NativeProperties, CallSender)>,
    sni: BTreeMap<Key, (SniProperties, CallSender)>,
    menus: BTreeMap<Key, MenuRef>,
    registered: Vec<Key>,
    hold_registrations: bool,
    waiting_registrations: usize,
}

#[derive(Debug, Clone)]
enum ManagedSignal {
    Added { owner: String, path: String },
    Removed { owner: String, path: String },
}

/// A whole session bus: every [`FakeBus`] connected to it sees the others.
#[derive(Debug)]
pub struct FakeHub {
    state: Mutex<HubState>,
    owners: broadcast::Sender<NameOwnerChange>,
    lost: broadcast::Sender<(String, String)>,
    managed: broadcast::Sender<ManagedSignal>,
    registrations_released: tokio::sync::Notify,
}

fn broadcast_stream<T: Clone + Send + 'static>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => return Some((value, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeHub {
            state: Mutex::new(HubState::default()),
            owners: broadcast::channel(64).0,
            lost: broadcast::channel(64).0,
            managed: broadcast::channel(64).0,
            registrations_released: tokio::sync::Notify::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap()
    }

    pub fn connect(self: &Arc<Self>) -> Arc<FakeBus> {
        let unique = {
            let mut state = self.lock();
            state.next_id += 1;
            let unique = format!(":1.{}", state.next_id);
            state.connections.insert(unique.clone());
            unique
        };
        Arc::new(FakeBus { hub: self.clone(), unique })
    }

    /// Make `owner` the owner of `name`, or drop the name with `None`.
    pub fn set_owner(&self, name: &str, owner: Option<&str>) {
        let old_owner = {
            let mut state = self.lock();
            match owner {
                Some(owner) => state.names.insert(name.to_owned(), owner.to_owned()),
                None => state.names.remove(name),
            }
        };
        if let Some(old) = &old_owner {
            let _ = self.lost.send((old.clone(), name.to_owned()));
        }
        let _ = self.owners.send(NameOwnerChange {
            name: name.to_owned(),
            old_owner,
            new_owner: owner.map(str::to_owned),
        });
    }

    /// Another process takes `name`.
    pub fn add_name(&self, name: &str) {
        self.set_owner(name, Some(":9.9"));
    }

    pub fn remove_name(&self, name: &str) {
        self.set_owner(name, None);
    }

    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.lock().names.get(name).cloned()
    }

    /// Well-known names owned by `unique`.
    pub fn names_of(&self, unique: &str) -> Vec<String> {
        self.lock().names.iter().filter(|(_, owner)| *owner == unique).map(|(name, _)| name.clone()).collect()
    }

    pub fn native_icons(&self) -> Vec<(String, NativeProperties)> {
        self.lock().native.iter().map(|((_, path), (props, _))| (path.clone(), props.clone())).collect()
    }

    pub fn sni_items(&self) -> Vec<(String, SniProperties)> {
        self.lock().sni.iter().map(|((_, path), (props, _))| (path.clone(), props.clone())).collect()
    }

    pub fn menu_paths(&self) -> Vec<String> {
        self.lock().menus.keys().map(|(_, path)| path.clone()).collect()
    }

    pub fn registered_items(&self) -> Vec<Key> {
        self.lock().registered.clone()
    }

    /// While held, `RegisterStatusNotifierItem` calls wait instead of answering.
    pub fn hold_registrations(&self, hold: bool) {
        self.lock().hold_registrations = hold;
        if !hold {
            self.registrations_released.notify_waiters();
        }
    }

    /// Registrations currently waiting on [`FakeHub::hold_registrations`].
    pub fn waiting_registrations(&self) -> usize {
        self.lock().waiting_registrations
    }

    pub fn has_object_manager(&self, unique: &str) -> bool {
        self.lock().object_managers.contains(unique)
    }

    /// Deliver a call to the native icon at `path`, as a consumer would.
    pub fn call_native(&self, path: &str, call: InboundCall) {
        let state = self.lock();
        let (_, calls) = state.native.iter().find(|((_, p), _)| p == path).map(|(_, v)| v).unwrap();
        calls.send(call).unwrap();
    }

    pub fn call_sni(&self, path: &str, call: InboundCall) {
        let state = self.lock();
        let (_, calls) = state.sni.iter().find(|((_, p), _)| p == path).map(|(_, v)| v).unwrap();
        calls.send(call).unwrap();
    }

    fn resolve(&self, bus_name: &str) -> Option<String> {
        let state = self.lock();
        if state.connections.contains(bus_name) {
            Some(bus_name.to_owned())
        } else {
            state.names.get(bus_name).cloned()
        }
    }
}

/// Counts a registration as waiting for as long as its call is pending.
struct WaitingRegistration<'a>(&'a FakeHub);

impl<'a> WaitingRegistration<'a> {
    fn new(hub: &'a FakeHub) -> Self {
        hub.lock().waiting_registrations += 1;
        WaitingRegistration(hub)
    }
}

impl Drop for WaitingRegistration<'_> {
    fn drop(&mut self) {
        self.0.lock().waiting_registrations -= 1;
    }
}

/// One connection to a [`FakeHub`].
#[derive(Debug)]
pub struct FakeBus {
    hub: Arc<FakeHub>,
    unique: String,
}

impl FakeBus {
    pub fn hub(&self) -> &Arc<FakeHub> {
        &self.hub
    }

    pub fn unique(&self) -> &str {
        &self.unique
    }

    fn key(&self, path: &str) -> Key {
        (self.unique.clone(), path.to_owned())
    }
}

#[async_trait::async_trait]
impl SessionBus for FakeBus {
    fn unique_name(&self) -> Option<String> {
        Some(self.unique.clone())
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        let state = self.hub.lock();
        Ok(state.names.keys().chain(state.connections.iter()).cloned().collect())
    }

    async fn name_has_owner(&self, name: &str) -> Result<bool> {
        let state = self.hub.lock();
        Ok(state.names.contains_key(name) || state.connections.contains(name))
    }

    async fn request_name(&self, name: &str) -> Result<NameRequest> {
        match self.hub.owner_of(name) {
            Some(owner) if owner == self.unique => Ok(NameRequest::Acquired),
            Some(_) => Ok(NameRequest::Unavailable),
            None => {
                self.hub.set_owner(name, Some(&self.unique));
                Ok(NameRequest::Acquired)
            }
        }
    }

    async fn release_name(&self, name: &str) -> Result<()> {
        if self.hub.owner_of(name).as_deref() == Some(self.unique.as_str()) {
            self.hub.lock().names.remove(name);
            let _ = self.hub.owners.send(NameOwnerChange {
                name: name.to_owned(),
                old_owner: Some(self.unique.clone()),
                new_owner: None,
            });
        }
        Ok(())
    }

    async fn watch_name_owners(&self, namespace: &str) -> Result<BoxStream<'static, NameOwnerChange>> {
        let namespace = namespace.to_owned();
        Ok(broadcast_stream(self.hub.owners.subscribe())
            .filter(move |change| futures::future::ready(names::in_namespace(&change.name, &namespace)))
            .boxed())
    }

    async fn watch_name_lost(&self) -> Result<BoxStream<'static, String>> {
        let unique = self.unique.clone();
        Ok(broadcast_stream(self.hub.lost.subscribe())
            .filter_map(move |(owner, name)| futures::future::ready((owner == unique).then_some(name)))
            .boxed())
    }

    async fn export_object_manager(&self) -> Result<()> {
        self.hub.lock().object_managers.insert(self.unique.clone());
        Ok(())
    }

    async fn unexport_object_manager(&self) -> Result<()> {
        self.hub.lock().object_managers.remove(&self.unique);
        Ok(())
    }

    async fn export_native_icon(&self, path: &str, properties: NativeProperties, calls: CallSender) -> Result<bool> {
        {
            let mut state = self.hub.lock();
            if state.native.contains_key(&self.key(path)) {
                return Ok(false);
            }
            state.native.insert(self.key(path), (properties, calls));
        }
        let _ = self.hub.managed.send(ManagedSignal::Added { owner: self.unique.clone(), path: path.to_owned() });
        Ok(true)
    }

    async fn update_native_icon(&self, path: &str, update: NativeUpdate) -> Result<()> {
        let mut state = self.hub.lock();
        let (props, _) = state.native.get_mut(&self.key(path)).ok_or_else(|| Error::NotExported(path.to_owned()))?;
        props.apply(update);
        Ok(())
    }

    async fn unexport_native_icon(&self, path: &str) -> Result<()> {
        let removed = self.hub.lock().native.remove(&self.key(path));
        if removed.is_some() {
            let _ = self.hub.managed.send(ManagedSignal::Removed { owner: self.unique.clone(), path: path.to_owned() });
        }
        Ok(())
    }

    async fn export_sni_item(&self, path: &str, properties: SniProperties, calls: CallSender) -> Result<bool> {
        let mut state = self.hub.lock();
        if state.sni.contains_key(&self.key(path)) {
            return Ok(false);
        }
        state.sni.insert(self.key(path), (properties, calls));
        Ok(true)
    }

    async fn update_sni_item(&self, path: &str, update: SniUpdate) -> Result<()> {
        let mut state = self.hub.lock();
        let (props, _) = state.sni.get_mut(&self.key(path)).ok_or_else(|| Error::NotExported(path.to_owned()))?;
        props.apply(update);
        Ok(())
    }

    async fn unexport_sni_item(&self, path: &str) -> Result<()> {
        self.hub.lock().sni.remove(&self.key(path));
        Ok(())
    }

    async fn export_menu(&self, path: &str, menu: MenuRef) -> Result<()> {
        self.hub.lock().menus.insert(self.key(path), menu);
        Ok(())
    }

    async fn unexport_menu(&self, path: &str) -> Result<()> {
        self.hub.lock().menus.remove(&self.key(path));
        Ok(())
    }

    async fn register_sni_item(&self, item_path: &str) -> Result<()> {
        let _waiting = WaitingRegistration::new(&self.hub);
        loop {
            let released = self.hub.registrations_released.notified();
            if !self.hub.lock().hold_registrations {
                break;
            }
            released.await;
        }

        let mut state = self.hub.lock();
        if !state.names.contains_key(names::WATCHER_BUS) {
            return Err(Error::DbusCallError(zbus::fdo::Error::ServiceUnknown(names::WATCHER_BUS.to_owned())));
        }
        state.registered.push(self.key(item_path));
        Ok(())
    }

    async fn watch_native_icons(&self, bus_name: &str) -> Result<NativeIconWatch> {
        let owner = self
            .hub
            .resolve(bus_name)
            .ok_or_else(|| Error::DbusCallError(zbus::fdo::Error::ServiceUnknown(bus_name.to_owned())))?;
        let signals = self.hub.managed.subscribe();

        let initial = {
            let state = self.hub.lock();
            state
                .native
                .keys()
                .filter(|(o, _)| *o == owner)
                .map(|(_, path)| self.remote(bus_name, &owner, path))
                .collect()
        };

        let (hub, bus_name) = (self.hub.clone(), bus_name.to_owned());
        let changes = broadcast_stream(signals).filter_map(move |signal| {
            let change = match signal {
                ManagedSignal::Added { owner: o, path } if o == owner => {
                    let icon: RemoteIcon =
                        Arc::new(FakeRemoteIcon { hub: hub.clone(), bus_name: bus_name.clone(), owner: o, path });
                    Some(ManagedIconChange::Added(icon))
                }
                ManagedSignal::Removed { owner: o, path } if o == owner => Some(ManagedIconChange::Removed { path }),
                _ => None,
            };
            futures::future::ready(change)
        });
        Ok(NativeIconWatch { initial, changes: changes.boxed() })
    }
}

impl FakeBus {
    fn remote(&self, bus_name: &str, owner: &str, path: &str) -> RemoteIcon {
        Arc::new(FakeRemoteIcon {
            hub: self.hub.clone(),
            bus_name: bus_name.to_owned(),
            owner: owner.to_owned(),
            path: path.to_owned(),
        })
    }
}

#[derive(Debug)]
struct FakeRemoteIcon {
    hub: Arc<FakeHub>,
    bus_name: String,
    owner: String,
    path: String,
}

impl FakeRemoteIcon {
    fn send(&self, call: InboundCall) -> Result<()> {
        let state = self.hub.lock();
        let (_, calls) = state
            .native
            .get(&(self.owner.clone(), self.path.clone()))
            .ok_or_else(|| Error::NotExported(self.path.clone()))?;
        let _ = calls.send(call);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteStatusIcon for FakeRemoteIcon {
    fn bus_name(&self) -> &str {
        &self.bus_name
    }

    fn path(&self) -> &str {
        &self.path
    }

    async fn properties(&self) -> Result<NativeProperties> {
        let state = self.hub.lock();
        state
            .native
            .get(&(self.owner.clone(), self.path.clone()))
            .map(|(props, _)| props.clone())
            .ok_or_else(|| Error::NotExported(self.path.clone()))
    }

    async fn button_press(&self, x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition) -> Result<()> {
        self.send(InboundCall::ButtonPress { x, y, button, time, panel_position })
    }

    async fn button_release(&self, x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition) -> Result<()> {
        self.send(InboundCall::ButtonRelease { x, y, button, time, panel_position })
    }

    async fn scroll(&self, delta: i32, direction: ScrollDirection, time: u32) -> Result<()> {
        self.send(InboundCall::Scroll { delta, direction, time })
    }

    async fn set_icon_size(&self, size: i32) -> Result<()> {
        {
            let mut state = self.hub.lock();
            if let Some((props, _)) = state.native.get_mut(&(self.owner.clone(), self.path.clone())) {
                props.icon_size = size;
            }
        }
        self.send(InboundCall::IconSizeChanged(size))
    }
}

/// What the fake legacy tray was last told.
#[derive(Debug, Default)]
pub struct FakeTrayState {
    pub image: Option<TrayImage>,
    pub tooltip: String,
    pub visible: bool,
    pub embedded: bool,
    pub alive: usize,
    events: Option<mpsc::UnboundedSender<TrayEvent>>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTrayFactory {
    pub state: Arc<Mutex<FakeTrayState>>,
}

impl FakeTrayFactory {
    pub fn send(&self, event: TrayEvent) {
        let mut state = self.state.lock().unwrap();
        if let TrayEvent::Embedded(embedded) = event {
            state.embedded = embedded;
        }
        state.events.as_ref().unwrap().send(event).unwrap();
    }

    pub fn read<T>(&self, f: impl FnOnce(&FakeTrayState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

impl TrayFactory for FakeTrayFactory {
    fn create(&self) -> Result<(Box<dyn LegacyTray>, TrayEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.events = Some(tx);
        state.alive += 1;
        Ok((Box::new(FakeTray { state: self.state.clone() }), rx))
    }
}

#[derive(Debug)]
struct FakeTray {
    state: Arc<Mutex<FakeTrayState>>,
}

impl LegacyTray for FakeTray {
    fn set_image(&mut self, image: &TrayImage) -> Result<()> {
        self.state.lock().unwrap().image = Some(image.clone());
        Ok(())
    }

    fn set_tooltip(&mut self, text: &str) -> Result<()> {
        self.state.lock().unwrap().tooltip = text.to_owned();
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        self.state.lock().unwrap().visible = visible;
        Ok(())
    }

    fn is_embedded(&self) -> bool {
        self.state.lock().unwrap().embedded
    }
}

impl Drop for FakeTray {
    fn drop(&mut self) {
        self.state.lock().unwrap().alive -= 1;
    }
}

/// A menu that records its popups and stays open until told otherwise.
#[derive(Debug, Default)]
pub struct RecordingMenu {
    pub popups: Mutex<Vec<MenuPlacement>>,
    pub activated: Mutex<Vec<i32>>,
    close: tokio::sync::Notify,
}

impl RecordingMenu {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingMenu::default())
    }

    pub fn close(&self) {
        self.close.notify_waiters();
    }

    pub fn popup_count(&self) -> usize {
        self.popups.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Menu for RecordingMenu {
    fn layout(&self) -> MenuItem {
        MenuItem::root(vec![MenuItem::new(1, "Quit")])
    }

    fn activate(&self, id: i32) {
        self.activated.lock().unwrap().push(id);
    }

    async fn popup(&self, placement: MenuPlacement) {
        let closed = self.close.notified();
        self.popups.lock().unwrap().push(placement);
        closed.await;
    }
}

/// Yield until `condition` holds, or give up after a generous number of rounds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}

/// A context on a fresh connection to `hub` with a fake legacy tray.
pub fn context(hub: &Arc<FakeHub>) -> (StatusIconContext, Arc<FakeBus>, FakeTrayFactory) {
    let bus = hub.connect();
    let tray = FakeTrayFactory::default();
    let ctx = StatusIconContext::builder(bus.clone() as SessionBusRef)
        .tray_factory(Arc::new(tray.clone()))
        .program_name("test-app")
        .build();
    (ctx, bus, tray)
}
