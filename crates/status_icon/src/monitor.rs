//! The consumer side of the native protocol.
//!
//! A [`StatusIconMonitor`] owns a name below `org.x.StatusIconMonitor`, which is what makes
//! producers switch to the native backend, and tracks every native icon on the bus.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use futures::{
    stream::{BoxStream, SelectAll},
    StreamExt,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    bus::{ManagedIconChange, NameOwnerChange, NameRequest, RemoteIcon, SessionBusRef},
    error::{Error, Result},
    names,
    types::PanelPosition,
};

/// Monitor names tried before giving up.
const MAX_MONITOR_NAMES: u32 = 100;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    IconAdded(RemoteIcon),
    IconRemoved(RemoteIcon),
}

#[derive(Debug)]
struct Tracked {
    icons: Vec<RemoteIcon>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<BTreeMap<String, Tracked>>>;

/// Tracks the native icons of every producer on the bus.
#[derive(Debug)]
pub struct StatusIconMonitor {
    bus: SessionBusRef,
    name: String,
    registry: Registry,
    task: tokio::task::JoinHandle<()>,
}

impl StatusIconMonitor {
    /// Claim a monitor name and start tracking icons. Icons already on the bus are reported as
    /// added right away.
    pub async fn new(bus: SessionBusRef) -> Result<(Self, mpsc::UnboundedReceiver<MonitorEvent>)> {
        let name = own_monitor_name(&bus).await?;
        log::debug!("status icon monitor owns {}", name);

        let (events_tx, events) = mpsc::unbounded_channel();
        let registry = Registry::default();
        let mut tracker = Tracker { bus: bus.clone(), registry: registry.clone(), events: events_tx, changes: SelectAll::new() };

        let owners = bus.watch_name_owners(names::ICON_NAME_PREFIX).await?;
        for bus_name in bus.list_names().await? {
            if names::in_namespace(&bus_name, names::ICON_NAME_PREFIX) {
                tracker.add_bus(&bus_name).await;
            }
        }

        let task = tokio::spawn(tracker.run(owners));
        Ok((StatusIconMonitor { bus, name, registry, task }, events))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every icon currently known, across all producers.
    pub fn list_icons(&self) -> Vec<RemoteIcon> {
        let registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
        registry.values().flat_map(|tracked| tracked.icons.iter().cloned()).collect()
    }

    /// Stop tracking and give up the monitor name.
    pub async fn close(self) -> Result<()> {
        self.task.abort();
        self.bus.release_name(&self.name).await
    }
}

impl Drop for StatusIconMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn own_monitor_name(bus: &SessionBusRef) -> Result<String> {
    let pid = std::process::id();
    for n in 0..MAX_MONITOR_NAMES {
        let name = format!("{}.PID-{}-{}", names::MONITOR_NAME_PREFIX, pid, n);
        match bus.request_name(&name).await? {
            NameRequest::Acquired => return Ok(name),
            NameRequest::Unavailable => log::debug!("{} is taken", name),
        }
    }
    Err(Error::NameUnavailable(names::MONITOR_NAME_PREFIX.to_owned()))
}

struct Tracker {
    bus: SessionBusRef,
    registry: Registry,
    events: mpsc::UnboundedSender<MonitorEvent>,
    changes: SelectAll<BoxStream<'static, (String, ManagedIconChange)>>,
}

impl Tracker {
    async fn run(mut self, mut owners: BoxStream<'static, NameOwnerChange>) {
        loop {
            tokio::select! {
                change = owners.next() => match change {
                    Some(change) => self.owner_changed(change).await,
                    None => break,
                },
                Some((bus_name, change)) = self.changes.next() => self.icon_changed(&bus_name, change),
            }
        }
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    async fn owner_changed(&mut self, change: NameOwnerChange) {
        if change.old_owner.is_some() {
            self.remove_bus(&change.name);
        }
        if change.new_owner.is_some() {
            self.add_bus(&change.name).await;
        }
    }

    async fn add_bus(&mut self, bus_name: &str) {
        let known = self.registry.lock().unwrap().contains_key(bus_name); // unwrap: mutex poisoning is okay
        if known {
            return;
        }
        log::debug!("watching native icons of {}", bus_name);
        let watch = match self.bus.watch_native_icons(bus_name).await {
            Ok(watch) => watch,
            Err(e) => {
                log::warn!("failed to watch icons of {}: {}", bus_name, e);
                return;
            }
        };

        let cancel = CancellationToken::new();
        let owner = bus_name.to_owned();
        let changes = watch.changes.take_until(cancel.clone().cancelled_owned()).map(move |change| (owner.clone(), change));
        self.changes.push(changes.boxed());

        for icon in &watch.initial {
            self.emit(MonitorEvent::IconAdded(icon.clone()));
        }
        let tracked = Tracked { icons: watch.initial, cancel };
        self.registry.lock().unwrap().insert(bus_name.to_owned(), tracked); // unwrap: mutex poisoning is okay
    }

    fn remove_bus(&mut self, bus_name: &str) {
        let removed = self.registry.lock().unwrap().remove(bus_name); // unwrap: mutex poisoning is okay
        if let Some(tracked) = removed {
            log::debug!("{} left the bus, dropping its icons", bus_name);
            tracked.cancel.cancel();
            for icon in tracked.icons {
                self.emit(MonitorEvent::IconRemoved(icon));
            }
        }
    }

    fn icon_changed(&mut self, bus_name: &str, change: ManagedIconChange) {
        let event = {
            let mut registry = self.registry.lock().unwrap(); // unwrap: mutex poisoning is okay
            let Some(tracked) = registry.get_mut(bus_name) else { return };
            match change {
                ManagedIconChange::Added(icon) => {
                    if tracked.icons.iter().any(|known| known.path() == icon.path()) {
                        return;
                    }
                    tracked.icons.push(icon.clone());
                    MonitorEvent::IconAdded(icon)
                }
                ManagedIconChange::Removed { path } => {
                    let Some(index) = tracked.icons.iter().position(|icon| icon.path() == path) else { return };
                    MonitorEvent::IconRemoved(tracked.icons.remove(index))
                }
            }
        };
        self.emit(event);
    }
}

/// Whether a consumer's widget should let a button event continue to its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Propagate,
    Stop,
}

/// Forwards clicks on a consumer's widget to the icon it shows.
#[derive(Debug, Clone)]
pub struct ClickForwarder {
    icon: RemoteIcon,
    panel_position: PanelPosition,
}

impl ClickForwarder {
    pub fn new(icon: RemoteIcon, panel_position: PanelPosition) -> Self {
        ClickForwarder { icon, panel_position }
    }

    pub fn set_panel_position(&mut self, panel_position: PanelPosition) {
        self.panel_position = panel_position;
    }

    /// Every press propagates, whatever the button.
    pub async fn press(&self, x: i32, y: i32, button: u32, time: u32) -> Propagation {
        if let Err(e) = self.icon.button_press(x, y, button, time, self.panel_position).await {
            log::warn!("failed to forward button press to {}{}: {}", self.icon.bus_name(), self.icon.path(), e);
        }
        Propagation::Propagate
    }

    pub async fn release(&self, x: i32, y: i32, button: u32, time: u32) -> Propagation {
        if let Err(e) = self.icon.button_release(x, y, button, time, self.panel_position).await {
            log::warn!("failed to forward button release to {}{}: {}", self.icon.bus_name(), self.icon.path(), e);
        }
        Propagation::Propagate
    }
}
