use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::{stream::BoxStream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use zbus::{
    fdo::{DBusProxy, ObjectManager, ObjectManagerProxy, RequestNameFlags, RequestNameReply},
    names::{BusName, WellKnownName},
    SignalContext,
};

use super::*;
use crate::{
    dbus::{
        menu::{forward_layout_updates, DbusMenuInterface},
        native::{NativeIconInterface, NativeIconProxy},
        sni::SniItemInterface,
        watcher::StatusNotifierWatcherProxy,
    },
    error::Error,
    names,
};

/// [`SessionBus`] on a real zbus connection.
#[derive(Debug, Clone)]
pub struct DbusSession {
    con: zbus::Connection,
    dbus: DBusProxy<'static>,
    /// Stops the `LayoutUpdated` forwarding of each exported menu.
    menu_updates: Arc<Mutex<HashMap<String, DropGuard>>>,
}

impl DbusSession {
    /// Connect to the session bus.
    pub async fn new() -> Result<Self> {
        let con = zbus::Connection::session().await?;
        DbusSession::with_connection(con).await
    }

    pub async fn with_connection(con: zbus::Connection) -> Result<Self> {
        let dbus = DBusProxy::new(&con).await?;
        Ok(DbusSession { con, dbus, menu_updates: Arc::default() })
    }

    pub fn connection(&self) -> &zbus::Connection {
        &self.con
    }
}

fn owner_to_string(owner: Option<&zbus::names::UniqueName<'_>>) -> Option<String> {
    owner.map(|owner| owner.to_string()).filter(|owner| !owner.is_empty())
}

#[async_trait::async_trait]
impl SessionBus for DbusSession {
    fn unique_name(&self) -> Option<String> {
        self.con.unique_name().map(|name| name.to_string())
    }

    async fn list_names(&self) -> Result<Vec<String>> {
        Ok(self.dbus.list_names().await?.into_iter().map(|name| name.to_string()).collect())
    }

    async fn name_has_owner(&self, name: &str) -> Result<bool> {
        let name = BusName::try_from(name)?;
        Ok(self.dbus.name_has_owner(name).await?)
    }

    async fn request_name(&self, name: &str) -> Result<NameRequest> {
        let name = WellKnownName::try_from(name)?;
        match self.con.request_name_with_flags(name, RequestNameFlags::DoNotQueue.into()).await {
            Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => Ok(NameRequest::Acquired),
            Ok(_) | Err(zbus::Error::NameTaken) => Ok(NameRequest::Unavailable),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_name(&self, name: &str) -> Result<()> {
        let name = WellKnownName::try_from(name)?;
        self.con.release_name(name).await?;
        Ok(())
    }

    async fn watch_name_owners(&self, namespace: &str) -> Result<BoxStream<'static, NameOwnerChange>> {
        let namespace = namespace.to_owned();
        let changes = self.dbus.receive_name_owner_changed().await?;
        Ok(changes
            .filter_map(move |signal| {
                let change = signal.args().ok().and_then(|args| {
                    let name = args.name().to_string();
                    names::in_namespace(&name, &namespace).then(|| NameOwnerChange {
                        name,
                        old_owner: owner_to_string((**args.old_owner()).as_ref()),
                        new_owner: owner_to_string((**args.new_owner()).as_ref()),
                    })
                });
                futures::future::ready(change)
            })
            .boxed())
    }

    async fn watch_name_lost(&self) -> Result<BoxStream<'static, String>> {
        let lost = self.dbus.receive_name_lost().await?;
        Ok(lost
            .filter_map(|signal| futures::future::ready(signal.args().ok().map(|args| args.name().to_string())))
            .boxed())
    }

    async fn export_object_manager(&self) -> Result<()> {
        self.con.object_server().at(names::ICON_BASE_PATH, ObjectManager).await?;
        Ok(())
    }

    async fn unexport_object_manager(&self) -> Result<()> {
        self.con.object_server().remove::<ObjectManager, _>(names::ICON_BASE_PATH).await?;
        Ok(())
    }

    async fn export_native_icon(&self, path: &str, properties: NativeProperties, calls: CallSender) -> Result<bool> {
        Ok(self.con.object_server().at(path, NativeIconInterface::new(properties, calls)).await?)
    }

    async fn update_native_icon(&self, path: &str, update: NativeUpdate) -> Result<()> {
        let iface = self
            .con
            .object_server()
            .interface::<_, NativeIconInterface>(path)
            .await
            .map_err(|_| Error::NotExported(path.to_owned()))?;
        let mut native = iface.get_mut().await;
        native.apply(update, iface.signal_context()).await?;
        Ok(())
    }

    async fn unexport_native_icon(&self, path: &str) -> Result<()> {
        self.con.object_server().remove::<NativeIconInterface, _>(path).await?;
        Ok(())
    }

    async fn export_sni_item(&self, path: &str, properties: SniProperties, calls: CallSender) -> Result<bool> {
        Ok(self.con.object_server().at(path, SniItemInterface::new(properties, calls)).await?)
    }

    async fn update_sni_item(&self, path: &str, update: SniUpdate) -> Result<()> {
        let iface = self
            .con
            .object_server()
            .interface::<_, SniItemInterface>(path)
            .await
            .map_err(|_| Error::NotExported(path.to_owned()))?;
        let mut item = iface.get_mut().await;
        item.apply(update, iface.signal_context()).await?;
        Ok(())
    }

    async fn unexport_sni_item(&self, path: &str) -> Result<()> {
        self.con.object_server().remove::<SniItemInterface, _>(path).await?;
        Ok(())
    }

    async fn export_menu(&self, path: &str, menu: MenuRef) -> Result<()> {
        // a re-export replaces the previous menu server entirely
        self.unexport_menu(path).await?;
        let revisions = menu.watch_revision();
        if !self.con.object_server().at(path, DbusMenuInterface::new(menu)).await? {
            return Err(Error::PathTaken(path.to_owned()));
        }
        if let Some(revisions) = revisions {
            let ctxt = SignalContext::new(&self.con, path.to_owned())?;
            let cancel = CancellationToken::new();
            tokio::spawn(forward_layout_updates(ctxt, revisions, cancel.clone()));
            self.menu_updates.lock().unwrap().insert(path.to_owned(), cancel.drop_guard()); // unwrap: mutex poisoning is okay
        }
        Ok(())
    }

    /// Unexport the menu at `path`. Nothing being exported there is fine.
    async fn unexport_menu(&self, path: &str) -> Result<()> {
        self.menu_updates.lock().unwrap().remove(path); // unwrap: mutex poisoning is okay
        match self.con.object_server().remove::<DbusMenuInterface, _>(path).await {
            Ok(_) | Err(zbus::Error::InterfaceNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn register_sni_item(&self, item_path: &str) -> Result<()> {
        let watcher = StatusNotifierWatcherProxy::new(&self.con).await?;
        watcher.register_status_notifier_item(item_path).await?;
        Ok(())
    }

    async fn watch_native_icons(&self, bus_name: &str) -> Result<NativeIconWatch> {
        let manager = ObjectManagerProxy::builder(&self.con)
            .destination(bus_name.to_owned())?
            .path(names::ICON_BASE_PATH)?
            .build()
            .await?;

        // subscribe before reading the current objects so nothing slips through in between
        let added = manager.receive_interfaces_added().await?;
        let removed = manager.receive_interfaces_removed().await?;

        let mut initial: Vec<RemoteIcon> = Vec::new();
        for (path, interfaces) in manager.get_managed_objects().await? {
            if interfaces.keys().any(|name| name.to_string() == names::ICON_INTERFACE) {
                initial.push(Arc::new(RemoteNativeIcon::new(&self.con, bus_name, path.as_str()).await?));
            }
        }

        let added = {
            let con = self.con.clone();
            let bus_name = bus_name.to_owned();
            added.filter_map(move |signal| {
                let con = con.clone();
                let bus_name = bus_name.clone();
                async move {
                    let args = signal.args().ok()?;
                    if !args.interfaces_and_properties().keys().any(|name| name.to_string() == names::ICON_INTERFACE) {
                        return None;
                    }
                    let path = args.object_path().to_string();
                    match RemoteNativeIcon::new(&con, &bus_name, &path).await {
                        Ok(icon) => Some(ManagedIconChange::Added(Arc::new(icon) as RemoteIcon)),
                        Err(e) => {
                            log::warn!("failed to create proxy for {}{}: {}", bus_name, path, e);
                            None
                        }
                    }
                }
            })
        };
        let removed = removed.filter_map(|signal| {
            let change = signal.args().ok().and_then(|args| {
                args.interfaces()
                    .iter()
                    .any(|name| name.to_string() == names::ICON_INTERFACE)
                    .then(|| ManagedIconChange::Removed { path: args.object_path().to_string() })
            });
            futures::future::ready(change)
        });

        Ok(NativeIconWatch { initial, changes: futures::stream::select(added.boxed(), removed.boxed()).boxed() })
    }
}

/// A native icon of another process, reached through a proxy.
#[derive(Debug)]
struct RemoteNativeIcon {
    bus_name: String,
    path: String,
    proxy: NativeIconProxy<'static>,
}

impl RemoteNativeIcon {
    async fn new(con: &zbus::Connection, bus_name: &str, path: &str) -> Result<Self> {
        let proxy = NativeIconProxy::builder(con)
            .destination(bus_name.to_owned())?
            .path(path.to_owned())?
            .build()
            .await?;
        Ok(RemoteNativeIcon { bus_name: bus_name.to_owned(), path: path.to_owned(), proxy })
    }
}

#[async_trait::async_trait]
impl RemoteStatusIcon for RemoteNativeIcon {
    fn bus_name(&self) -> &str {
        &self.bus_name
    }

    fn path(&self) -> &str {
        &self.path
    }

    async fn properties(&self) -> Result<NativeProperties> {
        Ok(NativeProperties {
            icon: IconProperties {
                name: self.proxy.name().await?,
                icon_name: self.proxy.icon_name().await?,
                tooltip_text: self.proxy.tooltip_text().await?,
                label: self.proxy.label().await?,
                visible: self.proxy.visible().await?,
                metadata: self.proxy.metadata().await?,
            },
            icon_size: self.proxy.icon_size().await?,
            primary_menu_is_open: self.proxy.primary_menu_is_open().await?,
            secondary_menu_is_open: self.proxy.secondary_menu_is_open().await?,
        })
    }

    async fn button_press(&self, x: i32, y: i32, button: u32, time: u32, position: PanelPosition) -> Result<()> {
        Ok(self.proxy.button_press(x, y, button, time, position.to_wire()).await?)
    }

    async fn button_release(&self, x: i32, y: i32, button: u32, time: u32, position: PanelPosition) -> Result<()> {
        Ok(self.proxy.button_release(x, y, button, time, position.to_wire()).await?)
    }

    async fn scroll(&self, delta: i32, direction: ScrollDirection, time: u32) -> Result<()> {
        Ok(self.proxy.scroll(delta, direction.to_wire(), time).await?)
    }

    async fn set_icon_size(&self, size: i32) -> Result<()> {
        Ok(self.proxy.set_icon_size(size).await?)
    }
}
