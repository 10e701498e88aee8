//! Mirrors one registered StatusNotifierItem as a native status icon.
//!
//! Each item runs as its own task. It reads the item's properties, keeps the mirror icon in sync
//! with the item's change signals and forwards clicks and scrolling back to the item.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use futures::{stream::BoxStream, StreamExt};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use xapp_shared_util::{paths::IconSlots, settings::Settings};
use xapp_status_icon::{
    bus::ToolTip,
    dbus::sni::StatusNotifierItemProxy,
    menu::MenuRef,
    names, pixmap, button, ScrollDirection, StatusIcon, StatusIconContext, StatusIconEvent, StatusIconState,
};
use zbus::{
    fdo::PropertiesProxy,
    names::InterfaceName,
    zvariant::{OwnedValue, Value},
    CacheProperties,
};

use crate::{
    menu::RemoteMenu,
    registry::ItemKey,
    theme,
    watcher::{ItemStarter, TrackedItem},
};

const PROPERTY_TIMEOUT: Duration = Duration::from_secs(5);
const FALLBACK_ICON_SIZE: i32 = 24;
const MISSING_ICON: &str = "image-missing";

static NEXT_ITEM_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    Passive,
    Active,
    NeedsAttention,
}

impl ItemStatus {
    /// Unknown or missing values count as `Active`.
    pub fn parse(status: Option<&str>) -> Self {
        match status {
            Some("Passive") => ItemStatus::Passive,
            Some("NeedsAttention") => ItemStatus::NeedsAttention,
            _ => ItemStatus::Active,
        }
    }

    pub fn visible(self) -> bool {
        self != ItemStatus::Passive
    }
}

/// A call made on the item in response to input on its mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemCall {
    Activate { x: i32, y: i32 },
    SecondaryActivate { x: i32, y: i32 },
    ContextMenu { x: i32, y: i32 },
    Scroll { delta: i32, orientation: &'static str },
}

/// What a button press on the mirror does.
///
/// A primary click on an appindicator item opens its menu unless the item is whitelisted for
/// activation, in which case it gets `SecondaryActivate` since appindicators ignore `Activate`.
pub fn press_call(button: u32, x: i32, y: i32, is_appindicator: bool, whitelisted: bool) -> Option<ItemCall> {
    match button {
        button::PRIMARY if !is_appindicator => Some(ItemCall::Activate { x, y }),
        button::PRIMARY if whitelisted => Some(ItemCall::SecondaryActivate { x, y }),
        button::MIDDLE => Some(ItemCall::SecondaryActivate { x, y }),
        _ => None,
    }
}

/// What a button release on the mirror does. Items without a menu draw their own.
pub fn release_call(button: u32, x: i32, y: i32, has_menu: bool) -> Option<ItemCall> {
    (button == button::SECONDARY && !has_menu).then_some(ItemCall::ContextMenu { x, y })
}

pub fn scroll_call(delta: i32, direction: ScrollDirection) -> ItemCall {
    ItemCall::Scroll { delta, orientation: direction.sni_orientation() }
}

/// The name to show for `status`, preferring the attention icon while attention is needed.
pub fn icon_name_for_status<'a>(status: ItemStatus, icon: Option<&'a str>, attention: Option<&'a str>) -> &'a str {
    let name = match status {
        ItemStatus::Active => icon,
        ItemStatus::NeedsAttention => attention.or(icon),
        ItemStatus::Passive => None,
    };
    name.unwrap_or(MISSING_ICON)
}

/// Turn an icon name into something the consumer can load.
///
/// Names found in the item's own theme directory become file paths. Anything else is passed on
/// for the consumer to look up in its icon theme.
pub fn resolve_icon_name(name: &str, theme_path: Option<&str>, size: i32) -> String {
    match theme_path {
        Some(theme_path) if !Path::new(name).is_absolute() => theme::find_icon(Path::new(theme_path), name, size)
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_owned()),
        _ => name.to_owned(),
    }
}

pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Tooltip of the mirror: the label if one is used, else the `ToolTip` title and body, else the
/// capitalized title.
pub fn tooltip_text(label: Option<&str>, tool_tip: Option<&ToolTip>, title: Option<&str>) -> String {
    if let Some(label) = label.filter(|label| !label.is_empty()) {
        return label.to_owned();
    }
    if let Some((_, _, tip_title, tip_body)) = tool_tip {
        if !tip_title.is_empty() {
            return if tip_body.is_empty() { tip_title.clone() } else { format!("{}\n{}", tip_title, tip_body) };
        }
    }
    title.filter(|title| !title.is_empty()).map(capitalize).unwrap_or_default()
}

fn value_str(value: &Value<'_>) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.as_str().to_owned()),
        Value::ObjectPath(path) => Some(path.as_str().to_owned()),
        Value::Value(inner) => value_str(inner),
        _ => None,
    }
}

async fn read_property(props: &PropertiesProxy<'static>, key: &ItemKey, name: &str) -> Option<OwnedValue> {
    let interface = InterfaceName::from_static_str_unchecked(names::ITEM_INTERFACE);
    match tokio::time::timeout(PROPERTY_TIMEOUT, props.get(interface, name)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            log::debug!("reading {} of {}: {}", name, key, e);
            None
        }
        Err(_) => {
            log::debug!("reading {} of {} timed out", name, key);
            None
        }
    }
}

/// A string (or object path) property. Empty strings count as missing.
async fn read_string(props: &PropertiesProxy<'static>, key: &ItemKey, name: &str) -> Option<String> {
    read_property(props, key, name).await.and_then(|value| value_str(&value)).filter(|s| !s.is_empty())
}

/// Everything items need from the watcher.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub ctx: StatusIconContext,
    pub settings: watch::Receiver<Settings>,
    pub icon_dir: PathBuf,
}

/// Handle to a mirrored item. Dropping it removes the mirror.
#[derive(Debug)]
pub struct SnItem {
    key: ItemKey,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SnItem {
    /// Connect to the item at `key` and start mirroring it.
    pub async fn start(bridge: &Bridge, con: &zbus::Connection, key: ItemKey) -> zbus::fdo::Result<Self> {
        let dbus = zbus::fdo::DBusProxy::new(con).await?;
        let bus_name = zbus::names::BusName::try_from(key.bus_name.as_str())
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        if !dbus.name_has_owner(bus_name).await? {
            return Err(zbus::fdo::Error::ServiceUnknown(format!("{} is not on the bus", key.bus_name)));
        }

        let proxy = StatusNotifierItemProxy::builder(con)
            .destination(key.bus_name.clone())?
            .path(key.path.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        let props = PropertiesProxy::builder(con)
            .destination(key.bus_name.clone())?
            .path(key.path.clone())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        let signals = item_signals(&proxy).await?;

        let token = CancellationToken::new();
        let task = tokio::spawn({
            let (bridge, key, token) = (bridge.clone(), key.clone(), token.clone());
            async move {
                let sortable_name = match read_string(&props, &key, "Id").await {
                    Some(id) => id,
                    None => read_string(&props, &key, "Title").await.unwrap_or_default(),
                };
                log::debug!("sort name for {} is {:?}", key, sortable_name);

                let icon = StatusIcon::with_name(&bridge.ctx, sortable_name.clone());
                let actor = ItemActor {
                    is_appindicator: key.is_appindicator(),
                    key,
                    proxy,
                    props,
                    icon,
                    sortable_name,
                    status: ItemStatus::default(),
                    slots: IconSlots::new(&bridge.icon_dir, NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed).to_string()),
                    menu: None,
                    settings: bridge.settings,
                };
                actor.run(signals, token).await;
            }
        });
        Ok(SnItem { key, token, task })
    }

    /// Remove the mirror and wait until it is gone.
    pub async fn close(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.task).await {
            log::error!("item task of {} failed: {}", self.key, e);
        }
    }
}

impl Drop for SnItem {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait::async_trait]
impl TrackedItem for SnItem {
    async fn close(self: Box<Self>) {
        SnItem::close(*self).await
    }
}

/// Starts an [`SnItem`] for every registration the watcher accepts.
#[derive(Debug)]
pub struct SnItemStarter {
    bridge: Bridge,
    con: zbus::Connection,
}

impl SnItemStarter {
    pub fn new(bridge: Bridge, con: zbus::Connection) -> Self {
        SnItemStarter { bridge, con }
    }
}

#[async_trait::async_trait]
impl ItemStarter for SnItemStarter {
    async fn start(&self, key: ItemKey) -> zbus::fdo::Result<Box<dyn TrackedItem>> {
        Ok(Box::new(SnItem::start(&self.bridge, &self.con, key).await?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemSignal {
    Icon,
    Status,
    Menu,
    Tooltip,
}

/// What a full re-read covers, each part once. The icon depends on the status so it goes last.
const FULL_REFRESH: [ItemSignal; 4] = [ItemSignal::Status, ItemSignal::Menu, ItemSignal::Tooltip, ItemSignal::Icon];

async fn item_signals(proxy: &StatusNotifierItemProxy<'static>) -> zbus::Result<BoxStream<'static, ItemSignal>> {
    let streams = vec![
        proxy.receive_new_icon().await?.map(|_| ItemSignal::Icon).boxed(),
        proxy.receive_new_attention_icon().await?.map(|_| ItemSignal::Icon).boxed(),
        proxy.receive_new_overlay_icon().await?.map(|_| ItemSignal::Icon).boxed(),
        proxy.receive_new_status().await?.map(|_| ItemSignal::Status).boxed(),
        proxy.receive_new_menu().await?.map(|_| ItemSignal::Menu).boxed(),
        proxy.receive_new_title().await?.map(|_| ItemSignal::Tooltip).boxed(),
        proxy.receive_new_tool_tip().await?.map(|_| ItemSignal::Tooltip).boxed(),
        proxy.receive_x_ayatana_new_label().await?.map(|_| ItemSignal::Tooltip).boxed(),
    ];
    Ok(futures::stream::select_all(streams).boxed())
}

struct ItemActor {
    key: ItemKey,
    is_appindicator: bool,
    proxy: StatusNotifierItemProxy<'static>,
    props: PropertiesProxy<'static>,
    icon: StatusIcon,
    sortable_name: String,
    status: ItemStatus,
    slots: IconSlots,
    menu: Option<MenuRef>,
    settings: watch::Receiver<Settings>,
}

impl ItemActor {
    async fn run(mut self, mut signals: BoxStream<'static, ItemSignal>, token: CancellationToken) {
        let mut events = self.icon.subscribe();
        self.refresh_all().await;

        let mut settings = self.settings.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(signal) = signals.next() => self.update(signal).await,
                Some(event) = events.recv() => self.handle_event(event).await,
                Ok(()) = settings.changed() => {
                    log::debug!("settings changed, updating menus of {}", self.key);
                    self.update_menu().await;
                }
            }
        }

        log::debug!("removing mirror of {}", self.key);
        let ItemActor { icon, mut slots, .. } = self;
        icon.close().await;
        slots.remove_all();
    }

    fn icon(&self) -> &StatusIcon {
        &self.icon
    }

    fn icon_size(&self) -> i32 {
        match self.icon.icon_size() {
            size if size > 0 => size,
            _ => FALLBACK_ICON_SIZE,
        }
    }

    async fn handle_event(&mut self, event: StatusIconEvent) {
        let call = match event {
            StatusIconEvent::ButtonPress { x, y, button, .. } => {
                let whitelisted = self.settings.borrow().is_activation_whitelisted(&self.sortable_name);
                press_call(button, x, y, self.is_appindicator, whitelisted)
            }
            StatusIconEvent::ButtonRelease { x, y, button, .. } => release_call(button, x, y, self.menu.is_some()),
            StatusIconEvent::Scroll { delta, direction, .. } => Some(scroll_call(delta, direction)),
            StatusIconEvent::StateChanged(StatusIconState::NoSupport) | StatusIconEvent::Activate { .. } => None,
            StatusIconEvent::StateChanged(_) => {
                self.refresh_all().await;
                None
            }
        };
        if let Some(call) = call {
            self.send(call);
        }
    }

    fn send(&self, call: ItemCall) {
        let proxy = self.proxy.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(PROPERTY_TIMEOUT, async {
                match &call {
                    ItemCall::Activate { x, y } => proxy.activate(*x, *y).await,
                    ItemCall::SecondaryActivate { x, y } => proxy.secondary_activate(*x, *y).await,
                    ItemCall::ContextMenu { x, y } => proxy.context_menu(*x, *y).await,
                    ItemCall::Scroll { delta, orientation } => proxy.scroll(*delta, orientation).await,
                }
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("{:?} on {} failed: {}", call, key, e),
                Err(_) => log::debug!("{:?} on {} timed out", call, key),
            }
        });
    }

    async fn get_string(&self, name: &str) -> Option<String> {
        read_string(&self.props, &self.key, name).await
    }

    async fn read<T>(&self, name: &str, fut: impl std::future::Future<Output = zbus::Result<T>>) -> Option<T> {
        match tokio::time::timeout(PROPERTY_TIMEOUT, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                log::debug!("reading {} of {}: {}", name, self.key, e);
                None
            }
            Err(_) => {
                log::debug!("reading {} of {} timed out", name, self.key);
                None
            }
        }
    }

    async fn update(&mut self, signal: ItemSignal) {
        match signal {
            ItemSignal::Icon => self.update_icon().await,
            ItemSignal::Status => self.update_status().await,
            ItemSignal::Menu => self.update_menu().await,
            ItemSignal::Tooltip => self.update_tooltip().await,
        }
    }

    /// Re-read everything the mirror shows.
    async fn refresh_all(&mut self) {
        for signal in FULL_REFRESH {
            match signal {
                // the icon is read at the end anyway
                ItemSignal::Status => {
                    self.read_status().await;
                }
                signal => self.update(signal).await,
            }
        }
    }

    /// Read the status and show or hide the mirror. Returns whether it changed.
    async fn read_status(&mut self) -> bool {
        let old = self.status;
        self.status = ItemStatus::parse(self.get_string("Status").await.as_deref());
        self.icon().set_visible(self.status.visible());
        old != self.status
    }

    async fn update_status(&mut self) {
        if self.read_status().await {
            self.update_icon().await;
        }
    }

    async fn update_icon(&mut self) {
        let theme_path = self.get_string("IconThemePath").await;
        let icon_name = self.get_string("IconName").await;
        let attention_name = self.get_string("AttentionIconName").await;
        let overlay_name = self.get_string("OverlayIconName").await;

        if icon_name.is_some() || attention_name.is_some() || overlay_name.is_some() {
            let name = icon_name_for_status(self.status, icon_name.as_deref(), attention_name.as_deref());
            let resolved = resolve_icon_name(name, theme_path.as_deref(), self.icon_size());
            self.icon().set_icon_name(resolved);
        } else {
            self.set_icon_from_pixmap().await;
        }
    }

    async fn set_icon_from_pixmap(&mut self) {
        let pixmaps = match self.status {
            ItemStatus::Active => self.read("IconPixmap", self.proxy.icon_pixmap()).await,
            ItemStatus::NeedsAttention => {
                match self.read("AttentionIconPixmap", self.proxy.attention_icon_pixmap()).await {
                    Some(pixmaps) if !pixmaps.is_empty() => Some(pixmaps),
                    _ => self.read("IconPixmap", self.proxy.icon_pixmap()).await,
                }
            }
            ItemStatus::Passive => None,
        };

        let Some(pixmaps) = pixmaps.filter(|pixmaps| !pixmaps.is_empty()) else {
            log::warn!("no pixmaps to use for {}", self.key);
            self.icon().set_icon_name(MISSING_ICON);
            return;
        };
        let Some(best) = pixmap::largest_valid(pixmaps) else {
            log::warn!("no valid pixmaps found for {}", self.key);
            return;
        };

        let path = self.slots.next_path();
        let written = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || best.write_png(&path)).await
        };
        match written {
            Ok(Ok(())) => self.icon().set_icon_name(path.to_string_lossy()),
            Ok(Err(e)) => log::warn!("failed to save png of {}: {}", self.key, e),
            Err(e) => log::error!("png writer of {} failed: {}", self.key, e),
        }
    }

    async fn update_menu(&mut self) {
        self.menu = None;
        self.icon().set_primary_menu(None);
        self.icon().set_secondary_menu(None);

        let Some(path) = self.get_string("Menu").await.filter(|path| path != xapp_status_icon::dbus::sni::NO_MENU) else {
            return;
        };
        let menu: MenuRef = match RemoteMenu::new(&self.proxy, &path).await {
            Ok(menu) => menu,
            Err(e) => {
                log::warn!("could not attach to menu {} of {}: {}", path, self.key, e);
                return;
            }
        };

        let whitelisted = self.settings.borrow().is_activation_whitelisted(&self.sortable_name);
        if self.is_appindicator && !whitelisted {
            self.icon().set_primary_menu(Some(menu.clone()));
        }
        self.icon().set_secondary_menu(Some(menu.clone()));
        self.menu = Some(menu);
    }

    async fn update_tooltip(&mut self) {
        let use_label =
            self.is_appindicator || self.settings.borrow().is_tooltip_whitelisted(&self.sortable_name);
        let label = if use_label { self.get_string("XAyatanaLabel").await } else { None };
        let tool_tip = if label.is_none() { self.read("ToolTip", self.proxy.tool_tip()).await } else { None };
        let title = self.get_string("Title").await;

        let text = tooltip_text(label.as_deref(), tool_tip.as_ref(), title.as_deref());
        log::debug!("tooltip of {}: {:?}", self.key, text);
        self.icon().set_tooltip_text(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_refresh_reads_each_part_once_with_the_icon_last() {
        assert_eq!(FULL_REFRESH.last(), Some(&ItemSignal::Icon));
        for part in [ItemSignal::Icon, ItemSignal::Status, ItemSignal::Menu, ItemSignal::Tooltip] {
            assert_eq!(FULL_REFRESH.iter().filter(|p| **p == part).count(), 1);
        }
    }

    #[test]
    fn status_parsing() {
        assert_eq!(ItemStatus::parse(Some("Passive")), ItemStatus::Passive);
        assert_eq!(ItemStatus::parse(Some("NeedsAttention")), ItemStatus::NeedsAttention);
        assert_eq!(ItemStatus::parse(Some("whatever")), ItemStatus::Active);
        assert_eq!(ItemStatus::parse(None), ItemStatus::Active);
        assert!(!ItemStatus::Passive.visible());
    }

    #[test]
    fn primary_press_depends_on_item_kind() {
        assert_eq!(press_call(button::PRIMARY, 1, 2, false, false), Some(ItemCall::Activate { x: 1, y: 2 }));
        assert_eq!(press_call(button::PRIMARY, 1, 2, true, false), None);
        assert_eq!(press_call(button::PRIMARY, 1, 2, true, true), Some(ItemCall::SecondaryActivate { x: 1, y: 2 }));
        assert_eq!(press_call(button::MIDDLE, 1, 2, false, false), Some(ItemCall::SecondaryActivate { x: 1, y: 2 }));
        assert_eq!(press_call(button::SECONDARY, 1, 2, false, false), None);
    }

    #[test]
    fn secondary_release_without_menu_asks_for_context_menu() {
        assert_eq!(release_call(button::SECONDARY, 5, 6, false), Some(ItemCall::ContextMenu { x: 5, y: 6 }));
        assert_eq!(release_call(button::SECONDARY, 5, 6, true), None);
        assert_eq!(release_call(button::PRIMARY, 5, 6, false), None);
    }

    #[test]
    fn scrolling_keeps_delta_and_maps_orientation() {
        assert_eq!(scroll_call(-3, ScrollDirection::Up), ItemCall::Scroll { delta: -3, orientation: "vertical" });
        assert_eq!(scroll_call(1, ScrollDirection::Right), ItemCall::Scroll { delta: 1, orientation: "horizontal" });
    }

    #[test]
    fn attention_icon_is_preferred_when_needed() {
        assert_eq!(icon_name_for_status(ItemStatus::Active, Some("a"), Some("b")), "a");
        assert_eq!(icon_name_for_status(ItemStatus::NeedsAttention, Some("a"), Some("b")), "b");
        assert_eq!(icon_name_for_status(ItemStatus::NeedsAttention, Some("a"), None), "a");
        assert_eq!(icon_name_for_status(ItemStatus::Active, None, Some("b")), MISSING_ICON);
        assert_eq!(icon_name_for_status(ItemStatus::Passive, Some("a"), None), MISSING_ICON);
    }

    #[test]
    fn icon_names_resolve_against_the_theme_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hicolor/24x24/apps/tray.png");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"").unwrap();
        let theme = dir.path().to_str();

        assert_eq!(resolve_icon_name("tray", theme, 24), file.to_string_lossy());
        assert_eq!(resolve_icon_name("other", theme, 24), "other");
        assert_eq!(resolve_icon_name("/abs/icon.png", theme, 24), "/abs/icon.png");
        assert_eq!(resolve_icon_name("tray", None, 24), "tray");
    }

    #[test]
    fn tooltip_sources_in_order() {
        let tip: ToolTip = (String::new(), Vec::new(), "Title".to_owned(), "Body".to_owned());
        assert_eq!(tooltip_text(Some("42%"), Some(&tip), Some("app")), "42%");
        assert_eq!(tooltip_text(None, Some(&tip), Some("app")), "Title\nBody");

        let title_only: ToolTip = (String::new(), Vec::new(), "Title".to_owned(), String::new());
        assert_eq!(tooltip_text(Some(""), Some(&title_only), None), "Title");

        let empty: ToolTip = Default::default();
        assert_eq!(tooltip_text(None, Some(&empty), Some("steam")), "Steam");
        assert_eq!(tooltip_text(None, None, None), "");
    }

    #[test]
    fn capitalize_handles_unicode() {
        assert_eq!(capitalize("élan"), "Élan");
        assert_eq!(capitalize(""), "");
    }
}
