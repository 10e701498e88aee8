//! The seam between the status icon logic and the session bus.
//!
//! Everything the icons and the monitor need from D-Bus goes through [`SessionBus`], so the
//! negotiation logic can be driven by an in-memory bus in tests. [`DbusSession`] is the real
//! implementation on top of zbus.

use std::{fmt, sync::Arc};

use futures::stream::BoxStream;

use crate::{
    error::Result,
    menu::MenuRef,
    pixmap::WirePixmap,
    types::{PanelPosition, ScrollDirection},
};

mod session;
pub use session::DbusSession;

/// A `NameOwnerChanged` signal. Empty owners are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOwnerChange {
    pub name: String,
    pub old_owner: Option<String>,
    pub new_owner: Option<String>,
}

impl NameOwnerChange {
    pub fn appeared(&self) -> bool {
        self.new_owner.is_some()
    }

    pub fn vanished(&self) -> bool {
        self.new_owner.is_none()
    }
}

/// Outcome of a do-not-queue name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRequest {
    Acquired,
    Unavailable,
}

/// Calls made on objects exported by this process, routed to the icon that owns the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCall {
    ButtonPress { x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition },
    ButtonRelease { x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition },
    Scroll { delta: i32, direction: ScrollDirection, time: u32 },
    IconSizeChanged(i32),
    SniActivate { x: i32, y: i32 },
    SniSecondaryActivate { x: i32, y: i32 },
    SniContextMenu { x: i32, y: i32 },
    SniScroll { delta: i32, orientation: String },
}

pub type CallSender = tokio::sync::mpsc::UnboundedSender<InboundCall>;

/// The display state every backend mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IconProperties {
    pub name: String,
    pub icon_name: String,
    pub tooltip_text: String,
    pub label: String,
    pub visible: bool,
    pub metadata: String,
}

/// Everything exposed on the `org.x.StatusIcon` interface.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NativeProperties {
    pub icon: IconProperties,
    pub icon_size: i32,
    pub primary_menu_is_open: bool,
    pub secondary_menu_is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeUpdate {
    /// Replace all producer written properties at once.
    Sync(IconProperties),
    Name(String),
    IconName(String),
    TooltipText(String),
    Label(String),
    Visible(bool),
    Metadata(String),
    PrimaryMenuIsOpen(bool),
    SecondaryMenuIsOpen(bool),
}

impl NativeProperties {
    pub fn apply(&mut self, update: NativeUpdate) {
        match update {
            NativeUpdate::Sync(icon) => self.icon = icon,
            NativeUpdate::Name(name) => self.icon.name = name,
            NativeUpdate::IconName(icon_name) => self.icon.icon_name = icon_name,
            NativeUpdate::TooltipText(text) => self.icon.tooltip_text = text,
            NativeUpdate::Label(label) => self.icon.label = label,
            NativeUpdate::Visible(visible) => self.icon.visible = visible,
            NativeUpdate::Metadata(metadata) => self.icon.metadata = metadata,
            NativeUpdate::PrimaryMenuIsOpen(open) => self.primary_menu_is_open = open,
            NativeUpdate::SecondaryMenuIsOpen(open) => self.secondary_menu_is_open = open,
        }
    }
}

/// The `ToolTip` property, `(icon name, icon pixmaps, title, description)`.
pub type ToolTip = (String, Vec<WirePixmap>, String, String);

/// Everything exposed on an `org.kde.StatusNotifierItem` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniProperties {
    pub id: String,
    pub category: String,
    pub status: String,
    pub title: String,
    pub icon_name: String,
    pub icon_theme_path: String,
    pub icon_pixmap: Vec<WirePixmap>,
    pub tool_tip: ToolTip,
    pub menu: String,
    pub label: String,
    pub label_guide: String,
}

impl SniProperties {
    pub fn new(id: impl Into<String>, menu: impl Into<String>) -> Self {
        SniProperties {
            id: id.into(),
            category: "ApplicationStatus".to_owned(),
            status: "Active".to_owned(),
            title: String::new(),
            icon_name: String::new(),
            icon_theme_path: String::new(),
            icon_pixmap: Vec::new(),
            tool_tip: (String::new(), Vec::new(), String::new(), String::new()),
            menu: menu.into(),
            label: String::new(),
            label_guide: String::new(),
        }
    }
}

/// A change to an exported SNI item. Each variant is followed by its change signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniUpdate {
    /// `NewIcon`
    Icon { name: String, pixmap: Vec<WirePixmap> },
    /// `NewToolTip`
    ToolTip(ToolTip),
    /// `NewStatus`
    Status(String),
    /// `NewTitle` and `XAyatanaNewLabel`
    Label(String),
    /// `NewMenu`
    Menu(String),
    /// No signal exists for the id.
    Id(String),
}

impl SniProperties {
    pub fn apply(&mut self, update: SniUpdate) {
        match update {
            SniUpdate::Icon { name, pixmap } => {
                self.icon_name = name;
                self.icon_pixmap = pixmap;
            }
            SniUpdate::ToolTip(tool_tip) => self.tool_tip = tool_tip,
            SniUpdate::Status(status) => self.status = status,
            // the label doubles as the title
            SniUpdate::Label(label) => {
                self.title = label.clone();
                self.label = label;
            }
            SniUpdate::Menu(menu) => self.menu = menu,
            SniUpdate::Id(id) => self.id = id,
        }
    }
}

/// A change in the set of native icons exported by one remote process.
#[derive(Debug, Clone)]
pub enum ManagedIconChange {
    Added(RemoteIcon),
    Removed { path: String },
}

/// The native icons of one remote process, and what happens to them from now on.
pub struct NativeIconWatch {
    pub initial: Vec<RemoteIcon>,
    pub changes: BoxStream<'static, ManagedIconChange>,
}

impl fmt::Debug for NativeIconWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeIconWatch").field("initial", &self.initial).finish_non_exhaustive()
    }
}

/// A native icon exported by another process, as seen by a consumer.
#[async_trait::async_trait]
pub trait RemoteStatusIcon: fmt::Debug + Send + Sync {
    fn bus_name(&self) -> &str;
    fn path(&self) -> &str;
    async fn properties(&self) -> Result<NativeProperties>;
    async fn button_press(&self, x: i32, y: i32, button: u32, time: u32, position: PanelPosition) -> Result<()>;
    async fn button_release(&self, x: i32, y: i32, button: u32, time: u32, position: PanelPosition) -> Result<()>;
    async fn scroll(&self, delta: i32, direction: ScrollDirection, time: u32) -> Result<()>;
    async fn set_icon_size(&self, size: i32) -> Result<()>;
}

pub type RemoteIcon = Arc<dyn RemoteStatusIcon>;

/// What the status icon machinery needs from the session bus.
#[async_trait::async_trait]
pub trait SessionBus: fmt::Debug + Send + Sync {
    fn unique_name(&self) -> Option<String>;

    async fn list_names(&self) -> Result<Vec<String>>;
    async fn name_has_owner(&self, name: &str) -> Result<bool>;
    /// Request `name` without queueing.
    async fn request_name(&self, name: &str) -> Result<NameRequest>;
    async fn release_name(&self, name: &str) -> Result<()>;
    /// Owner changes of `namespace` and every name below it.
    async fn watch_name_owners(&self, namespace: &str) -> Result<BoxStream<'static, NameOwnerChange>>;
    /// Names this connection loses.
    async fn watch_name_lost(&self) -> Result<BoxStream<'static, String>>;

    async fn export_object_manager(&self) -> Result<()>;
    async fn unexport_object_manager(&self) -> Result<()>;
    /// Export a native icon. Returns false when `path` is already taken.
    async fn export_native_icon(&self, path: &str, properties: NativeProperties, calls: CallSender) -> Result<bool>;
    async fn update_native_icon(&self, path: &str, update: NativeUpdate) -> Result<()>;
    async fn unexport_native_icon(&self, path: &str) -> Result<()>;

    async fn export_sni_item(&self, path: &str, properties: SniProperties, calls: CallSender) -> Result<bool>;
    async fn update_sni_item(&self, path: &str, update: SniUpdate) -> Result<()>;
    async fn unexport_sni_item(&self, path: &str) -> Result<()>;
    /// Serve `menu` at `path`, replacing a menu exported there before, and announce its new
    /// revisions to remote renderers.
    async fn export_menu(&self, path: &str, menu: MenuRef) -> Result<()>;
    /// Unexporting a path without a menu succeeds.
    async fn unexport_menu(&self, path: &str) -> Result<()>;
    /// Call `RegisterStatusNotifierItem` on the watcher with the object path only. The watcher
    /// takes the bus name from the message sender.
    async fn register_sni_item(&self, item_path: &str) -> Result<()>;

    async fn watch_native_icons(&self, bus_name: &str) -> Result<NativeIconWatch>;
}

pub type SessionBusRef = Arc<dyn SessionBus>;
