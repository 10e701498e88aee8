//! `org.kde.StatusNotifierItem`, as exported by icons on the SNI backend and read by the watcher.

use zbus::{
    dbus_interface, dbus_proxy,
    zvariant::{ObjectPath, OwnedObjectPath},
    SignalContext,
};

use crate::{
    bus::{CallSender, InboundCall, SniProperties, SniUpdate, ToolTip},
    pixmap::WirePixmap,
};

/// Menu path meaning "this item has no menu".
pub const NO_MENU: &str = "/";

pub(crate) fn object_path(path: &str) -> OwnedObjectPath {
    OwnedObjectPath::try_from(path.to_owned()).unwrap_or_else(|e| {
        log::warn!("invalid object path {:?}: {}", path, e);
        ObjectPath::from_static_str_unchecked(NO_MENU).into()
    })
}

#[derive(Debug)]
pub struct SniItemInterface {
    props: SniProperties,
    calls: CallSender,
}

impl SniItemInterface {
    pub fn new(props: SniProperties, calls: CallSender) -> Self {
        SniItemInterface { props, calls }
    }

    fn forward(&self, call: InboundCall) {
        if self.calls.send(call).is_err() {
            log::debug!("sni call arrived after its icon went away");
        }
    }

    /// Apply `update` and emit the matching change signal.
    pub async fn apply(&mut self, update: SniUpdate, ctxt: &SignalContext<'_>) -> zbus::Result<()> {
        self.props.apply(update.clone());
        match update {
            SniUpdate::Icon { .. } => SniItemInterface::new_icon(ctxt).await,
            SniUpdate::ToolTip(_) => SniItemInterface::new_tool_tip(ctxt).await,
            SniUpdate::Status(_) => SniItemInterface::new_status(ctxt, &self.props.status).await,
            SniUpdate::Label(_) => {
                SniItemInterface::new_title(ctxt).await?;
                SniItemInterface::x_ayatana_new_label(ctxt, &self.props.label, &self.props.label_guide).await
            }
            SniUpdate::Menu(_) => SniItemInterface::new_menu(ctxt).await,
            SniUpdate::Id(_) => Ok(()),
        }
    }
}

#[dbus_interface(name = "org.kde.StatusNotifierItem")]
impl SniItemInterface {
    fn activate(&self, x: i32, y: i32) {
        self.forward(InboundCall::SniActivate { x, y });
    }

    fn secondary_activate(&self, x: i32, y: i32) {
        self.forward(InboundCall::SniSecondaryActivate { x, y });
    }

    fn context_menu(&self, x: i32, y: i32) {
        self.forward(InboundCall::SniContextMenu { x, y });
    }

    fn scroll(&self, delta: i32, orientation: String) {
        self.forward(InboundCall::SniScroll { delta, orientation });
    }

    #[dbus_interface(property)]
    fn category(&self) -> String {
        self.props.category.clone()
    }

    #[dbus_interface(property)]
    fn id(&self) -> String {
        self.props.id.clone()
    }

    #[dbus_interface(property)]
    fn title(&self) -> String {
        self.props.title.clone()
    }

    #[dbus_interface(property)]
    fn status(&self) -> String {
        self.props.status.clone()
    }

    #[dbus_interface(property)]
    fn window_id(&self) -> i32 {
        0
    }

    #[dbus_interface(property)]
    fn icon_name(&self) -> String {
        self.props.icon_name.clone()
    }

    #[dbus_interface(property)]
    fn icon_theme_path(&self) -> String {
        self.props.icon_theme_path.clone()
    }

    #[dbus_interface(property)]
    fn icon_pixmap(&self) -> Vec<WirePixmap> {
        self.props.icon_pixmap.clone()
    }

    #[dbus_interface(property)]
    fn overlay_icon_name(&self) -> String {
        String::new()
    }

    #[dbus_interface(property)]
    fn overlay_icon_pixmap(&self) -> Vec<WirePixmap> {
        Vec::new()
    }

    #[dbus_interface(property)]
    fn attention_icon_name(&self) -> String {
        String::new()
    }

    #[dbus_interface(property)]
    fn attention_icon_pixmap(&self) -> Vec<WirePixmap> {
        Vec::new()
    }

    #[dbus_interface(property)]
    fn attention_movie_name(&self) -> String {
        String::new()
    }

    #[dbus_interface(property)]
    fn tool_tip(&self) -> ToolTip {
        self.props.tool_tip.clone()
    }

    #[dbus_interface(property)]
    fn item_is_menu(&self) -> bool {
        false
    }

    #[dbus_interface(property)]
    fn menu(&self) -> OwnedObjectPath {
        object_path(&self.props.menu)
    }

    #[dbus_interface(property)]
    fn x_ayatana_label(&self) -> String {
        self.props.label.clone()
    }

    #[dbus_interface(property)]
    fn x_ayatana_label_guide(&self) -> String {
        self.props.label_guide.clone()
    }

    #[dbus_interface(signal)]
    async fn new_title(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_icon(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_attention_icon(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_overlay_icon(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_tool_tip(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_status(ctxt: &SignalContext<'_>, status: &str) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn new_menu(ctxt: &SignalContext<'_>) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn x_ayatana_new_label(ctxt: &SignalContext<'_>, label: &str, guide: &str) -> zbus::Result<()>;
}

#[dbus_proxy(interface = "org.kde.StatusNotifierItem", default_path = "/StatusNotifierItem")]
pub trait StatusNotifierItem {
    fn activate(&self, x: i32, y: i32) -> zbus::Result<()>;

    fn context_menu(&self, x: i32, y: i32) -> zbus::Result<()>;

    fn scroll(&self, delta: i32, orientation: &str) -> zbus::Result<()>;

    fn secondary_activate(&self, x: i32, y: i32) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_attention_icon(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_icon(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_overlay_icon(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_status(&self, status: &str) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_title(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_tool_tip(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn new_menu(&self) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn x_ayatana_new_label(&self, label: &str, guide: &str) -> zbus::Result<()>;

    #[dbus_proxy(property)]
    fn attention_icon_name(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn attention_icon_pixmap(&self) -> zbus::Result<Vec<WirePixmap>>;

    #[dbus_proxy(property)]
    fn category(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn icon_name(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn icon_pixmap(&self) -> zbus::Result<Vec<WirePixmap>>;

    #[dbus_proxy(property)]
    fn icon_theme_path(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn overlay_icon_name(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn id(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn item_is_menu(&self) -> zbus::Result<bool>;

    #[dbus_proxy(property)]
    fn menu(&self) -> zbus::Result<OwnedObjectPath>;

    #[dbus_proxy(property)]
    fn status(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn title(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn tool_tip(&self) -> zbus::Result<ToolTip>;

    #[dbus_proxy(property)]
    fn x_ayatana_label(&self) -> zbus::Result<String>;
}
