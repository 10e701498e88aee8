//! The `org.x.StatusIcon` interface, exported by producers and called by panel applets.

use zbus::{dbus_interface, dbus_proxy, SignalContext};

use crate::{
    bus::{CallSender, InboundCall, NativeProperties, NativeUpdate},
    types::{PanelPosition, ScrollDirection},
};

/// Server side of one native icon. Calls are forwarded to the owning icon.
#[derive(Debug)]
pub struct NativeIconInterface {
    pub(crate) props: NativeProperties,
    calls: CallSender,
}

impl NativeIconInterface {
    pub fn new(props: NativeProperties, calls: CallSender) -> Self {
        NativeIconInterface { props, calls }
    }

    fn forward(&self, call: InboundCall) {
        if self.calls.send(call).is_err() {
            log::debug!("native call arrived after its icon went away");
        }
    }

    /// Apply `update` and announce the changed properties.
    pub async fn apply(&mut self, update: NativeUpdate, ctxt: &SignalContext<'_>) -> zbus::Result<()> {
        self.props.apply(update.clone());
        match update {
            NativeUpdate::Sync(_) => {
                self.name_changed(ctxt).await?;
                self.label_changed(ctxt).await?;
                self.icon_name_changed(ctxt).await?;
                self.tooltip_text_changed(ctxt).await?;
                self.visible_changed(ctxt).await?;
                self.metadata_changed(ctxt).await?;
            }
            NativeUpdate::Name(_) => self.name_changed(ctxt).await?,
            NativeUpdate::IconName(_) => self.icon_name_changed(ctxt).await?,
            NativeUpdate::TooltipText(_) => self.tooltip_text_changed(ctxt).await?,
            NativeUpdate::Label(_) => self.label_changed(ctxt).await?,
            NativeUpdate::Visible(_) => self.visible_changed(ctxt).await?,
            NativeUpdate::Metadata(_) => self.metadata_changed(ctxt).await?,
            NativeUpdate::PrimaryMenuIsOpen(_) => self.primary_menu_is_open_changed(ctxt).await?,
            NativeUpdate::SecondaryMenuIsOpen(_) => self.secondary_menu_is_open_changed(ctxt).await?,
        }
        Ok(())
    }
}

#[dbus_interface(name = "org.x.StatusIcon")]
impl NativeIconInterface {
    fn button_press(&self, x: i32, y: i32, button: u32, time: u32, panel_position: i32) {
        self.forward(InboundCall::ButtonPress { x, y, button, time, panel_position: PanelPosition::from_wire(panel_position) });
    }

    fn button_release(&self, x: i32, y: i32, button: u32, time: u32, panel_position: i32) {
        self.forward(InboundCall::ButtonRelease {
            x,
            y,
            button,
            time,
            panel_position: PanelPosition::from_wire(panel_position),
        });
    }

    fn scroll(&self, delta: i32, direction: i32, time: u32) -> zbus::fdo::Result<()> {
        let direction = ScrollDirection::from_wire(direction)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("unknown scroll direction {}", direction)))?;
        self.forward(InboundCall::Scroll { delta, direction, time });
        Ok(())
    }

    #[dbus_interface(property)]
    fn name(&self) -> String {
        self.props.icon.name.clone()
    }

    #[dbus_interface(property)]
    fn label(&self) -> String {
        self.props.icon.label.clone()
    }

    #[dbus_interface(property)]
    fn icon_name(&self) -> String {
        self.props.icon.icon_name.clone()
    }

    #[dbus_interface(property)]
    fn tooltip_text(&self) -> String {
        self.props.icon.tooltip_text.clone()
    }

    #[dbus_interface(property)]
    fn visible(&self) -> bool {
        self.props.icon.visible
    }

    #[dbus_interface(property)]
    fn metadata(&self) -> String {
        self.props.icon.metadata.clone()
    }

    #[dbus_interface(property)]
    fn icon_size(&self) -> i32 {
        self.props.icon_size
    }

    /// Written by the consumer to tell the icon how big it is drawn.
    #[dbus_interface(property)]
    fn set_icon_size(&mut self, size: i32) {
        self.props.icon_size = size;
        self.forward(InboundCall::IconSizeChanged(size));
    }

    #[dbus_interface(property)]
    fn primary_menu_is_open(&self) -> bool {
        self.props.primary_menu_is_open
    }

    #[dbus_interface(property)]
    fn secondary_menu_is_open(&self) -> bool {
        self.props.secondary_menu_is_open
    }
}

#[dbus_proxy(interface = "org.x.StatusIcon")]
trait NativeIcon {
    fn button_press(&self, x: i32, y: i32, button: u32, time: u32, panel_position: i32) -> zbus::Result<()>;

    fn button_release(&self, x: i32, y: i32, button: u32, time: u32, panel_position: i32) -> zbus::Result<()>;

    fn scroll(&self, delta: i32, direction: i32, time: u32) -> zbus::Result<()>;

    #[dbus_proxy(property)]
    fn name(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn label(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn icon_name(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn tooltip_text(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn visible(&self) -> zbus::Result<bool>;

    #[dbus_proxy(property)]
    fn metadata(&self) -> zbus::Result<String>;

    #[dbus_proxy(property)]
    fn icon_size(&self) -> zbus::Result<i32>;

    #[dbus_proxy(property)]
    fn set_icon_size(&self, size: i32) -> zbus::Result<()>;

    #[dbus_proxy(property)]
    fn primary_menu_is_open(&self) -> zbus::Result<bool>;

    #[dbus_proxy(property)]
    fn secondary_menu_is_open(&self) -> zbus::Result<bool>;
}
