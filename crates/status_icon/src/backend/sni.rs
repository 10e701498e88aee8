use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::{
    bus::{CallSender, SessionBusRef, SniProperties, SniUpdate},
    context::StatusIconContext,
    dbus::sni::NO_MENU,
    error::{Error, Result},
    names,
    pixmap::{Pixmap, WirePixmap},
    types::BackendType,
};

use super::{Backend, IconSnapshot};

/// Size file based icons are scaled to while no consumer told us better.
pub const DEFAULT_ICON_SIZE: u32 = 24;

/// An icon exported as an `org.kde.StatusNotifierItem` and registered with the watcher.
#[derive(Debug)]
pub struct SniBackend {
    bus: SessionBusRef,
    item_path: String,
    menu_path: String,
    menu_exported: bool,
}

impl SniBackend {
    /// Export the item and its menu, then register with the watcher. Cancelling `cancel` abandons
    /// the registration with [`Error::Cancelled`] and unexports again.
    pub async fn init(ctx: &StatusIconContext, icon: &IconSnapshot, calls: CallSender, cancel: &CancellationToken) -> Result<Self> {
        let index = ctx.next_sni_index();
        let item_path = names::sni_item_path(index);
        let bus = ctx.bus().clone();

        if !bus.export_sni_item(&item_path, SniProperties::new(icon.props.name.clone(), NO_MENU), calls).await? {
            return Err(Error::PathTaken(item_path));
        }
        let mut backend = SniBackend { bus, item_path, menu_path: names::sni_menu_path(index), menu_exported: false };
        backend.export_menu(icon).await;

        log::debug!("registering {} with the watcher", backend.item_path);
        let registered = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = backend.bus.register_sni_item(&backend.item_path) => result,
        };
        if let Err(e) = registered {
            if !e.is_cancelled() {
                log::warn!("failed to register status notifier item {}: {}", backend.item_path, e);
            }
            backend.cleanup().await;
            return Err(e);
        }
        Ok(backend)
    }

    pub fn item_path(&self) -> &str {
        &self.item_path
    }

    async fn update(&self, update: SniUpdate) {
        if let Err(e) = self.bus.update_sni_item(&self.item_path, update).await {
            log::warn!("failed to update status notifier item {}: {}", self.item_path, e);
        }
    }

    /// Serve the primary menu, or the secondary one, from the menu path. Without either the item
    /// advertises `/`.
    async fn export_menu(&mut self, icon: &IconSnapshot) {
        if self.menu_exported {
            if let Err(e) = self.bus.unexport_menu(&self.menu_path).await {
                log::warn!("failed to unexport menu {}: {}", self.menu_path, e);
            }
            self.menu_exported = false;
        }

        let menu_path = match icon.primary_menu.as_ref().or(icon.secondary_menu.as_ref()) {
            Some(menu) => match self.bus.export_menu(&self.menu_path, menu.clone()).await {
                Ok(()) => {
                    self.menu_exported = true;
                    self.menu_path.clone()
                }
                Err(e) => {
                    log::warn!("failed to export menu at {}: {}", self.menu_path, e);
                    NO_MENU.to_owned()
                }
            },
            None => NO_MENU.to_owned(),
        };
        self.update(SniUpdate::Menu(menu_path)).await;
    }
}

/// The `IconName` and `IconPixmap` values for an icon name, which may be an absolute file path.
pub async fn item_icon(icon_name: &str, icon_size: i32) -> (String, Vec<WirePixmap>) {
    if icon_name.is_empty() {
        return (String::new(), Vec::new());
    }
    if !Path::new(icon_name).is_absolute() {
        return (icon_name.to_owned(), Vec::new());
    }

    let size = u32::try_from(icon_size).ok().filter(|size| *size > 0).unwrap_or(DEFAULT_ICON_SIZE);
    let path = PathBuf::from(icon_name);
    match tokio::task::spawn_blocking(move || Pixmap::load_file(&path, size)).await {
        Ok(Ok(pixmap)) => (String::new(), vec![pixmap.into_wire()]),
        Ok(Err(e)) => {
            log::warn!("{}", e);
            (String::new(), Vec::new())
        }
        Err(e) => {
            log::warn!("icon loading task failed: {}", e);
            (String::new(), Vec::new())
        }
    }
}

pub fn item_status(visible: bool) -> &'static str {
    if visible {
        "Active"
    } else {
        "Passive"
    }
}

#[async_trait::async_trait]
impl Backend for SniBackend {
    fn kind(&self) -> BackendType {
        BackendType::Sni
    }

    async fn cleanup(&mut self) {
        if self.menu_exported {
            if let Err(e) = self.bus.unexport_menu(&self.menu_path).await {
                log::warn!("failed to unexport menu {}: {}", self.menu_path, e);
            }
            self.menu_exported = false;
        }
        if let Err(e) = self.bus.unexport_sni_item(&self.item_path).await {
            log::warn!("failed to unexport status notifier item {}: {}", self.item_path, e);
        }
    }

    async fn sync(&mut self, icon: &IconSnapshot) {
        self.set_name(icon).await;
        self.set_icon_name(icon).await;
        self.set_tooltip_text(icon).await;
        self.set_visible(icon).await;
        self.set_label(icon).await;
        self.export_menu(icon).await;
    }

    async fn set_icon_name(&mut self, icon: &IconSnapshot) {
        let (name, pixmap) = item_icon(&icon.props.icon_name, icon.icon_size).await;
        self.update(SniUpdate::Icon { name, pixmap }).await;
    }

    async fn set_tooltip_text(&mut self, icon: &IconSnapshot) {
        self.update(SniUpdate::ToolTip((String::new(), Vec::new(), icon.props.tooltip_text.clone(), String::new())))
            .await;
    }

    async fn set_visible(&mut self, icon: &IconSnapshot) {
        self.update(SniUpdate::Status(item_status(icon.props.visible).to_owned())).await;
    }

    async fn set_label(&mut self, icon: &IconSnapshot) {
        self.update(SniUpdate::Label(icon.props.label.clone())).await;
    }

    async fn set_name(&mut self, icon: &IconSnapshot) {
        self.update(SniUpdate::Id(icon.props.name.clone())).await;
    }

    async fn menus_changed(&mut self, icon: &IconSnapshot) {
        self.export_menu(icon).await;
    }
}
