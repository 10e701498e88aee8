use crate::{
    bus::{CallSender, NativeProperties, NativeUpdate},
    context::StatusIconContext,
    error::{Error, Result},
    types::{button, BackendType},
};

use super::{Backend, IconSnapshot};

/// Paths tried before giving up when another object sits where a native icon should go.
const MAX_PATH_ATTEMPTS: usize = 16;

/// An icon exported on the `org.x.StatusIcon` interface below the shared object manager.
#[derive(Debug)]
pub struct NativeBackend {
    ctx: StatusIconContext,
    path: String,
}

impl NativeBackend {
    /// Export the icon at a fresh path. Owning the bus name is left to the caller, since it is
    /// shared by every native icon of the process.
    pub async fn init(ctx: &StatusIconContext, icon: &IconSnapshot, calls: CallSender) -> Result<Self> {
        ctx.acquire_exporter().await?;
        let properties = NativeProperties { icon: icon.props.clone(), icon_size: icon.icon_size, ..Default::default() };

        for _ in 0..MAX_PATH_ATTEMPTS {
            let path = ctx.next_native_path();
            match ctx.bus().export_native_icon(&path, properties.clone(), calls.clone()).await {
                Ok(true) => {
                    log::debug!("exported native icon at {}", path);
                    return Ok(NativeBackend { ctx: ctx.clone(), path });
                }
                Ok(false) => log::debug!("{} is taken, trying the next path", path),
                Err(e) => {
                    ctx.release_exporter().await?;
                    return Err(e);
                }
            }
        }
        ctx.release_exporter().await?;
        Err(Error::PathTaken(crate::names::ICON_SUB_PATH.to_owned()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn update(&self, update: NativeUpdate) {
        if let Err(e) = self.ctx.bus().update_native_icon(&self.path, update).await {
            log::warn!("failed to update native icon {}: {}", self.path, e);
        }
    }

    /// Publish whether the menu of `button` is currently shown.
    pub async fn set_menu_open(&mut self, button: u32, open: bool) {
        match button {
            button::PRIMARY => self.update(NativeUpdate::PrimaryMenuIsOpen(open)).await,
            button::SECONDARY => self.update(NativeUpdate::SecondaryMenuIsOpen(open)).await,
            _ => {}
        }
    }
}

#[async_trait::async_trait]
impl Backend for NativeBackend {
    fn kind(&self) -> BackendType {
        BackendType::Native
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.ctx.bus().unexport_native_icon(&self.path).await {
            log::warn!("failed to unexport native icon {}: {}", self.path, e);
        }
        if let Err(e) = self.ctx.release_exporter().await {
            log::warn!("failed to release the object manager: {}", e);
        }
    }

    async fn sync(&mut self, icon: &IconSnapshot) {
        log::debug!("syncing all properties to {}", self.path);
        self.update(NativeUpdate::Sync(icon.props.clone())).await;
    }

    async fn set_icon_name(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::IconName(icon.props.icon_name.clone())).await;
    }

    async fn set_tooltip_text(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::TooltipText(icon.props.tooltip_text.clone())).await;
    }

    async fn set_visible(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::Visible(icon.props.visible)).await;
    }

    async fn set_label(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::Label(icon.props.label.clone())).await;
    }

    async fn set_name(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::Name(icon.props.name.clone())).await;
    }

    async fn set_metadata(&mut self, icon: &IconSnapshot) {
        self.update(NativeUpdate::Metadata(icon.props.metadata.clone())).await;
    }
}
