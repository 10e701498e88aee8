use crate::{
    tray::{LegacyTray, NullTray, TrayEvent, TrayEvents, TrayFactoryRef, TrayImage},
    types::BackendType,
};

use super::{Backend, IconSnapshot};

/// An icon docked into a legacy system tray. Needs nothing but a display.
#[derive(Debug)]
pub struct FallbackBackend {
    tray: Box<dyn LegacyTray>,
    events: TrayEvents,
}

impl FallbackBackend {
    /// Create the tray icon. Never fails, a tray that can't be created just never gets embedded.
    pub fn init(factory: &TrayFactoryRef) -> Self {
        match factory.create() {
            Ok((tray, events)) => FallbackBackend { tray, events },
            Err(e) => {
                log::warn!("failed to create legacy tray icon: {}", e);
                let (_, events) = tokio::sync::mpsc::unbounded_channel();
                FallbackBackend { tray: Box::new(NullTray), events }
            }
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.tray.is_embedded()
    }

    /// The next event of the tray icon. Pends forever once the tray went away.
    pub async fn next_event(&mut self) -> Option<TrayEvent> {
        match self.events.recv().await {
            Some(event) => Some(event),
            None => std::future::pending().await,
        }
    }

    fn apply_visible(&mut self, icon: &IconSnapshot) {
        // an icon without an image is never shown
        let visible = icon.props.visible && !icon.props.icon_name.is_empty();
        if let Err(e) = self.tray.set_visible(visible) {
            log::warn!("failed to change tray icon visibility: {}", e);
        }
    }
}

#[async_trait::async_trait]
impl Backend for FallbackBackend {
    fn kind(&self) -> BackendType {
        BackendType::Fallback
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.tray.set_visible(false) {
            log::debug!("failed to hide tray icon: {}", e);
        }
        self.events.close();
    }

    async fn sync(&mut self, icon: &IconSnapshot) {
        self.set_tooltip_text(icon).await;
        self.set_icon_name(icon).await;
    }

    async fn set_icon_name(&mut self, icon: &IconSnapshot) {
        if let Some(image) = TrayImage::from_icon_name(&icon.props.icon_name) {
            if let Err(e) = self.tray.set_image(&image) {
                log::warn!("failed to set tray icon image: {}", e);
            }
        }
        self.apply_visible(icon);
    }

    async fn set_tooltip_text(&mut self, icon: &IconSnapshot) {
        if let Err(e) = self.tray.set_tooltip(&icon.props.tooltip_text) {
            log::warn!("failed to set tray icon tooltip: {}", e);
        }
    }

    async fn set_visible(&mut self, icon: &IconSnapshot) {
        self.apply_visible(icon);
    }

    async fn set_label(&mut self, _icon: &IconSnapshot) {
        log::debug!("legacy tray icons have no label");
    }
}
