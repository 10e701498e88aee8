//! The three interchangeable ways of putting an icon on screen.
//!
//! [`ActiveBackend`] holds the private state of at most one backend. Switching is always
//! `cleanup` of the old one, construction of the new one, then `sync`.

use crate::{
    bus::IconProperties,
    menu::MenuRef,
    types::BackendType,
};

pub mod fallback;
pub mod native;
pub mod sni;

pub use fallback::FallbackBackend;
pub use native::NativeBackend;
pub use sni::SniBackend;

/// The buffered state of an icon at the moment a backend is told about it.
#[derive(Debug, Clone, Default)]
pub struct IconSnapshot {
    pub props: IconProperties,
    pub primary_menu: Option<MenuRef>,
    pub secondary_menu: Option<MenuRef>,
    pub icon_size: i32,
}

/// Operations every backend provides.
///
/// Setters receive the whole snapshot because some of them depend on more than one property,
/// e.g. the fallback hides the icon while no image is set no matter what `visible` says.
#[async_trait::async_trait]
pub trait Backend: Send {
    fn kind(&self) -> BackendType;

    /// Tear down everything this backend exported or created.
    async fn cleanup(&mut self);

    /// Push every buffered property.
    async fn sync(&mut self, icon: &IconSnapshot);

    async fn set_icon_name(&mut self, icon: &IconSnapshot);
    async fn set_tooltip_text(&mut self, icon: &IconSnapshot);
    async fn set_visible(&mut self, icon: &IconSnapshot);
    async fn set_label(&mut self, icon: &IconSnapshot);

    async fn set_name(&mut self, _icon: &IconSnapshot) {}
    async fn set_metadata(&mut self, _icon: &IconSnapshot) {}
    async fn menus_changed(&mut self, _icon: &IconSnapshot) {}
}

/// Which backend an icon currently uses, together with its private state.
#[derive(Debug, Default)]
pub enum ActiveBackend {
    #[default]
    None,
    Native(NativeBackend),
    Sni(SniBackend),
    Fallback(FallbackBackend),
}

impl ActiveBackend {
    pub fn kind(&self) -> BackendType {
        match self {
            ActiveBackend::None => BackendType::None,
            ActiveBackend::Native(_) => BackendType::Native,
            ActiveBackend::Sni(_) => BackendType::Sni,
            ActiveBackend::Fallback(_) => BackendType::Fallback,
        }
    }

    pub fn ops(&mut self) -> Option<&mut dyn Backend> {
        match self {
            ActiveBackend::None => None,
            ActiveBackend::Native(backend) => Some(backend),
            ActiveBackend::Sni(backend) => Some(backend),
            ActiveBackend::Fallback(backend) => Some(backend),
        }
    }

    /// Clean up the current backend and leave `None` behind.
    pub async fn take_down(&mut self) {
        if let Some(ops) = self.ops() {
            log::debug!("cleaning up {} backend", ops.kind());
            ops.cleanup().await;
        }
        *self = ActiveBackend::None;
    }

    /// Resolves with the next legacy tray event while the fallback is active, never otherwise.
    pub async fn next_tray_event(&mut self) -> Option<crate::tray::TrayEvent> {
        match self {
            ActiveBackend::Fallback(fallback) => fallback.next_event().await,
            _ => std::future::pending().await,
        }
    }
}

/// What backend discovery found on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Availability {
    /// A consumer of native icons is on the bus.
    pub monitors: bool,
    /// A StatusNotifierWatcher is on the bus.
    pub watcher: bool,
}

/// The backend an icon should use for what discovery found.
pub fn choose_backend(found: Availability, fail_counter: u32, allow_sni: bool) -> BackendType {
    if found.monitors && fail_counter < crate::context::MAX_NAME_FAILS {
        BackendType::Native
    } else if allow_sni && found.watcher {
        BackendType::Sni
    } else {
        BackendType::Fallback
    }
}
