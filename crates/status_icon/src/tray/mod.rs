//! Legacy system tray (XEmbed) icons, used by the fallback backend.

use std::{fmt, path::PathBuf, sync::Arc};

use tokio::sync::mpsc;

use crate::{
    error::Result,
    menu::Rect,
    types::{PanelPosition, ScrollDirection},
};

#[cfg(feature = "x11")]
pub mod x11;

/// Room a menu needs below (or beside) the icon before it opens away from the panel edge.
const MENU_ROOM: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Horizontal,
    Vertical,
}

/// Where the docked icon currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrayGeometry {
    pub icon: Rect,
    /// Usable area of the monitor holding the icon.
    pub workarea: Rect,
    pub orientation: Orientation,
}

impl TrayGeometry {
    /// Click position and panel edge to report for this icon, as the Native protocol would.
    pub fn click_position(&self) -> (i32, i32, PanelPosition) {
        let (icon, area) = (self.icon, self.workarea);
        match self.orientation {
            Orientation::Horizontal => {
                if icon.y + icon.height + MENU_ROOM < area.y + area.height {
                    (icon.x, icon.y + icon.height, PanelPosition::Top)
                } else {
                    (icon.x, icon.y, PanelPosition::Bottom)
                }
            }
            Orientation::Vertical => {
                if icon.x + icon.width + MENU_ROOM < area.x + area.width {
                    (icon.x + icon.width, icon.y, PanelPosition::Left)
                } else {
                    (icon.x, icon.y, PanelPosition::Right)
                }
            }
        }
    }
}

/// Reported position when the tray can't tell where the icon is.
pub fn click_position(geometry: Option<&TrayGeometry>) -> (i32, i32, PanelPosition) {
    geometry.map(TrayGeometry::click_position).unwrap_or((0, 0, PanelPosition::Left))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayEvent {
    ButtonPress { button: u32, time: u32, geometry: Option<TrayGeometry> },
    ButtonRelease { button: u32, time: u32, geometry: Option<TrayGeometry> },
    Scroll { direction: ScrollDirection, time: u32 },
    /// A tray docked the icon, or let go of it.
    Embedded(bool),
}

impl TrayEvent {
    /// Delta reported for a discrete legacy scroll step.
    pub fn scroll_delta(direction: ScrollDirection) -> i32 {
        match direction {
            ScrollDirection::Up | ScrollDirection::Left => -1,
            ScrollDirection::Down | ScrollDirection::Right => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayImage {
    Themed(String),
    File(PathBuf),
}

impl TrayImage {
    pub fn from_icon_name(icon_name: &str) -> Option<Self> {
        if icon_name.is_empty() {
            None
        } else if std::path::Path::new(icon_name).is_absolute() {
            Some(TrayImage::File(PathBuf::from(icon_name)))
        } else {
            Some(TrayImage::Themed(icon_name.to_owned()))
        }
    }
}

/// An icon docked in a legacy system tray.
pub trait LegacyTray: fmt::Debug + Send {
    fn set_image(&mut self, image: &TrayImage) -> Result<()>;
    fn set_tooltip(&mut self, text: &str) -> Result<()>;
    fn set_visible(&mut self, visible: bool) -> Result<()>;
    fn is_embedded(&self) -> bool;
}

pub type TrayEvents = mpsc::UnboundedReceiver<TrayEvent>;

/// Creates legacy tray icons.
pub trait TrayFactory: fmt::Debug + Send + Sync {
    fn create(&self) -> Result<(Box<dyn LegacyTray>, TrayEvents)>;
}

pub type TrayFactoryRef = Arc<dyn TrayFactory>;

/// The tray used when no display is available. It never gets embedded.
#[derive(Debug, Default)]
pub struct NullTray;

impl LegacyTray for NullTray {
    fn set_image(&mut self, _image: &TrayImage) -> Result<()> {
        Ok(())
    }

    fn set_tooltip(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn set_visible(&mut self, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn is_embedded(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NullTrayFactory;

impl TrayFactory for NullTrayFactory {
    fn create(&self) -> Result<(Box<dyn LegacyTray>, TrayEvents)> {
        // the sender is dropped right away, so the event stream just ends
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok((Box::new(NullTray), rx))
    }
}

/// The factory for the current build: X11 when compiled in, otherwise [`NullTrayFactory`].
pub fn default_factory() -> TrayFactoryRef {
    #[cfg(feature = "x11")]
    {
        Arc::new(x11::X11TrayFactory::default())
    }
    #[cfg(not(feature = "x11"))]
    {
        Arc::new(NullTrayFactory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn geometry(icon: Rect, orientation: Orientation) -> TrayGeometry {
        TrayGeometry { icon, workarea: Rect { x: 0, y: 0, width: 1920, height: 1080 }, orientation }
    }

    #[test]
    fn horizontal_panels_open_away_from_the_edge() {
        let top = geometry(Rect { x: 500, y: 0, width: 24, height: 24 }, Orientation::Horizontal);
        assert_eq!(top.click_position(), (500, 24, PanelPosition::Top));

        let bottom = geometry(Rect { x: 500, y: 1056, width: 24, height: 24 }, Orientation::Horizontal);
        assert_eq!(bottom.click_position(), (500, 1056, PanelPosition::Bottom));
    }

    #[test]
    fn vertical_panels_open_sideways() {
        let left = geometry(Rect { x: 0, y: 300, width: 24, height: 24 }, Orientation::Vertical);
        assert_eq!(left.click_position(), (24, 300, PanelPosition::Left));

        let right = geometry(Rect { x: 1896, y: 300, width: 24, height: 24 }, Orientation::Vertical);
        assert_eq!(right.click_position(), (1896, 300, PanelPosition::Right));
    }

    #[test]
    fn scroll_steps_are_unit_deltas() {
        assert_eq!(TrayEvent::scroll_delta(ScrollDirection::Up), -1);
        assert_eq!(TrayEvent::scroll_delta(ScrollDirection::Left), -1);
        assert_eq!(TrayEvent::scroll_delta(ScrollDirection::Down), 1);
        assert_eq!(TrayEvent::scroll_delta(ScrollDirection::Right), 1);
    }

    #[test]
    fn icon_names_become_images() {
        assert_eq!(TrayImage::from_icon_name(""), None);
        assert_eq!(TrayImage::from_icon_name("mail-unread"), Some(TrayImage::Themed("mail-unread".to_owned())));
        assert_eq!(TrayImage::from_icon_name("/tmp/a.png"), Some(TrayImage::File(PathBuf::from("/tmp/a.png"))));
    }
}
