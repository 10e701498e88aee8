//! Menus attached to a status icon.
//!
//! The library never draws a menu itself. Applications hand in something implementing [`Menu`],
//! which is asked to pop up at a [`MenuPlacement`] for Native clicks and is exported over
//! `com.canonical.dbusmenu` for StatusNotifierItem hosts.

use std::{fmt, sync::Arc};

use tokio::sync::watch;

use crate::types::{button, PanelPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleType {
    #[default]
    None,
    Checkmark,
    Radio,
}

impl ToggleType {
    /// Value of the dbusmenu `toggle-type` property.
    pub fn dbusmenu_name(self) -> &'static str {
        match self {
            ToggleType::None => "",
            ToggleType::Checkmark => "checkmark",
            ToggleType::Radio => "radio",
        }
    }
}

/// One entry of a menu tree. The root has id 0 and is never shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: i32,
    pub label: String,
    pub icon_name: Option<String>,
    pub enabled: bool,
    pub visible: bool,
    pub separator: bool,
    pub toggle_type: ToggleType,
    pub toggle_state: bool,
    pub children: Vec<MenuItem>,
}

impl Default for MenuItem {
    fn default() -> Self {
        MenuItem {
            id: 0,
            label: String::new(),
            icon_name: None,
            enabled: true,
            visible: true,
            separator: false,
            toggle_type: ToggleType::None,
            toggle_state: false,
            children: Vec::new(),
        }
    }
}

impl MenuItem {
    pub fn new(id: i32, label: impl Into<String>) -> Self {
        MenuItem { id, label: label.into(), ..Default::default() }
    }

    pub fn separator(id: i32) -> Self {
        MenuItem { id, separator: true, ..Default::default() }
    }

    pub fn root(children: Vec<MenuItem>) -> Self {
        MenuItem { children, ..Default::default() }
    }

    pub fn with_children(mut self, children: Vec<MenuItem>) -> Self {
        self.children = children;
        self
    }

    /// Depth first lookup of the item with `id`.
    pub fn find(&self, id: i32) -> Option<&MenuItem> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

/// Compass point of a rectangle used to anchor a popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gravity {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Where a menu should appear for a click on an icon.
///
/// `origin` is the top left corner of a throwaway icon sized window, `rect` the anchor rectangle
/// relative to it. The menu's `menu_anchor` corner is attached to the rectangle's `rect_anchor`
/// corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuPlacement {
    pub origin: (i32, i32),
    pub rect: Rect,
    pub rect_anchor: Gravity,
    pub menu_anchor: Gravity,
    pub button: u32,
    pub time: u32,
}

impl MenuPlacement {
    /// Placement for a click at `x`,`y` on an icon of `icon_size` in a panel at `position`.
    pub fn for_click(x: i32, y: i32, icon_size: i32, position: PanelPosition, button: u32, time: u32) -> Self {
        let (origin, rect_anchor, menu_anchor) = match position {
            PanelPosition::Top => ((x, y - icon_size), Gravity::SouthWest, Gravity::NorthWest),
            PanelPosition::Left => ((x - icon_size, y), Gravity::NorthEast, Gravity::NorthWest),
            PanelPosition::Right => ((x, y), Gravity::NorthWest, Gravity::NorthEast),
            PanelPosition::Bottom => ((x, y), Gravity::NorthWest, Gravity::SouthWest),
        };
        MenuPlacement {
            origin,
            rect: Rect { x: 0, y: 0, width: icon_size, height: icon_size },
            rect_anchor,
            menu_anchor,
            button,
            time,
        }
    }
}

/// A menu owned by the application.
#[async_trait::async_trait]
pub trait Menu: fmt::Debug + Send + Sync {
    /// The current tree, rooted at an item with id 0.
    fn layout(&self) -> MenuItem;

    /// Bumped whenever [`Menu::layout`] changes.
    fn revision(&self) -> u32 {
        0
    }

    /// Announces every new [`Menu::revision`]. Menus that never change return `None`.
    fn watch_revision(&self) -> Option<watch::Receiver<u32>> {
        None
    }

    /// An item was clicked in a remote rendering of this menu.
    fn activate(&self, id: i32);

    /// Show the menu and resolve once it is closed again.
    async fn popup(&self, placement: MenuPlacement);
}

pub type MenuRef = Arc<dyn Menu>;

/// The menu a click with `button` should open.
pub fn menu_for_button<'a>(button: u32, primary: Option<&'a MenuRef>, secondary: Option<&'a MenuRef>) -> Option<&'a MenuRef> {
    match button {
        button::PRIMARY => primary,
        button::SECONDARY => secondary,
        _ => None,
    }
}

/// Whether two optional menu references point at the same menu.
pub fn same_menu(a: Option<&MenuRef>, b: Option<&MenuRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// A menu described by a fixed tree. Clicks are forwarded on a channel, popups are logged and
/// close immediately, which suits headless producers whose menus only ever show up remotely.
#[derive(Debug)]
pub struct StaticMenu {
    root: std::sync::Mutex<MenuItem>,
    revision: watch::Sender<u32>,
    activated: tokio::sync::mpsc::UnboundedSender<i32>,
}

impl StaticMenu {
    pub fn new(items: Vec<MenuItem>) -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<i32>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let menu = StaticMenu {
            root: std::sync::Mutex::new(MenuItem::root(items)),
            revision: watch::channel(0).0,
            activated: tx,
        };
        (Arc::new(menu), rx)
    }

    pub fn set_items(&self, items: Vec<MenuItem>) {
        *self.root.lock().unwrap() = MenuItem::root(items); // unwrap: mutex poisoning is okay
        self.revision.send_modify(|revision| *revision += 1);
    }
}

#[async_trait::async_trait]
impl Menu for StaticMenu {
    fn layout(&self) -> MenuItem {
        self.root.lock().unwrap().clone() // unwrap: mutex poisoning is okay
    }

    fn revision(&self) -> u32 {
        *self.revision.borrow()
    }

    fn watch_revision(&self) -> Option<watch::Receiver<u32>> {
        Some(self.revision.subscribe())
    }

    fn activate(&self, id: i32) {
        let _ = self.activated.send(id);
    }

    async fn popup(&self, placement: MenuPlacement) {
        log::debug!("static menu has no local rendering, ignoring popup at {:?}", placement.origin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn placement_follows_panel_edge() {
        let top = MenuPlacement::for_click(100, 30, 24, PanelPosition::Top, button::PRIMARY, 0);
        assert_eq!(top.origin, (100, 6));
        assert_eq!((top.rect_anchor, top.menu_anchor), (Gravity::SouthWest, Gravity::NorthWest));

        let left = MenuPlacement::for_click(30, 100, 24, PanelPosition::Left, button::PRIMARY, 0);
        assert_eq!(left.origin, (6, 100));
        assert_eq!((left.rect_anchor, left.menu_anchor), (Gravity::NorthEast, Gravity::NorthWest));

        let right = MenuPlacement::for_click(1900, 100, 24, PanelPosition::Right, button::PRIMARY, 0);
        assert_eq!((right.rect_anchor, right.menu_anchor), (Gravity::NorthWest, Gravity::NorthEast));

        let bottom = MenuPlacement::for_click(100, 1060, 24, PanelPosition::Bottom, button::SECONDARY, 0);
        assert_eq!(bottom.origin, (100, 1060));
        assert_eq!((bottom.rect_anchor, bottom.menu_anchor), (Gravity::NorthWest, Gravity::SouthWest));
        assert_eq!(bottom.rect, Rect { x: 0, y: 0, width: 24, height: 24 });
    }

    #[test]
    fn buttons_pick_their_menu() {
        let (primary, _) = StaticMenu::new(vec![]);
        let primary: MenuRef = primary;
        assert!(menu_for_button(button::PRIMARY, Some(&primary), None).is_some());
        assert!(menu_for_button(button::SECONDARY, Some(&primary), None).is_none());
        assert!(menu_for_button(button::MIDDLE, Some(&primary), Some(&primary)).is_none());
    }

    #[test]
    fn find_walks_children() {
        let root = MenuItem::root(vec![MenuItem::new(1, "a").with_children(vec![MenuItem::new(5, "deep")])]);
        assert_eq!(root.find(5).map(|item| item.label.as_str()), Some("deep"));
        assert!(root.find(9).is_none());
    }

    #[tokio::test]
    async fn static_menu_forwards_clicks() {
        let (menu, mut clicks) = StaticMenu::new(vec![MenuItem::new(3, "Quit")]);
        menu.activate(3);
        assert_eq!(clicks.recv().await, Some(3));
        let mut revisions = menu.watch_revision().unwrap();
        menu.set_items(vec![]);
        assert_eq!(menu.revision(), 1);
        revisions.changed().await.unwrap();
        assert_eq!(*revisions.borrow(), 1);
    }
}
