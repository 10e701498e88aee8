use std::fmt;

/// Which backend family is serving the icons of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusIconState {
    /// A structured protocol (Native or StatusNotifierItem) is serving the icon.
    Native,
    /// A legacy system tray embedded the icon.
    Fallback,
    /// Nothing is displaying the icon.
    NoSupport,
}

impl fmt::Display for StatusIconState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusIconState::Native => "Native",
            StatusIconState::Fallback => "Fallback",
            StatusIconState::NoSupport => "NoSupport",
        })
    }
}

/// Per icon selector of the active backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    #[default]
    None,
    Native,
    Sni,
    Fallback,
}

impl BackendType {
    /// The process state reported while this backend is active.
    pub fn state(self) -> StatusIconState {
        match self {
            BackendType::Native | BackendType::Sni => StatusIconState::Native,
            BackendType::Fallback => StatusIconState::Fallback,
            BackendType::None => StatusIconState::NoSupport,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendType::None => "None",
            BackendType::Native => "Native",
            BackendType::Sni => "StatusNotifier",
            BackendType::Fallback => "Fallback",
        })
    }
}

/// Edge of the screen the consuming panel is attached to. Wire values follow `GtkPositionType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PanelPosition {
    Left,
    Right,
    Top,
    #[default]
    Bottom,
}

impl PanelPosition {
    pub fn from_wire(value: i32) -> Self {
        match value {
            0 => PanelPosition::Left,
            1 => PanelPosition::Right,
            2 => PanelPosition::Top,
            _ => PanelPosition::Bottom,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            PanelPosition::Left => 0,
            PanelPosition::Right => 1,
            PanelPosition::Top => 2,
            PanelPosition::Bottom => 3,
        }
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, PanelPosition::Top | PanelPosition::Bottom)
    }
}

impl fmt::Display for PanelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PanelPosition::Left => "Left",
            PanelPosition::Right => "Right",
            PanelPosition::Top => "Top",
            PanelPosition::Bottom => "Bottom",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ScrollDirection::Up),
            1 => Some(ScrollDirection::Down),
            2 => Some(ScrollDirection::Left),
            3 => Some(ScrollDirection::Right),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ScrollDirection::Up => 0,
            ScrollDirection::Down => 1,
            ScrollDirection::Left => 2,
            ScrollDirection::Right => 3,
        }
    }

    /// Direction of an SNI `Scroll(delta, orientation)` call.
    pub fn from_sni(delta: i32, orientation: &str) -> Self {
        if orientation.eq_ignore_ascii_case("vertical") {
            if delta > 0 {
                ScrollDirection::Down
            } else {
                ScrollDirection::Up
            }
        } else if delta > 0 {
            ScrollDirection::Right
        } else {
            ScrollDirection::Left
        }
    }

    /// Orientation string used by SNI `Scroll`.
    pub fn sni_orientation(self) -> &'static str {
        match self {
            ScrollDirection::Up | ScrollDirection::Down => "vertical",
            ScrollDirection::Left | ScrollDirection::Right => "horizontal",
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScrollDirection::Up => "Up",
            ScrollDirection::Down => "Down",
            ScrollDirection::Left => "Left",
            ScrollDirection::Right => "Right",
        })
    }
}

/// Mouse button numbers as delivered on the wire.
pub mod button {
    pub const PRIMARY: u32 = 1;
    pub const MIDDLE: u32 = 2;
    pub const SECONDARY: u32 = 3;

    pub fn name(button: u32) -> &'static str {
        match button {
            PRIMARY => "Left",
            MIDDLE => "Middle",
            SECONDARY => "Right",
            _ => "Unknown",
        }
    }
}

/// Timestamp used for events synthesized without a real input event.
pub const CURRENT_TIME: u32 = 0;

/// Middle clicks always activate. Other buttons only do when their press was seen, so the
/// release that dismisses a menu isn't mistaken for a click.
pub fn should_send_activate(button: u32, have_button_press: bool) -> bool {
    match button {
        button::MIDDLE => true,
        _ => have_button_press,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_needs_press_except_middle() {
        assert!(!should_send_activate(button::PRIMARY, false));
        assert!(should_send_activate(button::PRIMARY, true));
        assert!(!should_send_activate(button::SECONDARY, false));
        assert!(should_send_activate(button::MIDDLE, false));
    }

    #[test]
    fn sni_scroll_direction() {
        assert_eq!(ScrollDirection::from_sni(3, "vertical"), ScrollDirection::Down);
        assert_eq!(ScrollDirection::from_sni(-3, "vertical"), ScrollDirection::Up);
        assert_eq!(ScrollDirection::from_sni(1, "horizontal"), ScrollDirection::Right);
        assert_eq!(ScrollDirection::from_sni(-1, "horizontal"), ScrollDirection::Left);
    }

    #[test]
    fn backend_state_mapping() {
        assert_eq!(BackendType::Sni.state(), StatusIconState::Native);
        assert_eq!(BackendType::None.state(), StatusIconState::NoSupport);
        assert_eq!(PanelPosition::from_wire(PanelPosition::Top.to_wire()), PanelPosition::Top);
    }
}
