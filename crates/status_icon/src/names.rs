//! Well-known bus names, object paths and interface names.

/// Base path of the object manager exporting native icons.
pub const ICON_BASE_PATH: &str = "/org/x/StatusIcon";
/// First object path handed to a native icon, later ones get a `_N` suffix.
pub const ICON_SUB_PATH: &str = "/org/x/StatusIcon/Icon";
pub const ICON_INTERFACE: &str = "org.x.StatusIcon";
/// Namespace of the bus names owned by processes exporting native icons.
pub const ICON_NAME_PREFIX: &str = "org.x.StatusIcon";
/// Namespace of the bus names owned by consumers (panel applets).
pub const MONITOR_NAME_PREFIX: &str = "org.x.StatusIconMonitor";

pub const WATCHER_BUS: &str = "org.kde.StatusNotifierWatcher";
pub const WATCHER_OBJECT: &str = "/StatusNotifierWatcher";
pub const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";
pub const ITEM_OBJECT: &str = "/StatusNotifierItem";
pub const MENU_OBJECT: &str = "/MenuBar";
/// Object paths used by libappindicator items.
pub const APPINDICATOR_PATH_PREFIX: &str = "/org/ayatana/NotificationItem/";

/// Characters replaced by `_` when turning a program name into a bus name element.
const INVALID_NAME_CHARS: &[char] = &[' ', '.', '-', ',', '=', '+', '~', '`', '/'];

/// Whether `name` is `namespace` or lies below it, matching D-Bus `arg0namespace` rules.
pub fn in_namespace(name: &str, namespace: &str) -> bool {
    if namespace.is_empty() {
        return true;
    }
    match name.strip_prefix(namespace) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

/// Whether `name` is a syntactically valid well-known bus name.
pub fn is_well_known_name(name: &str) -> bool {
    zbus::names::WellKnownName::try_from(name).is_ok()
}

/// Program name used for bus names and default icon names.
pub fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xapp".to_owned())
}

/// The bus name a process exporting native icons owns.
///
/// An icon name that already is a valid `org.x.StatusIcon.<app>` name is used as is, otherwise the
/// sanitized program name is appended to the prefix.
pub fn native_owner_name(icon_name: &str, program_name: &str) -> String {
    if is_well_known_name(icon_name) && icon_name.starts_with(ICON_NAME_PREFIX) && icon_name.split('.').count() == 4 {
        return icon_name.to_owned();
    }
    let sanitized: String = program_name.chars().map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c }).collect();
    format!("{}.{}", ICON_NAME_PREFIX, sanitized)
}

/// Object path of the `index`th native icon exported by this process.
pub fn native_icon_path(index: u32) -> String {
    if index == 0 {
        ICON_SUB_PATH.to_owned()
    } else {
        format!("{}_{}", ICON_SUB_PATH, index)
    }
}

pub fn sni_item_path(index: u32) -> String {
    format!("{}/icon_{}", ITEM_OBJECT, index)
}

pub fn sni_menu_path(index: u32) -> String {
    format!("{}/icon_{}", MENU_OBJECT, index)
}
