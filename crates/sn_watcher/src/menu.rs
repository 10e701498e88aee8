//! Mirroring a remote `com.canonical.dbusmenu` as a [`Menu`].

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use xapp_status_icon::{
    dbus::sni::StatusNotifierItemProxy,
    menu::{Menu, MenuItem, MenuPlacement, ToggleType},
};
use zbus::{
    dbus_proxy,
    zvariant::{OwnedValue, Value},
    CacheProperties,
};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[dbus_proxy(interface = "com.canonical.dbusmenu")]
trait DbusMenu {
    fn get_layout(
        &self,
        parent_id: i32,
        recursion_depth: i32,
        property_names: &[&str],
    ) -> zbus::Result<(u32, (i32, HashMap<String, OwnedValue>, Vec<OwnedValue>))>;

    fn get_group_properties(
        &self,
        ids: &[i32],
        property_names: &[&str],
    ) -> zbus::Result<Vec<(i32, HashMap<String, OwnedValue>)>>;

    fn event(&self, id: i32, event_id: &str, data: &Value<'_>, timestamp: u32) -> zbus::Result<()>;

    fn about_to_show(&self, id: i32) -> zbus::Result<bool>;

    #[dbus_proxy(signal)]
    fn layout_updated(&self, revision: u32, parent: i32) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    fn items_properties_updated(
        &self,
        updated_props: Vec<(i32, HashMap<String, OwnedValue>)>,
        removed_props: Vec<(i32, Vec<String>)>,
    ) -> zbus::Result<()>;
}

/// Shape of a layout without properties, as found in the `av` children of `GetLayout`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LayoutNode {
    id: i32,
    children: Vec<LayoutNode>,
}

impl LayoutNode {
    fn ids(&self, out: &mut Vec<i32>) {
        out.push(self.id);
        for child in &self.children {
            child.ids(out);
        }
    }
}

fn peel<'a, 'b>(value: &'b Value<'a>) -> &'b Value<'a> {
    match value {
        Value::Value(inner) => peel(inner),
        other => other,
    }
}

/// Parse one `(ia{sv}av)` child node. Malformed nodes are skipped.
fn parse_node(value: &Value<'_>) -> Option<LayoutNode> {
    let Value::Structure(structure) = peel(value) else {
        return None;
    };
    let (id, children) = match structure.fields() {
        [id, _, children] => (id, children),
        _ => return None,
    };
    let Value::I32(id) = peel(id) else {
        return None;
    };
    let children = match peel(children) {
        Value::Array(array) => array.get().iter().filter_map(parse_node).collect(),
        _ => Vec::new(),
    };
    Some(LayoutNode { id: *id, children })
}

fn string_prop<'a>(props: &'a HashMap<String, OwnedValue>, name: &str) -> Option<&'a str> {
    match props.get(name).map(|v| peel(v)) {
        Some(Value::Str(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn bool_prop(props: &HashMap<String, OwnedValue>, name: &str) -> Option<bool> {
    match props.get(name).map(|v| peel(v)) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

/// Drop the `_` mnemonic markers of a dbusmenu label, keeping escaped `__` as one underscore.
fn strip_mnemonic(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut chars = label.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if chars.peek() == Some(&'_') {
                chars.next();
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn menu_item(node: &LayoutNode, props: &HashMap<i32, HashMap<String, OwnedValue>>) -> MenuItem {
    let empty = HashMap::new();
    let own = props.get(&node.id).unwrap_or(&empty);
    let toggle_type = match string_prop(own, "toggle-type") {
        Some("checkmark") => ToggleType::Checkmark,
        Some("radio") => ToggleType::Radio,
        _ => ToggleType::None,
    };
    let toggle_state = matches!(own.get("toggle-state").map(|v| peel(v)), Some(Value::I32(1)));
    MenuItem {
        id: node.id,
        label: string_prop(own, "label").map(strip_mnemonic).unwrap_or_default(),
        icon_name: string_prop(own, "icon-name").filter(|name| !name.is_empty()).map(str::to_owned),
        enabled: bool_prop(own, "enabled").unwrap_or(true),
        visible: bool_prop(own, "visible").unwrap_or(true),
        separator: string_prop(own, "type") == Some("separator"),
        toggle_type,
        toggle_state,
        children: node.children.iter().map(|child| menu_item(child, props)).collect(),
    }
}

/// The menu of an SNI item, kept up to date from its `LayoutUpdated` signals.
///
/// There is no local rendering, so popping it up asks the item to show its own context menu.
pub struct RemoteMenu {
    proxy: DbusMenuProxy<'static>,
    item: StatusNotifierItemProxy<'static>,
    cache: std::sync::Mutex<(u32, MenuItem)>,
    _refresh: DropGuard,
}

impl fmt::Debug for RemoteMenu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMenu")
            .field("destination", &self.proxy.destination().as_str())
            .field("path", &self.proxy.path().as_str())
            .finish()
    }
}

impl RemoteMenu {
    pub async fn new(item: &StatusNotifierItemProxy<'static>, path: &str) -> zbus::Result<Arc<Self>> {
        let proxy = DbusMenuProxy::builder(item.connection())
            .destination(item.destination().to_owned())?
            .path(path.to_owned())?
            .cache_properties(CacheProperties::No)
            .build()
            .await?;
        let mut layout_updates = proxy.receive_layout_updated().await?.map(|_| ()).boxed();
        let mut property_updates = proxy.receive_items_properties_updated().await?.map(|_| ()).boxed();

        let token = CancellationToken::new();
        let menu = Arc::new(RemoteMenu {
            proxy,
            item: item.clone(),
            cache: std::sync::Mutex::new((0, MenuItem::root(Vec::new()))),
            _refresh: token.clone().drop_guard(),
        });

        let weak = Arc::downgrade(&menu);
        tokio::spawn(async move {
            loop {
                let Some(menu) = weak.upgrade() else { break };
                if let Err(e) = menu.refresh().await {
                    log::debug!("could not fetch menu layout of {:?}: {}", menu, e);
                }
                drop(menu);
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(()) = layout_updates.next() => {}
                    Some(()) = property_updates.next() => {}
                    else => break,
                }
            }
        });

        Ok(menu)
    }

    /// Fetch the full tree and replace the cached copy.
    pub async fn refresh(&self) -> zbus::Result<()> {
        let (revision, (root_id, _, children)) =
            tokio::time::timeout(CALL_TIMEOUT, self.proxy.get_layout(0, -1, &[])).await.map_err(timed_out)??;
        let root = LayoutNode { id: root_id, children: children.iter().filter_map(|child| parse_node(child)).collect() };

        let mut ids = Vec::new();
        root.ids(&mut ids);
        let props: HashMap<i32, HashMap<String, OwnedValue>> =
            tokio::time::timeout(CALL_TIMEOUT, self.proxy.get_group_properties(&ids, &[]))
                .await
                .map_err(timed_out)??
                .into_iter()
                .collect();

        let tree = menu_item(&root, &props);
        *self.cache.lock().unwrap() = (revision, tree); // unwrap: mutex poisoning is okay
        Ok(())
    }
}

fn timed_out(_: tokio::time::error::Elapsed) -> zbus::Error {
    zbus::Error::Failure("timed out".to_owned())
}

#[async_trait::async_trait]
impl Menu for RemoteMenu {
    fn layout(&self) -> MenuItem {
        self.cache.lock().unwrap().1.clone() // unwrap: mutex poisoning is okay
    }

    fn revision(&self) -> u32 {
        self.cache.lock().unwrap().0 // unwrap: mutex poisoning is okay
    }

    fn activate(&self, id: i32) {
        let proxy = self.proxy.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.event(id, "clicked", &Value::I32(0), 0).await {
                log::warn!("failed to activate menu item {}: {}", id, e);
            }
        });
    }

    async fn popup(&self, placement: MenuPlacement) {
        if let Ok(Ok(true)) = tokio::time::timeout(CALL_TIMEOUT, self.proxy.about_to_show(0)).await {
            if let Err(e) = self.refresh().await {
                log::debug!("could not refresh menu before showing it: {}", e);
            }
        }
        let (x, y) = placement.origin;
        match tokio::time::timeout(CALL_TIMEOUT, self.item.context_menu(x, y)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("item could not show its menu: {}", e),
            Err(_) => log::debug!("item did not answer ContextMenu in time"),
        }
    }
}
