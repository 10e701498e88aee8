//! Serving a [`Menu`] over `com.canonical.dbusmenu`.

use std::collections::HashMap;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use zbus::{
    dbus_interface,
    zvariant::{OwnedValue, StructureBuilder, Value},
    SignalContext,
};

use crate::menu::{MenuItem, MenuRef};

fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
    OwnedValue::from(value.into())
}

/// Properties of `item` in dbusmenu terms, filtered to `names` unless that is empty.
fn item_properties(item: &MenuItem, names: &[String]) -> HashMap<String, OwnedValue> {
    let mut props = HashMap::new();
    if item.separator {
        props.insert("type".to_owned(), owned("separator"));
    } else {
        props.insert("type".to_owned(), owned("standard"));
        props.insert("label".to_owned(), owned(item.label.as_str()));
    }
    props.insert("enabled".to_owned(), owned(item.enabled));
    props.insert("visible".to_owned(), owned(item.visible));
    if let Some(icon_name) = &item.icon_name {
        props.insert("icon-name".to_owned(), owned(icon_name.as_str()));
    }
    let toggle_type = item.toggle_type.dbusmenu_name();
    if !toggle_type.is_empty() {
        props.insert("toggle-type".to_owned(), owned(toggle_type));
        props.insert("toggle-state".to_owned(), owned(i32::from(item.toggle_state)));
    }
    if !item.children.is_empty() {
        props.insert("children-display".to_owned(), owned("submenu"));
    }
    if !names.is_empty() {
        props.retain(|key, _| names.iter().any(|name| name == key));
    }
    props
}

/// One node of a `GetLayout` reply, `(ia{sv}av)`.
#[derive(Debug, Default, serde::Serialize, zbus::zvariant::Type)]
pub struct LayoutItem {
    pub id: i32,
    pub properties: HashMap<String, OwnedValue>,
    pub children: Vec<OwnedValue>,
}

impl LayoutItem {
    fn build(item: &MenuItem, depth: i32, names: &[String]) -> Self {
        let children = if depth == 0 {
            Vec::new()
        } else {
            item.children.iter().map(|child| LayoutItem::build(child, depth - 1, names).into_value()).collect()
        };
        LayoutItem { id: item.id, properties: item_properties(item, names), children }
    }

    fn into_value(self) -> OwnedValue {
        let structure = StructureBuilder::new().add_field(self.id).add_field(self.properties).add_field(self.children).build();
        owned(structure)
    }
}

#[derive(Debug)]
pub struct DbusMenuInterface {
    menu: MenuRef,
}

impl DbusMenuInterface {
    pub fn new(menu: MenuRef) -> Self {
        DbusMenuInterface { menu }
    }
}

#[dbus_interface(name = "com.canonical.dbusmenu")]
impl DbusMenuInterface {
    #[dbus_interface(out_args("revision", "layout"))]
    fn get_layout(&self, parent_id: i32, recursion_depth: i32, property_names: Vec<String>) -> zbus::fdo::Result<(u32, LayoutItem)> {
        let root = self.menu.layout();
        let parent = root
            .find(parent_id)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("no menu item with id {}", parent_id)))?;
        Ok((self.menu.revision(), LayoutItem::build(parent, recursion_depth, &property_names)))
    }

    fn get_group_properties(&self, ids: Vec<i32>, property_names: Vec<String>) -> Vec<(i32, HashMap<String, OwnedValue>)> {
        let root = self.menu.layout();
        ids.into_iter()
            .filter_map(|id| root.find(id).map(|item| (id, item_properties(item, &property_names))))
            .collect()
    }

    fn get_property(&self, id: i32, name: String) -> zbus::fdo::Result<OwnedValue> {
        let root = self.menu.layout();
        let item = root.find(id).ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("no menu item with id {}", id)))?;
        item_properties(item, &[])
            .remove(&name)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs(format!("menu item {} has no property {}", id, name)))
    }

    fn event(&self, id: i32, event_id: String, _data: Value<'_>, _timestamp: u32) {
        if event_id == "clicked" {
            self.menu.activate(id);
        }
    }

    /// Returns the ids that were not found.
    fn event_group(&self, events: Vec<(i32, String, OwnedValue, u32)>) -> Vec<i32> {
        let root = self.menu.layout();
        let mut missing = Vec::new();
        for (id, event_id, _, _) in events {
            if root.find(id).is_none() {
                missing.push(id);
            } else if event_id == "clicked" {
                self.menu.activate(id);
            }
        }
        missing
    }

    fn about_to_show(&self, _id: i32) -> bool {
        false
    }

    #[dbus_interface(out_args("updates_needed", "id_errors"))]
    fn about_to_show_group(&self, ids: Vec<i32>) -> (Vec<i32>, Vec<i32>) {
        let root = self.menu.layout();
        let id_errors = ids.into_iter().filter(|id| root.find(*id).is_none()).collect();
        (Vec::new(), id_errors)
    }

    #[dbus_interface(property)]
    fn version(&self) -> u32 {
        3
    }

    #[dbus_interface(property)]
    fn text_direction(&self) -> String {
        "ltr".to_owned()
    }

    #[dbus_interface(property)]
    fn status(&self) -> String {
        "normal".to_owned()
    }

    #[dbus_interface(property)]
    fn icon_theme_path(&self) -> Vec<String> {
        Vec::new()
    }

    #[dbus_interface(signal)]
    pub async fn layout_updated(ctxt: &SignalContext<'_>, revision: u32, parent: i32) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    pub async fn items_properties_updated(
        ctxt: &SignalContext<'_>,
        updated_props: Vec<(i32, HashMap<String, OwnedValue>)>,
        removed_props: Vec<(i32, Vec<String>)>,
    ) -> zbus::Result<()>;
}

/// Emit `LayoutUpdated` for every revision announced on `revisions`, until `cancel` fires or the
/// menu is gone.
pub async fn forward_layout_updates(ctxt: SignalContext<'static>, mut revisions: watch::Receiver<u32>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let revision = *revisions.borrow_and_update();
                if let Err(e) = DbusMenuInterface::layout_updated(&ctxt, revision, 0).await {
                    log::debug!("failed to announce menu revision {} at {}: {}", revision, ctxt.path(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::ToggleType;
    use pretty_assertions::assert_eq;

    fn keys(props: &HashMap<String, OwnedValue>) -> Vec<&str> {
        let mut keys: Vec<_> = props.keys().map(String::as_str).collect();
        keys.sort();
        keys
    }

    #[test]
    fn properties_follow_item_kind() {
        let separator = item_properties(&MenuItem::separator(2), &[]);
        assert_eq!(keys(&separator), vec!["enabled", "type", "visible"]);

        let toggle = MenuItem { toggle_type: ToggleType::Checkmark, toggle_state: true, ..MenuItem::new(3, "Mute") };
        let props = item_properties(&toggle, &[]);
        assert_eq!(keys(&props), vec!["enabled", "label", "toggle-state", "toggle-type", "type", "visible"]);

        let filtered = item_properties(&toggle, &["label".to_owned()]);
        assert_eq!(keys(&filtered), vec!["label"]);
    }

    #[test]
    fn layout_respects_depth() {
        let root = MenuItem::root(vec![MenuItem::new(1, "a").with_children(vec![MenuItem::new(2, "b")])]);
        assert_eq!(LayoutItem::build(&root, 0, &[]).children.len(), 0);
        assert_eq!(LayoutItem::build(&root, -1, &[]).children.len(), 1);
        assert!(item_properties(&root.children[0], &[]).contains_key("children-display"));
    }
}
