//! Bookkeeping of registered StatusNotifierItems.
//!
//! Items are keyed by `bus_name + object_path`. A key is claimed with a placeholder as soon as a
//! registration starts, so a second registration arriving while the first is still talking to the
//! item is answered as a duplicate instead of creating a second mirror.

use std::{collections::BTreeMap, fmt};

use xapp_status_icon::names;

/// Where a registered item lives on the bus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub bus_name: String,
    pub path: String,
}

impl ItemKey {
    /// Derive the key from the `service` argument of `RegisterStatusNotifierItem`.
    ///
    /// An object path is resolved against the caller's bus name, anything else is taken as a bus
    /// name exporting the item at the default path.
    pub fn parse(service: &str, sender: Option<&str>) -> Result<Self, InvalidService> {
        let (bus_name, path) = if service.starts_with('/') {
            (sender.unwrap_or_default(), service)
        } else {
            (service, names::ITEM_OBJECT)
        };

        if zbus::names::BusName::try_from(bus_name).is_err() {
            return Err(InvalidService { service: service.to_owned(), sender: sender.map(str::to_owned) });
        }
        Ok(ItemKey { bus_name: bus_name.to_owned(), path: path.to_owned() })
    }

    /// libappindicator items get slightly different click and menu handling.
    pub fn is_appindicator(&self) -> bool {
        self.path.starts_with(names::APPINDICATOR_PATH_PREFIX)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus_name, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid bus name from: {service}, {}", sender.as_deref().unwrap_or("(no sender)"))]
pub struct InvalidService {
    pub service: String,
    pub sender: Option<String>,
}

impl From<InvalidService> for zbus::fdo::Error {
    fn from(e: InvalidService) -> Self {
        zbus::fdo::Error::InvalidArgs(e.to_string())
    }
}

#[derive(Debug)]
enum Entry<T> {
    Pending,
    Live(T),
}

/// Result of [`Registry::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The key was free and is now held by a placeholder.
    Started,
    /// The key is already registered or being registered.
    AlreadyTracked,
}

#[derive(Debug)]
pub struct Registry<T> {
    entries: BTreeMap<ItemKey, Entry<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Registry { entries: BTreeMap::new() }
    }
}

impl<T> Registry<T> {
    pub fn begin(&mut self, key: &ItemKey) -> Claim {
        if self.entries.contains_key(key) {
            return Claim::AlreadyTracked;
        }
        self.entries.insert(key.clone(), Entry::Pending);
        Claim::Started
    }

    /// Replace the placeholder of `key` with `item`.
    ///
    /// Hands `item` back when the placeholder is gone, which happens when the item's bus name
    /// vanished while it was being set up.
    pub fn complete(&mut self, key: &ItemKey, item: T) -> Result<(), T> {
        match self.entries.get_mut(key) {
            Some(entry @ Entry::Pending) => {
                *entry = Entry::Live(item);
                Ok(())
            }
            _ => Err(item),
        }
    }

    /// Drop the placeholder of a registration that failed.
    pub fn abort(&mut self, key: &ItemKey) {
        if matches!(self.entries.get(key), Some(Entry::Pending)) {
            self.entries.remove(key);
        }
    }

    /// Remove every entry exported by `bus_name`, returning the live items among them.
    pub fn remove_bus(&mut self, bus_name: &str) -> Vec<(ItemKey, T)> {
        let keys: Vec<ItemKey> = self.entries.keys().filter(|key| key.bus_name == bus_name).cloned().collect();
        keys.into_iter()
            .filter_map(|key| match self.entries.remove(&key) {
                Some(Entry::Live(item)) => Some((key, item)),
                _ => None,
            })
            .collect()
    }

    /// Value of the `RegisteredStatusNotifierItems` property.
    pub fn published(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Live(_)))
            .map(|(key, _)| key.to_string())
            .collect()
    }

    /// Forget everything, returning the live items.
    pub fn clear(&mut self) -> Vec<T> {
        std::mem::take(&mut self.entries)
            .into_values()
            .filter_map(|entry| match entry {
                Entry::Live(item) => Some(item),
                Entry::Pending => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(bus_name: &str, path: &str) -> ItemKey {
        ItemKey { bus_name: bus_name.to_owned(), path: path.to_owned() }
    }

    #[test]
    fn object_path_is_resolved_against_sender() {
        let key = ItemKey::parse("/StatusNotifierItem", Some(":1.23")).unwrap();
        assert_eq!(key.to_string(), ":1.23/StatusNotifierItem");
        assert!(!key.is_appindicator());
    }

    #[test]
    fn bus_name_gets_default_path() {
        let key = ItemKey::parse("org.kde.StatusNotifierItem-42-1", Some(":1.5")).unwrap();
        assert_eq!(key, ItemKey {
            bus_name: "org.kde.StatusNotifierItem-42-1".to_owned(),
            path: "/StatusNotifierItem".to_owned()
        });
    }

    #[test]
    fn appindicator_paths_are_recognised() {
        let key = ItemKey::parse("/org/ayatana/NotificationItem/nm_applet", Some(":1.7")).unwrap();
        assert!(key.is_appindicator());
    }

    #[test]
    fn invalid_bus_names_are_rejected() {
        let err = ItemKey::parse("not a bus name", Some(":1.5")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid bus name from: not a bus name, :1.5");
        assert!(ItemKey::parse("/StatusNotifierItem", None).is_err());
        assert!(matches!(zbus::fdo::Error::from(err), zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn duplicate_registration_while_pending() {
        let mut registry = Registry::default();
        let item = key(":1.23", "/StatusNotifierItem");
        assert_eq!(registry.begin(&item), Claim::Started);
        assert_eq!(registry.begin(&item), Claim::AlreadyTracked);
        assert!(registry.published().is_empty());

        registry.complete(&item, "mirror").unwrap();
        assert_eq!(registry.begin(&item), Claim::AlreadyTracked);
        assert_eq!(registry.published(), vec![":1.23/StatusNotifierItem".to_owned()]);
    }

    #[test]
    fn vanished_owner_removes_only_its_entries() {
        let mut registry = Registry::default();
        for (bus, path) in [(":1.23", "/StatusNotifierItem"), (":1.23", "/other"), (":1.2", "/StatusNotifierItem"), (":1.230", "/StatusNotifierItem")] {
            let k = key(bus, path);
            registry.begin(&k);
            registry.complete(&k, bus.to_owned()).unwrap();
        }

        let removed = registry.remove_bus(":1.23");
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.published(), vec![":1.2/StatusNotifierItem".to_owned(), ":1.230/StatusNotifierItem".to_owned()]);
    }

    #[test]
    fn completing_after_removal_hands_the_item_back() {
        let mut registry = Registry::default();
        let item = key(":1.9", "/StatusNotifierItem");
        registry.begin(&item);
        assert!(registry.remove_bus(":1.9").is_empty());
        assert_eq!(registry.complete(&item, 7), Err(7));
        assert_eq!(registry.begin(&item), Claim::Started);
    }

    #[test]
    fn abort_frees_the_key() {
        let mut registry: Registry<()> = Registry::default();
        let item = key(":1.9", "/StatusNotifierItem");
        registry.begin(&item);
        registry.abort(&item);
        assert_eq!(registry.begin(&item), Claim::Started);
    }
}
