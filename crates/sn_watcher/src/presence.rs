//! Tracks the consumers (panel applets) the watcher exists for.
//!
//! The watcher only does useful work while some process owns a name below
//! `org.x.StatusIconMonitor`. Losing the last one starts the inactivity countdown, a consumer
//! returning before it runs out cancels it.

use std::collections::BTreeSet;

use xapp_status_icon::names;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Nothing,
    /// Export the watcher and claim its name.
    ContinueStartup,
    /// No consumer left, arm the inactivity timeout.
    StartCountdown,
    /// A consumer came back after the watcher was already serving.
    CancelCountdown,
}

#[derive(Debug, Default)]
pub struct Presence {
    monitors: BTreeSet<String>,
    shutdown_pending: bool,
    started: bool,
}

impl Presence {
    /// Start from the consumer names found at startup.
    pub fn new(bus_names: impl IntoIterator<Item = String>) -> (Self, PresenceAction) {
        let monitors: BTreeSet<String> =
            bus_names.into_iter().filter(|name| names::in_namespace(name, names::MONITOR_NAME_PREFIX)).collect();
        if monitors.is_empty() {
            (Presence { monitors, shutdown_pending: true, started: false }, PresenceAction::StartCountdown)
        } else {
            (Presence { monitors, shutdown_pending: false, started: true }, PresenceAction::ContinueStartup)
        }
    }

    pub fn monitor_appeared(&mut self, name: &str) -> PresenceAction {
        self.monitors.insert(name.to_owned());
        if !self.shutdown_pending {
            return PresenceAction::Nothing;
        }
        self.shutdown_pending = false;
        if self.started {
            PresenceAction::CancelCountdown
        } else {
            self.started = true;
            PresenceAction::ContinueStartup
        }
    }

    pub fn monitor_vanished(&mut self, name: &str) -> PresenceAction {
        self.monitors.remove(name);
        if self.monitors.is_empty() && !self.shutdown_pending {
            self.shutdown_pending = true;
            PresenceAction::StartCountdown
        } else {
            PresenceAction::Nothing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn starts_only_with_a_consumer() {
        let (_, action) = Presence::new(vec![":1.4".to_owned(), "org.x.StatusIconMonitorX".to_owned()]);
        assert_eq!(action, PresenceAction::StartCountdown);

        let (mut presence, action) = Presence::new(vec!["org.x.StatusIconMonitor.cinnamon_0".to_owned()]);
        assert_eq!(action, PresenceAction::ContinueStartup);
        assert_eq!(presence.monitor_vanished("org.x.StatusIconMonitor.cinnamon_0"), PresenceAction::StartCountdown);
        assert_eq!(presence.monitor_appeared("org.x.StatusIconMonitor.cinnamon_0"), PresenceAction::CancelCountdown);
    }

    #[test]
    fn late_consumer_continues_startup() {
        let (mut presence, _) = Presence::new(Vec::new());
        assert_eq!(presence.monitor_appeared("org.x.StatusIconMonitor.a"), PresenceAction::ContinueStartup);
        assert_eq!(presence.monitor_appeared("org.x.StatusIconMonitor.b"), PresenceAction::Nothing);
    }

    #[test]
    fn countdown_starts_with_the_last_consumer_and_is_cancelled() {
        let (mut presence, _) =
            Presence::new(vec!["org.x.StatusIconMonitor.a".to_owned(), "org.x.StatusIconMonitor.b".to_owned()]);
        assert_eq!(presence.monitor_vanished("org.x.StatusIconMonitor.a"), PresenceAction::Nothing);
        assert_eq!(presence.monitor_vanished("org.x.StatusIconMonitor.b"), PresenceAction::StartCountdown);
        assert_eq!(presence.monitor_vanished("org.x.StatusIconMonitor.b"), PresenceAction::Nothing);
        assert_eq!(presence.monitor_appeared("org.x.StatusIconMonitor.c"), PresenceAction::CancelCountdown);
        assert_eq!(presence.monitor_appeared("org.x.StatusIconMonitor.d"), PresenceAction::Nothing);
    }
}
