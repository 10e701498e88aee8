use crate::types::{PanelPosition, ScrollDirection, StatusIconState};

/// Events a status icon raises to its application, whichever backend delivered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusIconEvent {
    ButtonPress { x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition },
    ButtonRelease { x: i32, y: i32, button: u32, time: u32, panel_position: PanelPosition },
    Activate { button: u32, time: u32 },
    Scroll { delta: i32, direction: ScrollDirection, time: u32 },
    StateChanged(StatusIconState),
}

/// Registered listeners of one icon.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    senders: std::sync::Mutex<Vec<tokio::sync::mpsc::UnboundedSender<StatusIconEvent>>>,
}

impl Listeners {
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<StatusIconEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx); // unwrap: mutex poisoning is okay
        rx
    }

    /// Deliver `event` to every live listener, forgetting the ones that went away.
    pub fn emit(&self, event: StatusIconEvent) {
        let mut senders = self.senders.lock().unwrap(); // unwrap: mutex poisoning is okay
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
