//! Status icons that follow whatever the desktop supports.
//!
//! Create a [`StatusIconContext`] once per process and any number of [`StatusIcon`]s with it. Each
//! icon looks for a consumer of the native `org.x.StatusIcon` protocol, then for a
//! StatusNotifierWatcher, and falls back to a legacy tray icon, switching at runtime as those
//! come and go.

mod backend;
pub mod bus;
pub mod dbus;
pub mod error;
pub mod menu;
pub mod names;
pub mod pixmap;
pub mod tray;

mod context;
pub use context::*;

mod event;
pub use event::StatusIconEvent;

mod icon;
pub use icon::*;

mod monitor;
pub use monitor::*;

mod types;
pub use types::*;

#[cfg(test)]
mod testing;
