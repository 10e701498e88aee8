//! D-Bus wire contracts: exported interfaces and the proxies used to call them.

pub mod menu;
pub mod native;
pub mod sni;
pub mod watcher;
