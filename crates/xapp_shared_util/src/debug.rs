//! Debug flag selection and logger setup.
//!
//! Flags come from the `XAPP_DEBUG` environment variable (comma, colon or space separated, case
//! insensitive, `all` enables every flag) and from the `debug_flags` settings key. Each flag raises
//! a set of log targets to `Debug`.

use std::{collections::BTreeSet, str::FromStr};

pub const DEBUG_ENV_VAR: &str = "XAPP_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugFlag {
    StatusIcon,
    SnWatcher,
    Monitor,
    Tray,
}

impl DebugFlag {
    pub const ALL: [DebugFlag; 4] = [DebugFlag::StatusIcon, DebugFlag::SnWatcher, DebugFlag::Monitor, DebugFlag::Tray];

    pub fn name(self) -> &'static str {
        match self {
            DebugFlag::StatusIcon => "StatusIcon",
            DebugFlag::SnWatcher => "SnWatcher",
            DebugFlag::Monitor => "Monitor",
            DebugFlag::Tray => "Tray",
        }
    }

    /// Log targets whose level this flag raises.
    pub fn log_targets(self) -> &'static [&'static str] {
        match self {
            DebugFlag::StatusIcon => &["xapp_status_icon"],
            DebugFlag::SnWatcher => &["xapp_sn_watcher"],
            DebugFlag::Monitor => &["xapp_status_icon::monitor"],
            DebugFlag::Tray => &["xapp_status_icon::tray"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown debug flag {0:?}")]
pub struct UnknownDebugFlag(pub String);

impl FromStr for DebugFlag {
    type Err = UnknownDebugFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DebugFlag::ALL
            .into_iter()
            .find(|flag| flag.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownDebugFlag(s.to_owned()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugFlags(BTreeSet<DebugFlag>);

impl DebugFlags {
    pub fn all() -> Self {
        DebugFlags(DebugFlag::ALL.into_iter().collect())
    }

    /// Parse a flag list like `StatusIcon,Monitor`. Unknown names are logged and skipped.
    pub fn parse(spec: &str) -> Self {
        let mut flags = DebugFlags::default();
        for word in spec.split(|c: char| c == ',' || c == ':' || c.is_whitespace()).filter(|w| !w.is_empty()) {
            if word.eq_ignore_ascii_case("all") {
                return DebugFlags::all();
            }
            match word.parse() {
                Ok(flag) => flags.insert(flag),
                Err(e) => log::warn!("{}", e),
            }
        }
        flags
    }

    pub fn from_env() -> Self {
        std::env::var(DEBUG_ENV_VAR).map(|spec| DebugFlags::parse(&spec)).unwrap_or_default()
    }

    pub fn insert(&mut self, flag: DebugFlag) {
        self.0.insert(flag);
    }

    pub fn extend(&mut self, other: &DebugFlags) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn contains(&self, flag: DebugFlag) -> bool {
        self.0.contains(&flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DebugFlag> + '_ {
        self.0.iter().copied()
    }
}

/// Initialise the global logger.
///
/// `RUST_LOG` takes precedence when present. Otherwise `base_targets` log at `Info` (or `Debug`
/// when `force_debug` is set) and every target selected by `flags` logs at `Debug`.
pub fn init_logging(base_targets: &[&str], flags: &DebugFlags, force_debug: bool) {
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
        return;
    }

    let base_level = if force_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    let mut builder = pretty_env_logger::formatted_timed_builder();
    for target in base_targets {
        builder.filter(Some(target), base_level);
    }
    for flag in flags.iter() {
        for target in flag.log_targets() {
            builder.filter(Some(target), log::LevelFilter::Debug);
        }
    }
    builder.init();
}
