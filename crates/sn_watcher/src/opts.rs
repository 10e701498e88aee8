use std::time::Duration;

use clap::Parser;

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub desktop_check: bool,
    pub startup_delay: Duration,
    pub inactivity_timeout: Duration,
    pub replace: bool,
}

/// StatusNotifierWatcher that shows StatusNotifierItems as native status icons.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "xapp-sn-watcher", version)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug")]
    log_debug: bool,

    /// Run regardless of the current desktop.
    #[arg(long)]
    no_desktop_check: bool,

    /// Milliseconds to wait before starting, giving a session time to settle.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    startup_delay: u64,

    /// Seconds to keep running once no consumer is left.
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    inactivity_timeout: u64,

    /// Take over the watcher name from a running instance (the default).
    #[arg(long, overrides_with = "no_replace")]
    replace: bool,

    /// Leave a running instance alone.
    #[arg(long, overrides_with = "replace")]
    no_replace: bool,
}

impl From<RawOpt> for Opt {
    fn from(raw: RawOpt) -> Self {
        Opt {
            log_debug: raw.log_debug,
            desktop_check: !raw.no_desktop_check,
            startup_delay: Duration::from_millis(raw.startup_delay),
            inactivity_timeout: Duration::from_secs(raw.inactivity_timeout),
            replace: !raw.no_replace,
        }
    }
}

impl Opt {
    pub fn from_env() -> Self {
        RawOpt::parse().into()
    }

    pub fn try_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        RawOpt::try_parse_from(args).map(Opt::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let opt = Opt::try_from_iter(["xapp-sn-watcher"]).unwrap();
        assert_eq!(opt, Opt {
            log_debug: false,
            desktop_check: true,
            startup_delay: Duration::from_secs(1),
            inactivity_timeout: Duration::from_secs(30),
            replace: true,
        });
    }

    #[test]
    fn flags() {
        let opt = Opt::try_from_iter([
            "xapp-sn-watcher",
            "--debug",
            "--no-desktop-check",
            "--startup-delay",
            "0",
            "--inactivity-timeout",
            "5",
            "--no-replace",
        ])
        .unwrap();
        assert!(opt.log_debug);
        assert!(!opt.desktop_check);
        assert_eq!(opt.startup_delay, Duration::ZERO);
        assert_eq!(opt.inactivity_timeout, Duration::from_secs(5));
        assert!(!opt.replace);
    }

    #[test]
    fn last_replace_flag_wins() {
        assert!(Opt::try_from_iter(["xapp-sn-watcher", "--no-replace", "--replace"]).unwrap().replace);
        assert!(Opt::try_from_iter(["xapp-sn-watcher", "--startup-delay", "soon"]).is_err());
    }
}
