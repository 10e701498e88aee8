//! `xapp-sn-watcher`: a StatusNotifierWatcher for desktops whose panels speak the native
//! `org.x.StatusIcon` protocol. Every registered StatusNotifierItem is mirrored as a native
//! status icon.

use anyhow::{Context, Result};
use xapp_shared_util::{
    debug::{init_logging, DebugFlags},
    paths,
    settings::{self, Settings},
};
use xapp_status_icon::{bus::DbusSession, StatusIconContext};

use crate::lifecycle::ExitCause;

mod item;
mod lifecycle;
mod menu;
mod opts;
mod presence;
mod registry;
mod theme;
mod watcher;

const LOG_TARGETS: &[&str] = &["xapp_sn_watcher", "xapp_status_icon"];

fn main() {
    let opts = opts::Opt::from_env();

    let settings_path = Settings::default_path();
    let initial_settings = Settings::load_or_default(&settings_path);
    let mut flags = DebugFlags::from_env();
    flags.extend(&DebugFlags::parse(&initial_settings.debug_flags.join(",")));
    init_logging(LOG_TARGETS, &flags, opts.log_debug || initial_settings.sn_watcher_debug);

    std::thread::sleep(opts.startup_delay);

    if opts.desktop_check {
        let current_desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        if !initial_settings.desktop_enabled(&current_desktop) {
            log::info!("not starting on desktop {:?}", current_desktop);
            return;
        }
    }

    match run(opts, settings_path) {
        Ok(cause) => {
            log::info!("exiting: {}", cause);
            if cause.exit_code() != 0 {
                std::process::exit(cause.exit_code());
            }
        }
        Err(err) => {
            log::error!("{:?}", err);
            std::process::exit(1);
        }
    }
}

fn run(opts: opts::Opt, settings_path: std::path::PathBuf) -> Result<ExitCause> {
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], move |_| {
        log::info!("Shutting down xapp-sn-watcher...");
        if let Err(e) = lifecycle::request_exit(ExitCause::Signal) {
            log::error!("Failed to ask the watcher to shut down: {:?}", e);
        }
    });

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("Failed to initialize tokio runtime")?;
    rt.block_on(async {
        let settings_watch = settings::watch_settings(settings_path).context("Failed to watch settings")?;

        let icon_dir = paths::temp_icon_dir();
        let removed = paths::remove_stale_icons(&icon_dir);
        if removed > 0 {
            log::debug!("removed {} stale icons from {}", removed, icon_dir.display());
        }

        let session = DbusSession::new().await.context("Failed to connect to the session bus")?;
        let ctx = StatusIconContext::builder(std::sync::Arc::new(session.clone()))
            .allow_sni(false)
            .program_name("xapp-sn-watcher")
            .build();
        let bridge = item::Bridge { ctx, settings: settings_watch.receiver.clone(), icon_dir };
        let options =
            watcher::WatcherOptions { replace: opts.replace, inactivity_timeout: opts.inactivity_timeout };

        watcher::run(session, bridge, options).await
    })
}
