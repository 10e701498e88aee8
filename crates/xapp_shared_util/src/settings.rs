//! The settings store read by the status icon library and the SN watcher.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use tokio::sync::watch;

pub const SETTINGS_FILE_NAME: &str = "status-icon.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to watch settings file")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Settings {
    /// App ids whose primary click should activate them instead of opening their menu.
    pub status_icon_activation_whitelist: Vec<String>,
    /// App ids whose tooltip is replaced by their label.
    pub status_icon_tooltip_whitelist: Vec<String>,
    /// Desktops (as found in `XDG_CURRENT_DESKTOP`) where the SN watcher runs.
    #[default(vec!["X-Cinnamon".to_owned(), "MATE".to_owned(), "XFCE".to_owned()])]
    pub sn_watcher_enabled_desktops: Vec<String>,
    /// Whether the SN watcher reports that a host is registered.
    #[default(true)]
    pub sn_watcher_advertise_host: bool,
    pub sn_watcher_debug: bool,
    pub debug_flags: Vec<String>,
}

impl Settings {
    pub fn default_path() -> PathBuf {
        crate::paths::config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Settings::default()),
            Err(source) => return Err(SettingsError::Io { path: path.to_owned(), source }),
        };
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse { path: path.to_owned(), source })
    }

    /// Like [`Settings::load`], but logs failures and falls back to the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        Settings::load(path).unwrap_or_else(|e| {
            log::warn!("{}, using default settings", e);
            Settings::default()
        })
    }

    pub fn is_activation_whitelisted(&self, app_id: &str) -> bool {
        self.status_icon_activation_whitelist.iter().any(|id| id == app_id)
    }

    pub fn is_tooltip_whitelisted(&self, app_id: &str) -> bool {
        self.status_icon_tooltip_whitelist.iter().any(|id| id == app_id)
    }

    /// Whether any entry of a colon separated `XDG_CURRENT_DESKTOP` value is enabled.
    pub fn desktop_enabled(&self, current_desktop: &str) -> bool {
        current_desktop.split(':').any(|desktop| self.sn_watcher_enabled_desktops.iter().any(|d| d == desktop))
    }
}

/// Keeps the file watcher alive while settings updates are published.
pub struct SettingsWatch {
    _watcher: notify::RecommendedWatcher,
    pub receiver: watch::Receiver<Settings>,
}

/// Watch the settings file, publishing a freshly loaded [`Settings`] whenever it changes.
///
/// Must be called from within a tokio runtime.
pub fn watch_settings(path: PathBuf) -> Result<SettingsWatch, SettingsError> {
    use notify::{RecursiveMode, Watcher};

    let (settings_tx, settings_rx) = watch::channel(Settings::load_or_default(&path));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let file_name = path.file_name().map(|n| n.to_owned());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(notify::Event { kind: notify::EventKind::Modify(_) | notify::EventKind::Create(_), paths, .. }) => {
            if paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                let _ = tx.send(());
            }
        }
        Ok(_) => {}
        Err(e) => log::error!("error while watching settings: {}", e),
    })?;

    // watch the directory, editors tend to replace the file instead of writing it in place
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    if dir.is_dir() {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    } else {
        log::debug!("settings directory {} does not exist, not watching it", dir.display());
    }

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // give editors a moment to finish writing
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let settings = Settings::load_or_default(&path);
            settings_tx.send_if_modified(|current| {
                if *current == settings {
                    false
                } else {
                    log::debug!("settings changed");
                    *current = settings;
                    true
                }
            });
        }
    });

    Ok(SettingsWatch { _watcher: watcher, receiver: settings_rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.sn_watcher_advertise_host);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{ "status_icon_activation_whitelist": ["nm-applet"] }"#).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(settings.is_activation_whitelisted("nm-applet"));
        assert_eq!(settings.sn_watcher_enabled_desktops, Settings::default().sn_watcher_enabled_desktops);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::Parse { .. })));
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn desktop_check_splits_on_colons() {
        let settings = Settings::default();
        assert!(settings.desktop_enabled("ubuntu:XFCE"));
        assert!(!settings.desktop_enabled("KDE"));
        assert!(!settings.desktop_enabled(""));
    }
}
