use std::path::{Path, PathBuf};

/// Prefix of every temporary icon file written by the status icon crates.
pub const TEMP_ICON_PREFIX: &str = "xapp-tmp-";

const RAM_BACKED_DIR: &str = "/dev/shm";

/// Directory that holds converted icon images. Prefers a RAM backed filesystem.
pub fn temp_icon_dir() -> PathBuf {
    let shm = Path::new(RAM_BACKED_DIR);
    if is_writable_dir(shm) {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn is_writable_dir(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => false,
    }
}

/// Directory holding the settings file, `$XDG_CONFIG_HOME/xapp` or `~/.config/xapp`.
pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/".to_owned())).join(".config"))
        .join("xapp")
}

/// Two alternating png files for one icon owner.
///
/// The consumer may still be reading the previous image while a new one is written, so each
/// write goes to the slot that was not used last.
#[derive(Debug)]
pub struct IconSlots {
    dir: PathBuf,
    owner: String,
    current: Option<usize>,
    written: [bool; 2],
}

impl IconSlots {
    pub fn new(dir: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        IconSlots { dir: dir.into(), owner: owner.into(), current: None, written: [false; 2] }
    }

    pub fn slot_path(&self, slot: usize) -> PathBuf {
        self.dir.join(format!("{}{}-{}.png", TEMP_ICON_PREFIX, self.owner, slot))
    }

    /// Path the next image should be written to. Flips the active slot.
    pub fn next_path(&mut self) -> PathBuf {
        let slot = match self.current {
            Some(0) => 1,
            _ => 0,
        };
        self.current = Some(slot);
        self.written[slot] = true;
        self.slot_path(slot)
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.map(|slot| self.slot_path(slot))
    }

    /// Remove both slot files. Errors are ignored.
    pub fn remove_all(&mut self) {
        for slot in 0..2 {
            if self.written[slot] {
                let _ = std::fs::remove_file(self.slot_path(slot));
                self.written[slot] = false;
            }
        }
        self.current = None;
    }
}

impl Drop for IconSlots {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// Best effort removal of every leftover temporary icon in `dir`.
pub fn remove_stale_icons(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("could not scan {} for stale icons: {}", dir.display(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(TEMP_ICON_PREFIX) && name.ends_with(".png") && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}
