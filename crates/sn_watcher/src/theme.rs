//! Finding icons shipped in an item's private `IconThemePath`.

use std::path::{Path, PathBuf};

const EXTENSIONS: &[&str] = &["png", "svg", "xpm"];
const MAX_DEPTH: usize = 4;

/// Look `icon_name` up below `theme_path`.
///
/// Several sizes are usually installed. A directory named after `size` wins, then scalable
/// images, then whatever else was found.
pub fn find_icon(theme_path: &Path, icon_name: &str, size: i32) -> Option<PathBuf> {
    let mut found = Vec::new();
    collect(theme_path, icon_name, 0, &mut found);
    found.into_iter().min_by_key(|path| (rank(path, size), path.clone()))
}

fn collect(dir: &Path, icon_name: &str, depth: usize, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth < MAX_DEPTH {
                collect(&path, icon_name, depth + 1, found);
            }
        } else if is_icon_file(&path, icon_name) {
            found.push(path);
        }
    }
}

fn is_icon_file(path: &Path, icon_name: &str) -> bool {
    let stem_matches = path.file_stem().map_or(false, |stem| stem == icon_name);
    let ext_matches = path.extension().and_then(|ext| ext.to_str()).map_or(false, |ext| EXTENSIONS.contains(&ext));
    stem_matches && ext_matches
}

fn rank(path: &Path, size: i32) -> u8 {
    let exact = format!("{}x{}", size, size);
    let in_dir = |name: &str| path.ancestors().skip(1).any(|dir| dir.file_name().map_or(false, |n| n == name));
    if in_dir(&exact) {
        0
    } else if in_dir("scalable") {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn prefers_the_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "hicolor/16x16/apps/app.png");
        let wanted = touch(dir.path(), "hicolor/24x24/apps/app.png");
        touch(dir.path(), "hicolor/scalable/apps/app.svg");
        assert_eq!(find_icon(dir.path(), "app", 24), Some(wanted));
    }

    #[test]
    fn falls_back_to_scalable_then_anything() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "hicolor/48x48/apps/app.png");
        let scalable = touch(dir.path(), "hicolor/scalable/apps/app.svg");
        assert_eq!(find_icon(dir.path(), "app", 24), Some(scalable));
    }

    #[test]
    fn ignores_other_names_and_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "app.txt");
        touch(dir.path(), "other.png");
        assert_eq!(find_icon(dir.path(), "app", 24), None);
        assert_eq!(find_icon(&dir.path().join("missing"), "app", 24), None);
    }
}
