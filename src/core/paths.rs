//! Path normalisation shared by configuration and the retention engine.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Home directory from `$HOME`, or `/tmp` with a warning when unset.
pub fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .filter(|raw| !raw.is_empty())
        .map_or_else(
            || {
                eprintln!("[DK-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        )
}

/// Expand a leading `~` or `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => home_dir().join(components.as_path()),
        _ => path.to_path_buf(),
    }
}

/// Resolve a path to an absolute, normalized path.
///
/// Existing paths are canonicalized (symlinks resolved). Paths that do not
/// exist yet are joined onto the working directory and `.`/`..` are folded
/// syntactically, so a managed root can be resolved before it is created.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir().map_or_else(|_| expanded.clone(), |cwd| cwd.join(&expanded))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
