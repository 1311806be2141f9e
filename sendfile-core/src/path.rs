//! Destination paths for received files: confined to the receive directory, never overwriting.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("'{0}' is not a plain file name inside the receive directory")]
    Escape(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Pick a free path for `requested` inside `root`.
///
/// Names carrying `..`, a root or a drive prefix are refused outright. Other directory
/// parts are dropped and only the base name is kept. When that name is taken,
/// `stem_0.ext`, `stem_1.ext`, ... are tried in order. The root is created if missing.
pub async fn resolve(requested: &str, root: &Path) -> Result<PathBuf, PathError> {
    let base = base_name(requested).ok_or_else(|| PathError::Escape(requested.to_string()))?;

    fs::create_dir_all(root).await?;
    let root = fs::canonicalize(root).await?;

    let (stem, ext) = split_extension(&base);
    let mut candidate = root.join(&base);
    let mut n: u64 = 0;
    while occupied(&candidate).await? {
        candidate = root.join(format!("{stem}_{n}{ext}"));
        n += 1;
    }

    let parent = candidate
        .parent()
        .ok_or_else(|| PathError::Escape(requested.to_string()))?;
    let parent = fs::canonicalize(parent).await?;
    if !parent.starts_with(&root) {
        return Err(PathError::Escape(requested.to_string()));
    }
    Ok(candidate)
}

/// Open a resolved path for writing. Fails instead of overwriting if the path appeared
/// since it was resolved.
pub async fn create_destination(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().write(true).create_new(true).open(path).await
}

fn base_name(requested: &str) -> Option<String> {
    // Peers on other platforms may use backslashes.
    let normalized = requested.replace('\\', "/");
    let mut last = None;
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => last = Some(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    let base = last?.to_str()?;
    if base.is_empty() || base.contains('\0') || looks_like_drive(base) {
        return None;
    }
    Some(base.to_string())
}

fn looks_like_drive(part: &str) -> bool {
    let bytes = part.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// `report.pdf` -> (`report`, `.pdf`). Dotfiles and extensionless names keep the whole name as stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

async fn occupied(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
