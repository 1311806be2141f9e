//! Expand command-line patterns into the ordered list of files to send.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;

/// Expand glob patterns. Duplicate patterns and files that match more than once are
/// dropped; the first occurrence keeps its place. Directories are skipped.
pub fn expand(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut seen_patterns = HashSet::new();
    let mut seen_files = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        if !seen_patterns.insert(pattern.as_str()) {
            continue;
        }
        let entries =
            glob::glob(pattern).with_context(|| format!("invalid file pattern '{pattern}'"))?;
        let mut matched = false;
        for entry in entries {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("skipping {}: {}", e.path().display(), e.error());
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            matched = true;
            let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if seen_files.insert(key) {
                files.push(path);
            }
        }
        if !matched {
            log::warn!("'{}' matches no files", pattern);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn dedupes_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.log"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.txt")).unwrap();
        let base = dir.path().display().to_string();
        let patterns = vec![
            format!("{base}/c.log"),
            format!("{base}/*.txt"),
            format!("{base}/c.log"),
            format!("{base}/a.txt"),
        ];
        let files = expand(&patterns).unwrap();
        assert_eq!(names(&files), ["c.log", "a.txt", "b.txt"]);
    }

    #[test]
    fn no_match_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.none", dir.path().display());
        assert!(expand(&[pattern]).unwrap().is_empty());
    }

    #[test]
    fn broken_pattern_is_an_error() {
        assert!(expand(&["[".to_string()]).is_err());
    }
}
