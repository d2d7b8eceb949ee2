use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned_files: usize,
    pub image_files: usize,
    pub skipped_unsupported: usize,
    pub skipped_hidden: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<PathBuf>,
    pub stats: ScanStats,
}

/// Lists the files to process under `root`. A file path is returned as is.
pub fn collect_targets(root: &Path, recursive: bool, include_hidden: bool) -> Result<ScanResult> {
    if !root.exists() {
        anyhow::bail!("指定されたパスが見つかりません: {}", root.display());
    }

    let mut result = ScanResult::default();
    if root.is_file() {
        result.stats.scanned_files = 1;
        result.stats.image_files = 1;
        result.files.push(root.to_path_buf());
        return Ok(result);
    }

    if recursive {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry =
                entry.with_context(|| format!("フォルダ走査に失敗しました: {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            consider(entry.path(), include_hidden, &mut result);
        }
    } else {
        for entry in fs::read_dir(root)
            .with_context(|| format!("フォルダを読めませんでした: {}", root.display()))?
        {
            let entry =
                entry.with_context(|| format!("エントリ読み取り失敗: {}", root.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            consider(&path, include_hidden, &mut result);
        }
        result.files.sort();
    }

    Ok(result)
}

fn consider(path: &Path, include_hidden: bool, result: &mut ScanResult) {
    result.stats.scanned_files += 1;
    if is_hidden(path) && !include_hidden {
        result.stats.skipped_hidden += 1;
        return;
    }
    if is_supported_image(path) {
        result.stats.image_files += 1;
        result.files.push(path.to_path_buf());
    } else {
        result.stats.skipped_unsupported += 1;
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{collect_targets, is_supported_image};
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"x").expect("write");
    }

    #[test]
    fn flat_scan_filters_and_sorts() {
        let temp = tempdir().expect("tempdir");
        touch(&temp.path().join("b.PNG"));
        touch(&temp.path().join("a.jpeg"));
        touch(&temp.path().join("notes.txt"));
        touch(&temp.path().join(".hidden.png"));
        touch(&temp.path().join("nested").join("c.jpg"));

        let result = collect_targets(temp.path(), false, false).expect("scan");

        let names: Vec<_> = result
            .files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.jpeg", "b.PNG"]);
        assert_eq!(result.stats.skipped_unsupported, 1);
        assert_eq!(result.stats.skipped_hidden, 1);
    }

    #[test]
    fn recursive_scan_descends_and_can_include_hidden() {
        let temp = tempdir().expect("tempdir");
        touch(&temp.path().join("a.png"));
        touch(&temp.path().join("nested").join("deeper").join("c.jpg"));
        touch(&temp.path().join(".hidden.png"));

        let result = collect_targets(temp.path(), true, true).expect("scan");

        assert_eq!(result.files.len(), 3);
        assert_eq!(result.stats.image_files, 3);
        assert_eq!(result.stats.skipped_hidden, 0);
    }

    #[test]
    fn file_path_is_returned_as_is() {
        let temp = tempdir().expect("tempdir");
        let file = temp.path().join("anything.txt");
        touch(&file);

        let result = collect_targets(&file, false, false).expect("scan");
        assert_eq!(result.files, vec![file]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let err = collect_targets(&temp.path().join("missing"), false, false)
            .expect_err("must fail");
        assert!(err.to_string().contains("指定されたパスが見つかりません"));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(is_supported_image(Path::new("x.JPG")));
        assert!(is_supported_image(Path::new("x.Jpeg")));
        assert!(!is_supported_image(Path::new("x.gif")));
        assert!(!is_supported_image(Path::new("png")));
    }
}
