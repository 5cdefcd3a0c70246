//! Allowlisted-root path resolution for file-based ingestion.
//!
//! Every file read or write performed on behalf of a tool call goes through
//! this module. It prevents absolute paths, `..` traversal, and symlink
//! escapes, and enforces suffix allowlists and size caps. Error messages
//! never include file contents.

use std::path::{Component, Path, PathBuf};

use crate::error::LexError;

/// Resolve a relative file path under an allowlisted root for reading.
///
/// Rules, in order: relative path only; no `..` components; the resolved
/// real path (symlinks followed) must stay under the resolved root at a
/// component boundary; target must be a regular file; suffix must be in the
/// allowlist; size must not exceed `max_bytes`.
pub fn resolve_file(
    root: &Path,
    relative_path: &str,
    allowed_suffixes: &[&str],
    max_bytes: u64,
) -> Result<PathBuf, LexError> {
    let candidate_rel = validate_relative(relative_path)?;

    let resolved_root = std::fs::canonicalize(root).map_err(|_| LexError::RootMisconfigured {
        message: "ingest root does not exist".to_string(),
    })?;

    let candidate = resolved_root.join(candidate_rel);
    let resolved = std::fs::canonicalize(&candidate).map_err(|_| LexError::NotFound {
        resource: format!("file under ingest root: {}", relative_path),
    })?;

    if !resolved.starts_with(&resolved_root) {
        return Err(LexError::PathEscape);
    }

    let file_meta = std::fs::symlink_metadata(&resolved)?;
    if !file_meta.is_file() {
        return Err(LexError::NotRegularFile);
    }

    check_suffix(&resolved, allowed_suffixes)?;

    if file_meta.len() > max_bytes {
        return Err(LexError::TooLarge {
            limit_bytes: max_bytes,
        });
    }

    Ok(resolved)
}

/// Resolve a relative output path under an allowlisted root for writing.
///
/// The target itself may not exist yet; containment is validated on the
/// nearest existing ancestor directory so symlinked parents cannot escape
/// the root.
pub fn resolve_write_path(
    root: &Path,
    relative_path: &str,
    allowed_suffixes: &[&str],
) -> Result<PathBuf, LexError> {
    let candidate_rel = validate_relative(relative_path)?;

    let resolved_root = std::fs::canonicalize(root).map_err(|_| LexError::RootMisconfigured {
        message: "ingest root does not exist".to_string(),
    })?;

    let candidate = resolved_root.join(candidate_rel);
    check_suffix(&candidate, allowed_suffixes)?;

    let parent = candidate.parent().ok_or(LexError::PathEscape)?;
    let resolved_parent = std::fs::canonicalize(parent).map_err(|_| LexError::NotFound {
        resource: "output directory under ingest root".to_string(),
    })?;
    if !resolved_parent.starts_with(&resolved_root) {
        return Err(LexError::PathEscape);
    }

    // An existing target must also resolve inside the root (symlink check).
    if candidate.exists() {
        let resolved = std::fs::canonicalize(&candidate)?;
        if !resolved.starts_with(&resolved_root) {
            return Err(LexError::PathEscape);
        }
    }

    let file_name = candidate.file_name().ok_or(LexError::PathEscape)?;
    Ok(resolved_parent.join(file_name))
}

/// Read a file as UTF-8 with lossy decoding, truncated to `max_chars`.
///
/// Returns the text and whether truncation occurred.
pub fn read_lossy_utf8(path: &Path, max_chars: Option<usize>) -> Result<(String, bool), LexError> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();

    match max_chars {
        Some(cap) if text.chars().count() > cap => {
            let truncated: String = text.chars().take(cap).collect();
            Ok((truncated, true))
        }
        _ => Ok((text, false)),
    }
}

fn validate_relative(relative_path: &str) -> Result<&Path, LexError> {
    let trimmed = relative_path.trim();
    if trimmed.is_empty() {
        return Err(LexError::invalid_input("no file path provided"));
    }

    let candidate = Path::new(trimmed);
    if candidate.is_absolute() {
        return Err(LexError::PathAbsolute);
    }
    for component in candidate.components() {
        match component {
            Component::ParentDir => return Err(LexError::PathTraversal),
            Component::Prefix(_) | Component::RootDir => return Err(LexError::PathAbsolute),
            _ => {}
        }
    }
    Ok(candidate)
}

fn check_suffix(path: &Path, allowed_suffixes: &[&str]) -> Result<(), LexError> {
    if allowed_suffixes.is_empty() {
        return Ok(());
    }
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    if allowed_suffixes.iter().any(|s| s.eq_ignore_ascii_case(&suffix)) {
        Ok(())
    } else {
        Err(LexError::SuffixNotAllowed {
            allowed: allowed_suffixes.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("case")).unwrap();
        fs::write(tmp.path().join("case/notes.md"), "# Notes\n\nSome text.").unwrap();
        fs::write(tmp.path().join("scan.pdf"), b"%PDF-1.4 stub").unwrap();
        tmp
    }

    #[test]
    fn test_resolves_nested_file() {
        let tmp = setup();
        let path = resolve_file(tmp.path(), "case/notes.md", &[".md"], 1_000_000).unwrap();
        assert!(path.ends_with("case/notes.md"));
    }

    #[test]
    fn test_rejects_absolute_path() {
        let tmp = setup();
        let err = resolve_file(tmp.path(), "/etc/passwd", &[".md"], 1_000_000).unwrap_err();
        assert_eq!(err.code(), "path_absolute");
    }

    #[test]
    fn test_rejects_traversal() {
        let tmp = setup();
        let err = resolve_file(tmp.path(), "../etc/passwd", &[".md"], 1_000_000).unwrap_err();
        assert_eq!(err.code(), "path_traversal");
        let err = resolve_file(tmp.path(), "case/../../x.md", &[".md"], 1_000_000).unwrap_err();
        assert_eq!(err.code(), "path_traversal");
    }

    #[test]
    fn test_rejects_wrong_suffix() {
        let tmp = setup();
        let err = resolve_file(tmp.path(), "scan.pdf", &[".md", ".markdown"], 1_000_000)
            .unwrap_err();
        assert_eq!(err.code(), "suffix_not_allowed");
    }

    #[test]
    fn test_rejects_oversized_file() {
        let tmp = setup();
        let err = resolve_file(tmp.path(), "case/notes.md", &[".md"], 4).unwrap_err();
        assert_eq!(err.code(), "too_large");
    }

    #[test]
    fn test_rejects_directory_target() {
        let tmp = setup();
        let err = resolve_file(tmp.path(), "case", &[], 1_000_000).unwrap_err();
        // canonicalize succeeds for directories; the metadata check rejects.
        assert_eq!(err.code(), "not_regular_file");
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let tmp = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.md"), "outside").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.md"),
            tmp.path().join("link.md"),
        )
        .unwrap();
        let err = resolve_file(tmp.path(), "link.md", &[".md"], 1_000_000).unwrap_err();
        assert_eq!(err.code(), "path_escape");
    }

    #[test]
    fn test_write_path_for_new_file() {
        let tmp = setup();
        let path = resolve_write_path(tmp.path(), "case/notes.pdf.md", &[".md"]).unwrap();
        assert!(path.ends_with("case/notes.pdf.md"));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_path_rejects_missing_parent() {
        let tmp = setup();
        let err = resolve_write_path(tmp.path(), "missing/out.md", &[".md"]).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_write_path_rejects_traversal() {
        let tmp = setup();
        let err = resolve_write_path(tmp.path(), "../out.md", &[".md"]).unwrap_err();
        assert_eq!(err.code(), "path_traversal");
    }

    #[test]
    fn test_read_lossy_truncates_at_char_boundary() {
        let tmp = setup();
        let path = tmp.path().join("umlauts.md");
        fs::write(&path, "äöüäöü").unwrap();
        let (text, truncated) = read_lossy_utf8(&path, Some(4)).unwrap();
        assert_eq!(text, "äöüä");
        assert!(truncated);
    }

    #[test]
    fn test_read_lossy_replaces_invalid_bytes() {
        let tmp = setup();
        let path = tmp.path().join("broken.md");
        fs::write(&path, [0x41, 0xFF, 0x42]).unwrap();
        let (text, truncated) = read_lossy_utf8(&path, None).unwrap();
        assert_eq!(text, "A\u{FFFD}B");
        assert!(!truncated);
    }
}
