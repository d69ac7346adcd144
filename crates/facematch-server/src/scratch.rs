//! Scratch upload directory: filename policy, per-request files, bulk clear.

use std::io;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "tiff"];

/// Whether `filename` carries an allowed image extension (case-insensitive).
pub fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reduce a client-supplied filename to a safe ASCII basename.
///
/// Accents are folded away through NFKD. Path separators become word breaks,
/// runs of whitespace become `_`, anything outside `[A-Za-z0-9_.-]` is
/// dropped and leading/trailing `.`/`_` stripped. May return an empty string.
pub fn secure_filename(filename: &str) -> String {
    let spaced: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// `<uuid>_<secure name>`, using `fallback` when the name sanitizes away.
pub fn unique_name(original: &str, fallback: &str) -> String {
    let secured = secure_filename(original);
    let base = if secured.is_empty() { fallback } else { secured.as_str() };
    format!("{}_{}", Uuid::new_v4(), base)
}

/// An uploaded file that is deleted when dropped.
///
/// Deletion is best-effort; failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    name: String,
}

impl ScratchFile {
    /// Write `data` to `dir/name`.
    pub async fn write(dir: &Path, name: String, data: &[u8]) -> io::Result<Self> {
        let guard = Self { path: dir.join(&name), name };
        tokio::fs::write(&guard.path, data).await?;
        tracing::debug!(path = %guard.path.display(), bytes = data.len(), "upload saved");
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to delete upload"),
        }
    }
}

/// Delete every regular file directly inside `dir`. Returns how many went.
pub async fn clear_dir(dir: &Path) -> io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_file() {
        assert!(allowed_file("face.png"));
        assert!(allowed_file("FACE.JPEG"));
        assert!(allowed_file("archive.tar.tiff"));
        assert!(!allowed_file("face.webp"));
        assert!(!allowed_file("png"));
        assert!(!allowed_file(""));
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool photo.jpg"), "My_cool_photo.jpg");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\face.png"), "C_Users_me_face.png");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_secure_filename_folds_accents() {
        assert_eq!(secure_filename("café.png"), "cafe.png");
        assert_eq!(secure_filename("Ångström selfie.JPG"), "Angstrom_selfie.JPG");
        assert_eq!(secure_filename("ﬁle.png"), "file.png");
        assert_eq!(secure_filename("照片.png"), "png");
    }

    #[test]
    fn test_unique_name_fallback() {
        let name = unique_name("???", "upload1");
        assert!(name.ends_with("_upload1"));
        assert_eq!(name.len(), 36 + "_upload1".len());
        assert_ne!(unique_name("a.png", "x"), unique_name("a.png", "x"));
    }

    #[tokio::test]
    async fn test_scratch_file_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScratchFile::write(dir.path(), "a.png".into(), b"data").await.unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(file.name(), "a.png");
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_clear_dir_keeps_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.png"), b"1").unwrap();
        std::fs::write(dir.path().join("two.jpg"), b"2").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(clear_dir(dir.path()).await.unwrap(), 2);
        assert!(dir.path().join("nested").is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_clear_missing_dir_errors() {
        assert!(clear_dir(Path::new("/nonexistent/uploads")).await.is_err());
    }
}
