use std::path::{Path, PathBuf};

/// Longest sanitized name kept from the client-supplied filename.
const MAX_NAME_LEN: usize = 100;

/// Writes accepted uploads under a single directory, served at `/uploads`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// Stores `bytes` as `{uuid}_{sanitized name}` and returns that name.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> std::io::Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stored = format!("{}_{}", uuid::Uuid::new_v4(), sanitize_filename(original_name));
        tokio::fs::write(self.dir.join(&stored), bytes).await?;
        tracing::debug!("Stored upload {} as {}", original_name, stored);
        Ok(stored)
    }
}

/// Keeps the last path component and replaces anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let mut cleaned: String = cleaned.chars().take(MAX_NAME_LEN).collect();
    if cleaned.is_empty() {
        cleaned.push_str("upload");
    }
    cleaned
}

/// Public URL of a stored upload.
pub fn upload_url(stored_name: &str) -> String {
    format!("/uploads/{}", stored_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("scan.png"), "scan.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\images\\brain scan#1.jpg"), "brain_scan_1.jpg");
        assert_eq!(sanitize_filename("..hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("dir/"), "upload");
        assert_eq!(sanitize_filename("ünï.png"), "_n_.png");
    }

    #[tokio::test]
    async fn saves_under_unique_names() {
        let dir = std::env::temp_dir().join(format!("neuroscan-uploads-{}", uuid::Uuid::new_v4()));
        let store = UploadStore::new(&dir);
        assert!(!store.exists());

        let a = store.save("mri.png", b"abc").await.unwrap();
        let b = store.save("mri.png", b"def").await.unwrap();
        assert_ne!(a, b);
        assert!(a.ends_with("_mri.png"));
        assert_eq!(std::fs::read(dir.join(&a)).unwrap(), b"abc");
        assert_eq!(upload_url(&a), format!("/uploads/{a}"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
