//! Local filesystem file adapter. Files live under `{directory}/{app_id}/`
//! and are served back through the files routes.

pub mod range;

use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::AppConfig;

pub use range::{ByteRange, RangeError};

const MAX_FILENAME_LENGTH: usize = 128;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("{0}")]
    InvalidFilename(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Stores files on local disk and builds their public URLs.
#[derive(Debug, Clone)]
pub struct LocalFilesAdapter {
    root: PathBuf,
    app_id: String,
    public_url: String,
}

impl LocalFilesAdapter {
    pub fn new(root: impl Into<PathBuf>, app_id: &str, public_url: &str) -> Self {
        Self {
            root: root.into(),
            app_id: app_id.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.files.directory, &config.app.app_id, &config.public_api_url())
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn validate_filename(filename: &str) -> Result<(), FileError> {
        if filename.is_empty() {
            return Err(FileError::InvalidFilename("Filename is required.".to_string()));
        }
        if filename.chars().count() > MAX_FILENAME_LENGTH {
            return Err(FileError::InvalidFilename("Filename too long.".to_string()));
        }
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(FileError::InvalidFilename("Filename contains invalid characters.".to_string()));
        }
        Ok(())
    }

    /// Name a new upload is stored under: a random hex prefix keeps
    /// uploads with the same original name apart.
    pub fn stored_name(original: &str) -> String {
        let prefix: u128 = rand::thread_rng().gen();
        format!("{:032x}_{}", prefix, original)
    }

    fn path_for(&self, filename: &str) -> Result<PathBuf, FileError> {
        let decoded = percent_decode(filename);
        Self::validate_filename(&decoded)?;
        Ok(self.root.join(&self.app_id).join(decoded))
    }

    pub async fn create_file(&self, filename: &str, data: &[u8]) -> Result<(), FileError> {
        let path = self.path_for(filename)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, data).await?;
        debug!("Stored file {} ({} bytes)", filename, data.len());
        Ok(())
    }

    /// Removing a file that is already gone is not an error.
    pub async fn delete_file(&self, filename: &str) -> Result<(), FileError> {
        let path = self.path_for(filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted file {}", filename);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Delete requested for missing file {}", filename);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_file_data(&self, filename: &str) -> Result<Vec<u8>, FileError> {
        let path = self.path_for(filename)?;
        fs::read(&path).await.map_err(|e| not_found_or_io(e, filename))
    }

    /// Open a file for streaming; returns the handle and its size.
    pub async fn open(&self, filename: &str) -> Result<(fs::File, u64), FileError> {
        let path = self.path_for(filename)?;
        let file = fs::File::open(&path).await.map_err(|e| not_found_or_io(e, filename))?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    pub fn file_location(&self, filename: &str) -> String {
        format!(
            "{}/files/{}/{}",
            self.public_url,
            percent_encode(&self.app_id),
            percent_encode(filename)
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn not_found_or_io(err: std::io::Error, filename: &str) -> FileError {
    if err.kind() == std::io::ErrorKind::NotFound {
        FileError::NotFound(filename.to_string())
    } else {
        FileError::Io(err)
    }
}

pub fn content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(dir: &Path) -> LocalFilesAdapter {
        LocalFilesAdapter::new(dir, "ayn", "http://localhost:1337/api/")
    }

    #[test]
    fn rejects_bad_filenames() {
        assert!(LocalFilesAdapter::validate_filename("ok.png").is_ok());
        assert!(LocalFilesAdapter::validate_filename("../etc/passwd").is_err());
        assert!(LocalFilesAdapter::validate_filename("a/b.png").is_err());
        let long = "a".repeat(129);
        match LocalFilesAdapter::validate_filename(&long) {
            Err(FileError::InvalidFilename(msg)) => assert_eq!(msg, "Filename too long."),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stored_names_keep_the_original() {
        let name = LocalFilesAdapter::stored_name("photo.png");
        assert!(name.ends_with("_photo.png"));
        assert_eq!(name.len(), 32 + 1 + "photo.png".len());
    }

    #[test]
    fn builds_encoded_locations() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            adapter(dir.path()).file_location("my file.png"),
            "http://localhost:1337/api/files/ayn/my%20file.png"
        );
    }

    #[test]
    fn maps_content_types() {
        assert_eq!(content_type("clip.MP4"), "video/mp4");
        assert_eq!(content_type("song.mp3"), "audio/mpeg");
        assert_eq!(content_type("doc.pdf"), "application/pdf");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn writes_reads_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let files = adapter(dir.path());
        files.create_file("a%20b.txt", b"hello").await.unwrap();
        assert!(dir.path().join("ayn").join("a b.txt").exists());
        assert_eq!(files.get_file_data("a b.txt").await.unwrap(), b"hello");

        files.delete_file("a b.txt").await.unwrap();
        files.delete_file("a b.txt").await.unwrap();
        assert!(matches!(
            files.get_file_data("a b.txt").await,
            Err(FileError::NotFound(_))
        ));
    }
}
