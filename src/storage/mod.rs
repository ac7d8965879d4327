use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::history::ImageVersion;

const DOWNLOAD_SUBDIR: &str = "Pictures";
const DOWNLOAD_PREFIX: &str = "retoucher_";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Writes versions out of the session. Never touches history.
#[derive(Debug, Clone)]
pub struct DownloadStorage {
    download_dir: PathBuf,
}

impl DownloadStorage {
    pub const fn with_dir(download_dir: PathBuf) -> Self {
        Self { download_dir }
    }

    pub fn with_default_dir() -> StorageResult<Self> {
        let home = std::env::var("HOME").map_err(|_| StorageError::MissingHomeDirectory)?;
        let mut download_dir = PathBuf::from(home);
        download_dir.push(DOWNLOAD_SUBDIR);
        Ok(Self::with_dir(download_dir))
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Picks the first free `<prefix><version>[_n].<ext>` name in the
    /// download directory.
    pub fn allocate_target_path(&self, version: &ImageVersion) -> PathBuf {
        let extension = sniff_extension(version.payload());
        let stem = format!("{DOWNLOAD_PREFIX}{}", version.id());
        let mut path = self.download_dir.join(format!("{stem}.{extension}"));
        let mut suffix = 1;
        while path.exists() {
            path = self
                .download_dir
                .join(format!("{stem}_{suffix}.{extension}"));
            suffix += 1;
        }
        path
    }

    pub fn save_version(&self, version: &ImageVersion) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.download_dir)?;
        let target = self.allocate_target_path(version);
        fs::write(&target, version.payload())?;
        tracing::info!(
            version = %version.id(),
            path = %target.display(),
            "version downloaded"
        );
        Ok(target)
    }
}

fn sniff_extension(payload: &[u8]) -> &'static str {
    image::guess_format(payload)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::version;
    use crate::history::{VersionIds, VersionOrigin};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "retoucher-storage-{}-{name}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn allocate_target_path_uses_version_id_filename() {
        let mut ids = VersionIds::default();
        let version = version(&mut ids, VersionOrigin::Upload);
        let storage = DownloadStorage::with_dir(PathBuf::from("/home/test/Pictures"));

        let path = storage.allocate_target_path(&version);
        assert_eq!(path, PathBuf::from("/home/test/Pictures/retoucher_v1.png"));
    }

    #[test]
    fn save_version_writes_payload_and_never_overwrites() {
        let dir = scratch_dir("save");
        let mut ids = VersionIds::default();
        let version = version(&mut ids, VersionOrigin::Crop);
        let storage = DownloadStorage::with_dir(dir.clone());

        let first = storage.save_version(&version).expect("first save");
        let second = storage.save_version(&version).expect("second save");

        assert_ne!(first, second);
        assert!(second.ends_with("retoucher_v1_1.png"));
        assert_eq!(fs::read(&first).expect("read back"), version.payload());
        let _ = fs::remove_dir_all(dir);
    }
}
