//! Copying server assets into private storage

use crate::error::{InstallError, Result};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub struct PackageStore;

impl PackageStore {
    /// Replace `destination` with a recursive copy of `source`
    ///
    /// On failure the destination is left in an undefined state and the
    /// package must be treated as not installed.
    pub async fn stage(source: &Path, destination: &Path) -> Result<()> {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();
        let (src, dst) = (source.clone(), destination.clone());

        let staged = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()));

        staged.map_err(|reason| InstallError::StagingFailed {
            source_dir: source,
            destination,
            reason,
        })
    }
}

fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if !source.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        ));
    }

    let mut copied = 0usize;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!(
        source = %source.display(),
        destination = %destination.display(),
        files = copied,
        "Staged package assets"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_stage_replaces_destination() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("dest");
        write(&source.join("package.json"), "{}");
        write(&source.join("out/server.js"), "// server");
        write(&dest.join("stale.txt"), "old");

        PackageStore::stage(&source, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("package.json")).unwrap(), "{}");
        assert!(dest.join("out/server.js").is_file());
        assert!(!dest.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_stage_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src");
        let dest = dir.path().join("dest");
        write(&source.join("package.json"), "{\"name\":\"demo\"}");

        PackageStore::stage(&source, &dest).await.unwrap();
        PackageStore::stage(&source, &dest).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(&dest).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_staging_failure() {
        let dir = TempDir::new().unwrap();
        let result = PackageStore::stage(&dir.path().join("absent"), &dir.path().join("dest")).await;
        assert!(matches!(result, Err(InstallError::StagingFailed { .. })));
    }
}
