//! Archive unpacking shared by the managed runtime and downloaded servers
//!
//! Gzip'd tarballs and zip files (including `.vsix` extension packages) are
//! inspected before anything is written: a single member that would land
//! outside the destination rejects the whole archive.

use crate::error::{Result, RuntimeError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Format implied by the file name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") || name.ends_with(".vsix") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Reject archive members that would escape the extraction directory
pub fn is_safe_member(path: &Path) -> bool {
    !path.has_root()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Unpack `archive` into `dest`
///
/// Returns the first member's top-level directory, if the archive has one.
pub async fn unpack(archive: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || unpack_blocking(&archive, &dest))
        .await
        .map_err(|e| RuntimeError::ExtractionFailed(format!("Task failed: {e}")))?
}

fn unpack_blocking(archive: &Path, dest: &Path) -> Result<Option<PathBuf>> {
    let archive_name = archive.display().to_string();
    let format = ArchiveFormat::from_path(archive).ok_or_else(|| {
        RuntimeError::ExtractionFailed(format!("Unknown archive format: {archive_name}"))
    })?;

    // Inspect member names without writing anything
    let members = match format {
        ArchiveFormat::TarGz => tar_members(archive)?,
        ArchiveFormat::Zip => zip_members(archive)?,
    };

    let unsafe_members: Vec<String> = members
        .iter()
        .filter(|path| !is_safe_member(path))
        .map(|path| path.display().to_string())
        .collect();
    if !unsafe_members.is_empty() {
        return Err(RuntimeError::UnsafeArchive {
            archive: archive_name,
            members: unsafe_members,
        });
    }

    std::fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::TarGz => open_tar(archive)?
            .unpack(dest)
            .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?,
        ArchiveFormat::Zip => unpack_zip(archive, dest)?,
    }
    debug!(archive = %archive_name, dest = %dest.display(), members = members.len(), "Archive unpacked");

    Ok(top_dir(&members))
}

fn top_dir(members: &[PathBuf]) -> Option<PathBuf> {
    members.iter().find_map(|path| {
        let mut normal = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)));
        match (normal.next(), normal.next()) {
            (Some(first), Some(_)) => Some(PathBuf::from(first.as_os_str())),
            _ => None,
        }
    })
}

fn open_tar(archive: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<File>>> {
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(File::open(
        archive,
    )?)))
}

fn tar_members(archive: &Path) -> Result<Vec<PathBuf>> {
    let mut reader = open_tar(archive)?;
    let entries = reader
        .entries()
        .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?;

    let mut members = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?;
        members.push(path.into_owned());
    }
    Ok(members)
}

fn open_zip(archive: &Path) -> Result<zip::ZipArchive<BufReader<File>>> {
    zip::ZipArchive::new(BufReader::new(File::open(archive)?))
        .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))
}

fn zip_members(archive: &Path) -> Result<Vec<PathBuf>> {
    let reader = open_zip(archive)?;
    Ok(reader.file_names().map(PathBuf::from).collect())
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<()> {
    let mut reader = open_zip(archive)?;
    for index in 0..reader.len() {
        let mut file = reader
            .by_index(index)
            .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?;
        let relative = file
            .enclosed_name()
            .map(|path| path.to_path_buf())
            .ok_or_else(|| {
                RuntimeError::ExtractionFailed(format!("Unsafe zip member: {}", file.name()))
            })?;
        let target = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Decompress `path` in place when it starts with the gzip magic bytes
///
/// Some download servers send gzip'd bodies regardless of what the client
/// accepts. Returns whether the file was decompressed.
pub async fn gunzip_if_compressed(path: &Path) -> Result<bool> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || gunzip_blocking(&path))
        .await
        .map_err(|e| RuntimeError::ExtractionFailed(format!("Task failed: {e}")))?
}

fn gunzip_blocking(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    {
        let mut file = File::open(path)?;
        if file.read(&mut magic)? < GZIP_MAGIC.len() || magic != GZIP_MAGIC {
            return Ok(false);
        }
    }

    let inflated = path.with_extension("inflated");
    {
        let mut decoder = flate2::read::GzDecoder::new(File::open(path)?);
        let mut out = File::create(&inflated)?;
        std::io::copy(&mut decoder, &mut out)
            .map_err(|e| RuntimeError::ExtractionFailed(e.to_string()))?;
    }
    std::fs::rename(&inflated, path)?;
    Ok(true)
}
