//! Skill layer packing and unpacking.
//!
//! A skill layer is a gzip-compressed tar of the whole skill directory.
//! Packing is deterministic: entries are sorted and carry no timestamps or
//! ownership, so the same tree always produces the same layer digest.
//! Unpacking refuses any entry that would land outside the target directory.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use skr_core::error::{Result, SkrError};
use tar::{Archive, EntryType, Header};

/// Pack `src_dir` into an in-memory tar.gz layer.
///
/// Entry paths are relative to `src_dir`. Symlinks and special files are
/// skipped.
pub fn create_layer(src_dir: &Path) -> Result<Vec<u8>> {
    if !src_dir.is_dir() {
        return Err(SkrError::Skill(format!(
            "Source directory not found: {}",
            src_dir.display()
        )));
    }

    let mut entries = Vec::new();
    walk_dir(src_dir, src_dir, &mut entries)?;
    entries.sort();

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for relative in &entries {
        let full_path = src_dir.join(relative);
        let metadata = std::fs::symlink_metadata(&full_path)?;

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(file_mode(&metadata));

        if metadata.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, relative, std::io::empty())
                .map_err(|e| {
                    SkrError::Skill(format!(
                        "Failed to add directory {} to layer: {}",
                        relative.display(),
                        e
                    ))
                })?;
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            let file = File::open(&full_path)?;
            builder.append_data(&mut header, relative, file).map_err(|e| {
                SkrError::Skill(format!(
                    "Failed to add file {} to layer: {}",
                    relative.display(),
                    e
                ))
            })?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| SkrError::Skill(format!("Failed to finalize layer: {}", e)))?;
    let data = encoder
        .finish()
        .map_err(|e| SkrError::Skill(format!("Failed to compress layer: {}", e)))?;

    tracing::debug!(
        source = %src_dir.display(),
        entries = entries.len(),
        size = data.len(),
        "Packed skill layer"
    );

    Ok(data)
}

/// Recursively collect directories and regular files below `current`.
fn walk_dir(root: &Path, current: &Path, entries: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        SkrError::Skill(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                SkrError::Skill(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        if file_type.is_dir() {
            entries.push(relative);
            walk_dir(root, &path, entries)?;
        } else if file_type.is_file() {
            entries.push(relative);
        } else {
            tracing::warn!(path = %path.display(), "Skipping non-regular file in skill directory");
        }
    }

    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

/// Unpack a tar.gz layer read from `reader` into `target_dir`.
///
/// Fails with [`SkrError::ArchiveSafety`] on the first entry whose path is
/// absolute or climbs out with `..`; nothing is written for that entry.
/// Directories and regular files are extracted, other entry types skipped.
pub fn unpack_layer<R: Read>(reader: R, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir)?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    let entries = archive
        .entries()
        .map_err(|e| SkrError::Other(format!("Failed to read layer archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| SkrError::Other(format!("Failed to read layer entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| SkrError::Other(format!("Invalid entry path in layer: {}", e)))?
            .into_owned();

        let relative = safe_relative_path(&path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = target_dir.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(|e| {
                    SkrError::Other(format!("Failed to extract {}: {}", relative.display(), e))
                })?;
            }
            other => {
                tracing::debug!(path = %path.display(), kind = ?other, "Skipping layer entry");
            }
        }
    }

    tracing::debug!(target = %target_dir.display(), "Unpacked skill layer");
    Ok(())
}

/// Validate an archive entry path and normalize it to a relative path.
fn safe_relative_path(path: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SkrError::ArchiveSafety(format!(
                    "Archive entry escapes extraction root: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(relative)
}
