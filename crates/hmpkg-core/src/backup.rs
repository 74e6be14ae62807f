use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const BACKUP_SUFFIX: &str = ".backup";
const COMPARE_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("source path '{0}' exists but is not a regular file")]
    SourceNotRegular(PathBuf),
    #[error("backup path '{0}' exists but is not a regular file, investigate or remove it manually")]
    BackupNotRegular(PathBuf),
    #[error("source file '{source_path}' does not exist but a stale backup '{backup_path}' was found")]
    StaleBackup {
        source_path: PathBuf,
        backup_path: PathBuf,
    },
    #[error("source file '{0}' does not exist and no backup is present")]
    MissingSource(PathBuf),
    #[error("no regular backup found at '{0}'")]
    MissingBackup(PathBuf),
    #[error("parent path '{0}' exists but is not a directory")]
    ParentNotDirectory(PathBuf),
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy '{from}' to '{to}': {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    Created,
    Updated,
    AlreadyIdentical,
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStatus::Created => write!(f, "new backup created"),
            BackupStatus::Updated => write!(f, "updated backup created"),
            BackupStatus::AlreadyIdentical => {
                write!(f, "backup is already identical to current config")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Restored,
    AlreadyIdentical,
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStatus::Restored => write!(f, "configuration file restored from backup"),
            RestoreStatus::AlreadyIdentical => {
                write!(f, "configuration file is already identical to its backup")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Missing,
    Regular,
    Other,
}

fn entry(path: &Path) -> Entry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Entry::Regular,
        Ok(_) => Entry::Other,
        // dangling symlinks still occupy the path
        Err(_) if std::fs::symlink_metadata(path).is_ok() => Entry::Other,
        Err(_) => Entry::Missing,
    }
}

pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(BACKUP_SUFFIX);
    PathBuf::from(raw)
}

/// True only when both paths are regular files with the same bytes.
pub fn files_identical(left: &Path, right: &Path) -> bool {
    if entry(left) != Entry::Regular || entry(right) != Entry::Regular {
        return false;
    }
    match compare_contents(left, right) {
        Ok(same) => same,
        Err(err) => {
            tracing::debug!(error = %err, "file comparison failed");
            false
        }
    }
}

fn compare_contents(left: &Path, right: &Path) -> std::io::Result<bool> {
    if std::fs::metadata(left)?.len() != std::fs::metadata(right)?.len() {
        return Ok(false);
    }
    let mut left = File::open(left)?;
    let mut right = File::open(right)?;
    let mut left_buf = vec![0u8; COMPARE_CHUNK];
    let mut right_buf = vec![0u8; COMPARE_CHUNK];
    loop {
        let left_len = fill_chunk(&mut left, &mut left_buf)?;
        let right_len = fill_chunk(&mut right, &mut right_buf)?;
        if left_buf[..left_len] != right_buf[..right_len] {
            return Ok(false);
        }
        if left_len == 0 {
            return Ok(true);
        }
    }
}

fn fill_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            read => filled += read,
        }
    }
    Ok(filled)
}

fn remove_if_present(path: &Path) -> Result<(), BackupError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BackupError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn copy_file(from: &Path, to: &Path, overwrite: bool) -> Result<(), BackupError> {
    let copy_error = |source: std::io::Error| BackupError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    match entry(to) {
        Entry::Missing => {}
        _ if !overwrite => {
            return Err(copy_error(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "destination exists",
            )));
        }
        // copy truncates in place, so a symlinked config keeps its link and target
        Entry::Regular => {}
        Entry::Other => std::fs::remove_file(to).map_err(copy_error)?,
    }
    std::fs::copy(from, to).map_err(copy_error)?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<(), BackupError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(()),
    };
    if parent.is_dir() {
        return Ok(());
    }
    if std::fs::symlink_metadata(parent).is_ok() {
        return Err(BackupError::ParentNotDirectory(parent.to_path_buf()));
    }
    std::fs::create_dir_all(parent).map_err(|source| BackupError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %parent.display(), "created parent directory for restore");
    Ok(())
}

/// The `<file>.backup` sibling used as the rollback source of truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBackup {
    path: PathBuf,
    backup_path: PathBuf,
}

impl ConfigBackup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = backup_path_for(&path);
        ConfigBackup { path, backup_path }
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn backup(&self) -> Result<BackupStatus, BackupError> {
        let status = match (entry(&self.path), entry(&self.backup_path)) {
            (Entry::Regular, Entry::Missing) => {
                copy_file(&self.path, &self.backup_path, false)?;
                BackupStatus::Created
            }
            (Entry::Regular, Entry::Regular) => {
                if files_identical(&self.path, &self.backup_path) {
                    BackupStatus::AlreadyIdentical
                } else {
                    remove_if_present(&self.backup_path)?;
                    copy_file(&self.path, &self.backup_path, false)?;
                    BackupStatus::Updated
                }
            }
            (Entry::Regular, Entry::Other) | (Entry::Missing, Entry::Other) => {
                return Err(BackupError::BackupNotRegular(self.backup_path.clone()))
            }
            (Entry::Other, _) => return Err(BackupError::SourceNotRegular(self.path.clone())),
            (Entry::Missing, Entry::Regular) => {
                return Err(BackupError::StaleBackup {
                    source_path: self.path.clone(),
                    backup_path: self.backup_path.clone(),
                })
            }
            (Entry::Missing, Entry::Missing) => {
                return Err(BackupError::MissingSource(self.path.clone()))
            }
        };
        tracing::info!(path = %self.path.display(), %status, "backup checked");
        Ok(status)
    }

    pub fn restore(&self) -> Result<RestoreStatus, BackupError> {
        match entry(&self.backup_path) {
            Entry::Regular => {}
            Entry::Other => return Err(BackupError::BackupNotRegular(self.backup_path.clone())),
            Entry::Missing => return Err(BackupError::MissingBackup(self.backup_path.clone())),
        }
        if files_identical(&self.path, &self.backup_path) {
            tracing::info!(path = %self.path.display(), "restore not needed");
            return Ok(RestoreStatus::AlreadyIdentical);
        }
        ensure_parent_dir(&self.path)?;
        copy_file(&self.backup_path, &self.path, true)?;
        tracing::info!(path = %self.path.display(), "restored configuration from backup");
        Ok(RestoreStatus::Restored)
    }
}
