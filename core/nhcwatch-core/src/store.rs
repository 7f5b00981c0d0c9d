//! Per-subject result store.
//!
//! The state directory holds two files per wrapped subject:
//!
//! ```text
//! <state-dir>/
//! ├── <subject>.out    # output of the run in progress (working artifact)
//! └── <subject>.save   # last committed result
//! ```
//!
//! The directory usually lives under a world-writable parent such as `/tmp`,
//! so it is never created in place. A uniquely named directory is created
//! next to it with mode 0700 and renamed onto the final path, and the result
//! is verified (real directory, owned by the caller, mode 0700, writable)
//! before anything is read or written. Any failure there is fatal.

use fs_err as fs;
use std::ffi::CString;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{NhcError, Result};

const STATE_DIR_MODE: u32 = 0o700;
const ARTIFACT_MODE: u32 = 0o600;

pub fn effective_uid() -> u32 {
    unsafe { libc::geteuid() }
}

/// Creates (if needed) and secures the state directory at `path` for `uid`.
pub fn ensure_state_dir(path: &Path, uid: u32) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => create_atomically(path)?,
        Err(err) => return Err(NhcError::io(format!("stat {}", path.display()), err)),
    }

    // lchown: never touch whatever a planted symlink points at.
    let meta = std::fs::symlink_metadata(path)
        .map_err(|err| NhcError::io(format!("stat {}", path.display()), err))?;
    if meta.file_type().is_symlink() {
        return Err(NhcError::insecure(path, "path is a symbolic link"));
    }
    if !meta.is_dir() {
        return Err(NhcError::insecure(path, "path is not a directory"));
    }
    std::os::unix::fs::lchown(path, Some(uid), None)
        .map_err(|err| NhcError::insecure(path, format!("cannot take ownership: {}", err)))?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(STATE_DIR_MODE))
        .map_err(|err| NhcError::insecure(path, format!("cannot set mode 0700: {}", err)))?;

    verify_state_dir(path, uid)
}

fn create_atomically(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .ok_or_else(|| NhcError::insecure(path, "path has no final component"))?;

    fs::create_dir_all(&parent)
        .map_err(|err| NhcError::io(format!("create {}", parent.display()), err))?;

    let staging = parent.join(format!(
        ".{}.{:016x}",
        name.to_string_lossy(),
        rand::random::<u64>()
    ));
    std::fs::DirBuilder::new()
        .mode(STATE_DIR_MODE)
        .create(&staging)
        .map_err(|err| NhcError::io(format!("create {}", staging.display()), err))?;

    if let Err(err) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_dir(&staging);
        // Lost a race: someone else put something at `path`. Verification decides.
        if std::fs::symlink_metadata(path).is_err() {
            return Err(NhcError::io(
                format!("rename {} to {}", staging.display(), path.display()),
                err,
            ));
        }
        tracing::warn!(path = %path.display(), "State directory appeared while creating it");
    } else {
        tracing::debug!(path = %path.display(), "Created state directory");
    }
    Ok(())
}

fn verify_state_dir(path: &Path, uid: u32) -> Result<()> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|err| NhcError::io(format!("stat {}", path.display()), err))?;

    if meta.file_type().is_symlink() {
        return Err(NhcError::insecure(path, "path is a symbolic link"));
    }
    if !meta.is_dir() {
        return Err(NhcError::insecure(path, "path is not a directory"));
    }
    if meta.uid() != uid {
        return Err(NhcError::insecure(
            path,
            format!("owned by uid {}, expected {}", meta.uid(), uid),
        ));
    }
    if meta.mode() & 0o7777 != STATE_DIR_MODE {
        return Err(NhcError::insecure(
            path,
            format!("mode is {:o}, expected 700", meta.mode() & 0o7777),
        ));
    }
    if !is_writable(path) {
        return Err(NhcError::insecure(path, "directory is not writable"));
    }
    Ok(())
}

fn is_writable(path: &Path) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

/// The last committed result for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResult {
    pub contents: Vec<u8>,
    /// Older of mtime and ctime.
    pub saved_at: SystemTime,
}

impl SavedResult {
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents).into_owned()
    }

    pub fn age_seconds(&self, now: SystemTime) -> u64 {
        now.duration_since(self.saved_at)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Output of the run in progress. Removed on drop unless promoted or discarded.
#[derive(Debug)]
pub struct OutputArtifact {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl OutputArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle for the child's stdout/stderr. Only valid until `contents` is called.
    pub fn writer(&self) -> io::Result<std::fs::File> {
        match &self.file {
            Some(file) => file.try_clone(),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "output artifact already closed",
            )),
        }
    }

    pub fn contents(&mut self) -> Result<Vec<u8>> {
        self.file = None;
        let mut file = open_no_follow(&self.path)?.ok_or_else(|| {
            NhcError::insecure(&self.path, "output artifact vanished during the run")
        })?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .map_err(|err| NhcError::io(format!("read {}", self.path.display()), err))?;
        Ok(buffer)
    }

    /// Drops the artifact file now.
    pub fn discard(self) -> Result<()> {
        remove_if_present(&self.path)
    }
}

impl Drop for OutputArtifact {
    fn drop(&mut self) {
        self.file = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

/// State directory handle for one subject and effective user.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    subject: String,
}

impl ResultStore {
    /// Secures `dir` and returns a store for `subject`.
    pub fn open(dir: impl Into<PathBuf>, subject: &str, uid: u32) -> Result<Self> {
        let dir = dir.into();
        ensure_state_dir(&dir, uid)?;
        Ok(Self {
            dir,
            subject: subject.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(format!("{}.out", self.subject))
    }

    pub fn saved_path(&self) -> PathBuf {
        self.dir.join(format!("{}.save", self.subject))
    }

    /// Recreates the output artifact so its timestamps reflect this run.
    pub fn create_output(&self) -> Result<OutputArtifact> {
        let path = self.output_path();
        remove_if_present(&path)?;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(ARTIFACT_MODE)
            .open(&path)
            .map_err(|err| NhcError::io(format!("create {}", path.display()), err))?;
        Ok(OutputArtifact {
            path,
            file: Some(file),
        })
    }

    /// Reads the saved result. A symlink or non-regular file in its place
    /// is refused rather than followed.
    pub fn load_previous(&self) -> Result<Option<SavedResult>> {
        let path = self.saved_path();
        let Some(mut file) = open_no_follow(&path)? else {
            return Ok(None);
        };
        let meta = file
            .metadata()
            .map_err(|err| NhcError::io(format!("stat {}", path.display()), err))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|err| NhcError::io(format!("read {}", path.display()), err))?;
        Ok(Some(SavedResult {
            contents,
            saved_at: saved_time(&meta),
        }))
    }

    /// Deletes the saved result if `now + fudge - saved_at >= expire_after`.
    /// Returns true when something was removed.
    pub fn expire(&self, expire_after: u64, fudge: u64, now: SystemTime) -> Result<bool> {
        let Some(saved) = self.load_previous()? else {
            return Ok(false);
        };
        let age = saved.age_seconds(now);
        if age.saturating_add(fudge) < expire_after {
            return Ok(false);
        }
        tracing::info!(
            subject = %self.subject,
            age_secs = age,
            expire_secs = expire_after,
            "Saved result expired"
        );
        self.clear_saved()?;
        Ok(true)
    }

    pub fn clear_saved(&self) -> Result<()> {
        remove_if_present(&self.saved_path())
    }

    /// Moves the artifact over the saved result.
    pub fn promote(&self, mut artifact: OutputArtifact) -> Result<()> {
        artifact.file = None;
        let saved = self.saved_path();
        fs::rename(&artifact.path, &saved)
            .map_err(|err| NhcError::io(format!("commit {}", saved.display()), err))?;
        Ok(())
    }
}

fn saved_time(meta: &std::fs::Metadata) -> SystemTime {
    let ctime = UNIX_EPOCH
        + Duration::new(
            meta.ctime().max(0) as u64,
            meta.ctime_nsec().clamp(0, 999_999_999) as u32,
        );
    match meta.modified() {
        Ok(mtime) => mtime.min(ctime),
        Err(_) => ctime,
    }
}

/// Opens a regular file for reading without following a final symlink.
/// `Ok(None)` when nothing is there.
fn open_no_follow(path: &Path) -> Result<Option<std::fs::File>> {
    let file = match std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) if err.raw_os_error() == Some(libc::ELOOP) => {
            return Err(NhcError::insecure(path, "state file is a symbolic link"));
        }
        Err(err) => return Err(NhcError::io(format!("open {}", path.display()), err)),
    };
    let meta = file
        .metadata()
        .map_err(|err| NhcError::io(format!("stat {}", path.display()), err))?;
    if !meta.is_file() {
        return Err(NhcError::insecure(path, "state file is not a regular file"));
    }
    Ok(Some(file))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(NhcError::io(format!("remove {}", path.display()), err)),
    }
}
