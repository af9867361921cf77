use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::container::{ClasspathContainer, ContainerCache, ContainerPath, ProjectName, VariableCache};
use crate::error::Result;

/// Default file name of the saved classpath state inside a state directory.
pub const SNAPSHOT_FILE_NAME: &str = "variablesAndContainers.dat";

/// Version history:
/// - 1: bincode header followed by a bincode [`ClasspathSnapshot`].
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

const SNAPSHOT_MAGIC: [u8; 4] = *b"ARVC";

/// Corrupted length prefixes must degrade to a miss, not a huge allocation.
const SNAPSHOT_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    magic: [u8; 4],
    schema_version: u32,
    arbor_version: String,
    saved_at_millis: u64,
}

/// Resolved containers and variables carried from one session to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClasspathSnapshot {
    pub containers: Vec<(ProjectName, ContainerPath, ClasspathContainer)>,
    pub variables: Vec<(String, PathBuf)>,
}

impl ClasspathSnapshot {
    /// Collects what both caches would persist, in a stable order.
    pub fn capture(containers: &ContainerCache, variables: &VariableCache) -> Self {
        let mut containers = containers.snapshot();
        containers.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        let mut variables: Vec<(String, PathBuf)> = variables
            .snapshot()
            .into_iter()
            .map(|((), name, path)| (name, path))
            .collect();
        variables.sort();
        Self {
            containers,
            variables,
        }
    }

    /// Seeds both caches' previous-session values.
    pub fn restore(self, containers: &ContainerCache, variables: &VariableCache) {
        containers.restore_previous_session(self.containers);
        variables.restore_previous_session(
            self.variables
                .into_iter()
                .map(|(name, path)| ((), name, path)),
        );
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.variables.is_empty()
    }
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn bincode_options_limited() -> impl bincode::Options + Copy {
    bincode_options().with_limit(SNAPSHOT_LIMIT_BYTES)
}

/// Writes `snapshot` to `path` atomically (temp file, fsync, rename).
pub fn save_snapshot(path: &Path, snapshot: &ClasspathSnapshot) -> Result<()> {
    let header = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        arbor_version: env!("CARGO_PKG_VERSION").to_owned(),
        saved_at_millis: now_millis(),
    };
    let mut bytes = bincode_options().serialize(&header)?;
    bincode_options().serialize_into(&mut bytes, snapshot)?;
    atomic_write(path, &bytes)?;
    tracing::debug!(
        target = "arbor.classpath",
        path = %path.display(),
        containers = snapshot.containers.len(),
        variables = snapshot.variables.len(),
        "saved classpath snapshot"
    );
    Ok(())
}

/// Reads a snapshot written by [`save_snapshot`].
///
/// A missing file, a different schema version or an undecodable payload is
/// `Ok(None)`: the session simply starts without previous values. Only real
/// I/O failures are errors.
pub fn load_snapshot(path: &Path) -> Result<Option<ClasspathSnapshot>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.len() as u64 > SNAPSHOT_LIMIT_BYTES {
        tracing::debug!(
            target = "arbor.classpath",
            path = %path.display(),
            len = bytes.len(),
            "ignoring oversized classpath snapshot"
        );
        return Ok(None);
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let header: SnapshotHeader = match bincode_options_limited().deserialize_from(&mut cursor) {
        Ok(header) => header,
        Err(err) => {
            tracing::debug!(
                target = "arbor.classpath",
                path = %path.display(),
                error = %err,
                "ignoring classpath snapshot with unreadable header"
            );
            return Ok(None);
        }
    };
    if header.magic != SNAPSHOT_MAGIC || header.schema_version != SNAPSHOT_SCHEMA_VERSION {
        tracing::debug!(
            target = "arbor.classpath",
            path = %path.display(),
            schema_version = header.schema_version,
            expected = SNAPSHOT_SCHEMA_VERSION,
            "ignoring classpath snapshot from another schema"
        );
        return Ok(None);
    }

    match bincode_options_limited().deserialize_from(&mut cursor) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(err) => {
            tracing::debug!(
                target = "arbor.classpath",
                path = %path.display(),
                error = %err,
                "ignoring corrupt classpath snapshot"
            );
            Ok(None)
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => return Err(io::Error::other("path has no parent")),
    };
    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let written = file.write_all(bytes).and_then(|()| file.sync_all());
    drop(file);
    if let Err(err) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        if let Err(remove_err) = fs::remove_file(&tmp_path) {
            if remove_err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target = "arbor.classpath",
                    path = %tmp_path.display(),
                    error = %remove_err,
                    "failed to remove temporary snapshot file"
                );
            }
        }
        return Err(err);
    }
    Ok(())
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
