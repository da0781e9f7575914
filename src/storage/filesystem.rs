// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Directory-backed store for runners that share a volume.
//!
//! Conditional create maps onto `OpenOptions::create_new`, which the
//! operating system performs atomically. The generation of a marker is its
//! modification time in nanoseconds. Conditional delete compares the
//! generation before removing the file; that check and the removal are two
//! steps, so it is weaker than the object-store precondition.

use crate::error::{LockerError, Result};
use crate::storage::{CreateOutcome, DeleteOutcome, ObjectInfo, ObjectStore, UNKNOWN_GENERATION};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        match fs::metadata(root) {
            Ok(metadata) if metadata.is_dir() => Ok(Self {
                root: root.to_path_buf(),
            }),
            Ok(_) => Err(LockerError::BackendUnavailable(format!(
                "{} is not a directory",
                root.display()
            ))),
            Err(err) => Err(LockerError::BackendUnavailable(format!(
                "Cannot access lock directory {}: {err}",
                root.display()
            ))),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(LockerError::InvalidConfig(format!(
                "Object key '{key}' cannot be mapped into {}",
                self.root.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for FsStore {
    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn create_if_absent(
        &self,
        key: &str,
        body: &[u8],
        _budget: Option<Duration>,
    ) -> Result<CreateOutcome> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| map_io_error(&path, err))?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(err) = write_body(&mut file, body) {
                    drop(file);
                    cleanup_partial(&path);
                    return Err(map_io_error(&path, err));
                }
                Ok(created_outcome(&path, generation_of(&path)))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(CreateOutcome::Exists),
            // Windows reports a pending delete as access denied.
            Err(err) if cfg!(windows) && err.kind() == io::ErrorKind::PermissionDenied => Ok(
                CreateOutcome::Contended(format!("{} is being removed", path.display())),
            ),
            Err(err) => Err(map_io_error(&path, err)),
        }
    }

    fn delete(
        &self,
        key: &str,
        if_generation: Option<&str>,
        _budget: Option<Duration>,
    ) -> Result<DeleteOutcome> {
        let path = self.object_path(key)?;

        if let Some(expected) = if_generation {
            match generation_of(&path) {
                Ok(current) if current != expected => {
                    return Ok(DeleteOutcome::Contended(format!(
                        "generation changed from {expected} to {current}"
                    )));
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Ok(DeleteOutcome::Missing);
                }
                Err(err) => return Err(map_io_error(&path, err)),
            }
        }

        match fs::remove_file(&path) {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(DeleteOutcome::Missing),
            Err(err) => Err(map_io_error(&path, err)),
        }
    }

    fn stat(&self, key: &str, _budget: Option<Duration>) -> Result<Option<ObjectInfo>> {
        let path = self.object_path(key)?;
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(map_io_error(&path, err)),
        };
        let modified = metadata
            .modified()
            .map_err(|err| map_io_error(&path, err))?;

        Ok(Some(ObjectInfo {
            generation: nanos_since_epoch(modified).to_string(),
            created_at: DateTime::<Utc>::from(modified),
        }))
    }
}

fn write_body(file: &mut File, body: &[u8]) -> io::Result<()> {
    file.write_all(body)?;
    file.sync_all()
}

fn cleanup_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial marker {}: {err}", path.display());
        }
    }
}

// The marker is already on disk; a missing generation does not undo that.
fn created_outcome(path: &Path, generation: io::Result<String>) -> CreateOutcome {
    let generation = generation.unwrap_or_else(|err| {
        debug!("Cannot read generation of {}: {err}", path.display());
        UNKNOWN_GENERATION.to_string()
    });
    debug!("Created {} (generation {generation})", path.display());
    CreateOutcome::Created { generation }
}

fn generation_of(path: &Path) -> io::Result<String> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(nanos_since_epoch(modified).to_string())
}

fn nanos_since_epoch(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default()
}

fn map_io_error(path: &Path, err: io::Error) -> LockerError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            LockerError::PermissionDenied(format!("{}: {err}", path.display()))
        }
        _ => LockerError::StorageRequest(format!("{}: {err}", path.display())),
    }
}
