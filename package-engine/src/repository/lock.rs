//! Cross-process per-package lock, backed by an exclusively created marker
//! file holding the owner PID and the action it runs.
//!
//! Within one process an in-memory registry of held paths serializes
//! concurrent requests (the runtime may run many requests on one agent).
//! Across processes the marker PID is probed for liveness, so a crashed
//! agent cannot wedge a package: its marker is reclaimed.

use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Mutex, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("held by pid {pid} for `{action}`")]
    Held { pid: i32, action: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    pid: i32,
    action: String,
}

fn held_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static HELD: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    HELD.get_or_init(Mutex::default)
}

pub(crate) fn acquire(path: &Path, action: &str) -> Result<(), LockError> {
    let own_pid = process::id() as i32;
    let mut held = held_paths()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if held.contains(path) {
        let action = read_marker(path)
            .map(|marker| marker.action)
            .unwrap_or_else(|| action.to_string());
        return Err(LockError::Held {
            pid: own_pid,
            action,
        });
    }

    // Two attempts: the second one runs after reclaiming a stale marker. A
    // concurrent live holder makes the create fail again and is reported.
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let marker = LockMarker {
                    pid: own_pid,
                    action: action.to_string(),
                };
                let content = serde_json::to_vec(&marker).map_err(io::Error::other)?;
                file.write_all(&content)?;
                file.sync_all()?;
                held.insert(path.to_path_buf());
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                match read_marker(path) {
                    Some(marker) if marker.pid != own_pid && holder_alive(marker.pid) => {
                        return Err(LockError::Held {
                            pid: marker.pid,
                            action: marker.action,
                        });
                    }
                    Some(marker) => {
                        // A dead holder, or our own PID without a registry
                        // entry (a previous process with a recycled PID).
                        warn!(pid = marker.pid, "reclaiming stale package lock");
                        remove_marker(path)?;
                    }
                    None => {
                        // unreadable marker from an interrupted writer
                        warn!("reclaiming unreadable package lock marker");
                        remove_marker(path)?;
                    }
                }
            }
            Err(err) => return Err(LockError::Io(err)),
        }
    }

    // Lost the reclaim race to another process.
    match read_marker(path) {
        Some(marker) => Err(LockError::Held {
            pid: marker.pid,
            action: marker.action,
        }),
        None => Err(LockError::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            "lock contention while reclaiming stale marker",
        ))),
    }
}

/// Removes the marker and the registry entry. Idempotent; a missing marker is
/// not an error.
pub(crate) fn release(path: &Path) -> io::Result<()> {
    held_paths()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(path);
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn read_marker(path: &Path) -> Option<LockMarker> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

fn remove_marker(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        // someone else reclaimed it first
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn holder_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let alive = kill(Pid::from_raw(pid), None).is_ok();
    debug!(pid, alive, "checked lock holder liveness");
    alive
}
