// src/lock.rs

//! Exclusive lock for one pipeline run
//!
//! Held with `flock(LOCK_EX)` from CHECKING until the run reaches a terminal
//! state. The lock file also carries the holder's PID:
//!
//! - A concurrent run that cannot take the lock fails immediately with
//!   [`Error::Busy`], naming the holder if its PID is readable.
//! - A clean release truncates the file. Finding a PID in it after taking
//!   the lock means the previous run died without releasing, and the caller
//!   should recover any interrupted swap.

use crate::error::{Error, Result};
use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct PipelineLock {
    file: File,
    path: PathBuf,
    stale_holder: Option<u32>,
}

impl PipelineLock {
    /// Take the lock without blocking
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                return Err(e.into());
            }
            let pid = read_pid(&mut file);
            if let Some(pid) = pid
                && !process_alive(pid)
            {
                warn!("Lock {} is held but recorded pid {} is gone", path.display(), pid);
            }
            debug!("Lock {} busy", path.display());
            return Err(Error::Busy { pid });
        }

        let stale_holder = read_pid(&mut file).filter(|pid| *pid != std::process::id());
        if let Some(pid) = stale_holder {
            let state = if process_alive(pid) { "pid reused" } else { "not running" };
            warn!("Previous run (pid {}, {}) did not release {}", pid, state, path.display());
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;

        info!("Acquired run lock at {}", path.display());
        Ok(Self {
            file,
            path,
            stale_holder,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID of a previous holder that exited without releasing
    pub fn stale_holder(&self) -> Option<u32> {
        self.stale_holder
    }

    /// PID recorded in a lock file, if any
    pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!("Could not clear {}: {}", self.path.display(), e);
        }
        // flock is released when the file closes
        info!("Released run lock at {}", self.path.display());
    }
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut raw).ok()?;
    raw.trim().parse().ok()
}

/// Liveness probe with signal 0
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}
