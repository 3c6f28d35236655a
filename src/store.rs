//! File-backed state store with a single-writer lock per stack
//!
//! State for stack `<id>` lives in `<state_dir>/<id>.json`; the lock is
//! `<state_dir>/<id>.lock`, created exclusively and removed when the
//! [`StateLock`] guard drops.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use topology::StackState;

/// Holder of a state lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Command that took the lock (`plan`, `apply`, `destroy`)
    pub operation: String,
    pub pid: u32,
    pub user: String,
    pub created_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            operation: operation.to_string(),
            pid: std::process::id(),
            user,
            created_at: Utc::now(),
        }
    }
}

/// Errors specific to the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "state for {stack} is locked by {} (pid {}, user {}) since {}; run `stackplan force-unlock` if that run is gone",
        .holder.operation,
        .holder.pid,
        .holder.user,
        .holder.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )]
    Locked { stack: String, holder: LockInfo },
}

/// Exclusive lock on one stack's state; released on drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    info: LockInfo,
}

impl StateLock {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released lock {}", self.path.display()),
            Err(e) => log::warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

/// Summary line for `state list`
#[derive(Debug, Clone, Serialize)]
pub struct StateEntry {
    pub stack: String,
    pub serial: u64,
    pub resources: usize,
    pub last_applied: Option<DateTime<Utc>>,
    pub locked: bool,
}

/// Reads and writes state files under one directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.json"))
    }

    pub fn lock_path(&self, stack: &str) -> PathBuf {
        self.dir.join(format!("{stack}.lock"))
    }

    /// Load state, or an empty state if none has been recorded
    pub fn load(&self, stack: &str) -> Result<StackState> {
        let path = self.state_path(stack);

        if !path.exists() {
            log::debug!("State file does not exist, using empty state for {stack}");
            return Ok(StackState::new(stack));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let mut state = StackState::from_json(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        if state.stack.is_empty() {
            state.stack = stack.to_string();
        }

        log::debug!("Loaded state from {} (serial {})", path.display(), state.serial);
        Ok(state)
    }

    /// Save state atomically (write to a temp file, then rename)
    pub fn save(&self, state: &StackState) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        let path = self.state_path(&state.stack);
        let tmp = path.with_extension("json.tmp");
        let content = state
            .to_json_pretty()
            .context("Failed to serialize state to JSON")?;

        fs::write(&tmp, &content)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    /// Take the single-writer lock for `stack`
    pub fn lock(&self, stack: &str, operation: &str) -> Result<StateLock> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create state directory: {}", self.dir.display()))?;

        let path = self.lock_path(stack);
        let info = LockInfo::new(operation);

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = self.lock_info(stack)?.unwrap_or_else(|| LockInfo {
                    operation: "unknown".to_string(),
                    pid: 0,
                    user: "unknown".to_string(),
                    created_at: Utc::now(),
                });
                return Err(StoreError::Locked {
                    stack: stack.to_string(),
                    holder,
                }
                .into());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create lock file: {}", path.display()));
            }
        };

        // From here on the guard owns the file and removes it on any error
        let lock = StateLock { path, info };
        let content = serde_json::to_string_pretty(&lock.info)?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write lock file: {}", lock.path.display()))?;

        log::debug!("Acquired lock {} for {}", lock.path.display(), operation);
        Ok(lock)
    }

    /// Current lock holder, if any
    pub fn lock_info(&self, stack: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(stack);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read lock file: {}", path.display()));
            }
        };

        match serde_json::from_str(&content) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                log::warn!("Unreadable lock file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Remove the lock regardless of holder; returns what was removed
    pub fn force_unlock(&self, stack: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(stack);
        if !path.exists() {
            return Ok(None);
        }

        let info = self.lock_info(stack)?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove lock file: {}", path.display()))?;
        log::info!("Force-removed lock {}", path.display());
        Ok(info)
    }

    /// Every stack with a state file, sorted by id
    pub fn list(&self) -> Result<Vec<StateEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read state directory: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(stack) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let state = self.load(stack)?;
            entries.push(StateEntry {
                stack: stack.to_string(),
                serial: state.serial,
                resources: state.resources.len(),
                last_applied: state.last_applied,
                locked: self.lock_path(stack).exists(),
            });
        }

        entries.sort_by(|a, b| a.stack.cmp(&b.stack));
        Ok(entries)
    }
}
