// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

//! Dated snapshot directories inside one backup target.  rsync fills the
//! `temp` staging directory, which becomes a generation on the final rename.

use crate::pushbackup_error::PushbackupError;
use chrono::{DateTime, Duration, Local};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const TEMP_NAME: &str = "temp";

lazy_static! {
    static ref GENERATION_NAME: Regex =
        Regex::new(r"^@20[0-9]{2}-[0-9]{2}-[0-9]{2}_[0-9]{2}-[0-9]{2}-[0-9]{2}$").unwrap();
}

/// Name of the generation a backup started at `when` will publish as.
/// Lexicographic order of these names is chronological order.
pub fn generation_name(when: DateTime<Local>) -> String {
    format!("@{}", when.format("%Y-%m-%d_%H-%M-%S"))
}

pub struct GenerationDir {
    target: PathBuf,
}

impl GenerationDir {
    pub fn new<P: AsRef<Path>>(target: P) -> Self {
        GenerationDir {
            target: target.as_ref().to_path_buf(),
        }
    }

    pub fn target(&self) -> &Path {
        self.target.as_path()
    }

    /// All published generations, oldest first.  The temp directory and
    /// anything else that doesn't look like a generation is skipped.
    pub fn generations(&self) -> Result<Vec<String>, PushbackupError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.target)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if GENERATION_NAME.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn latest(&self) -> Result<Option<String>, PushbackupError> {
        Ok(self.generations()?.pop())
    }

    pub fn matching(&self, prefix: &str) -> Result<Vec<String>, PushbackupError> {
        Ok(self
            .generations()?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    /// Deletes the oldest generations while more than `keep_count` exist and
    /// the oldest is older than `keep_duration`.  The newest generation
    /// survives any settings.
    pub fn prune(
        &self,
        keep_count: i64,
        keep_duration: Duration,
        now: DateTime<Local>,
    ) -> Result<(), PushbackupError> {
        let keep_count = if keep_count < 1 {
            warn!("keep-count must be at least 1, got {}", keep_count);
            1
        } else {
            keep_count as usize
        };
        let cutoff = generation_name(now - keep_duration);

        let mut generations = self.generations()?;
        while generations.len() > keep_count && generations[0] <= cutoff {
            let victim = generations.remove(0);
            info!("pruning old generation {}", victim);
            remove_tree(&self.target.join(victim))?;
        }
        Ok(())
    }

    /// The staging directory rsync writes into.  Kept across failed attempts
    /// so a retry can resume from the partial transfer.
    pub fn temp_dir(&self) -> Result<PathBuf, PushbackupError> {
        let dir = self.target.join(TEMP_NAME);
        if !dir.is_dir() {
            fs::create_dir(&dir)?;
        }
        Ok(dir)
    }

    /// Turns the staging directory into the generation for `now`.
    pub fn publish(&self, now: DateTime<Local>) -> Result<String, PushbackupError> {
        let name = generation_name(now);
        fs::rename(self.target.join(TEMP_NAME), self.target.join(&name))?;
        Ok(name)
    }
}

fn remove_tree(path: &Path) -> Result<(), PushbackupError> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
