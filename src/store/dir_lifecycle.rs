//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Shardmail.
//
// Shardmail is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Shardmail is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Shardmail. If not, see <http://www.gnu.org/licenses/>.

//! Creation and removal of mailbox directories.
//!
//! All structural changes to the shard tree go through one lock, so that one
//! thread creating a mailbox cannot race another pruning the (momentarily
//! empty) shard directory that would contain it.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::sync::Mutex;

use log::{error, trace};

use super::shard_path::ShardPath;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms, IgnoreKinds};

/// Permissions for every directory in the shard tree.
const DIR_MODE: u32 = 0o770;

#[derive(Debug, Default)]
pub struct DirLifecycle {
    lock: Mutex<()>,
}

impl DirLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox directory at `path`, and its shard parents, if they
    /// don't exist yet.
    pub fn ensure_exists(&self, path: &ShardPath) -> Result<(), Error> {
        let _lock = self.lock.lock().unwrap();
        if path.dir.is_dir() {
            return Ok(());
        }

        trace!("Creating mailbox directory {}", path.dir.display());
        fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&path.dir)
            .map_err(|e| {
                error!(
                    "Failed to create directory {}: {}",
                    path.dir.display(),
                    e
                );
                e
            })
            .at_path(&path.dir)
    }

    /// Delete the mailbox directory at `path` with everything in it, then
    /// prune whichever shard parents were left empty.
    ///
    /// Pruning stops at the first parent that still has entries, so a shard
    /// directory shared with another mailbox is never touched.
    pub fn remove(&self, path: &ShardPath) -> Result<(), Error> {
        let _lock = self.lock.lock().unwrap();
        trace!("Removing mailbox {}", path.dir.display());
        fs::remove_dir_all(&path.dir)
            .ignore_not_found()
            .at_path(&path.dir)?;

        if let Some(shard2) = path.shard2() {
            if file_ops::remove_dir_if_empty(shard2) {
                if let Some(shard1) = path.shard1() {
                    file_ops::remove_dir_if_empty(shard1);
                }
            }
        }

        Ok(())
    }
}
