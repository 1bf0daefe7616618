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

use std::fs;
use std::io::{self, BufWriter, Read};
use std::path::Path;

use log::{error, trace};

use super::index::Index;
use super::model::*;
use super::shard_path::ShardPath;
use super::Engine;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms};

/// The identifier which `Mailbox::get` takes to mean "the most recently
/// added message".
pub const LATEST: &str = "latest";

/// A handle on one mailbox.
///
/// Handles are cheap to create and hold nothing but paths until first used,
/// at which point the index is read from disk. Nothing is shared between
/// handles; two handles on the same mailbox each have their own copy of the
/// index, and neither sees changes made through the other.
pub struct Mailbox<'a> {
    engine: &'a Engine,
    path: ShardPath,
    index: Index,
}

impl<'a> Mailbox<'a> {
    pub(super) fn new(
        engine: &'a Engine,
        name: String,
        path: ShardPath,
    ) -> Self {
        Mailbox {
            engine,
            path,
            index: Index::new(name),
        }
    }

    /// The canonical name of this mailbox.
    ///
    /// For mailboxes found by scanning the store, this is only known once the
    /// index has been loaded.
    pub fn name(&self) -> &str {
        self.index.name()
    }

    /// The shard token of this mailbox.
    pub fn token(&self) -> &str {
        &self.path.token
    }

    /// The directory this mailbox lives in. It need not exist.
    pub fn dir(&self) -> &Path {
        &self.path.dir
    }

    /// Store a new message in this mailbox.
    ///
    /// The raw content is copied from `data` into its own file, then the
    /// index is updated. If either step fails, the raw file is removed again
    /// before the error is returned, along with the mailbox directory if the
    /// mailbox is still empty. Returns the identifier of the new
    /// message.
    pub fn add(
        &mut self,
        message: NewMessage,
        mut data: impl Read,
    ) -> Result<String, Error> {
        self.index.ensure_loaded(self.engine, &self.path)?;

        let id = self.engine.ids.next_id_now();
        self.engine.dirs.ensure_exists(&self.path)?;

        let raw_path = self.path.raw_path(&id);
        let size = match write_raw(&raw_path, &mut data) {
            Ok(size) => size,
            Err(e) => {
                error!(
                    "{} Failed to write {}: {}",
                    self.name(),
                    raw_path.display(),
                    e
                );
                self.discard_raw(&raw_path);
                self.discard_if_empty();
                return Err(e).at_path(&raw_path);
            }
        };

        self.index
            .messages_mut()
            .push(message.into_metadata(id.clone(), size));
        if let Err(e) = self.index.persist(self.engine, &self.path) {
            self.index.messages_mut().pop();
            self.discard_raw(&raw_path);
            self.discard_if_empty();
            return Err(e);
        }

        trace!("{} Added message {} ({} bytes)", self.name(), id, size);
        Ok(id)
    }

    /// Look up one message.
    ///
    /// `id` may be `LATEST` to fetch whichever message was added last.
    pub fn get(&mut self, id: &str) -> Result<StoredMessage, Error> {
        self.index.ensure_loaded(self.engine, &self.path)?;

        let messages = self.index.messages();
        let found = if LATEST == id {
            messages.last()
        } else {
            messages.iter().find(|m| m.id == id)
        };

        found
            .cloned()
            .map(|m| self.view(m))
            .ok_or(Error::NxMessage)
    }

    /// Return every message in the mailbox, in the order they were added.
    pub fn messages(&mut self) -> Result<Vec<StoredMessage>, Error> {
        self.index.ensure_loaded(self.engine, &self.path)?;
        Ok(self
            .index
            .messages()
            .iter()
            .cloned()
            .map(|m| self.view(m))
            .collect())
    }

    /// Delete one message.
    pub fn remove(&mut self, id: &str) -> Result<(), Error> {
        self.index.ensure_loaded(self.engine, &self.path)?;

        let position = self
            .index
            .messages()
            .iter()
            .position(|m| m.id == id)
            .ok_or(Error::NxMessage)?;
        let removed = self.index.messages_mut().remove(position);

        if let Err(e) = self.index.persist(self.engine, &self.path) {
            self.index.messages_mut().insert(position, removed);
            return Err(e);
        }

        if self.index.messages().is_empty() {
            // Persisting removed the whole mailbox directory, raw file
            // included.
            return Ok(());
        }

        let raw_path = self.path.raw_path(&removed.id);
        trace!("{} Deleting {}", self.name(), raw_path.display());
        fs::remove_file(&raw_path).at_path(&raw_path)
    }

    /// Delete every message, and with them the mailbox directory.
    ///
    /// This doesn't need the index, so it works even if the index is
    /// corrupt.
    pub fn purge(&mut self) -> Result<(), Error> {
        self.index.messages_mut().clear();
        self.index.persist(self.engine, &self.path)
    }

    fn view(&self, meta: MessageMetadata) -> StoredMessage {
        StoredMessage::new(
            self.index.name().to_owned(),
            self.path.dir.clone(),
            meta,
        )
    }

    /// Undo the directory creation of a failed first `add`.
    fn discard_if_empty(&self) {
        if !self.index.messages().is_empty() {
            return;
        }

        if let Err(e) = self.engine.dirs.remove(&self.path) {
            error!(
                "{} Failed to clean up {}: {}",
                self.name(),
                self.path.dir.display(),
                e
            );
        }
    }

    fn discard_raw(&self, raw_path: &Path) {
        if let Err(e) = fs::remove_file(raw_path) {
            if io::ErrorKind::NotFound != e.kind() {
                error!(
                    "{} Failed to remove {}: {}",
                    self.name(),
                    raw_path.display(),
                    e
                );
            }
        }
    }
}

fn write_raw(path: &Path, data: &mut impl Read) -> io::Result<u64> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    let size = io::copy(data, &mut writer)?;
    file_ops::finish(writer)?;
    Ok(size)
}
