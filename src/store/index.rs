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

//! The per-mailbox message index.
//!
//! The index file is a sequence of CBOR values: the mailbox name as a string,
//! followed by one `MessageMetadata` map per message, in mailbox order. There
//! is no record count or checksum; the file simply ends after the last
//! record. An index is never written with zero records. An empty mailbox has
//! no directory at all.
//!
//! Unless atomic index writes are enabled, the index is rewritten in place, so
//! a crash part way through leaves a truncated file behind. That shows up as
//! a `CorruptIndex` error on the next load.

use std::fs;
use std::fmt;
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;

use log::{error, trace};
use serde::Deserialize;

use super::model::MessageMetadata;
use super::shard_path::ShardPath;
use super::Engine;
use crate::support::error::Error;
use crate::support::file_ops::{self, ErrorTransforms};

/// Permissions for index files.
const INDEX_MODE: u32 = 0o660;

/// The in-memory copy of one mailbox's index.
///
/// Once loaded, this is the authority on what the mailbox contains until it
/// is next persisted.
#[derive(Debug, Default)]
pub struct Index {
    loaded: bool,
    name: String,
    messages: Vec<MessageMetadata>,
}

impl Index {
    pub fn new(name: String) -> Self {
        Index {
            loaded: false,
            name,
            messages: Vec::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// The mailbox name, as given at construction or as read from the index
    /// header.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[MessageMetadata] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<MessageMetadata> {
        &mut self.messages
    }

    /// Load the index from disk if that hasn't happened yet.
    pub fn ensure_loaded(
        &mut self,
        engine: &Engine,
        path: &ShardPath,
    ) -> Result<(), Error> {
        if self.loaded {
            Ok(())
        } else {
            self.load(engine, path)
        }
    }

    /// (Re)load the index from disk, discarding whatever is in memory.
    ///
    /// A missing index file is an empty mailbox. If the file can't be fully
    /// decoded, nothing from it is kept and the index stays unloaded so that
    /// the next access tries again.
    pub fn load(
        &mut self,
        engine: &Engine,
        path: &ShardPath,
    ) -> Result<(), Error> {
        self.messages.clear();
        self.loaded = false;

        let _lock = engine.index_lock.read().unwrap();
        let file = match fs::File::open(&path.index) {
            Ok(f) => f,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                trace!("Index {} does not exist (yet)", path.index.display());
                self.loaded = true;
                return Ok(());
            }
            Err(e) => return Err(e).at_path(&path.index),
        };

        let corrupt = |source| Error::CorruptIndex {
            path: path.index.clone(),
            source,
        };

        let mut de =
            serde_cbor::Deserializer::from_reader(BufReader::new(file));
        let name = String::deserialize(&mut de).map_err(corrupt)?;
        let messages = de
            .into_iter::<MessageMetadata>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(corrupt)?;

        self.name = name;
        self.messages = messages;
        self.loaded = true;
        Ok(())
    }

    /// Write the in-memory state to disk.
    ///
    /// If there are no messages, the whole mailbox directory is removed
    /// instead.
    pub fn persist(
        &self,
        engine: &Engine,
        path: &ShardPath,
    ) -> Result<(), Error> {
        let _lock = engine.index_lock.write().unwrap();

        if self.messages.is_empty() {
            return engine.dirs.remove(path);
        }

        engine.dirs.ensure_exists(path)?;
        let failed = |e: &dyn fmt::Display| {
            error!("Failed to write {}: {}", path.index.display(), e);
        };

        if engine.atomic_index_writes {
            let mut data = Vec::new();
            self.encode(&mut data, path)?;
            file_ops::spit(&path.dir, &path.index, INDEX_MODE, &data)
                .map_err(|e| {
                    failed(&e);
                    e
                })
                .at_path(&path.index)
        } else {
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(INDEX_MODE)
                .open(&path.index)
                .at_path(&path.index)?;
            let mut writer = BufWriter::new(file);
            self.encode(&mut writer, path)?;
            file_ops::finish(writer)
                .map_err(|e| {
                    failed(&e);
                    e
                })
                .at_path(&path.index)
        }
    }

    fn encode(&self, mut w: impl Write, path: &ShardPath) -> Result<(), Error> {
        let result = serde_cbor::to_writer(&mut w, &self.name).and_then(|()| {
            self.messages
                .iter()
                .try_for_each(|m| serde_cbor::to_writer(&mut w, m))
        });

        result.map_err(|source| {
            error!("Failed to encode {}: {}", path.index.display(), source);
            Error::EncodeIndex {
                path: path.index.clone(),
                source,
            }
        })
    }
}
