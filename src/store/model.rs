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
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;

/// One entry in a mailbox index.
///
/// This is exactly what gets written to the index file for each message, so
/// changing it changes the on-disk format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Unique within the mailbox; also the name of the raw content file.
    pub id: String,
    /// When the message arrived.
    pub date: DateTime<FixedOffset>,
    pub from: String,
    pub to: Vec<String>,
    /// Size in bytes of the raw content.
    pub size: u64,
    /// The decoded subject line.
    pub subject: String,
}

/// The caller-supplied metadata of a message being added.
///
/// The identifier and size are filled in by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub date: DateTime<FixedOffset>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
}

impl NewMessage {
    pub(super) fn into_metadata(
        self,
        id: String,
        size: u64,
    ) -> MessageMetadata {
        MessageMetadata {
            id,
            date: self.date,
            from: self.from,
            to: self.to,
            size,
            subject: self.subject,
        }
    }
}

/// A message as seen from outside the store.
///
/// Carries enough about its owning mailbox to locate the raw content, but is
/// otherwise detached from it; holding one does not keep the mailbox loaded
/// and mutating the mailbox does not update it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    mailbox: String,
    dir: PathBuf,
    meta: MessageMetadata,
}

impl StoredMessage {
    pub(super) fn new(
        mailbox: String,
        dir: PathBuf,
        meta: MessageMetadata,
    ) -> Self {
        StoredMessage { mailbox, dir, meta }
    }

    /// The canonical name of the owning mailbox.
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn date(&self) -> DateTime<FixedOffset> {
        self.meta.date
    }

    pub fn from(&self) -> &str {
        &self.meta.from
    }

    pub fn to(&self) -> &[String] {
        &self.meta.to
    }

    pub fn size(&self) -> u64 {
        self.meta.size
    }

    pub fn subject(&self) -> &str {
        &self.meta.subject
    }

    pub fn metadata(&self) -> &MessageMetadata {
        &self.meta
    }

    pub fn into_metadata(self) -> MessageMetadata {
        self.meta
    }

    /// Where the raw content of this message lives.
    pub fn raw_path(&self) -> PathBuf {
        self.dir.join(&self.meta.id)
    }

    /// Open the raw content for reading.
    ///
    /// Fails with `NxMessage` if the message has since been deleted.
    pub fn open_raw(&self) -> Result<fs::File, Error> {
        open_raw(&self.raw_path())
    }
}

fn open_raw(path: &Path) -> Result<fs::File, Error> {
    match fs::File::open(path) {
        Ok(f) => Ok(f),
        Err(e) if std::io::ErrorKind::NotFound == e.kind() => {
            Err(Error::NxMessage)
        }
        Err(e) => Err(e).at_path(path),
    }
}
