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

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid mailbox name: {0}")]
    BadMailboxName(String),
    #[error("No value configured for datastore path")]
    NoStorePath,
    #[error("Message not found")]
    NxMessage,
    #[error("Corrupt mailbox {}: {source}", .path.display())]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_cbor::error::Error,
    },
    #[error("{}: {source}", .path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to encode {}: {source}", .path.display())]
    EncodeIndex {
        path: PathBuf,
        #[source]
        source: serde_cbor::error::Error,
    },
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}
