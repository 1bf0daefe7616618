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

use serde::{Deserialize, Serialize};

use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;

/// Configuration for a file-backed mail store.
///
/// This is normally embedded as a `[datastore]` table in the host service's
/// TOML configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// The base storage path. Mailboxes are kept under `mail/` within it.
    pub path: PathBuf,

    /// The maximum number of messages a mailbox should hold, or 0 for no
    /// limit.
    ///
    /// This is advisory. The store reports it via `Store::message_cap()` but
    /// never discards messages on its own; trimming old messages is up to
    /// whatever policy sits above the store.
    #[serde(default)]
    pub mailbox_msg_cap: usize,

    /// If true, index files are staged in a temporary file and renamed into
    /// place, so a crash mid-write can never leave a truncated index behind.
    ///
    /// When false (the default), the index is truncated and rewritten in
    /// place.
    #[serde(default)]
    pub atomic_index_writes: bool,

    /// Options for turning recipient addresses into mailbox names.
    #[serde(default)]
    pub naming: NamingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// If true, the domain part of addresses is kept.
    ///
    /// When false, `user@foo.com` and `user@bar.com` both map to the mailbox
    /// `user`. When true, they are separate mailboxes.
    pub keep_domain: bool,

    /// If true, everything after and including a `+` in the local part is
    /// dropped, so `user+tag` maps to `user`.
    pub strip_plus_extension: bool,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            keep_domain: false,
            strip_plus_extension: true,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).at_path(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config = StoreConfig::from_toml_str(r#"path = "/var/mail""#)
            .unwrap();
        assert_eq!(PathBuf::from("/var/mail"), config.path);
        assert_eq!(0, config.mailbox_msg_cap);
        assert!(!config.atomic_index_writes);
        assert!(!config.naming.keep_domain);
        assert!(config.naming.strip_plus_extension);
    }

    #[test]
    fn parse_full() {
        let config = StoreConfig::from_toml_str(
            r#"
path = "/srv/shardmail"
mailbox_msg_cap = 500
atomic_index_writes = true

[naming]
keep_domain = true
strip_plus_extension = false
"#,
        )
        .unwrap();
        assert_eq!(500, config.mailbox_msg_cap);
        assert!(config.atomic_index_writes);
        assert!(config.naming.keep_domain);
        assert!(!config.naming.strip_plus_extension);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_matches!(
            Err(Error::Config(_)),
            StoreConfig::from_toml_str("mailbox_msg_cap = \"lots\"")
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let root = tempfile::TempDir::new().unwrap();
        assert_matches!(
            Err(Error::IoAt { .. }),
            StoreConfig::load(root.path().join("nope.toml"))
        );
    }
}
