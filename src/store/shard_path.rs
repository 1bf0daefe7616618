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

//! Mapping of mailbox names onto the sharded directory tree.
//!
//! Every mailbox is assigned a fixed-length hexadecimal token by hashing its
//! canonical name. The mailbox lives three levels below the mail root:
//!
//! - the first 3 characters of the token,
//! - the first 6 characters of the token,
//! - the whole token.
//!
//! So `b@y.com` might live at `mail/4b2/4b2f0c/4b2f0c...`. This keeps the
//! fan-out of every directory small and roughly uniform no matter how many
//! mailboxes exist.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tiny_keccak::{Hasher, Sha3};

/// Name of the index file inside each mailbox directory.
pub const INDEX_FILE_NAME: &str = "index";

/// Length of the first-level shard directory names.
pub const SHARD1_LEN: usize = 3;
/// Length of the second-level shard directory names.
pub const SHARD2_LEN: usize = 6;

/// Derives the shard token for a canonical mailbox name.
///
/// Implementations must be deterministic, must always return tokens of the
/// same length, and that length must be at least `SHARD2_LEN`. Tokens are
/// used directly as directory names, so they must be file-name safe.
pub trait NameHasher: Send + Sync {
    fn hash_name(&self, name: &str) -> String;
}

/// Lowercase hex of the first 20 bytes of the SHA3-256 of the name.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha3NameHasher;

impl NameHasher for Sha3NameHasher {
    fn hash_name(&self, name: &str) -> String {
        let mut sha3 = Sha3::v256();
        sha3.update(name.as_bytes());
        let mut hash = [0u8; 32];
        sha3.finalize(&mut hash);

        let mut token = String::with_capacity(40);
        for &b in &hash[..20] {
            let _ = write!(token, "{:02x}", b);
        }
        token
    }
}

/// The resolved on-disk location of one mailbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardPath {
    /// The shard token, which is also the name of the mailbox directory.
    pub token: String,
    /// The mailbox directory itself.
    pub dir: PathBuf,
    /// The index file within `dir`.
    pub index: PathBuf,
}

impl ShardPath {
    /// Compute the location of the mailbox whose token is `token` under
    /// `mail_root`.
    pub fn for_token(mail_root: &Path, token: String) -> Self {
        let dir = mail_root
            .join(&token[..SHARD1_LEN])
            .join(&token[..SHARD2_LEN])
            .join(&token);
        let index = dir.join(INDEX_FILE_NAME);
        ShardPath { token, dir, index }
    }

    /// Describe an existing mailbox directory found on disk.
    pub fn at_dir(dir: PathBuf) -> Self {
        let token = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index = dir.join(INDEX_FILE_NAME);
        ShardPath { token, dir, index }
    }

    /// Compute the location of the mailbox with canonical name `name`.
    pub fn resolve(
        mail_root: &Path,
        hasher: &dyn NameHasher,
        name: &str,
    ) -> Self {
        Self::for_token(mail_root, hasher.hash_name(name))
    }

    /// The second-level shard directory, i.e., the parent of `dir`.
    pub fn shard2(&self) -> Option<&Path> {
        self.dir.parent()
    }

    /// The first-level shard directory.
    pub fn shard1(&self) -> Option<&Path> {
        self.shard2().and_then(Path::parent)
    }

    /// The path of the raw content file for the message with `id`.
    pub fn raw_path(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}
