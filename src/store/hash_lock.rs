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

use std::sync::RwLock;

/// Number of locks in a `HashLock`; one per possible 3-hex-digit prefix.
const SLOTS: usize = 4096;

/// A fixed pool of reader/writer locks, selected by shard token.
///
/// Mailboxes whose tokens share their first three characters share a lock, so
/// the number of lock objects stays bounded no matter how many mailboxes
/// exist.
#[derive(Debug)]
pub struct HashLock {
    slots: Box<[RwLock<()>]>,
}

impl HashLock {
    pub fn new() -> Self {
        HashLock {
            slots: (0..SLOTS).map(|_| RwLock::new(())).collect(),
        }
    }

    /// Return the lock for the mailbox with shard token `token`.
    pub fn get(&self, token: &str) -> &RwLock<()> {
        &self.slots[slot_for(token)]
    }
}

impl Default for HashLock {
    fn default() -> Self {
        Self::new()
    }
}

fn slot_for(token: &str) -> usize {
    token
        .get(..3)
        .and_then(|prefix| usize::from_str_radix(prefix, 16).ok())
        // Tokens from a non-hex hasher still need to land somewhere stable
        .unwrap_or_else(|| {
            token.bytes().fold(0usize, |h, b| {
                h.wrapping_mul(31).wrapping_add(usize::from(b))
            }) % SLOTS
        })
}
