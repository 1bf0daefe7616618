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

//! Turning recipient addresses into canonical mailbox names.

use crate::support::config::NamingConfig;
use crate::support::error::Error;

/// Maps a free-form, address-like string onto the canonical name of the
/// mailbox that owns it, or rejects it.
///
/// Implementations must be deterministic: the same input always yields the
/// same output.
pub trait NameNormaliser: Send + Sync {
    fn normalise(&self, raw: &str) -> Result<String, Error>;
}

/// The default normaliser, which treats mailbox names as email addresses or
/// bare local parts.
#[derive(Clone, Debug, Default)]
pub struct AddressNormaliser {
    pub config: NamingConfig,
}

/// Characters other than ASCII alphanumerics permitted in a local part.
const LOCAL_PUNCTUATION: &str = "!#$%&'*+-=/?^_`.{|}~";

impl AddressNormaliser {
    pub fn new(config: NamingConfig) -> Self {
        AddressNormaliser { config }
    }
}

impl NameNormaliser for AddressNormaliser {
    fn normalise(&self, raw: &str) -> Result<String, Error> {
        let lower = raw.trim().to_lowercase();
        if lower.is_empty() {
            return Err(Error::BadMailboxName(
                "Mailbox name cannot be empty".to_owned(),
            ));
        }

        let (local, domain) = match lower.rfind('@') {
            Some(at) => (&lower[..at], Some(&lower[at + 1..])),
            None => (lower.as_str(), None),
        };

        let invalid = local
            .chars()
            .filter(|&c| {
                !c.is_ascii_alphanumeric() && !LOCAL_PUNCTUATION.contains(c)
            })
            .collect::<String>();
        if !invalid.is_empty() {
            return Err(Error::BadMailboxName(format!(
                "Mailbox name contained invalid character(s): {:?}",
                invalid
            )));
        }

        let local = if self.config.strip_plus_extension {
            local.split('+').next().unwrap_or(local)
        } else {
            local
        };
        if local.is_empty() {
            return Err(Error::BadMailboxName(format!(
                "No local part in {:?}",
                raw
            )));
        }

        match domain {
            Some(domain) if self.config.keep_domain => {
                if !is_valid_domain(domain) {
                    return Err(Error::BadMailboxName(format!(
                        "Invalid domain in {:?}",
                        raw
                    )));
                }
                Ok(format!("{}@{}", local, domain))
            }
            _ => Ok(local.to_owned()),
        }
    }
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || '-' == c || '.' == c)
}
