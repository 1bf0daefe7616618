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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use log::{error, trace};

use crate::support::error::Error;

/// Write `data` into the file at `path`, atomically.
///
/// The file will first be staged within `tmp`, which must be on the same file
/// system as `path`. Anything already at `path` is replaced.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    tf.persist(path)?;
    Ok(())
}

/// Flush `writer` and sync the underlying file to disk.
///
/// Errors the OS only reports on flush or sync come back here instead of
/// being lost when the file is dropped.
pub fn finish(writer: io::BufWriter<fs::File>) -> io::Result<()> {
    writer.into_inner().map_err(io::Error::from)?.sync_all()
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Remove the directory at `path` if it contains no entries.
///
/// Returns whether the directory was removed. Failures are logged rather than
/// returned, since this is only used to opportunistically prune empty
/// directories.
pub fn remove_dir_if_empty(path: &Path) -> bool {
    let is_empty = match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => return false,
    };

    if !is_empty {
        return false;
    }

    trace!("Removing dir {}", path.display());
    match fs::remove_dir(path) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

pub trait ErrorTransforms {
    type Coerced;
    /// Attach `path` to an I/O error so the caller can tell which file was
    /// involved.
    fn at_path(self, path: &Path) -> Self::Coerced;
}

impl<R> ErrorTransforms for Result<R, io::Error> {
    type Coerced = Result<R, Error>;

    fn at_path(self, path: &Path) -> Result<R, Error> {
        self.map_err(|source| Error::IoAt {
            path: path.to_owned(),
            source,
        })
    }
}
