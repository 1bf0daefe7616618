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

//! The file-backed mail store.
//!
//! Each mailbox is a directory in a three-level shard tree under `mail/`
//! (see `shard_path`) holding one file per message, named by the message
//! identifier, plus an `index` file listing the metadata of every message in
//! order (see `index`).
//!
//! Adding a message writes the raw file first and the index second. A crash
//! between the two leaves a raw file that no index refers to; nothing here
//! cleans those up. The opposite case, an index entry without its raw file,
//! does not arise from normal operation.
//!
//! ## Locking
//!
//! Every `Store` has:
//!
//! - One reader/writer lock over all index reads and writes, so readers never
//!   see a half-written index and writers never interleave. This is shared
//!   by every mailbox and is a known bottleneck.
//!
//! - One mutex over directory creation and removal, so that creating a
//!   mailbox can't race with pruning its empty shard parents.
//!
//! - A pool of per-mailbox advisory locks (see `lock_for`). The store never
//!   takes these itself. Callers which need to serialise whole workflows on
//!   a mailbox, such as "one delivery in flight at a time", take them around
//!   their own sequence of store calls.
//!
//! The index lock is always taken before the directory lock when both are
//! needed. No operation has a timeout.

use std::fs;
use std::io::Read;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{error, info};

pub mod dir_lifecycle;
pub mod hash_lock;
pub mod id_gen;
pub mod index;
pub mod mailbox;
pub mod model;
pub mod shard_path;

use self::dir_lifecycle::DirLifecycle;
use self::hash_lock::HashLock;
use self::id_gen::IdGenerator;
use self::mailbox::Mailbox;
use self::model::{NewMessage, StoredMessage};
use self::shard_path::{NameHasher, Sha3NameHasher, ShardPath};
use crate::support::config::StoreConfig;
use crate::support::error::Error;
use crate::support::file_ops::ErrorTransforms;
use crate::support::mailbox_name::{AddressNormaliser, NameNormaliser};

/// Name of the directory under the base path which holds all mailboxes.
const MAIL_DIR_NAME: &str = "mail";

/// State shared by every mailbox handle of one store.
#[derive(Debug)]
pub struct Engine {
    index_lock: RwLock<()>,
    dirs: DirLifecycle,
    ids: IdGenerator,
    atomic_index_writes: bool,
}

impl Engine {
    fn new(atomic_index_writes: bool) -> Self {
        Engine {
            index_lock: RwLock::new(()),
            dirs: DirLifecycle::new(),
            ids: IdGenerator::new(),
            atomic_index_writes,
        }
    }
}

/// The root of the mail store.
pub struct Store {
    path: PathBuf,
    mail_path: PathBuf,
    message_cap: usize,
    engine: Engine,
    locks: HashLock,
    normaliser: Box<dyn NameNormaliser>,
    hasher: Box<dyn NameHasher>,
}

impl Store {
    /// Open the store described by `config`, using the default name
    /// normaliser and hasher.
    pub fn new(config: StoreConfig) -> Result<Self, Error> {
        let normaliser = AddressNormaliser::new(config.naming.clone());
        Self::with_collaborators(
            config,
            Box::new(normaliser),
            Box::new(Sha3NameHasher),
        )
    }

    /// Open the store described by `config`, mapping mailbox names to
    /// directories with the given normaliser and hasher.
    ///
    /// The mail directory is created if it does not exist. Failure to create
    /// it is only logged; it will resurface when something is first written.
    pub fn with_collaborators(
        config: StoreConfig,
        normaliser: Box<dyn NameNormaliser>,
        hasher: Box<dyn NameHasher>,
    ) -> Result<Self, Error> {
        if config.path.as_os_str().is_empty() {
            error!("No value configured for datastore path");
            return Err(Error::NoStorePath);
        }

        let mail_path = config.path.join(MAIL_DIR_NAME);
        if !mail_path.is_dir() {
            info!("Creating mail store at {}", mail_path.display());
            if let Err(e) = fs::DirBuilder::new()
                .recursive(true)
                .mode(0o770)
                .create(&mail_path)
            {
                error!("Error creating dir {}: {}", mail_path.display(), e);
            }
        }

        Ok(Store {
            path: config.path,
            mail_path,
            message_cap: config.mailbox_msg_cap,
            engine: Engine::new(config.atomic_index_writes),
            locks: HashLock::new(),
            normaliser,
            hasher,
        })
    }

    /// The base storage path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory holding the shard tree.
    pub fn mail_path(&self) -> &Path {
        &self.mail_path
    }

    /// The configured per-mailbox message cap, 0 meaning unlimited.
    ///
    /// The store does not enforce this.
    pub fn message_cap(&self) -> usize {
        self.message_cap
    }

    /// Return a handle on the named mailbox.
    ///
    /// This does no I/O; the mailbox need not exist yet.
    pub fn mailbox(&self, name: &str) -> Result<Mailbox<'_>, Error> {
        let name = self.normaliser.normalise(name)?;
        let path = ShardPath::resolve(&self.mail_path, &*self.hasher, &name);
        Ok(Mailbox::new(&self.engine, name, path))
    }

    /// Return the advisory lock for the named mailbox.
    ///
    /// Nothing in the store takes this lock. It is there for callers that
    /// need to keep other callers out of a mailbox across several
    /// operations.
    pub fn lock_for(&self, name: &str) -> Result<&RwLock<()>, Error> {
        let name = self.normaliser.normalise(name)?;
        Ok(self.locks.get(&self.hasher.hash_name(&name)))
    }

    /// Add a message to the named mailbox, returning its identifier.
    pub fn add_message(
        &self,
        mailbox: &str,
        message: NewMessage,
        data: impl Read,
    ) -> Result<String, Error> {
        self.mailbox(mailbox)?.add(message, data)
    }

    /// Fetch one message from the named mailbox. `id` may be
    /// `mailbox::LATEST`.
    pub fn get_message(
        &self,
        mailbox: &str,
        id: &str,
    ) -> Result<StoredMessage, Error> {
        self.mailbox(mailbox)?.get(id)
    }

    pub fn get_messages(
        &self,
        mailbox: &str,
    ) -> Result<Vec<StoredMessage>, Error> {
        self.mailbox(mailbox)?.messages()
    }

    pub fn remove_message(&self, mailbox: &str, id: &str) -> Result<(), Error> {
        self.mailbox(mailbox)?.remove(id)
    }

    pub fn purge_messages(&self, mailbox: &str) -> Result<(), Error> {
        self.mailbox(mailbox)?.purge()
    }

    /// Call `f` with the messages of each mailbox in the store, for as long as
    /// it returns `true`.
    ///
    /// Stops at the first error, which is returned. Stopping because `f`
    /// returned `false` is not an error.
    pub fn visit_mailboxes(
        &self,
        mut f: impl FnMut(Vec<StoredMessage>) -> bool,
    ) -> Result<(), Error> {
        for shard1 in subdirs(&self.mail_path)? {
            for shard2 in subdirs(&shard1)? {
                for dir in subdirs(&shard2)? {
                    let mut mailbox = Mailbox::new(
                        &self.engine,
                        String::new(),
                        ShardPath::at_dir(dir),
                    );
                    if !f(mailbox.messages()?) {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

/// List the subdirectories of `path`, sorted by name.
fn subdirs(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(path).at_path(path)? {
        let entry = entry.at_path(path)?;
        if entry.file_type().at_path(&entry.path())?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}


#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::mailbox::LATEST;
    use super::test_prelude::*;
    use super::*;

    #[test]
    fn new_requires_path() {
        assert_matches!(
            Some(Error::NoStorePath),
            Store::new(StoreConfig::default()).err()
        );
    }

    #[test]
    fn new_creates_mail_root() {
        let setup = set_up_with(|c| c.mailbox_msg_cap = 7);
        assert!(setup.root.path().join("mail").is_dir());
        assert_eq!(setup.root.path(), setup.store.path());
        assert_eq!(7, setup.store.message_cap());
    }

    #[test]
    fn bad_names_are_rejected_before_io() {
        let setup = set_up();
        assert_matches!(
            Some(Error::BadMailboxName(_)),
            setup.store.mailbox("").err()
        );
        assert_matches!(
            Err(Error::BadMailboxName(_)),
            setup.store.add_message("no spaces", new_message("x"), &b""[..])
        );
        assert_matches!(
            Err(Error::BadMailboxName(_)),
            setup.store.lock_for("bad name")
        );
        assert_eq!(0, mail_root_entries(&setup));
    }

    #[test]
    fn resolution_is_deterministic() {
        let setup = set_up();
        let a = setup.store.mailbox("Someone@Example.org").unwrap();
        let b = setup.store.mailbox("someone").unwrap();
        assert_eq!(a.token(), b.token());
        assert_eq!(a.dir(), b.dir());
        assert!(a.dir().starts_with(setup.store.mail_path()));
        assert_eq!("someone", a.name());
    }

    #[test]
    fn store_level_operations() {
        let setup = set_up();
        let store = &setup.store;
        let id = store
            .add_message("b@y.com", new_message("hi"), &b"hello"[..])
            .unwrap();

        let got = store.get_message("b", LATEST).unwrap();
        assert_eq!(id, got.id());
        let mut content = String::new();
        got.open_raw().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!("hello", content);

        assert_eq!(1, store.get_messages("B@Y.COM").unwrap().len());
        assert_matches!(
            Err(Error::NxMessage),
            store.remove_message("b", "nope")
        );
        store.remove_message("b", &id).unwrap();
        assert!(store.get_messages("b").unwrap().is_empty());

        store.add_message("b", new_message("again"), &b""[..]).unwrap();
        store.purge_messages("b").unwrap();
        assert!(store.get_messages("b").unwrap().is_empty());
        assert_eq!(0, mail_root_entries(&setup));
    }

    #[test]
    fn removing_last_message_keeps_neighbours() {
        let setup = set_up();
        let store = &setup.store;

        // Find two names that share a first-level shard directory
        let mut by_shard1 = std::collections::HashMap::new();
        let (first, second) = (0..)
            .map(|i| format!("user{}", i))
            .find_map(|name| {
                let token = store.mailbox(&name).unwrap().token().to_owned();
                by_shard1
                    .insert(token[..3].to_owned(), name.clone())
                    .map(|other| (other, name))
            })
            .unwrap();

        let a = store
            .add_message(&first, new_message("a"), &b"a"[..])
            .unwrap();
        store
            .add_message(&second, new_message("b"), &b"b"[..])
            .unwrap();
        store.remove_message(&first, &a).unwrap();

        let first_box = store.mailbox(&first).unwrap();
        let second_box = store.mailbox(&second).unwrap();
        assert!(!first_box.dir().exists());
        assert!(second_box.dir().is_dir());
        let shard1 = second_box.dir().parent().unwrap().parent().unwrap();
        assert!(shard1.is_dir());
        assert_eq!(1, mail_root_entries(&setup));
    }

    #[test]
    fn visit_every_mailbox() {
        let setup = set_up();
        let store = &setup.store;
        for i in 0..10 {
            for j in 0..=i % 3 {
                store
                    .add_message(
                        &format!("box{}", i),
                        new_message(&format!("{}", j)),
                        &b"data"[..],
                    )
                    .unwrap();
            }
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        store
            .visit_mailboxes(|messages| {
                assert!(!messages.is_empty());
                let name = messages[0].mailbox().to_owned();
                assert!(messages.iter().all(|m| name == m.mailbox()));
                total += messages.len();
                assert!(seen.insert(name));
                true
            })
            .unwrap();

        assert_eq!(10, seen.len());
        assert!(seen.contains("box7"));
        assert_eq!(4 * 1 + 3 * 2 + 3 * 3, total);
    }

    #[test]
    fn visit_stops_when_asked() {
        let setup = set_up();
        for i in 0..5 {
            setup
                .store
                .add_message(&format!("box{}", i), new_message("x"), &b""[..])
                .unwrap();
        }

        let mut calls = 0;
        setup
            .store
            .visit_mailboxes(|_| {
                calls += 1;
                calls < 2
            })
            .unwrap();
        assert_eq!(2, calls);
    }

    #[test]
    fn visit_empty_store() {
        let setup = set_up();
        setup.store.visit_mailboxes(|_| panic!("no mailboxes")).unwrap();
    }

    #[test]
    fn visit_propagates_errors() {
        let setup = set_up();
        setup
            .store
            .add_message("fine", new_message("x"), &b""[..])
            .unwrap();
        let mut broken = setup.store.mailbox("broken").unwrap();
        broken.add(new_message("x"), &b""[..]).unwrap();
        fs::write(broken.dir().join("index"), b"\xff\xff").unwrap();

        let mut calls = 0;
        let result = setup.store.visit_mailboxes(|_| {
            calls += 1;
            true
        });
        assert_matches!(Err(Error::CorruptIndex { .. }), result);
        assert!(calls <= 1);

        fs::remove_dir_all(setup.store.mail_path()).unwrap();
        assert_matches!(
            Err(Error::IoAt { .. }),
            setup.store.visit_mailboxes(|_| true)
        );
    }

    #[test]
    fn advisory_lock_is_per_mailbox_name() {
        let setup = set_up();
        let store = &setup.store;
        let a = store.lock_for("Someone@example.com").unwrap();
        let b = store.lock_for("someone").unwrap();
        assert!(std::ptr::eq(a, b));

        // Never taken internally, so holding it doesn't block the store
        let _held = a.write().unwrap();
        store
            .add_message("someone", new_message("x"), &b""[..])
            .unwrap();
        assert_eq!(1, store.get_messages("someone").unwrap().len());
    }

    #[test]
    fn concurrent_adds_to_distinct_mailboxes() {
        use rayon::prelude::*;

        let setup = set_up();
        let store = &setup.store;
        let ids = (0..200)
            .into_par_iter()
            .map(|i| {
                store
                    .add_message(
                        &format!("box{}", i % 8),
                        new_message(&format!("{}", i)),
                        &b"some content"[..],
                    )
                    .unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(200, ids.len());

        // Without the advisory lock, concurrent adds to one mailbox may lose
        // index updates, so only check that nothing was corrupted.
        let mut total = 0;
        store
            .visit_mailboxes(|messages| {
                total += messages.len();
                true
            })
            .unwrap();
        assert!(total > 0 && total <= 200);
    }

    #[test]
    fn advisory_lock_serialises_deliveries() {
        use rayon::prelude::*;

        let setup = set_up();
        let store = &setup.store;
        (0..100).into_par_iter().for_each(|i| {
            let _lock = store.lock_for("busy").unwrap().write().unwrap();
            store
                .add_message("busy", new_message(&format!("{}", i)), &b"x"[..])
                .unwrap();
        });

        let messages = store.get_messages("busy").unwrap();
        assert_eq!(100, messages.len());
        let subjects = messages
            .iter()
            .map(|m| m.subject().to_owned())
            .collect::<HashSet<_>>();
        assert_eq!(100, subjects.len());
        // Every raw file is accounted for
        let dir = store.mailbox("busy").unwrap().dir().to_owned();
        assert_eq!(100, file_names(&dir, true).len());
    }

    #[test]
    fn atomic_index_writes() {
        let setup = set_up_with(|c| c.atomic_index_writes = true);
        let store = &setup.store;
        let a = store
            .add_message("atomic", new_message("a"), &b"a"[..])
            .unwrap();
        let b = store
            .add_message("atomic", new_message("b"), &b"b"[..])
            .unwrap();
        store.remove_message("atomic", &a).unwrap();

        let dir = store.mailbox("atomic").unwrap().dir().to_owned();
        assert_eq!(
            vec![b.clone(), "index".to_owned()],
            file_names(&dir, false)
        );
        assert_eq!(b, store.get_message("atomic", LATEST).unwrap().id());
    }
}
