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

//! Allocation of message identifiers.
//!
//! Identifiers have the form `YYYYMMDDTHHMMSS-NNNN`. The first part is the
//! time the identifier was allocated, at one-second resolution; the second is
//! a four-digit counter which cycles through 0000..=9999.
//!
//! The counter is advanced by a dedicated producer thread which keeps a small
//! bounded queue topped up. Consumers take one value per identifier and only
//! block if the queue has momentarily run dry.
//!
//! Identifiers are only unique as long as fewer than 10000 are allocated
//! within the same second, and the counter restarts at 0000 whenever a new
//! generator is created. Both are accepted limits of the scheme.

use std::fmt;

use chrono::prelude::*;
use crossbeam::channel::{self, Receiver, Sender};
use log::trace;

/// The number of distinct sequence values.
pub const SEQUENCE_MODULUS: u16 = 10_000;

/// How many sequence values the producer keeps queued ahead of demand.
const QUEUE_CAPACITY: usize = 10;

/// Format of the timestamp half of an identifier.
const PREFIX_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Source of message identifiers.
///
/// Each generator owns one producer thread. The thread exits once the
/// generator is dropped and it next tries to enqueue a value.
#[derive(Debug)]
pub struct IdGenerator {
    sequence: Receiver<u16>,
}

impl IdGenerator {
    pub fn new() -> Self {
        let (sender, receiver) = channel::bounded(QUEUE_CAPACITY);
        std::thread::spawn(move || produce_sequence(sender));
        IdGenerator { sequence: receiver }
    }

    /// Take the next value from the counter.
    pub fn next_sequence(&self) -> u16 {
        // The producer only stops once we've dropped the receiver, so a
        // disconnect here means it panicked.
        self.sequence
            .recv()
            .expect("identifier sequence producer stopped")
    }

    /// Allocate an identifier stamped with `date`.
    pub fn next_id<Tz: TimeZone>(&self, date: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        format!("{}-{:04}", id_prefix(date), self.next_sequence())
    }

    /// Allocate an identifier stamped with the current UTC time.
    pub fn next_id_now(&self) -> String {
        self.next_id(&Utc::now())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format `date` as the sortable timestamp that begins every identifier.
pub fn id_prefix<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    date.format(PREFIX_FORMAT).to_string()
}

fn produce_sequence(sender: Sender<u16>) {
    let mut next = 0u16;
    while sender.send(next).is_ok() {
        next = (next + 1) % SEQUENCE_MODULUS;
    }
    trace!("Identifier generator shut down");
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn fixed_date() -> DateTime<Utc> {
        Utc.ymd(2020, 3, 14).and_hms(15, 9, 26)
    }

    #[test]
    fn test_id_format() {
        let gen = IdGenerator::new();
        assert_eq!("20200314T150926-0000", gen.next_id(&fixed_date()));
        assert_eq!("20200314T150926-0001", gen.next_id(&fixed_date()));

        let offset = FixedOffset::east(3600).ymd(2001, 2, 3).and_hms(4, 5, 6);
        assert_eq!("20010203T040506-0002", gen.next_id(&offset));
    }

    #[test]
    fn test_now_ids_have_expected_shape() {
        let gen = IdGenerator::new();
        let id = gen.next_id_now();
        assert_eq!(20, id.len());
        assert_eq!(Some('T'), id.chars().nth(8));
        assert_eq!(Some('-'), id.chars().nth(15));
        assert!(id[16..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn sequence_wraps_within_one_second() {
        // 15000 identifiers in the same second necessarily reuse sequence
        // values; this is the documented limit of the scheme, so assert it
        // happens exactly where expected.
        let gen = IdGenerator::new();
        let date = fixed_date();
        let ids = (0..15_000)
            .map(|_| gen.next_id(&date))
            .collect::<Vec<_>>();

        assert_eq!("20200314T150926-9999", ids[9999]);
        assert_eq!("20200314T150926-0000", ids[10_000]);
        for i in 0..5000 {
            assert_eq!(ids[i], ids[i + 10_000]);
        }

        let distinct = ids.iter().collect::<HashSet<_>>();
        assert_eq!(10_000, distinct.len());
    }

    #[test]
    fn concurrent_consumers_never_share_a_value() {
        use rayon::prelude::*;

        let gen = IdGenerator::new();
        let seqs = (0..2000)
            .into_par_iter()
            .map(|_| gen.next_sequence())
            .collect::<Vec<_>>();
        let distinct = seqs.iter().collect::<HashSet<_>>();
        assert_eq!(2000, distinct.len());
    }

    #[test]
    fn independent_generators_start_from_zero() {
        let a = IdGenerator::new();
        let _ = a.next_sequence();
        let b = IdGenerator::new();
        assert_eq!(0, b.next_sequence());
        assert_eq!(1, a.next_sequence());
    }

    proptest! {
        #[test]
        fn prefix_sorts_like_time(a in 0i64..253_402_300_799,
                                  b in 0i64..253_402_300_799) {
            let da = Utc.timestamp(a, 0);
            let db = Utc.timestamp(b, 0);
            prop_assert_eq!(a.cmp(&b), id_prefix(&da).cmp(&id_prefix(&db)));
        }
    }
}
