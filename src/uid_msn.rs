//! Message sequence number to UID mapping of one selected mailbox
//!
//! MSNs always run contiguously from [`FIRST_MSN`] to the number of messages,
//! ordered by ascending UID.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{MessageUid, Msn, FIRST_MSN};

#[derive(Debug, Default)]
struct Mapping {
    msn_to_uid: HashMap<Msn, MessageUid>,
    uid_to_msn: HashMap<MessageUid, Msn>,
}

impl Mapping {
    fn len(&self) -> Msn {
        self.msn_to_uid.len() as Msn
    }

    fn insert(&mut self, msn: Msn, uid: MessageUid) {
        self.msn_to_uid.insert(msn, uid);
        self.uid_to_msn.insert(uid, msn);
    }

    fn last_uid(&self) -> Option<MessageUid> {
        self.msn_to_uid.get(&self.len()).copied()
    }
}

/// Bidirectional MSN/UID map shared between a session and its listener
///
/// Readers take a shared lock, mutators an exclusive one.
#[derive(Debug, Default)]
pub struct UidMsnConverter {
    mapping: RwLock<Mapping>,
}

impl UidMsnConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_msn(&self, uid: MessageUid) -> Option<Msn> {
        self.mapping.read().uid_to_msn.get(&uid).copied()
    }

    pub fn get_uid(&self, msn: Msn) -> Option<MessageUid> {
        self.mapping.read().msn_to_uid.get(&msn).copied()
    }

    pub fn get_num_message(&self) -> usize {
        self.mapping.read().msn_to_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.read().msn_to_uid.is_empty()
    }

    pub fn first_uid(&self) -> Option<MessageUid> {
        self.get_uid(FIRST_MSN)
    }

    pub fn last_uid(&self) -> Option<MessageUid> {
        self.mapping.read().last_uid()
    }

    /// Insert a UID at the position its value dictates
    ///
    /// Every UID above it moves up one MSN. A UID already present is left
    /// where it is.
    pub fn add_uid(&self, uid: MessageUid) {
        let mut mapping = self.mapping.write();
        if mapping.uid_to_msn.contains_key(&uid) {
            return;
        }

        let appending = mapping.last_uid().map_or(true, |last| uid > last);
        if appending {
            let msn = mapping.len() + 1;
            mapping.insert(msn, uid);
            return;
        }

        // Pull out every entry above the new UID, highest first
        let mut displaced = Vec::new();
        let mut msn = mapping.len();
        while msn >= FIRST_MSN {
            let Some(&current) = mapping.msn_to_uid.get(&msn) else {
                break;
            };
            if current < uid {
                break;
            }
            mapping.msn_to_uid.remove(&msn);
            mapping.uid_to_msn.remove(&current);
            displaced.push(current);
            msn -= 1;
        }

        let mut next = msn + 1;
        mapping.insert(next, uid);
        for moved in displaced.into_iter().rev() {
            next += 1;
            mapping.insert(next, moved);
        }
    }

    /// Replace the whole content with the given UIDs
    pub fn add_all(&self, uids: impl IntoIterator<Item = MessageUid>) {
        let mut sorted: Vec<MessageUid> = uids.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut mapping = self.mapping.write();
        *mapping = Mapping::default();
        for (msn, uid) in (FIRST_MSN..).zip(sorted) {
            mapping.insert(msn, uid);
        }
    }

    /// Remove a UID, closing the gap it leaves. Absent UIDs are ignored.
    pub fn remove(&self, uid: MessageUid) {
        let mut mapping = self.mapping.write();
        let Some(removed) = mapping.uid_to_msn.remove(&uid) else {
            return;
        };
        let last = mapping.len();
        mapping.msn_to_uid.remove(&removed);

        for msn in removed + 1..=last {
            if let Some(moved) = mapping.msn_to_uid.remove(&msn) {
                mapping.insert(msn - 1, moved);
            }
        }
    }

    pub fn clear(&self) {
        *self.mapping.write() = Mapping::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn uid(value: u64) -> MessageUid {
        MessageUid::of(value)
    }

    fn converter_with(uids: &[u64]) -> UidMsnConverter {
        let converter = UidMsnConverter::new();
        for value in uids {
            converter.add_uid(uid(*value));
        }
        converter
    }

    /// Checks contiguity, bijection and ordering at once
    fn assert_consistent(converter: &UidMsnConverter) {
        let count = converter.get_num_message() as Msn;
        let mut previous = None;
        for msn in FIRST_MSN..=count {
            let current = converter.get_uid(msn).expect("no gap in msns");
            assert_eq!(converter.get_msn(current), Some(msn));
            if let Some(previous) = previous {
                assert!(previous < current, "uids must ascend with msns");
            }
            previous = Some(current);
        }
        assert_eq!(converter.get_uid(count + 1), None);
    }

    fn uids_in_msn_order(converter: &UidMsnConverter) -> Vec<u64> {
        (FIRST_MSN..=converter.get_num_message() as Msn)
            .filter_map(|msn| converter.get_uid(msn))
            .map(|uid| uid.as_u64())
            .collect()
    }

    #[test]
    fn test_empty_converter() {
        let converter = UidMsnConverter::new();
        assert!(converter.is_empty());
        assert_eq!(converter.get_num_message(), 0);
        assert_eq!(converter.get_uid(FIRST_MSN), None);
        assert_eq!(converter.get_msn(uid(1)), None);
        assert_eq!(converter.first_uid(), None);
        assert_eq!(converter.last_uid(), None);
    }

    #[test]
    fn test_append_assigns_next_msn() {
        let converter = converter_with(&[10, 20, 30]);
        assert_eq!(converter.get_msn(uid(10)), Some(1));
        assert_eq!(converter.get_msn(uid(30)), Some(3));
        assert_eq!(converter.get_uid(2), Some(uid(20)));
        assert_eq!(converter.first_uid(), Some(uid(10)));
        assert_eq!(converter.last_uid(), Some(uid(30)));
        assert_consistent(&converter);
    }

    #[test]
    fn test_insert_in_the_middle_shifts_higher_uids() {
        let converter = converter_with(&[1, 2, 3, 5]);
        converter.add_uid(uid(4));

        assert_eq!(uids_in_msn_order(&converter), vec![1, 2, 3, 4, 5]);
        assert_eq!(converter.get_msn(uid(4)), Some(4));
        assert_eq!(converter.get_msn(uid(5)), Some(5));
        assert_consistent(&converter);
    }

    #[test]
    fn test_insert_below_everything() {
        let converter = converter_with(&[5, 6, 7]);
        converter.add_uid(uid(2));

        assert_eq!(uids_in_msn_order(&converter), vec![2, 5, 6, 7]);
        assert_eq!(converter.get_msn(uid(2)), Some(FIRST_MSN));
        assert_consistent(&converter);
    }

    #[test]
    fn test_adding_a_present_uid_does_nothing() {
        let converter = converter_with(&[1, 3]);
        converter.add_uid(uid(3));
        converter.add_uid(uid(1));

        assert_eq!(uids_in_msn_order(&converter), vec![1, 3]);
        assert_consistent(&converter);
    }

    #[test]
    fn test_remove_shifts_higher_msns_down() {
        let converter = converter_with(&[1, 2, 3, 4]);
        converter.remove(uid(2));

        assert_eq!(uids_in_msn_order(&converter), vec![1, 3, 4]);
        assert_eq!(converter.get_msn(uid(3)), Some(2));
        assert_eq!(converter.get_msn(uid(2)), None);
        assert_eq!(converter.get_uid(4), None);
        assert_consistent(&converter);
    }

    #[test]
    fn test_remove_last_and_absent() {
        let converter = converter_with(&[1, 2]);
        converter.remove(uid(2));
        converter.remove(uid(42));

        assert_eq!(uids_in_msn_order(&converter), vec![1]);
        assert_consistent(&converter);
    }

    #[test]
    fn test_mixed_mutations_stay_consistent() {
        let converter = UidMsnConverter::new();
        for value in [8, 3, 12, 1, 5, 10, 7] {
            converter.add_uid(uid(value));
            assert_consistent(&converter);
        }
        for value in [5, 1, 12] {
            converter.remove(uid(value));
            assert_consistent(&converter);
        }
        converter.add_uid(uid(4));

        assert_eq!(uids_in_msn_order(&converter), vec![3, 4, 7, 8, 10]);
        assert_consistent(&converter);
    }

    #[test]
    fn test_add_all_replaces_content() {
        let converter = converter_with(&[100]);
        converter.add_all(vec![uid(9), uid(3), uid(3), uid(6)]);

        assert_eq!(uids_in_msn_order(&converter), vec![3, 6, 9]);
        assert_eq!(converter.get_msn(uid(100)), None);
        assert_consistent(&converter);
    }

    #[test]
    fn test_clear() {
        let converter = converter_with(&[1, 2, 3]);
        converter.clear();

        assert!(converter.is_empty());
        assert_eq!(converter.get_msn(uid(1)), None);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let converter = Arc::new(UidMsnConverter::new());
        let writer = {
            let converter = converter.clone();
            std::thread::spawn(move || {
                for value in (1..=200).rev() {
                    converter.add_uid(uid(value));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let converter = converter.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(first) = converter.first_uid() {
                            assert!(converter.get_msn(first).is_some());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(converter.get_num_message(), 200);
        assert_consistent(&converter);
    }
}
