//! Per-extension entry storage and lookup.

use std::cmp::Ordering;

use ordermap::OrderMap;

use crate::entry::Entry;
use crate::error::{Error, Result};

/// String comparison fixed by [`Package::optimize_for_binary_search`].
///
/// [`Package::optimize_for_binary_search`]: crate::Package::optimize_for_binary_search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePolicy {
    Ordinal,
    IgnoreCase,
}

impl CasePolicy {
    fn cmp_str(self, a: &str, b: &str) -> Ordering {
        match self {
            CasePolicy::Ordinal => a.cmp(b),
            CasePolicy::IgnoreCase => a
                .bytes()
                .map(|byte| byte.to_ascii_lowercase())
                .cmp(b.bytes().map(|byte| byte.to_ascii_lowercase())),
        }
    }
}

/// Total order used for sorted sequences. Lengths sort before content so a
/// lookup can reject most candidates on two integer compares; archives sorted
/// this way by one implementation stay binary-searchable by another.
fn compare_keys(
    policy: CasePolicy,
    a_name: &str,
    a_directory: &str,
    b_name: &str,
    b_directory: &str,
) -> Ordering {
    a_name
        .len()
        .cmp(&b_name.len())
        .then_with(|| a_directory.len().cmp(&b_directory.len()))
        .then_with(|| policy.cmp_str(a_name, b_name))
        .then_with(|| policy.cmp_str(a_directory, b_directory))
}

/// Entries keyed by extension, each key holding an insertion-ordered (or,
/// once optimized, comparator-ordered) sequence. A key never maps to an
/// empty sequence.
#[derive(Debug, Default)]
pub struct EntryStore {
    by_type: OrderMap<String, Vec<Entry>>,
    case_policy: Option<CasePolicy>,
}

impl EntryStore {
    /// Total number of entries across all extensions.
    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Extensions in insertion order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    /// The sequence stored for an extension, honoring the case policy.
    pub fn get(&self, type_name: &str) -> Option<&[Entry]> {
        let index = self.key_index(type_name)?;
        self.by_type.get_index(index).map(|(_, seq)| seq.as_slice())
    }

    /// All entries, flattened in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.by_type.values().flatten()
    }

    pub fn case_policy(&self) -> Option<CasePolicy> {
        self.case_policy
    }

    pub(crate) fn optimize(&mut self, policy: CasePolicy) -> Result<()> {
        if !self.by_type.is_empty() {
            return Err(Error::InvalidState(
                "binary search must be configured before entries are read or added",
            ));
        }
        self.case_policy = Some(policy);
        Ok(())
    }

    /// Appends a parsed entry; [`Self::finish_ingest`] sorts afterwards.
    pub(crate) fn ingest(&mut self, entry: Entry) {
        self.by_type
            .entry(entry.type_name.clone())
            .or_default()
            .push(entry);
    }

    /// Sorts every sequence once after a bulk ingest from disk.
    pub(crate) fn finish_ingest(&mut self) {
        let Some(policy) = self.case_policy else {
            return;
        };
        for sequence in self.by_type.values_mut() {
            sequence.sort_by(|a, b| {
                compare_keys(policy, &a.file_name, &a.directory, &b.file_name, &b.directory)
            });
        }
    }

    /// Inserts a new entry, keeping sorted sequences sorted.
    pub(crate) fn add(&mut self, entry: Entry) {
        let sequence = match self.key_index(&entry.type_name) {
            Some(index) => {
                self.by_type
                    .get_index_mut(index)
                    .expect("index came from key_index")
                    .1
            }
            None => self.by_type.entry(entry.type_name.clone()).or_default(),
        };
        match self.case_policy {
            None => sequence.push(entry),
            Some(policy) => {
                let at = sequence
                    .binary_search_by(|probe| {
                        compare_keys(
                            policy,
                            &probe.file_name,
                            &probe.directory,
                            &entry.file_name,
                            &entry.directory,
                        )
                    })
                    .unwrap_or_else(|insert_at| insert_at);
                sequence.insert(at, entry);
            }
        }
    }

    /// Linear scan in insertion order, or binary search once optimized.
    pub(crate) fn find(
        &self,
        directory: &str,
        file_name: &str,
        type_name: &str,
    ) -> Option<&Entry> {
        let sequence = self.get(type_name)?;
        match self.case_policy {
            None => sequence
                .iter()
                .find(|entry| entry.directory == directory && entry.file_name == file_name),
            Some(policy) => sequence
                .binary_search_by(|probe| {
                    compare_keys(policy, &probe.file_name, &probe.directory, file_name, directory)
                })
                .ok()
                .map(|index| &sequence[index]),
        }
    }

    /// Removes a single entry; an emptied extension key is dropped.
    pub(crate) fn remove(
        &mut self,
        directory: &str,
        file_name: &str,
        type_name: &str,
    ) -> Option<Entry> {
        let key_index = self.key_index(type_name)?;
        let (_, sequence) = self.by_type.get_index_mut(key_index)?;
        let at = match self.case_policy {
            None => sequence
                .iter()
                .position(|entry| entry.directory == directory && entry.file_name == file_name)?,
            Some(policy) => sequence
                .binary_search_by(|probe| {
                    compare_keys(policy, &probe.file_name, &probe.directory, file_name, directory)
                })
                .ok()?,
        };
        let entry = sequence.remove(at);
        if sequence.is_empty() {
            self.by_type.remove_index(key_index);
        }
        Some(entry)
    }

    fn key_index(&self, type_name: &str) -> Option<usize> {
        match self.case_policy {
            Some(CasePolicy::IgnoreCase) => self
                .by_type
                .keys()
                .position(|key| key.eq_ignore_ascii_case(type_name)),
            _ => self.by_type.get_index_of(type_name),
        }
    }
}
