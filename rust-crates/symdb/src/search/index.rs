// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Inverted token index over canonical keys.

use super::{symprefix, tokenize};
use std::collections::{BTreeMap, HashMap};

/// Maps lowercased tokens to sorted, de-duplicated lists of key ordinals.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Index {
    postings: BTreeMap<String, Vec<u32>>,
}

impl Index {
    /// Builds the index. The ordinal of a key is its position in `keys`.
    pub fn build<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut index = Index::default();
        for (ordinal, key) in keys.into_iter().enumerate() {
            for token in tokenize(key) {
                let list = index
                    .postings
                    .entry(token.text.to_ascii_lowercase())
                    .or_default();
                if list.last() != Some(&(ordinal as u32)) {
                    list.push(ordinal as u32);
                }
            }
        }
        index
    }

    /// Adds a posting list as read back from a store.
    ///
    /// The list is sorted and de-duplicated before being merged.
    pub fn insert(&mut self, token: String, mut ordinals: Vec<u32>) {
        let list = self.postings.entry(token).or_default();
        list.append(&mut ordinals);
        list.sort_unstable();
        list.dedup();
    }

    /// Iterates over all tokens and their posting lists in token order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.postings.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct tokens.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    /// Checks whether the index holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Ordinals of all keys matching every token of `text` as a prefix.
    pub fn query(&self, text: &str) -> Vec<u32> {
        let mut needles: Vec<_> = tokenize(text)
            .into_iter()
            .map(|x| x.text.to_ascii_lowercase())
            .collect();
        needles.sort_unstable();
        needles.dedup();

        let mut result: Option<Vec<u32>> = None;
        for needle in needles {
            let matches = self.prefix_matches(&needle);
            result = Some(match result {
                None => matches,
                Some(acc) => intersect(&acc, &matches),
            });
            if result.as_ref().is_some_and(|x| x.is_empty()) {
                break;
            }
        }

        result.unwrap_or_default()
    }

    /// Union of the posting lists of all tokens starting with `needle`.
    fn prefix_matches(&self, needle: &str) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .postings
            .range::<str, _>((std::ops::Bound::Included(needle), std::ops::Bound::Unbounded))
            .take_while(|(token, _)| token.starts_with(needle))
            .flat_map(|(_, list)| list.iter().copied())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Items sharing one grouping prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group<T> {
    /// Prefix computed by [`symprefix`].
    pub prefix: String,
    /// Members in first-seen order.
    pub items: Vec<T>,
}

/// Groups items by the prefix of their canonical key.
///
/// Groups are ordered by their first member, members keep their order.
pub fn group_by_prefix<T, F>(items: impl IntoIterator<Item = T>, key_of: F) -> Vec<Group<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: Vec<Group<T>> = Vec::new();
    let mut slots = HashMap::new();

    for item in items {
        let prefix = symprefix(key_of(&item));
        let slot = *slots.entry(prefix.clone()).or_insert_with(|| {
            groups.push(Group {
                prefix,
                items: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].items.push(item);
    }

    groups
}
