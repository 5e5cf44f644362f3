// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Internal helper types for key table construction during writing.

use std::collections::HashMap;

/// Temporary index handed out while the table is being built.
pub type TempIdx = u32;

/// Index in the final table.
pub type Idx = u32;

/// Translates temporary indices to the final ones.
#[derive(Debug)]
pub struct Mapper {
    /// Strings that occurred only once and are inlined.
    unique: HashMap<TempIdx, String>,

    /// Mapping from temporary to final index for repeated strings.
    translation: HashMap<TempIdx, Idx>,

    /// Final string table.
    table: Vec<String>,
}

impl Mapper {
    /// Translate a temporary index to the final table position, or return
    /// the string itself if it occurred only once.
    ///
    /// Unique strings are moved out on the first call for their index.
    pub fn translate(&mut self, old_idx: TempIdx) -> Option<Mapping> {
        if let Some(unique) = self.unique.remove(&old_idx) {
            return Some(Mapping::Unique(unique));
        }

        self.translation
            .get(&old_idx)
            .map(|&new_idx| Mapping::Translate(new_idx))
    }

    /// Consume the translator, returning the final table.
    pub fn into_table(self) -> Vec<String> {
        self.table
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Mapping {
    /// String is unique within the current batch: inline it.
    Unique(String),

    /// Replace old index with the given new index.
    Translate(Idx),
}

/// Incrementally de-duplicates strings.
#[derive(Debug, Default)]
pub struct Builder {
    entries: HashMap<String, BuilderEntry>,
    size_estimate: usize,
    next_id: TempIdx,
}

impl Builder {
    /// Look up or construct the temporary ID for the given string.
    pub fn index_for_str(&mut self, s: String) -> TempIdx {
        if let Some(entry) = self.entries.get_mut(&s) {
            entry.count += 1;
            return entry.id;
        }

        // 5 = maximum length of var-int u32
        self.size_estimate += 5 + s.len();
        let id = self.next_id;
        self.entries.insert(s, BuilderEntry { id, count: 1 });
        self.next_id += 1;
        id
    }

    /// Estimated serialized size of the string table, in bytes.
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// Consume the builder, constructing the final string table.
    ///
    /// Repeated strings are ordered by first occurrence.
    pub fn build(self) -> Mapper {
        let (mut duped, unique): (Vec<_>, Vec<_>) =
            self.entries.into_iter().partition(|x| x.1.count > 1);
        duped.sort_unstable_by_key(|x| x.1.id);

        let unique = unique
            .into_iter()
            .map(|(s, entry)| (entry.id, s))
            .collect();

        let translation = duped
            .iter()
            .enumerate()
            .map(|(new_idx, (_, entry))| (entry.id, new_idx as Idx))
            .collect();

        Mapper {
            unique,
            translation,
            table: duped.into_iter().map(|x| x.0).collect(),
        }
    }
}

#[derive(Debug)]
struct BuilderEntry {
    id: TempIdx,
    count: usize,
}
