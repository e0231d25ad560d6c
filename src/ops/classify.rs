use std::collections::BTreeMap;
use std::fmt;

use crate::fs::WorktreeState;
use crate::snapshot::Manifest;

/// how one path relates to the target snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    /// in the target, absent from the worktree
    Added,
    /// in the worktree, absent from the target
    Removed,
    /// in both, with a different hash, mode or kind
    Modified,
    Unchanged,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::Added => "added",
            Classification::Removed => "removed",
            Classification::Modified => "modified",
            Classification::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// classification of every in-scope path, sorted by path
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diff {
    entries: BTreeMap<String, Classification>,
}

impl Diff {
    pub fn get(&self, path: &str) -> Option<Classification> {
        self.entries.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, Classification)> {
        self.entries.iter().map(|(p, c)| (p, *c))
    }

    /// paths with the given classification, sorted
    pub fn paths(&self, kind: Classification) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(move |(_, c)| **c == kind)
            .map(|(p, _)| p)
    }

    pub fn count(&self, kind: Classification) -> usize {
        self.paths(kind).count()
    }

    /// paths that need a write or delete
    pub fn changes(&self) -> impl Iterator<Item = (&String, Classification)> {
        self.iter().filter(|(_, c)| *c != Classification::Unchanged)
    }

    pub fn is_clean(&self) -> bool {
        self.changes().next().is_none()
    }
}

/// classify `scope` against the target manifest and the scanned worktree
///
/// paths in scope that are in neither side are dropped. the result depends
/// only on its inputs, never on the order files were scanned in.
pub fn classify<'a, I>(target: &Manifest, worktree: &WorktreeState, scope: I) -> Diff
where
    I: IntoIterator<Item = &'a String>,
{
    let mut entries = BTreeMap::new();

    for path in scope {
        let kind = match (target.get(path), worktree.get(path)) {
            (Some(_), None) => Classification::Added,
            (None, Some(_)) => Classification::Removed,
            (Some(want), Some(have)) => {
                if want.matches(have) {
                    Classification::Unchanged
                } else {
                    Classification::Modified
                }
            }
            (None, None) => continue,
        };
        entries.insert(path.clone(), kind);
    }

    Diff { entries }
}
