use std::ops::Range;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PileError, Result};

/// An ordered sequence of element IDs.
///
/// A progression is plain data: it is owned and mutated by a single owner
/// (typically a `Pile`) and provides positional semantics over the IDs.
/// Duplicate prevention across a whole pile is the pile's job; only
/// `include` checks for presence here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progression {
    pub name: Option<String>,
    order: Vec<Uuid>,
}

impl Progression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            order: Vec::new(),
        }
    }

    pub fn from_order(order: Vec<Uuid>) -> Self {
        Self { name: None, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.order.contains(id)
    }

    /// Get the ID at `index`.
    pub fn get(&self, index: usize) -> Result<Uuid> {
        self.order
            .get(index)
            .copied()
            .ok_or_else(|| PileError::not_found(format!("index {index}")))
    }

    /// Return a new progression covering `range`. Out-of-bounds ends are
    /// clamped rather than rejected, matching slice conventions.
    pub fn slice(&self, range: Range<usize>) -> Progression {
        let start = range.start.min(self.order.len());
        let end = range.end.min(self.order.len()).max(start);
        Progression {
            name: None,
            order: self.order[start..end].to_vec(),
        }
    }

    /// Append a single ID without checking for duplicates.
    pub fn push(&mut self, id: Uuid) {
        self.order.push(id);
    }

    /// Append IDs without checking for duplicates.
    pub fn append(&mut self, ids: &[Uuid]) {
        self.order.extend_from_slice(ids);
    }

    /// Insert IDs at `index`, shifting later entries. An index past the end
    /// appends.
    pub fn insert(&mut self, index: usize, ids: &[Uuid]) {
        let at = index.min(self.order.len());
        self.order.splice(at..at, ids.iter().copied());
    }

    /// Replace the ID at `index`.
    pub fn set_at(&mut self, index: usize, id: Uuid) -> Result<()> {
        match self.order.get_mut(index) {
            Some(slot) => {
                *slot = id;
                Ok(())
            }
            None => Err(PileError::not_found(format!("index {index}"))),
        }
    }

    /// Replace the span covered by `range` with `ids` (the span and the
    /// replacement may differ in length).
    pub fn set_slice(&mut self, range: Range<usize>, ids: &[Uuid]) {
        let start = range.start.min(self.order.len());
        let end = range.end.min(self.order.len()).max(start);
        self.order.splice(start..end, ids.iter().copied());
    }

    /// Append any of `ids` not already present. Returns true if at least
    /// one ID was appended.
    pub fn include(&mut self, ids: &[Uuid]) -> bool {
        let mut appended = false;
        for id in ids {
            if !self.order.contains(id) {
                self.order.push(*id);
                appended = true;
            }
        }
        appended
    }

    /// Remove all occurrences of `ids`, ignoring absent ones. Returns true
    /// if anything was removed.
    pub fn exclude(&mut self, ids: &[Uuid]) -> bool {
        let before = self.order.len();
        self.order.retain(|x| !ids.contains(x));
        self.order.len() < before
    }

    /// Remove all occurrences of `ids`, failing if any of them is absent.
    /// On failure nothing is removed.
    pub fn remove(&mut self, ids: &[Uuid]) -> Result<()> {
        if let Some(missing) = ids.iter().find(|id| !self.order.contains(*id)).copied() {
            return Err(PileError::not_found(missing));
        }
        self.order.retain(|x| !ids.contains(x));
        Ok(())
    }

    /// Remove and return the last ID.
    pub fn pop(&mut self) -> Result<Uuid> {
        self.order
            .pop()
            .ok_or_else(|| PileError::not_found("pop from empty progression"))
    }

    /// Remove and return the ID at `index`.
    pub fn pop_at(&mut self, index: usize) -> Result<Uuid> {
        if index >= self.order.len() {
            return Err(PileError::not_found(format!("index {index}")));
        }
        Ok(self.order.remove(index))
    }

    /// Remove and return the first ID.
    pub fn popleft(&mut self) -> Result<Uuid> {
        self.pop_at(0)
    }

    pub fn index_of(&self, id: &Uuid) -> Option<usize> {
        self.order.iter().position(|x| x == id)
    }

    pub fn count(&self, id: &Uuid) -> usize {
        self.order.iter().filter(|x| *x == id).count()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Iterate over the IDs in order. The iterator borrows the progression,
    /// so it reflects the state at creation for as long as it lives.
    pub fn iter(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.order.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Uuid> {
        self.order.clone()
    }

    pub fn reversed(&self) -> Progression {
        Progression {
            name: self.name.clone(),
            order: self.order.iter().rev().copied().collect(),
        }
    }

    /// Append the contents of another progression.
    pub fn extend(&mut self, other: &Progression) {
        self.order.extend_from_slice(&other.order);
    }

    /// A new progression with `ids` appended.
    pub fn concat(&self, ids: &[Uuid]) -> Progression {
        let mut order = self.order.clone();
        order.extend_from_slice(ids);
        Progression {
            name: self.name.clone(),
            order,
        }
    }

    /// A new progression with `ids` removed.
    pub fn difference(&self, ids: &[Uuid]) -> Progression {
        Progression {
            name: self.name.clone(),
            order: self
                .order
                .iter()
                .filter(|x| !ids.contains(*x))
                .copied()
                .collect(),
        }
    }
}

impl IntoIterator for &Progression {
    type Item = Uuid;
    type IntoIter = std::vec::IntoIter<Uuid>;

    fn into_iter(self) -> Self::IntoIter {
        self.to_vec().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_progression_push_and_get() {
        let mut prog = Progression::new();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();

        prog.push(id1);
        prog.push(id2);

        assert_eq!(prog.len(), 2);
        assert_eq!(prog.get(0).unwrap(), id1);
        assert_eq!(prog.get(1).unwrap(), id2);
        assert!(matches!(prog.get(2), Err(PileError::NotFound(_))));
    }

    #[test]
    fn test_progression_slice() {
        let all = ids(4);
        let prog = Progression::from_order(all.clone());

        let mid = prog.slice(1..3);
        assert_eq!(mid.to_vec(), vec![all[1], all[2]]);

        // Out-of-bounds ends clamp instead of failing.
        let tail = prog.slice(2..10);
        assert_eq!(tail.to_vec(), vec![all[2], all[3]]);
        assert!(prog.slice(7..9).is_empty());
    }

    #[test]
    fn test_progression_insert_and_set() {
        let all = ids(3);
        let mut prog = Progression::from_order(vec![all[0], all[2]]);

        prog.insert(1, &[all[1]]);
        assert_eq!(prog.to_vec(), all);

        let replacement = Uuid::new_v4();
        prog.set_at(0, replacement).unwrap();
        assert_eq!(prog.get(0).unwrap(), replacement);
        assert!(prog.set_at(10, replacement).is_err());
    }

    #[test]
    fn test_progression_set_slice_changes_length() {
        let all = ids(4);
        let mut prog = Progression::from_order(all.clone());
        let new = ids(1);

        prog.set_slice(1..3, &new);
        assert_eq!(prog.to_vec(), vec![all[0], new[0], all[3]]);
    }

    #[test]
    fn test_progression_include_skips_present() {
        let mut prog = Progression::new();
        let id = Uuid::new_v4();

        assert!(prog.include(&[id]));
        assert!(!prog.include(&[id]));
        assert_eq!(prog.len(), 1);
    }

    #[test]
    fn test_progression_exclude_is_idempotent() {
        let all = ids(2);
        let mut prog = Progression::from_order(all.clone());

        assert!(prog.exclude(&[all[0]]));
        assert!(!prog.exclude(&[all[0]]));
        assert_eq!(prog.to_vec(), vec![all[1]]);
    }

    #[test]
    fn test_progression_remove_missing_fails_whole_batch() {
        let all = ids(2);
        let mut prog = Progression::from_order(all.clone());
        let absent = Uuid::new_v4();

        let result = prog.remove(&[all[0], absent]);
        assert!(matches!(result, Err(PileError::NotFound(_))));
        // Nothing was removed.
        assert_eq!(prog.len(), 2);

        prog.remove(&[all[0]]).unwrap();
        assert_eq!(prog.to_vec(), vec![all[1]]);
    }

    #[test]
    fn test_progression_pop_variants() {
        let all = ids(3);
        let mut prog = Progression::from_order(all.clone());

        assert_eq!(prog.pop().unwrap(), all[2]);
        assert_eq!(prog.popleft().unwrap(), all[0]);
        assert_eq!(prog.pop_at(0).unwrap(), all[1]);
        assert!(prog.pop().is_err());
        assert!(prog.popleft().is_err());
    }

    #[test]
    fn test_progression_index_and_count() {
        let all = ids(2);
        let mut prog = Progression::from_order(all.clone());
        prog.push(all[0]); // duplicates allowed at this level

        assert_eq!(prog.index_of(&all[0]), Some(0));
        assert_eq!(prog.count(&all[0]), 2);
        assert_eq!(prog.count(&all[1]), 1);
        assert_eq!(prog.index_of(&Uuid::new_v4()), None);
    }

    #[test]
    fn test_progression_combinators() {
        let all = ids(3);
        let prog = Progression::from_order(vec![all[0], all[1]]);

        let extended = prog.concat(&[all[2]]);
        assert_eq!(extended.to_vec(), all);

        let reduced = extended.difference(&[all[1]]);
        assert_eq!(reduced.to_vec(), vec![all[0], all[2]]);

        let reversed = prog.reversed();
        assert_eq!(reversed.to_vec(), vec![all[1], all[0]]);
    }

    #[test]
    fn test_progression_iter_is_detached_snapshot() {
        let all = ids(2);
        let mut prog = Progression::from_order(all.clone());

        let seen: Vec<Uuid> = (&prog).into_iter().collect();
        prog.clear();
        assert_eq!(seen, all);
        assert!(prog.is_empty());
    }

    #[test]
    fn test_progression_serde_round_trip() {
        let mut prog = Progression::named("steps");
        prog.append(&ids(3));

        let encoded = serde_json::to_string(&prog).unwrap();
        let decoded: Progression = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, prog);
    }
}
