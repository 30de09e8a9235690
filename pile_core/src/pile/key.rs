use std::ops::Range;

use uuid::Uuid;

use crate::element::Element;

/// How a pile entry (or span of entries) is addressed.
///
/// Positional keys resolve through the pile's progression; identifier keys
/// index the item map directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// A position in the order. Negative values count from the end.
    Index(isize),
    /// A span of positions. Out-of-bounds ends are clamped.
    Span(Range<usize>),
    /// A single identifier.
    Id(Uuid),
    /// A batch of identifiers, resolved independently.
    Ids(Vec<Uuid>),
}

impl Key {
    pub fn of<T: Element>(item: &T) -> Self {
        Key::Id(item.id())
    }
}

impl From<isize> for Key {
    fn from(index: isize) -> Self {
        Key::Index(index)
    }
}

impl From<i32> for Key {
    fn from(index: i32) -> Self {
        Key::Index(index as isize)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index as isize)
    }
}

impl From<Range<usize>> for Key {
    fn from(range: Range<usize>) -> Self {
        Key::Span(range)
    }
}

impl From<Uuid> for Key {
    fn from(id: Uuid) -> Self {
        Key::Id(id)
    }
}

impl From<&Uuid> for Key {
    fn from(id: &Uuid) -> Self {
        Key::Id(*id)
    }
}

impl From<Vec<Uuid>> for Key {
    fn from(ids: Vec<Uuid>) -> Self {
        Key::Ids(ids)
    }
}

impl From<&[Uuid]> for Key {
    fn from(ids: &[Uuid]) -> Self {
        Key::Ids(ids.to_vec())
    }
}

/// The result of a keyed lookup.
///
/// A lookup that resolves to exactly one item collapses to `Single`; any
/// other cardinality is `Many`. The collapse is an explicit, deliberate
/// code path (`Selection::collapse`) so callers can rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    Single(T),
    Many(Vec<T>),
}

impl<T> Selection<T> {
    pub(crate) fn collapse(mut items: Vec<T>) -> Self {
        if items.len() == 1 {
            match items.pop() {
                Some(item) => Selection::Single(item),
                None => Selection::Many(items),
            }
        } else {
            Selection::Many(items)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Selection::Single(_) => 1,
            Selection::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Selection::Single(item) => vec![item],
            Selection::Many(items) => items,
        }
    }

    /// The contained item, if the selection is a single item.
    pub fn into_single(self) -> Option<T> {
        match self {
            Selection::Single(item) => Some(item),
            Selection::Many(_) => None,
        }
    }
}

impl<T> From<T> for Selection<T> {
    fn from(item: T) -> Self {
        Selection::Single(item)
    }
}

impl<T> From<Vec<T>> for Selection<T> {
    fn from(items: Vec<T>) -> Self {
        Selection::Many(items)
    }
}

impl<T> IntoIterator for Selection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}
