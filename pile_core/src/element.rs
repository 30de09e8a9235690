use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A capability tag identifying what kind of element a value is.
///
/// Tags form a closed set declared by element implementations; piles with an
/// `item_type` constraint check membership against this set at insertion
/// time rather than inspecting concrete types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    pub const fn new(name: &'static str) -> Self {
        TypeTag(Cow::Borrowed(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TypeTag {
    fn from(name: String) -> Self {
        TypeTag(Cow::Owned(name))
    }
}

/// A uniquely identifiable, timestamped value that can live in a `Pile`.
pub trait Element: Clone + Send + Sync + 'static {
    /// Globally unique, immutable identifier for this element.
    fn id(&self) -> Uuid;

    /// Creation timestamp.
    fn created_at(&self) -> DateTime<Utc>;

    /// The element's own type tag.
    fn type_tag(&self) -> TypeTag;

    /// All tags this element satisfies, used for non-strict constraint
    /// matching. Defaults to just the element's own tag.
    fn capabilities(&self) -> Vec<TypeTag> {
        vec![self.type_tag()]
    }
}

/// A generic element carrying arbitrary JSON metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementData {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub metadata: Value,
}

impl ElementData {
    pub const TAG: TypeTag = TypeTag::new("element");

    pub fn new(metadata: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            metadata,
        }
    }
}

impl Element for ElementData {
    fn id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn type_tag(&self) -> TypeTag {
        Self::TAG
    }
}

// Elements compare by identity, not by payload.
impl PartialEq for ElementData {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ElementData {}
