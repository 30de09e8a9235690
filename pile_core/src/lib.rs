pub mod adapter;
pub mod element;
pub mod error;
pub mod pile;
pub mod progression;

pub use adapter::{
    Adapter, AdapterPayload, AdapterRegistry, JsonAdapter, JsonFileAdapter, JsonLinesAdapter,
};
pub use element::{Element, ElementData, TypeTag};
pub use error::{PileError, Result};
pub use pile::{Key, Pile, Selection};
pub use progression::Progression;
