use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::element::Element;
use crate::error::{PileError, Result};
use crate::pile::Pile;

/// Raw material flowing into or out of an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterPayload {
    /// An in-memory encoded document.
    Text(String),
    /// A path the adapter should read from or has written to.
    File(PathBuf),
}

impl AdapterPayload {
    pub fn text(value: impl Into<String>) -> Self {
        AdapterPayload::Text(value.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        AdapterPayload::File(path.into())
    }
}

/// A bidirectional converter between pile items and one external format.
///
/// Adapters are looked up by key in an [`AdapterRegistry`]; a pile never
/// implements any format itself. `many` selects between single-record and
/// collection framing.
pub trait Adapter<T: Element>: Send + Sync {
    fn key(&self) -> &str;

    /// Whether this adapter can produce items from raw input.
    fn supports_import(&self) -> bool {
        true
    }

    /// Whether this adapter can render items out.
    fn supports_export(&self) -> bool {
        true
    }

    fn from_obj(&self, raw: &AdapterPayload, many: bool) -> Result<Vec<T>>;

    fn to_obj(&self, items: &[T], many: bool) -> Result<AdapterPayload>;
}

/// An explicit, instance-scoped adapter registry.
///
/// There is deliberately no process-wide default: whoever needs adapters
/// constructs a registry, registers into it, and passes it around.
pub struct AdapterRegistry<T: Element> {
    adapters: BTreeMap<String, Box<dyn Adapter<T>>>,
}

impl<T: Element> AdapterRegistry<T> {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Register an adapter under its key. Fails at registration time, not
    /// first use, if the adapter is missing a direction or the key is
    /// already taken.
    pub fn register(&mut self, adapter: Box<dyn Adapter<T>>) -> Result<()> {
        let key = adapter.key().to_string();
        if !adapter.supports_import() || !adapter.supports_export() {
            return Err(PileError::Configuration(format!(
                "adapter `{key}` must support both import and export"
            )));
        }
        if self.adapters.contains_key(&key) {
            return Err(PileError::Configuration(format!(
                "adapter key `{key}` is already registered"
            )));
        }
        debug!(key = %key, "registered adapter");
        self.adapters.insert(key, adapter);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&dyn Adapter<T>> {
        match self.adapters.get(key) {
            Some(adapter) => Ok(adapter.as_ref()),
            None => Err(PileError::UnknownAdapter {
                key: key.to_string(),
                registered: self.keys(),
            }),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn adapt_from(&self, raw: &AdapterPayload, key: &str, many: bool) -> Result<Vec<T>> {
        self.get(key)?.from_obj(raw, many)
    }

    pub fn adapt_to(&self, items: &[T], key: &str, many: bool) -> Result<AdapterPayload> {
        self.get(key)?.to_obj(items, many)
    }
}

impl<T: Element + Serialize + DeserializeOwned> AdapterRegistry<T> {
    /// A registry preloaded with the JSON adapter family.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        // Fresh registry, fixed distinct keys: registration cannot fail.
        let _ = registry.register(Box::new(JsonAdapter));
        let _ = registry.register(Box::new(JsonLinesAdapter));
        registry
    }
}

impl<T: Element> Default for AdapterRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Pile<T> {
    /// Render this pile's values through the adapter registered under
    /// `key`. Unknown keys surface the registry's configuration error.
    pub fn adapt_to(
        &self,
        registry: &AdapterRegistry<T>,
        key: &str,
        many: bool,
    ) -> Result<AdapterPayload> {
        registry.adapt_to(&self.values(), key, many)
    }

    /// Build a new pile from raw input through the adapter registered
    /// under `key`.
    pub fn adapt_from(
        registry: &AdapterRegistry<T>,
        raw: &AdapterPayload,
        key: &str,
    ) -> Result<Self> {
        let items = registry.adapt_from(raw, key, true)?;
        Ok(Pile::from_items(items))
    }
}

fn payload_text<'a>(raw: &'a AdapterPayload, key: &str) -> Result<std::borrow::Cow<'a, str>> {
    match raw {
        AdapterPayload::Text(text) => Ok(std::borrow::Cow::Borrowed(text)),
        AdapterPayload::File(path) => Ok(std::borrow::Cow::Owned(read_text(path, key)?)),
    }
}

fn read_text(path: &Path, key: &str) -> Result<String> {
    debug!(key = %key, path = %path.display(), "reading adapter input");
    Ok(fs::read_to_string(path)?)
}

/// JSON document adapter: one record, or an array of records with `many`.
pub struct JsonAdapter;

impl<T: Element + Serialize + DeserializeOwned> Adapter<T> for JsonAdapter {
    fn key(&self) -> &str {
        "json"
    }

    fn from_obj(&self, raw: &AdapterPayload, many: bool) -> Result<Vec<T>> {
        let text = payload_text(raw, <Self as Adapter<T>>::key(self))?;
        if many {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(vec![serde_json::from_str(&text)?])
        }
    }

    fn to_obj(&self, items: &[T], many: bool) -> Result<AdapterPayload> {
        if many {
            Ok(AdapterPayload::Text(serde_json::to_string(items)?))
        } else {
            match items {
                [item] => Ok(AdapterPayload::Text(serde_json::to_string(item)?)),
                _ => Err(PileError::Configuration(format!(
                    "single-record json export requires exactly one item, got {}",
                    items.len()
                ))),
            }
        }
    }
}

/// JSON file adapter bound to a target path at construction time.
pub struct JsonFileAdapter {
    path: PathBuf,
}

impl JsonFileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl<T: Element + Serialize + DeserializeOwned> Adapter<T> for JsonFileAdapter {
    fn key(&self) -> &str {
        ".json"
    }

    fn from_obj(&self, raw: &AdapterPayload, many: bool) -> Result<Vec<T>> {
        let text = match raw {
            AdapterPayload::File(path) => read_text(path, <Self as Adapter<T>>::key(self))?,
            AdapterPayload::Text(text) => text.clone(),
        };
        if many {
            Ok(serde_json::from_str(&text)?)
        } else {
            Ok(vec![serde_json::from_str(&text)?])
        }
    }

    fn to_obj(&self, items: &[T], many: bool) -> Result<AdapterPayload> {
        let text = if many {
            serde_json::to_string(items)?
        } else {
            match items {
                [item] => serde_json::to_string(item)?,
                _ => {
                    return Err(PileError::Configuration(format!(
                        "single-record json export requires exactly one item, got {}",
                        items.len()
                    )))
                }
            }
        };
        fs::write(&self.path, text)?;
        info!(path = %self.path.display(), "saved pile contents");
        Ok(AdapterPayload::File(self.path.clone()))
    }
}

/// Newline-delimited JSON adapter: one record per line.
pub struct JsonLinesAdapter;

impl<T: Element + Serialize + DeserializeOwned> Adapter<T> for JsonLinesAdapter {
    fn key(&self) -> &str {
        "jsonl"
    }

    fn from_obj(&self, raw: &AdapterPayload, _many: bool) -> Result<Vec<T>> {
        let text = payload_text(raw, <Self as Adapter<T>>::key(self))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    fn to_obj(&self, items: &[T], _many: bool) -> Result<AdapterPayload> {
        let mut out = String::new();
        for item in items {
            out.push_str(&serde_json::to_string(item)?);
            out.push('\n');
        }
        Ok(AdapterPayload::Text(out))
    }
}
