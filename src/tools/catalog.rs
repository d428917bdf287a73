//! Tool descriptors and the catalog snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One invocable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

/// Schema used when the worker does not describe a tool's parameters.
#[must_use]
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Normalize one entry of a `tools/list` reply.
    ///
    /// Returns `None` for entries without a usable name.
    #[must_use]
    pub fn from_listing(entry: &Value) -> Option<Self> {
        let name = entry.get("name")?.as_str()?.trim();
        if name.is_empty() {
            return None;
        }
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let input_schema = entry
            .get("inputSchema")
            .or_else(|| entry.get("input_schema"))
            .filter(|schema| schema.is_object())
            .cloned()
            .unwrap_or_else(empty_object_schema);

        Some(Self {
            name: name.to_string(),
            description,
            input_schema,
        })
    }
}

/// Where a catalog snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    /// Returned by the worker's `tools/list`.
    Worker,
    /// Built-in list used when the worker could not be asked.
    Fallback,
}

/// Ordered set of tool descriptors.
///
/// Duplicate names are kept in the listing, but [`get`](Self::get) resolves a
/// name to the last descriptor that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    source: CatalogSource,
}

impl ToolCatalog {
    #[must_use]
    pub fn new(tools: Vec<ToolDescriptor>, source: CatalogSource) -> Self {
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.name.clone(), i))
            .collect();
        Self {
            tools,
            index,
            source,
        }
    }

    /// Parse a `tools/list` result.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the result has no `tools` array or the array
    /// holds no usable entries.
    pub fn from_listing(result: &Value) -> Result<Self, CatalogError> {
        let entries = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or(CatalogError::MissingTools)?;

        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            match ToolDescriptor::from_listing(entry) {
                Some(tool) => tools.push(tool),
                None => tracing::warn!(%entry, "Skipping tool listing without a name"),
            }
        }

        if tools.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self::new(tools, CatalogSource::Worker))
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|i| &self.tools[*i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All descriptors in listing order.
    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn source(&self) -> CatalogSource {
        self.source
    }
}

/// Problems with a `tools/list` reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("tools/list result has no 'tools' array")]
    MissingTools,
    #[error("tools/list returned no usable tools")]
    Empty,
}
