use crate::registry::ResourceKind;
use serde_json::Value;
use std::collections::BTreeMap;

/// Output name -> value exposed by a resource once it is fully resolved.
/// The default reference (a bare `Ref`) is stored under [`DEFAULT_REFERENCE`].
pub type ReturnValues = BTreeMap<String, String>;

pub const DEFAULT_REFERENCE: &str = "Ref";

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    original: Value,
    resolved: Option<Value>,
}

impl Property {
    pub fn new(original: Value) -> Self {
        Self {
            original,
            resolved: None,
        }
    }

    pub fn original(&self) -> &Value {
        &self.original
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub(crate) fn resolved(&self) -> Option<&Value> {
        self.resolved.as_ref()
    }

    pub(crate) fn with_resolved(&self, value: Value) -> Self {
        Self {
            original: self.original.clone(),
            resolved: Some(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub line: Option<usize>,
    pub properties: BTreeMap<String, Property>,
}

impl Resource {
    pub fn is_resolved(&self) -> bool {
        self.properties.values().all(Property::is_resolved)
    }
}

/// A resource the scaffolder dropped because its type is not emulated.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedResource {
    pub logical_id: String,
    pub type_name: String,
    pub line: Option<usize>,
}

/// Typed resources whose properties may still contain intrinsic calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    pub resources: Vec<Resource>,
    pub skipped: Vec<SkippedResource>,
}

impl ResourceGraph {
    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }
}

/// The resource graph after the resolver reached its fixed point.
///
/// Read-only once built; shared between request handlers without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGraph {
    resources: Vec<Resource>,
    return_values: BTreeMap<String, ReturnValues>,
    passes: u32,
}

impl ResolvedGraph {
    pub(crate) fn new(
        resources: Vec<Resource>,
        return_values: BTreeMap<String, ReturnValues>,
        passes: u32,
    ) -> Self {
        Self {
            resources,
            return_values,
            passes,
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    /// Resolved value of one property.
    pub fn value(&self, logical_id: &str, property: &str) -> Option<&Value> {
        self.resource(logical_id)?
            .properties
            .get(property)?
            .resolved()
    }

    pub fn return_values(&self, logical_id: &str) -> Option<&ReturnValues> {
        self.return_values.get(logical_id)
    }

    /// Number of passes the resolver needed.
    pub fn passes(&self) -> u32 {
        self.passes
    }
}
