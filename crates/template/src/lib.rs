//! Template resolution pipeline: text -> marshalled maps -> typed graph ->
//! resolved graph -> typed functions.

pub mod graph;
pub mod intrinsics;
pub mod marshaller;
pub mod pseudo;
pub mod registry;
pub mod resolver;
pub mod scaffold;
pub mod typed;

pub use graph::{Property, Resource, ResolvedGraph, ResourceGraph, ReturnValues, SkippedResource};
pub use intrinsics::IntrinsicCall;
pub use marshaller::{marshal, LineIndex, MarshalledTemplate};
pub use pseudo::PseudoParameters;
pub use registry::{ResourceKind, ResourceType};
pub use resolver::{Resolver, DEFAULT_MAX_PASSES};
pub use scaffold::scaffold;
pub use typed::build_functions;

use lambda_models::{Function, LocalError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub max_resolve_passes: u32,
    /// Values for template `Parameters`, taking precedence over defaults.
    pub parameter_overrides: BTreeMap<String, String>,
    pub pseudo: PseudoParameters,
    /// Directory relative `CodeUri` values are joined to.
    pub base_dir: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            max_resolve_passes: DEFAULT_MAX_PASSES,
            parameter_overrides: BTreeMap::new(),
            pseudo: PseudoParameters::default(),
            base_dir: None,
        }
    }
}

/// A fully resolved template. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub format_version: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub outputs: Option<Value>,
    pub graph: ResolvedGraph,
    pub skipped: Vec<SkippedResource>,
    pub functions: Vec<Function>,
}

impl LoadedTemplate {
    pub fn function(&self, logical_id: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.logical_id == logical_id)
    }
}

#[instrument(skip(text, options))]
pub fn load_template(text: &str, options: &LoadOptions) -> Result<LoadedTemplate, LocalError> {
    let marshalled = marshal(text)?;
    let parameters = parameter_values(&marshalled, &options.parameter_overrides);
    let graph = scaffold(&marshalled)?;

    let resolved = Resolver::new(&options.pseudo, &parameters)
        .with_max_passes(options.max_resolve_passes)
        .resolve(&graph)?;

    let base_dir = options.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let functions = build_functions(&resolved, &base_dir)?;

    info!(
        functions = functions.len(),
        skipped = graph.skipped.len(),
        passes = resolved.passes(),
        "Template loaded"
    );

    let text_section = |name: &str| {
        marshalled
            .section(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Ok(LoadedTemplate {
        format_version: text_section("AWSTemplateFormatVersion"),
        description: text_section("Description"),
        parameters,
        outputs: marshalled.section("Outputs").cloned(),
        graph: resolved,
        skipped: graph.skipped,
        functions,
    })
}

/// Reads a template file. Code locations resolve against the file's directory
/// unless `options.base_dir` says otherwise.
pub fn load_template_file(path: &Path, options: &LoadOptions) -> Result<LoadedTemplate, LocalError> {
    let text = std::fs::read_to_string(path).map_err(|e| LocalError::TemplateParse {
        line: None,
        message: format!("cannot read {}: {e}", path.display()),
    })?;

    let mut options = options.clone();
    if options.base_dir.is_none() {
        options.base_dir = Some(
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        );
    }
    load_template(&text, &options)
}

fn parameter_values(
    template: &MarshalledTemplate,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let declared = template
        .section("Parameters")
        .and_then(Value::as_object)
        .into_iter()
        .flatten();

    for (name, declaration) in declared {
        if let Some(value) = overrides.get(name) {
            values.insert(name.clone(), value.clone());
        } else if let Some(default) = declaration.get("Default").and_then(typed::scalar_text) {
            values.insert(name.clone(), default);
        } else {
            warn!(parameter = %name, "Template parameter has no default and no override");
        }
    }

    for name in overrides.keys().filter(|name| !values.contains_key(*name)) {
        warn!(parameter = %name, "Override given for a parameter the template does not declare");
    }
    values
}
