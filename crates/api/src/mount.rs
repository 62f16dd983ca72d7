use crate::routes::{MountedRoute, PathPattern, RouteTable};
use lambda_invoker::LocalInvoker;
use lambda_models::{Function, LocalError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to each function when the route table was built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountSummary {
    /// `(function, method, path)` per mounted trigger.
    pub mounted: Vec<(String, String, String)>,
    /// Functions with triggers that could not be mounted, and why.
    pub skipped: Vec<(String, String)>,
    pub without_triggers: Vec<String>,
}

impl MountSummary {
    pub fn log(&self) {
        for (function, method, path) in &self.mounted {
            info!(function = %function, method = %method, path = %path, "Mounted route");
        }
        for (function, reason) in &self.skipped {
            warn!(function = %function, reason = %reason, "Function not mounted");
        }
        if !self.without_triggers.is_empty() {
            info!(
                functions = ?self.without_triggers,
                "Functions without HTTP triggers are only reachable through invoke"
            );
        }
        info!(
            mounted = self.mounted.len(),
            skipped = self.skipped.len(),
            without_triggers = self.without_triggers.len(),
            "Mount summary"
        );
    }
}

/// Builds the route table from every function's HTTP triggers.
///
/// Each distinct image is made available once, up front. A function whose
/// runtime has no image, or whose image cannot be pulled, is skipped without
/// affecting the others. Startup is refused when nothing ends up mounted.
pub async fn mount_functions(
    functions: &[Function],
    invoker: &LocalInvoker,
) -> Result<(RouteTable, MountSummary), LocalError> {
    let mut summary = MountSummary::default();
    let mut routes = Vec::new();
    let mut images: HashMap<String, Result<(), String>> = HashMap::new();

    for function in functions {
        if function.http_triggers.is_empty() {
            summary.without_triggers.push(function.logical_id.clone());
            continue;
        }
        let image = match invoker
            .images()
            .image_for(&function.logical_id, &function.runtime)
        {
            Ok(image) => image.to_string(),
            Err(e) => {
                summary
                    .skipped
                    .push((function.logical_id.clone(), e.to_string()));
                continue;
            }
        };
        if !images.contains_key(&image) {
            let ready = invoker.ensure_image(&image).await.map_err(|e| e.to_string());
            images.insert(image.clone(), ready);
        }
        if let Some(Err(reason)) = images.get(&image) {
            summary
                .skipped
                .push((function.logical_id.clone(), reason.clone()));
            continue;
        }

        let shared = Arc::new(function.clone());
        for trigger in &function.http_triggers {
            summary.mounted.push((
                function.logical_id.clone(),
                trigger.method_label().to_string(),
                trigger.path.clone(),
            ));
            routes.push(MountedRoute {
                trigger: trigger.clone(),
                pattern: PathPattern::parse(&trigger.path),
                function: Arc::clone(&shared),
            });
        }
    }

    summary.log();

    if functions.is_empty() {
        return Err(LocalError::NoFunctions);
    }
    if routes.is_empty() {
        return Err(if summary.skipped.is_empty() {
            LocalError::NoHttpTriggers
        } else {
            LocalError::AllFunctionsFailed {
                count: summary.skipped.len(),
            }
        });
    }

    Ok((RouteTable::new(routes), summary))
}
