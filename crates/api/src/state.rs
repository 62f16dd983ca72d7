use crate::routes::RouteTable;
use lambda_invoker::LocalInvoker;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info};

pub const DEFAULT_MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub invoker: Arc<LocalInvoker>,
    pub static_files: Option<ServeDir>,
    pub max_body_bytes: usize,
    /// Cancelled on shutdown; every invocation runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(routes: RouteTable, invoker: Arc<LocalInvoker>) -> Self {
        Self {
            routes: Arc::new(routes),
            invoker,
            static_files: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serves `dir` behind the function routes when it exists.
    pub fn with_static_dir(mut self, dir: &Path) -> Self {
        if dir.is_dir() {
            info!(dir = %dir.display(), "Serving static files");
            self.static_files = Some(ServeDir::new(dir));
        } else {
            debug!(dir = %dir.display(), "Static directory not found, not serving static files");
        }
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
