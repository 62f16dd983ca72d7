use axum::Router;
use lambda_api::{build_router, mount_functions, start_server, AppState, MountSummary};
use lambda_invoker::{
    DebugOptions, DockerRuntime, EnvironmentOverrides, InvocationResult, InvokerOptions,
    LocalInvoker, RuntimeImages,
};
use lambda_models::{Config, LocalError};
use lambda_template::{load_template_file, LoadOptions, LoadedTemplate, PseudoParameters};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub fn load_options(config: &Config) -> LoadOptions {
    LoadOptions {
        max_resolve_passes: config.template.max_resolve_passes,
        parameter_overrides: config
            .template
            .parameter_overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        pseudo: PseudoParameters::local(&config.invoke.region),
        base_dir: None,
    }
}

#[instrument(skip(config), fields(path = %config.template.path))]
pub fn load(config: &Config) -> Result<LoadedTemplate, LocalError> {
    let template = load_template_file(Path::new(&config.template.path), &load_options(config))?;
    info!(
        functions = template.functions.len(),
        skipped = template.skipped.len(),
        "Template loaded"
    );
    Ok(template)
}

pub fn runtime_images(config: &Config) -> RuntimeImages {
    RuntimeImages::new().with_overrides(&config.runtimes)
}

/// Invoker options from configuration and the current process environment.
pub async fn invoker_options(config: &Config) -> Result<InvokerOptions, LocalError> {
    let overrides = match &config.invoke.env_vars {
        Some(path) => EnvironmentOverrides::load(Path::new(path)).await?,
        None => EnvironmentOverrides::default(),
    };
    Ok(InvokerOptions {
        skip_pull: config.docker.skip_pull,
        network: config.docker.network.clone(),
        debug: config.invoke.debug_port.map(|port| DebugOptions {
            port,
            host_ip: config.docker.debug_host_ip.clone(),
        }),
        region: config.invoke.region.clone(),
        host_env: std::env::vars().collect(),
        overrides,
    })
}

/// Connects to the daemon and fails fast when it cannot be reached.
pub async fn connect_invoker(config: &Config) -> Result<LocalInvoker, LocalError> {
    let runtime = DockerRuntime::connect(&config.docker.host)?;
    let invoker = LocalInvoker::new(
        Arc::new(runtime),
        runtime_images(config),
        invoker_options(config).await?,
    );
    invoker.ping().await?;
    Ok(invoker)
}

/// Route table plus router for a loaded template; pulls missing images.
pub async fn api_router(
    template: &LoadedTemplate,
    invoker: Arc<LocalInvoker>,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(Router, MountSummary), LocalError> {
    let (routes, summary) = mount_functions(&template.functions, &invoker).await?;
    let mut state = AppState::new(routes, invoker)
        .with_max_body_bytes(config.server.max_request_body_size_mb as usize * 1024 * 1024)
        .with_shutdown(shutdown);
    if let Some(dir) = &config.server.static_dir {
        state = state.with_static_dir(&PathBuf::from(dir));
    }
    Ok((build_router(state), summary))
}

pub async fn start_api(config: Config) -> Result<(), LocalError> {
    let template = load(&config)?;
    let invoker = Arc::new(connect_invoker(&config).await?);
    if invoker.is_debugging() {
        info!("Debug mode: invocations wait for the debugger and never time out");
    }

    let shutdown = shutdown_on_ctrl_c();
    let (app, _) = api_router(&template, invoker, &config, shutdown.clone()).await?;
    start_server(&config.server.bind, config.server.port, app, shutdown).await
}

/// Runs one function directly with `event` as its payload.
pub async fn invoke_function(
    config: Config,
    logical_id: &str,
    event: &str,
) -> Result<InvocationResult, LocalError> {
    let template = load(&config)?;
    let function = template
        .function(logical_id)
        .ok_or_else(|| LocalError::FunctionNotFound {
            function: logical_id.to_string(),
        })?;
    let invoker = connect_invoker(&config).await?;
    invoker.invoke(function, event, shutdown_on_ctrl_c()).await
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal.cancel();
        }
    });
    token
}
