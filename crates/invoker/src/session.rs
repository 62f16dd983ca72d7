use crate::code::{CodeMount, TASK_ROOT};
use crate::demux::Demultiplexer;
use crate::docker::{ContainerRuntime, CreateSpec};
use crate::environment::{assemble_environment, EnvironmentOverrides};
use crate::images::{debug_entrypoint, RuntimeImages};
use lambda_models::{Function, LocalError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of one sandbox container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Attached,
    Completed,
    TimedOut,
    Interrupted,
    CleanedUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed { exit_code: i64 },
    TimedOut { after: Duration },
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub request_id: String,
    pub outcome: InvocationOutcome,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub states: Vec<SessionState>,
}

impl InvocationResult {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugOptions {
    pub port: u16,
    /// Host interface the debugger port is published on.
    pub host_ip: String,
}

#[derive(Debug, Clone)]
pub struct InvokerOptions {
    /// Never pull images; a missing image fails at container creation.
    pub skip_pull: bool,
    pub network: Option<String>,
    /// Debug mode: debugger entrypoint, published port, no timeout.
    pub debug: Option<DebugOptions>,
    pub region: String,
    /// Snapshot of the host environment, consulted during assembly.
    pub host_env: HashMap<String, String>,
    pub overrides: EnvironmentOverrides,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            skip_pull: false,
            network: None,
            debug: None,
            region: "us-east-1".to_string(),
            host_env: HashMap::new(),
            overrides: EnvironmentOverrides::default(),
        }
    }
}

/// Runs functions once each inside a fresh container.
pub struct LocalInvoker {
    runtime: Arc<dyn ContainerRuntime>,
    images: RuntimeImages,
    options: InvokerOptions,
}

enum Verdict {
    Finished(anyhow::Result<(i64, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Interrupted,
}

impl LocalInvoker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        images: RuntimeImages,
        options: InvokerOptions,
    ) -> Self {
        Self {
            runtime,
            images,
            options,
        }
    }

    pub fn images(&self) -> &RuntimeImages {
        &self.images
    }

    pub fn is_debugging(&self) -> bool {
        self.options.debug.is_some()
    }

    /// Connectivity check; failure means no invocation can succeed.
    pub async fn ping(&self) -> Result<(), LocalError> {
        self.runtime
            .ping()
            .await
            .map_err(|e| LocalError::DockerUnavailable {
                reason: format!("{e:#}"),
            })
    }

    #[instrument(skip(self))]
    pub async fn ensure_image(&self, image: &str) -> Result<(), LocalError> {
        if self.options.skip_pull {
            debug!(image, "Image pull skipped");
            return Ok(());
        }
        let present = self.runtime.image_exists(image).await.map_err(docker_error)?;
        if !present {
            info!(image, "Image not present locally, pulling");
            self.runtime
                .pull_image(image)
                .await
                .map_err(|e| LocalError::ImagePull {
                    image: image.to_string(),
                    reason: format!("{e:#}"),
                })?;
        }
        Ok(())
    }

    /// Runs `function` with `event` as its single argument.
    ///
    /// Errors before the container starts are returned as-is. Timeout and
    /// interrupt are outcomes, not errors. The container and any extracted
    /// code are gone by the time this returns.
    #[instrument(
        skip(self, function, event, cancel),
        fields(function = %function.logical_id, request_id = tracing::field::Empty)
    )]
    pub async fn invoke(
        &self,
        function: &Function,
        event: &str,
        cancel: CancellationToken,
    ) -> Result<InvocationResult, LocalError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());
        let started_at = Instant::now();

        let image = self
            .images
            .image_for(&function.logical_id, &function.runtime)?
            .to_string();
        self.ensure_image(&image).await?;

        let code = CodeMount::prepare(function).await?;
        let spec = self.container_spec(function, &image, event, &code, &request_id);

        let container_id = self.runtime.create(spec).await.map_err(docker_error)?;
        let mut session = Session {
            runtime: self.runtime.clone(),
            container_id,
            code: Some(code),
            states: Vec::new(),
            cleaned: false,
        };
        session.enter(SessionState::Created);

        if let Err(e) = self.runtime.start(&session.container_id).await {
            session.cleanup().await;
            return Err(docker_error(e));
        }
        session.enter(SessionState::Started);

        let frames = match self.runtime.attach(&session.container_id).await {
            Ok(frames) => frames,
            Err(e) => {
                session.cleanup().await;
                return Err(docker_error(e));
            }
        };
        session.enter(SessionState::Attached);

        let mut demux = Demultiplexer::spawn(frames, &function.logical_id);
        let timeout = Duration::from_secs(function.timeout);
        let debugging = self.is_debugging();

        let verdict = {
            let completion = async {
                let exit_code = self.runtime.wait(&session.container_id).await?;
                let (stdout, stderr) = demux.collect().await;
                anyhow::Ok((exit_code, stdout, stderr))
            };
            let timer = async {
                if debugging {
                    std::future::pending::<()>().await
                } else {
                    tokio::time::sleep(timeout).await
                }
            };
            tokio::select! {
                finished = completion => Verdict::Finished(finished),
                _ = timer => Verdict::TimedOut,
                _ = cancel.cancelled() => Verdict::Interrupted,
            }
        };

        let (outcome, stdout, stderr) = match verdict {
            Verdict::Finished(Ok((exit_code, stdout, stderr))) => {
                session.enter(SessionState::Completed);
                (InvocationOutcome::Completed { exit_code }, stdout, stderr)
            }
            Verdict::Finished(Err(e)) => {
                demux.abort();
                session.cleanup().await;
                return Err(docker_error(e));
            }
            Verdict::TimedOut => {
                demux.abort();
                warn!(timeout_secs = function.timeout, "Function timed out");
                session.enter(SessionState::TimedOut);
                (InvocationOutcome::TimedOut { after: timeout }, Vec::new(), Vec::new())
            }
            Verdict::Interrupted => {
                demux.abort();
                info!("Invocation interrupted");
                session.enter(SessionState::Interrupted);
                (InvocationOutcome::Interrupted, Vec::new(), Vec::new())
            }
        };

        session.cleanup().await;
        let duration = started_at.elapsed();
        info!(
            outcome = ?outcome,
            duration_ms = duration.as_millis() as u64,
            "Invocation finished"
        );

        Ok(InvocationResult {
            request_id,
            outcome,
            stdout,
            stderr,
            duration,
            states: std::mem::take(&mut session.states),
        })
    }

    fn container_spec(
        &self,
        function: &Function,
        image: &str,
        event: &str,
        code: &CodeMount,
        request_id: &str,
    ) -> CreateSpec {
        let env = assemble_environment(
            function,
            &self.options.region,
            &self.options.host_env,
            &self.options.overrides,
        );
        let debug = self.options.debug.as_ref();

        CreateSpec {
            image: image.to_string(),
            name: format!("lambda-local-{}-{}", function.logical_id.to_lowercase(), request_id),
            cmd: vec![function.handler.clone(), event.to_string()],
            entrypoint: debug.and_then(|d| debug_entrypoint(&function.runtime, d.port)),
            env: env.into_iter().collect(),
            mounts: vec![code.bind()],
            working_dir: Some(TASK_ROOT.to_string()),
            memory_mb: Some(function.memory_size),
            network: self.options.network.clone(),
            published_port: debug.map(|d| (d.host_ip.clone(), d.port)),
            labels: vec![
                ("lambda-local.function".to_string(), function.logical_id.clone()),
                ("lambda-local.request-id".to_string(), request_id.to_string()),
            ],
        }
    }
}

fn docker_error(e: anyhow::Error) -> LocalError {
    LocalError::DockerError {
        message: format!("{e:#}"),
    }
}

/// Owns the container until it is removed.
///
/// Dropping an uncleaned session (the request future was cancelled) hands
/// removal to a background task.
struct Session {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    code: Option<CodeMount>,
    states: Vec<SessionState>,
    cleaned: bool,
}

impl Session {
    fn enter(&mut self, state: SessionState) {
        debug!(container_id = %self.container_id, ?state, "Session state");
        self.states.push(state);
    }

    async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        if self.states.last() != Some(&SessionState::Completed) {
            if let Err(e) = self.runtime.kill(&self.container_id).await {
                debug!(container_id = %self.container_id, error = %e, "Kill failed, container already stopped");
            }
        }
        if let Err(e) = self.runtime.remove(&self.container_id).await {
            warn!(container_id = %self.container_id, error = %e, "Failed to remove container");
        }
        self.code.take();
        self.cleaned = true;
        self.enter(SessionState::CleanedUp);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        let runtime = self.runtime.clone();
        let container_id = std::mem::take(&mut self.container_id);
        let code = self.code.take();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = runtime.kill(&container_id).await;
                if let Err(e) = runtime.remove(&container_id).await {
                    warn!(container_id = %container_id, error = %e, "Failed to remove abandoned container");
                }
                drop(code);
            });
        }
    }
}
