use crate::demux::{OutputFrame, StreamKind};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use lambda_models::LocalError;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Demultiplexed container output, in the order the daemon produced it.
pub type FrameStream = BoxStream<'static, anyhow::Result<OutputFrame>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    pub cmd: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<(String, String, bool)>, // (src,dst,ro)
    pub working_dir: Option<String>,
    pub memory_mb: Option<u64>,
    pub network: Option<String>,
    /// Container port published on `host_ip:port` of the host.
    pub published_port: Option<(String, u16)>,
    pub labels: Vec<(String, String)>,
}

/// The slice of the container daemon an invocation session needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn ping(&self) -> anyhow::Result<()>;
    async fn image_exists(&self, image: &str) -> anyhow::Result<bool>;
    async fn pull_image(&self, image: &str) -> anyhow::Result<()>;
    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String>; // returns container_id
    async fn start(&self, container_id: &str) -> anyhow::Result<()>;
    /// Attaches to stdout/stderr, replaying anything already written.
    async fn attach(&self, container_id: &str) -> anyhow::Result<FrameStream>;
    /// Resolves with the exit code once the container stops.
    async fn wait(&self, container_id: &str) -> anyhow::Result<i64>;
    async fn kill(&self, container_id: &str) -> anyhow::Result<()>;
    async fn remove(&self, container_id: &str) -> anyhow::Result<()>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to `host` (or `DOCKER_HOST`, then the local socket).
    pub fn connect(host: &str) -> Result<Self, LocalError> {
        let host = if host.is_empty() {
            std::env::var("DOCKER_HOST").unwrap_or_default()
        } else {
            host.to_string()
        };

        let docker = if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                LocalError::DockerUnavailable {
                    reason: format!("Failed to connect to Docker at {host}: {e}"),
                }
            })?
        } else if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                LocalError::DockerUnavailable {
                    reason: e.to_string(),
                }
            })?
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| LocalError::DockerUnavailable {
                reason: e.to_string(),
            })?
        };

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> anyhow::Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            let update = update?;
            if let Some(status) = update.status {
                debug!(image, %status, "Pull progress");
            }
        }
        info!(image, "Pulled image");
        Ok(())
    }

    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let mut host_config = HostConfig {
            binds: Some(
                spec.mounts
                    .iter()
                    .map(|(src, dst, ro)| {
                        if *ro {
                            format!("{src}:{dst}:ro")
                        } else {
                            format!("{src}:{dst}")
                        }
                    })
                    .collect(),
            ),
            memory: spec.memory_mb.map(memory_bytes),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let mut exposed_ports = None;
        if let Some((host_ip, port)) = &spec.published_port {
            let key = format!("{port}/tcp");
            host_config.port_bindings = Some(HashMap::from([(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some(host_ip.clone()),
                    host_port: Some(port.to_string()),
                }]),
            )]));
            exposed_ports = Some(HashMap::from([(key, HashMap::new())]));
        }

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            entrypoint: spec.entrypoint.clone(),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.iter().cloned().collect()),
            exposed_ports,
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let response = self.docker.create_container(Some(options), config).await?;
        info!("Created container: {} with ID: {}", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        debug!("Started container: {}", container_id);
        Ok(())
    }

    async fn attach(&self, container_id: &str) -> anyhow::Result<FrameStream> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let attached = self
            .docker
            .attach_container(container_id, Some(options))
            .await?;

        let frames = attached.output.filter_map(|chunk| async move {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(OutputFrame::new(StreamKind::Stdout, message)))
                }
                Ok(LogOutput::StdErr { message }) => {
                    Some(Ok(OutputFrame::new(StreamKind::Stderr, message)))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(e.into())),
            }
        });
        Ok(frames.boxed())
    }

    async fn wait(&self, container_id: &str) -> anyhow::Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut waits = self.docker.wait_container(container_id, Some(options));
        match waits.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => anyhow::bail!("wait stream for {container_id} ended without a status"),
        }
    }

    async fn kill(&self, container_id: &str) -> anyhow::Result<()> {
        self.docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        debug!("Removed container: {}", container_id);
        Ok(())
    }
}

/// Megabytes to the byte count the daemon expects, saturating at `i64::MAX`.
fn memory_bytes(mb: u64) -> i64 {
    mb.checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .unwrap_or(i64::MAX)
}
