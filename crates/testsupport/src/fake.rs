use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, StreamExt};
use lambda_invoker::{
    frames_from_reader, AttachCodec, ContainerRuntime, CreateSpec, FrameStream, OutputFrame,
    StreamKind,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;

/// What a fake container writes and how it exits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl Reply {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_exit_code(mut self, exit_code: i64) -> Self {
        self.exit_code = exit_code;
        self
    }
}

type Script = Arc<dyn Fn(&CreateSpec) -> Reply + Send + Sync>;

#[derive(Clone)]
pub enum Behavior {
    Reply(Reply),
    /// Computes the reply from the container spec (e.g. echoes the event).
    Script(Script),
    /// Writes `stderr` then never exits until killed.
    Hang { stderr: String },
}

impl Behavior {
    pub fn script(f: impl Fn(&CreateSpec) -> Reply + Send + Sync + 'static) -> Self {
        Behavior::Script(Arc::new(f))
    }
}

enum Planned {
    Exit(Reply),
    Hang(String),
}

/// In-memory container runtime that records every call.
#[derive(Clone)]
pub struct FakeRuntime {
    behavior: Arc<Mutex<Behavior>>,
    planned: Arc<Mutex<HashMap<String, Planned>>>,
    pub images: Arc<Mutex<HashSet<String>>>,
    pub pulled: Arc<Mutex<Vec<String>>>,
    pub created: Arc<Mutex<Vec<CreateSpec>>>,
    pub started: Arc<Mutex<Vec<String>>>,
    pub killed: Arc<Mutex<Vec<String>>>,
    pub removed: Arc<Mutex<Vec<String>>>,
    pub fail_pull: Arc<Mutex<bool>>,
    pub reachable: Arc<Mutex<bool>>,
    pub next_id: Arc<Mutex<u64>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::with_behavior(Behavior::Reply(Reply::default()))
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            planned: Arc::default(),
            images: Arc::default(),
            pulled: Arc::default(),
            created: Arc::default(),
            started: Arc::default(),
            killed: Arc::default(),
            removed: Arc::default(),
            fail_pull: Arc::default(),
            reachable: Arc::new(Mutex::new(true)),
            next_id: Arc::default(),
        }
    }

    pub fn replying(stdout: impl Into<String>) -> Self {
        Self::with_behavior(Behavior::Reply(Reply::stdout(stdout)))
    }

    pub async fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().await = behavior;
    }

    pub async fn last_created(&self) -> CreateSpec {
        self.created
            .lock()
            .await
            .last()
            .cloned()
            .expect("no create")
    }

    /// Event passed to the most recent container (its last command argument).
    pub async fn last_event(&self) -> serde_json::Value {
        let spec = self.last_created().await;
        let event = spec.cmd.last().expect("no command");
        serde_json::from_str(event).expect("event is JSON")
    }

    pub async fn last_env(&self) -> HashMap<String, String> {
        self.last_created().await.env.into_iter().collect()
    }
}

fn encode(frames: &[(StreamKind, &str)]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for (kind, text) in frames {
        if text.is_empty() {
            continue;
        }
        AttachCodec
            .encode(OutputFrame::new(*kind, text.as_bytes().to_vec()), &mut buf)
            .expect("encode frame");
    }
    buf.to_vec()
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> anyhow::Result<()> {
        if *self.reachable.lock().await {
            Ok(())
        } else {
            anyhow::bail!("connection refused")
        }
    }

    async fn image_exists(&self, image: &str) -> anyhow::Result<bool> {
        Ok(self.images.lock().await.contains(image))
    }

    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        if *self.fail_pull.lock().await {
            anyhow::bail!("manifest for {image} not found");
        }
        self.pulled.lock().await.push(image.to_string());
        self.images.lock().await.insert(image.to_string());
        Ok(())
    }

    async fn create(&self, spec: CreateSpec) -> anyhow::Result<String> {
        let planned = match &*self.behavior.lock().await {
            Behavior::Reply(reply) => Planned::Exit(reply.clone()),
            Behavior::Script(script) => Planned::Exit(script(&spec)),
            Behavior::Hang { stderr } => Planned::Hang(stderr.clone()),
        };
        self.created.lock().await.push(spec);
        let mut id = self.next_id.lock().await;
        *id += 1;
        let container_id = format!("ctr-{}", *id);
        self.planned.lock().await.insert(container_id.clone(), planned);
        Ok(container_id)
    }

    async fn start(&self, container_id: &str) -> anyhow::Result<()> {
        self.started.lock().await.push(container_id.to_string());
        Ok(())
    }

    async fn attach(&self, container_id: &str) -> anyhow::Result<FrameStream> {
        let planned = self.planned.lock().await;
        match planned.get(container_id) {
            Some(Planned::Exit(reply)) => {
                let bytes = encode(&[
                    (StreamKind::Stderr, reply.stderr.as_str()),
                    (StreamKind::Stdout, reply.stdout.as_str()),
                ]);
                Ok(frames_from_reader(std::io::Cursor::new(bytes)))
            }
            Some(Planned::Hang(stderr)) => {
                let bytes = encode(&[(StreamKind::Stderr, stderr.as_str())]);
                Ok(frames_from_reader(std::io::Cursor::new(bytes))
                    .chain(stream::pending())
                    .boxed())
            }
            None => anyhow::bail!("no such container: {container_id}"),
        }
    }

    async fn wait(&self, container_id: &str) -> anyhow::Result<i64> {
        let exit_code = match self.planned.lock().await.get(container_id) {
            Some(Planned::Exit(reply)) => Some(reply.exit_code),
            Some(Planned::Hang(_)) => None,
            None => anyhow::bail!("no such container: {container_id}"),
        };
        match exit_code {
            Some(code) => Ok(code),
            None => std::future::pending().await,
        }
    }

    async fn kill(&self, container_id: &str) -> anyhow::Result<()> {
        self.killed.lock().await.push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> anyhow::Result<()> {
        self.removed.lock().await.push(container_id.to_string());
        self.planned.lock().await.remove(container_id);
        Ok(())
    }
}
