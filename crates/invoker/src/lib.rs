pub mod code;
pub mod demux;
pub mod docker;
pub mod environment;
pub mod images;
pub mod session;

pub use code::{CodeMount, TASK_ROOT};
pub use demux::{frames_from_reader, AttachCodec, Demultiplexer, OutputFrame, StreamKind};
pub use docker::{ContainerRuntime, CreateSpec, DockerRuntime, FrameStream};
pub use environment::{assemble_environment, EnvironmentOverrides};
pub use images::{debug_entrypoint, RuntimeImages};
pub use session::{
    DebugOptions, InvocationOutcome, InvocationResult, InvokerOptions, LocalInvoker, SessionState,
};
