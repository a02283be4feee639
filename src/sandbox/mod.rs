//! Sandbox runtime abstraction and the pool that manages a population of
//! isolated execution environments.

mod docker;
mod pool;
mod types;

pub use docker::{build_command, parse_ls_output, DockerRuntime, EngineKind};
pub use pool::{Pool, PoolConfig, PoolStats};
pub use types::{
    ExecRequest, ExecResult, FileEntry, Runtime, Sandbox, SandboxConfig, SandboxStatus,
};
