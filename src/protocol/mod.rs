//! Wire protocol for inter-agent communication.
//!
//! A single JSON-RPC 2.0 POST endpoint per agent carries all skill
//! invocations; discovery cards and task types are shared by the registry,
//! dispatch server, and delegation engine.

pub mod envelope;
pub mod errors;
pub mod types;

pub use envelope::{RpcRequest, RpcResponse};
pub use errors::{is_client_error, is_retryable_error, ErrorCode, RpcError};
pub use types::{
    AgentCapabilities, AgentCard, AgentSkill, TaskRequest, TaskResponse, TaskStatus,
};
