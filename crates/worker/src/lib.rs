//! Minion端：连接网关、跟踪任务集、执行RPC模块

pub mod agent;
pub mod client;
pub mod modules;
pub mod runtime;
pub mod twin_tracker;

pub use agent::MinionAgent;
pub use client::{default_system_id, MinionClient, MinionClientConfig};
pub use modules::{EchoModule, ModuleRegistry, RpcModule};
pub use runtime::RuntimeFactory;
pub use twin_tracker::{TwinApplyOutcome, TwinState, TwinTracker};
