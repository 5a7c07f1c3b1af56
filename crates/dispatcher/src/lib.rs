//! 网关控制面：任务集发布、孪生同步、Minion注册与RPC路由

pub mod publisher;
pub mod registry;
pub mod result_sink;
pub mod rpc;
pub mod server;
pub mod service;
pub mod session;
pub mod twin;

pub use publisher::{StoreSnapshotSource, TaskSetPublisher};
pub use registry::{ConnectionId, MinionRegistry, MinionRoute, MinionSummary, RegistryListener};
pub use result_sink::ResultSink;
pub use rpc::{ResponseFuture, RpcResponseCorrelator, RpcRouter};
pub use server::GatewayServer;
pub use service::{GatewayService, DEFAULT_RPC_TTL};
pub use session::{MinionSession, SessionManager, SessionTwinListener};
pub use twin::{SnapshotSource, TwinListener, TwinSynchronizer};
