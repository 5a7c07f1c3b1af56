//! 网关服务组装
//!
//! 把存储、孪生同步、注册表、RPC路由和结果入库连接在一起，对外提供控制面操作。

use std::sync::Arc;
use std::time::Duration;

use gateway_domain::{
    MetricsForwarder, RpcRequest, RpcResponse, TaskDefinition, TaskSet, TaskSetStore, TaskUpdate,
    UpdateSummary, ECHO_MODULE,
};
use gateway_errors::GatewayResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::publisher::{StoreSnapshotSource, TaskSetPublisher};
use crate::registry::{MinionRegistry, MinionSummary};
use crate::result_sink::ResultSink;
use crate::rpc::{ResponseFuture, RpcResponseCorrelator, RpcRouter};
use crate::session::SessionManager;
use crate::twin::TwinSynchronizer;

/// 未指定TTL时RPC请求的默认有效期
pub const DEFAULT_RPC_TTL: Duration = Duration::from_secs(30);

pub struct GatewayService {
    publisher: TaskSetPublisher,
    twin: Arc<TwinSynchronizer>,
    registry: Arc<MinionRegistry>,
    correlator: Arc<RpcResponseCorrelator>,
    router: RpcRouter,
    sessions: Arc<SessionManager>,
    default_ttl: Duration,
}

impl GatewayService {
    pub fn new(store: Arc<dyn TaskSetStore>, forwarder: Arc<dyn MetricsForwarder>) -> Self {
        let twin = Arc::new(TwinSynchronizer::with_snapshot_source(Arc::new(
            StoreSnapshotSource::new(Arc::clone(&store)),
        )));
        let registry = Arc::new(MinionRegistry::new());
        let correlator = Arc::new(RpcResponseCorrelator::new());
        registry.add_listener(correlator.clone());

        let result_sink = Arc::new(ResultSink::new(forwarder));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&registry),
            Arc::clone(&twin),
            Arc::clone(&correlator),
            result_sink,
        ));

        Self {
            publisher: TaskSetPublisher::new(store, Arc::clone(&twin)),
            router: RpcRouter::new(Arc::clone(&registry), Arc::clone(&correlator)),
            twin,
            registry,
            correlator,
            sessions,
            default_ttl: DEFAULT_RPC_TTL,
        }
    }

    pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
        self.default_ttl = default_ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn publish_task_set(
        &self,
        tenant_id: &str,
        location: &str,
        task_set: TaskSet,
    ) -> GatewayResult<u64> {
        self.publisher
            .publish_full(tenant_id, location, task_set)
            .await
    }

    pub async fn publish_new_tasks(
        &self,
        tenant_id: &str,
        location: &str,
        tasks: Vec<TaskDefinition>,
    ) -> GatewayResult<u64> {
        self.publisher
            .publish_incremental(tenant_id, location, tasks)
            .await
    }

    pub async fn update_tasks(
        &self,
        tenant_id: &str,
        location: &str,
        updates: &[TaskUpdate],
    ) -> GatewayResult<UpdateSummary> {
        self.publisher
            .update_tasks(tenant_id, location, updates)
            .await
    }

    pub async fn fetch_task_set(
        &self,
        tenant_id: &str,
        location: &str,
    ) -> GatewayResult<Option<TaskSet>> {
        self.publisher.fetch(tenant_id, location).await
    }

    pub fn send_rpc(&self, tenant_id: &str, request: RpcRequest) -> GatewayResult<ResponseFuture> {
        self.router.send(tenant_id, request)
    }

    pub async fn call_rpc(&self, tenant_id: &str, request: RpcRequest) -> GatewayResult<RpcResponse> {
        self.router.call(tenant_id, request).await
    }

    /// 用回显模块检查Minion是否可达，返回回显的内容。`ttl` 为空时使用默认有效期
    pub async fn echo(
        &self,
        tenant_id: &str,
        location: &str,
        system_id: Option<&str>,
        message: &[u8],
        ttl: Option<Duration>,
    ) -> GatewayResult<Vec<u8>> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut request = RpcRequest::new(location, ECHO_MODULE, message.to_vec(), ttl);
        if let Some(system_id) = system_id {
            request = request.with_system_id(system_id);
        }
        Ok(self.router.call(tenant_id, request).await?.payload)
    }

    pub fn connected_minions(&self, tenant_id: &str, location: &str) -> Vec<MinionSummary> {
        self.registry.minions(tenant_id, location)
    }

    pub fn spawn_expiry_sweeper(
        &self,
        interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.correlator).run_sweeper(interval, shutdown_rx))
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    pub fn registry(&self) -> &Arc<MinionRegistry> {
        &self.registry
    }

    pub fn twin(&self) -> &Arc<TwinSynchronizer> {
        &self.twin
    }

    pub fn correlator(&self) -> &Arc<RpcResponseCorrelator> {
        &self.correlator
    }

    pub fn router(&self) -> &RpcRouter {
        &self.router
    }
}
