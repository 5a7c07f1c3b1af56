//! RPC路由
//!
//! 按目标解析连接、登记挂起请求、把请求写到连接上。返回的 [`ResponseFuture`]
//! 在响应、超时、连接断开三者之一发生时结束；调用方丢弃它会同时移除挂起条目。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use gateway_domain::{request_metadata, GatewayMessage, MinionIdentity, RpcRequest, RpcResponse};
use gateway_errors::{GatewayError, GatewayResult};
use metrics::counter;
use tokio::time::{Instant, Sleep};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::correlator::{ResponseReceiver, RpcResponseCorrelator};
use crate::registry::{MinionRegistry, MinionRoute};

pub struct RpcRouter {
    registry: Arc<MinionRegistry>,
    correlator: Arc<RpcResponseCorrelator>,
}

impl RpcRouter {
    pub fn new(registry: Arc<MinionRegistry>, correlator: Arc<RpcResponseCorrelator>) -> Self {
        Self {
            registry,
            correlator,
        }
    }

    /// 把请求发往目标Minion
    ///
    /// 指定了 system_id 时只发给该Minion，否则在位置内轮询选择一个。
    /// 没有可用连接时立即返回 `NoRouteAvailable`，请求不会进入挂起表。
    #[instrument(skip(self, request), fields(request_id = %request.id, location = %request.location, module = %request.module))]
    pub fn send(&self, tenant_id: &str, request: RpcRequest) -> GatewayResult<ResponseFuture> {
        let route = match &request.system_id {
            Some(system_id) => {
                self.registry
                    .resolve_system(tenant_id, &request.location, system_id)
            }
            None => self.registry.pick(tenant_id, &request.location),
        };
        let Some(route) = route else {
            counter!("gateway_rpc_requests_total", "outcome" => "no_route").increment(1);
            return Err(GatewayError::no_route(
                request.location.clone(),
                request.system_id.clone(),
            ));
        };
        self.dispatch(tenant_id, route, request)
    }

    /// 把请求发给位置内的每一个在线Minion，每个目标使用独立的请求ID
    pub fn fan_out(
        &self,
        tenant_id: &str,
        request: RpcRequest,
    ) -> GatewayResult<Vec<(MinionIdentity, GatewayResult<ResponseFuture>)>> {
        let routes = self.registry.resolve(tenant_id, &request.location);
        if routes.is_empty() {
            counter!("gateway_rpc_requests_total", "outcome" => "no_route").increment(1);
            return Err(GatewayError::no_route(request.location.clone(), None));
        }

        Ok(routes
            .into_iter()
            .map(|route| {
                let mut targeted = request.clone().with_system_id(route.identity.system_id.clone());
                targeted.id = Uuid::new_v4();
                let identity = route.identity.clone();
                (identity, self.dispatch(tenant_id, route, targeted))
            })
            .collect())
    }

    /// 发送请求并等待结果
    pub async fn call(&self, tenant_id: &str, request: RpcRequest) -> GatewayResult<RpcResponse> {
        self.send(tenant_id, request)?.await
    }

    fn dispatch(
        &self,
        tenant_id: &str,
        route: MinionRoute,
        request: RpcRequest,
    ) -> GatewayResult<ResponseFuture> {
        let request_id = request.id;
        let now = Utc::now();
        if request.is_expired_at(now) {
            counter!("gateway_rpc_requests_total", "outcome" => "expired").increment(1);
            return Err(GatewayError::RequestTimedOut { request_id });
        }

        // 墙钟过期时间只在这里换算一次，之后都用单调时钟
        let deadline = Instant::now() + request.remaining_ttl(now);
        let receiver = self.correlator.register(
            request_id,
            route.identity.clone(),
            route.connection_id,
            deadline,
        )?;

        // 解析之后连接可能已被注销或替换，那时的取消通知看不到刚登记的条目
        if !self.registry.is_current(&route.identity, route.connection_id) {
            self.correlator.remove(&request_id);
            counter!("gateway_rpc_requests_total", "outcome" => "disconnected").increment(1);
            return Err(GatewayError::MinionDisconnected {
                request_id,
                system_id: route.identity.system_id,
            });
        }

        let message = GatewayMessage::RpcRequest {
            metadata: request_metadata(tenant_id, &request.location),
            request,
        };
        if let Err(e) = route.transport.send(message) {
            self.correlator.remove(&request_id);
            warn!("RPC请求 {} 写入连接失败: {}", request_id, e);
            counter!("gateway_rpc_requests_total", "outcome" => "send_failed").increment(1);
            return Err(GatewayError::MinionDisconnected {
                request_id,
                system_id: route.identity.system_id,
            });
        }

        debug!("RPC请求 {} 已发往 {}", request_id, route.identity);
        counter!("gateway_rpc_requests_total", "outcome" => "sent").increment(1);
        Ok(ResponseFuture {
            request_id,
            receiver,
            timer: Box::pin(tokio::time::sleep_until(deadline)),
            correlator: Arc::clone(&self.correlator),
            timer_fired: false,
            settled: false,
        })
    }
}

/// 一次RPC调用的结果
pub struct ResponseFuture {
    request_id: Uuid,
    receiver: ResponseReceiver,
    timer: Pin<Box<Sleep>>,
    correlator: Arc<RpcResponseCorrelator>,
    timer_fired: bool,
    settled: bool,
}

impl ResponseFuture {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Future for ResponseFuture {
    type Output = GatewayResult<RpcResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if !this.timer_fired && this.timer.as_mut().poll(cx).is_ready() {
            this.timer_fired = true;
            // 条目已被其他路径取走时，结果随后会写入接收端
            this.correlator.time_out(&this.request_id);
        }

        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                Poll::Ready(result.unwrap_or_else(|_| {
                    Err(GatewayError::Internal(format!(
                        "RPC请求 {} 的完成通道已关闭",
                        this.request_id
                    )))
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        if !self.settled && self.correlator.remove(&self.request_id) {
            debug!("调用方放弃RPC请求 {}", self.request_id);
        }
    }
}
