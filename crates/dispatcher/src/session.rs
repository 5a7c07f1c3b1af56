//! Minion会话
//!
//! 一条连接从建立到断开对应一个会话。会话收到Hello之后才算注册成功，
//! 随后订阅该位置的任务集孪生键；之前收到的其他消息一律丢弃。

use std::sync::Arc;

use gateway_domain::{
    GatewayMessage, MinionIdentity, MinionMessage, MinionTransport, TwinObject,
};
use gateway_errors::{DecodeError, GatewayError, GatewayResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{ConnectionId, MinionRegistry};
use crate::result_sink::ResultSink;
use crate::rpc::RpcResponseCorrelator;
use crate::twin::{TwinListener, TwinSynchronizer};

/// 把孪生消息写到Minion连接上
pub struct SessionTwinListener {
    transport: Arc<dyn MinionTransport>,
}

impl SessionTwinListener {
    pub fn new(transport: Arc<dyn MinionTransport>) -> Self {
        Self { transport }
    }
}

impl TwinListener for SessionTwinListener {
    fn deliver(&self, object: TwinObject) -> GatewayResult<()> {
        self.transport.send(GatewayMessage::Twin(object))
    }
}

pub struct MinionSession {
    session_id: String,
    transport: Arc<dyn MinionTransport>,
    registration: Option<(MinionIdentity, ConnectionId)>,
}

impl MinionSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identity(&self) -> Option<&MinionIdentity> {
        self.registration.as_ref().map(|(identity, _)| identity)
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.registration.as_ref().map(|(_, connection_id)| *connection_id)
    }
}

pub struct SessionManager {
    registry: Arc<MinionRegistry>,
    twin: Arc<TwinSynchronizer>,
    correlator: Arc<RpcResponseCorrelator>,
    result_sink: Arc<ResultSink>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<MinionRegistry>,
        twin: Arc<TwinSynchronizer>,
        correlator: Arc<RpcResponseCorrelator>,
        result_sink: Arc<ResultSink>,
    ) -> Self {
        Self {
            registry,
            twin,
            correlator,
            result_sink,
        }
    }

    pub fn open(&self, transport: Arc<dyn MinionTransport>) -> MinionSession {
        let session = MinionSession {
            session_id: Uuid::new_v4().to_string(),
            transport,
            registration: None,
        };
        debug!("打开会话 {}", session.session_id);
        session
    }

    /// 处理一个已解码的帧；解码失败的帧记录后丢弃
    pub async fn handle_frame(
        &self,
        session: &mut MinionSession,
        frame: Result<MinionMessage, DecodeError>,
    ) {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("会话 {} 收到无法解码的消息: {}", session.session_id, e);
                return;
            }
        };

        let message_type = message.message_type_str();
        if let Err(e) = self.handle_message(session, message).await {
            match e {
                GatewayError::StaleOrUnknownResponse { .. } => debug!("{}", e),
                e => warn!(
                    "会话 {} 处理 {} 消息失败: {}",
                    session.session_id, message_type, e
                ),
            }
        }
    }

    pub async fn handle_message(
        &self,
        session: &mut MinionSession,
        message: MinionMessage,
    ) -> GatewayResult<()> {
        let identity = session.identity().cloned();

        match (message, identity) {
            (MinionMessage::Hello(identity), None) => self.on_hello(session, identity).await,
            (MinionMessage::Hello(hello), Some(identity)) => {
                warn!("会话 {} 已注册为 {}，忽略重复的Hello: {}", session.session_id, identity, hello);
                Ok(())
            }
            (message, None) => Err(DecodeError::UnexpectedMessage(
                message.message_type_str().to_string(),
            )
            .into()),
            (MinionMessage::RpcResponse(response), Some(_)) => {
                self.correlator.on_response(response)
            }
            (MinionMessage::TwinRequest { key }, Some(identity)) => {
                if key != identity.tenant_location().twin_key() {
                    return Err(GatewayError::validation_error(format!(
                        "{identity} 无权订阅孪生键 {key}"
                    )));
                }
                let listener = SessionTwinListener::new(Arc::clone(&session.transport));
                self.twin
                    .send_snapshot(&key, &session.session_id, &listener)
                    .await?;
                Ok(())
            }
            (MinionMessage::MonitorResult(result), Some(identity)) => {
                self.result_sink
                    .consume_monitor_result(&identity.tenant_id, &result)
                    .await;
                Ok(())
            }
            (MinionMessage::DetectorResult(result), Some(identity)) => {
                self.result_sink
                    .consume_detector_result(&identity.tenant_id, &result)
                    .await;
                Ok(())
            }
        }
    }

    async fn on_hello(
        &self,
        session: &mut MinionSession,
        identity: MinionIdentity,
    ) -> GatewayResult<()> {
        if let Err(e) = identity.validate() {
            session.transport.close();
            return Err(GatewayError::validation_error(format!(
                "Minion身份无效 {identity}: {e}"
            )));
        }

        let connection_id = self
            .registry
            .register(identity.clone(), Arc::clone(&session.transport));
        session.registration = Some((identity.clone(), connection_id));

        let twin_key = identity.tenant_location().twin_key();
        let listener = Arc::new(SessionTwinListener::new(Arc::clone(&session.transport)));
        if let Err(e) = self
            .twin
            .subscribe(&twin_key, &session.session_id, listener)
            .await
        {
            // 拿不到任务集快照时断开，由Minion重连后重试
            session.transport.close();
            return Err(e);
        }

        info!(
            "Minion {} 建立会话 {}，连接 #{}",
            identity, session.session_id, connection_id
        );
        Ok(())
    }

    /// 会话结束：注销连接并清理孪生订阅
    pub async fn close(&self, session: MinionSession) {
        if let Some((identity, connection_id)) = &session.registration {
            self.registry.deregister_connection(identity, *connection_id);
        }
        self.twin.on_session_invalidated(&session.session_id).await;
        session.transport.close();
        debug!("会话 {} 已关闭", session.session_id);
    }
}
