//! 在线Minion注册表
//!
//! 维护 Minion身份 到当前传输连接的映射，并按租户位置分组。每次注册分配一个
//! 新的连接ID，旧连接被替换或注销时通知监听者，由监听者取消该连接上的挂起请求。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use gateway_domain::{MinionIdentity, MinionTransport, TenantLocationKey};
use tracing::{debug, info, warn};

/// 注册表为每次注册分配的连接ID
pub type ConnectionId = u64;

/// 解析得到的一条可用路由
#[derive(Clone)]
pub struct MinionRoute {
    pub identity: MinionIdentity,
    pub connection_id: ConnectionId,
    pub transport: Arc<dyn MinionTransport>,
}

impl std::fmt::Debug for MinionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinionRoute")
            .field("identity", &self.identity)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// 连接被替换或注销时的回调
pub trait RegistryListener: Send + Sync {
    fn on_connection_closed(&self, identity: &MinionIdentity, connection_id: ConnectionId);
}

/// 一个在线Minion的概要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinionSummary {
    pub identity: MinionIdentity,
    pub connection_id: ConnectionId,
    pub connected_at: DateTime<Utc>,
}

struct RegistryEntry {
    route: MinionRoute,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    minions: HashMap<(String, String), RegistryEntry>,
    by_location: HashMap<TenantLocationKey, Vec<String>>,
}

impl RegistryState {
    fn remove(&mut self, tenant_id: &str, system_id: &str) -> Option<RegistryEntry> {
        let entry = self
            .minions
            .remove(&(tenant_id.to_string(), system_id.to_string()))?;
        let location_key = entry.route.identity.tenant_location();
        if let Some(ids) = self.by_location.get_mut(&location_key) {
            ids.retain(|id| id != system_id);
            if ids.is_empty() {
                self.by_location.remove(&location_key);
            }
        }
        Some(entry)
    }
}

pub struct MinionRegistry {
    state: RwLock<RegistryState>,
    next_connection_id: AtomicU64,
    cursors: Mutex<HashMap<TenantLocationKey, usize>>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
}

impl MinionRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            next_connection_id: AtomicU64::new(1),
            cursors: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn notify_closed(&self, identity: &MinionIdentity, connection_id: ConnectionId) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.on_connection_closed(identity, connection_id);
        }
    }

    /// 位置上已没有Minion时丢弃它的轮询游标
    fn prune_cursor(&self, key: &TenantLocationKey) {
        let occupied = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_location
            .contains_key(key);
        if !occupied {
            self.cursors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key);
        }
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 注册一个Minion连接；同一身份已在线时替换旧连接
    pub fn register(
        &self,
        identity: MinionIdentity,
        transport: Arc<dyn MinionTransport>,
    ) -> ConnectionId {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let route = MinionRoute {
            identity: identity.clone(),
            connection_id,
            transport,
        };

        let replaced = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let replaced = state.remove(&identity.tenant_id, &identity.system_id);
            state
                .by_location
                .entry(identity.tenant_location())
                .or_default()
                .push(identity.system_id.clone());
            state.minions.insert(
                (identity.tenant_id.clone(), identity.system_id.clone()),
                RegistryEntry {
                    route,
                    connected_at: Utc::now(),
                },
            );
            replaced
        };

        match replaced {
            Some(old) => {
                warn!(
                    "Minion {} 重新连接，替换旧连接 #{}",
                    identity, old.route.connection_id
                );
                old.route.transport.close();
                self.notify_closed(&old.route.identity, old.route.connection_id);
                self.prune_cursor(&old.route.identity.tenant_location());
            }
            None => info!("Minion {} 已注册，连接 #{}", identity, connection_id),
        }
        connection_id
    }

    /// 注销一个身份，不论其当前连接是哪一个
    pub fn deregister(&self, identity: &MinionIdentity) -> bool {
        let removed = self
            .state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&identity.tenant_id, &identity.system_id);

        match removed {
            Some(entry) => {
                info!("Minion {} 已注销", entry.route.identity);
                self.notify_closed(&entry.route.identity, entry.route.connection_id);
                self.prune_cursor(&entry.route.identity.tenant_location());
                true
            }
            None => false,
        }
    }

    /// 只有当该身份的当前连接仍是 `connection_id` 时才注销
    ///
    /// 旧连接在被替换之后才断开时不会误删新连接。
    pub fn deregister_connection(
        &self,
        identity: &MinionIdentity,
        connection_id: ConnectionId,
    ) -> bool {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let current = state
                .minions
                .get(&(identity.tenant_id.clone(), identity.system_id.clone()))
                .map(|entry| entry.route.connection_id);
            if current != Some(connection_id) {
                None
            } else {
                state.remove(&identity.tenant_id, &identity.system_id)
            }
        };

        match removed {
            Some(entry) => {
                info!("Minion {} 断开连接 #{}", identity, connection_id);
                self.notify_closed(&entry.route.identity, connection_id);
                self.prune_cursor(&entry.route.identity.tenant_location());
                true
            }
            None => {
                debug!("连接 #{} 已不是 {} 的当前连接", connection_id, identity);
                false
            }
        }
    }

    /// 该身份的当前连接是否仍是 `connection_id`
    pub fn is_current(&self, identity: &MinionIdentity, connection_id: ConnectionId) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .minions
            .get(&(identity.tenant_id.clone(), identity.system_id.clone()))
            .is_some_and(|entry| entry.route.connection_id == connection_id)
    }

    /// 某个位置上所有可用的连接
    pub fn resolve(&self, tenant_id: &str, location: &str) -> Vec<MinionRoute> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let key = TenantLocationKey::new(tenant_id, location);
        state
            .by_location
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|system_id| {
                state
                    .minions
                    .get(&(tenant_id.to_string(), system_id.clone()))
            })
            .filter(|entry| entry.route.transport.is_open())
            .map(|entry| entry.route.clone())
            .collect()
    }

    /// 指定位置上的指定Minion
    pub fn resolve_system(
        &self,
        tenant_id: &str,
        location: &str,
        system_id: &str,
    ) -> Option<MinionRoute> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .minions
            .get(&(tenant_id.to_string(), system_id.to_string()))
            .filter(|entry| entry.route.identity.location == location)
            .filter(|entry| entry.route.transport.is_open())
            .map(|entry| entry.route.clone())
    }

    /// 在位置内轮询选择一个连接
    pub fn pick(&self, tenant_id: &str, location: &str) -> Option<MinionRoute> {
        let mut routes = self.resolve(tenant_id, location);
        if routes.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = cursors
            .entry(TenantLocationKey::new(tenant_id, location))
            .or_insert(0);
        let index = *cursor % routes.len();
        *cursor = cursor.wrapping_add(1);
        Some(routes.swap_remove(index))
    }

    pub fn minions(&self, tenant_id: &str, location: &str) -> Vec<MinionSummary> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<MinionSummary> = state
            .minions
            .values()
            .filter(|entry| {
                entry.route.identity.tenant_id == tenant_id
                    && entry.route.identity.location == location
            })
            .map(|entry| MinionSummary {
                identity: entry.route.identity.clone(),
                connection_id: entry.route.connection_id,
                connected_at: entry.connected_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.identity.system_id.cmp(&b.identity.system_id));
        summaries
    }

    pub fn is_registered(&self, identity: &MinionIdentity) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .minions
            .contains_key(&(identity.tenant_id.clone(), identity.system_id.clone()))
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .minions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MinionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
