//! Minion端的孪生状态跟踪
//!
//! 按会话和版本判断每条孪生消息能否应用：完整快照直接替换状态，补丁只在
//! 紧接当前版本时应用，出现版本缺口或跨会话的补丁时要求重新同步。

use gateway_domain::{DecodeError, TaskSet, TwinObject};

/// 可由完整快照和补丁重建的状态
pub trait TwinState: Sized {
    fn from_full(payload: &[u8]) -> Result<Self, DecodeError>;
    fn apply_patch(&mut self, payload: &[u8]) -> Result<(), DecodeError>;
}

impl TwinState for TaskSet {
    fn from_full(payload: &[u8]) -> Result<Self, DecodeError> {
        TaskSet::from_bytes(payload)
    }

    fn apply_patch(&mut self, payload: &[u8]) -> Result<(), DecodeError> {
        let delta = TaskSet::from_bytes(payload)?;
        self.append(&delta.task_definitions);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinApplyOutcome {
    Applied { version: u64 },
    /// 其他键、重复或过时的消息
    Ignored,
    /// 需要向网关请求完整快照
    NeedsResync,
}

pub struct TwinTracker<S> {
    key: String,
    session_id: Option<String>,
    version: Option<u64>,
    state: S,
}

impl<S: TwinState + Default> TwinTracker<S> {
    pub fn new<K: Into<String>>(key: K) -> Self {
        Self {
            key: key.into(),
            session_id: None,
            version: None,
            state: S::default(),
        }
    }
}

impl<S: TwinState> TwinTracker<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// 放弃当前基线，下一条完整快照之前的补丁都会触发重新同步
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.version = None;
    }

    pub fn apply(&mut self, object: &TwinObject) -> Result<TwinApplyOutcome, DecodeError> {
        if object.key != self.key {
            return Ok(TwinApplyOutcome::Ignored);
        }

        let same_session = self.session_id.as_deref() == Some(object.session_id.as_str());

        if !object.is_patch {
            // 重新同步得到的快照与当前版本相同，按新基线接受
            if same_session && self.version.is_some_and(|v| object.version < v) {
                return Ok(TwinApplyOutcome::Ignored);
            }
            self.state = S::from_full(&object.payload)?;
            self.session_id = Some(object.session_id.clone());
            self.version = Some(object.version);
            return Ok(TwinApplyOutcome::Applied {
                version: object.version,
            });
        }

        let current = match self.version {
            Some(current) if same_session => current,
            _ => return Ok(TwinApplyOutcome::NeedsResync),
        };
        if object.version <= current {
            return Ok(TwinApplyOutcome::Ignored);
        }
        if object.version != current + 1 {
            return Ok(TwinApplyOutcome::NeedsResync);
        }

        if let Err(e) = self.state.apply_patch(&object.payload) {
            self.invalidate();
            return Err(e);
        }
        self.version = Some(object.version);
        Ok(TwinApplyOutcome::Applied {
            version: object.version,
        })
    }
}
