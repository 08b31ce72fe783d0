//! 会话持久化
//!
//! 记住"哪个批处理任务正在进行"，进程重启后可以回到原来的位置。
//! 只在本机有效，不跨设备。
//!
//! 存储约定：
//! - 任务创建成功：写入任务 ID、标签页、处理模式，并清除完成标记
//! - 标记完成：写入完成标记，清除其余字段，之后不再自动恢复
//! - 恢复失败：全部清除，从上传界面重新开始

use std::sync::Arc;

use tracing::debug;

use crate::models::{ActiveTab, ProcessingMode};
use crate::storage::{KeyValueStore, StorageError};

pub const KEY_LAST_JOB_ID: &str = "batch.last_job_id";
pub const KEY_LAST_TAB: &str = "batch.last_tab";
pub const KEY_LAST_MODE: &str = "batch.last_mode";
pub const KEY_COMPLETED: &str = "batch.completed";

/// 持久化的会话焦点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub job_id: String,
    pub tab: ActiveTab,
    pub mode: ProcessingMode,
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 任务创建成功后调用
    pub fn remember_job(
        &self,
        job_id: &str,
        tab: ActiveTab,
        mode: ProcessingMode,
    ) -> Result<(), StorageError> {
        debug!("记住批处理任务 {} (tab={}, mode={})", job_id, tab.as_str(), mode);
        self.store.set(KEY_LAST_JOB_ID, job_id)?;
        self.store.set(KEY_LAST_TAB, tab.as_str())?;
        self.store.set(KEY_LAST_MODE, mode.as_str())?;
        self.store.remove(KEY_COMPLETED)?;
        Ok(())
    }

    /// 读取可恢复的会话；已标记完成或没有任务 ID 时返回 None
    pub fn load(&self) -> Option<PersistedSession> {
        if self.is_marked_completed() {
            return None;
        }
        let job_id = self.store.get(KEY_LAST_JOB_ID)?;
        if job_id.trim().is_empty() {
            return None;
        }
        let tab = self
            .store
            .get(KEY_LAST_TAB)
            .and_then(|v| ActiveTab::parse(&v))
            .unwrap_or_default();
        let mode = self
            .store
            .get(KEY_LAST_MODE)
            .and_then(|v| ProcessingMode::parse(&v))
            .unwrap_or_default();
        Some(PersistedSession { job_id, tab, mode })
    }

    pub fn is_marked_completed(&self) -> bool {
        self.store.get(KEY_COMPLETED).as_deref() == Some("true")
    }

    /// 操作员标记任务完成
    pub fn mark_done(&self) -> Result<(), StorageError> {
        self.store.set(KEY_COMPLETED, "true")?;
        self.clear_focus()
    }

    /// 丢弃全部持久化状态
    pub fn clear(&self) -> Result<(), StorageError> {
        self.clear_focus()?;
        self.store.remove(KEY_COMPLETED)
    }

    fn clear_focus(&self) -> Result<(), StorageError> {
        self.store.remove(KEY_LAST_JOB_ID)?;
        self.store.remove(KEY_LAST_TAB)?;
        self.store.remove(KEY_LAST_MODE)
    }

    /// 更新标签页；没有进行中的任务时不写入，返回 false
    pub fn set_tab(&self, tab: ActiveTab) -> Result<bool, StorageError> {
        if self.load().is_none() {
            return Ok(false);
        }
        self.store.set(KEY_LAST_TAB, tab.as_str())?;
        Ok(true)
    }

    pub fn set_mode(&self, mode: ProcessingMode) -> Result<bool, StorageError> {
        if self.load().is_none() {
            return Ok(false);
        }
        self.store.set(KEY_LAST_MODE, mode.as_str())?;
        Ok(true)
    }
}
