//! 本地键值存储
//!
//! 对应浏览器 localStorage 的语义：字符串键值、无事务、有容量上限。
//! 会话持久化和背景图缓存都建立在这一层之上。

pub mod file_store;
pub mod memory_store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("存储空间不足: 写入 {key} 需要 {needed} 字节, 配额 {quota} 字节")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },
    #[error("存储文件读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("存储内容序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("存储锁已损坏")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 按 localStorage 的方式计算占用：所有键和值的长度之和
pub(crate) fn used_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// 检查写入后是否超出配额
pub(crate) fn check_quota(
    entries: &BTreeMap<String, String>,
    key: &str,
    value: &str,
    quota: Option<usize>,
) -> Result<(), StorageError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let existing = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let needed = used_bytes(entries) - existing + key.len() + value.len();
    if needed > quota {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            needed,
            quota,
        });
    }
    Ok(())
}
