//! 背景图本地缓存
//!
//! 只缓存一张背景图（data URI）和它的透明度，24 小时后失效。
//! 较大的图片在写入前先缩小并重新压缩为 JPEG；存储空间不足时
//! 只保留在内存中，本次运行内仍然可用。

use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, FileError};
use crate::storage::{KeyValueStore, StorageError};

pub const CACHE_KEY: &str = "background.cache";
/// 缓存有效期（小时）
pub const CACHE_TTL_HOURS: i64 = 24;
/// 超过该长度（data URI 字符数）的图片写入前压缩
pub const COMPRESS_THRESHOLD: usize = 500 * 1024;
/// 压缩后的最长边
pub const MAX_DIMENSION: u32 = 1920;
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub original_size: usize,
    pub compressed_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedBackground {
    pub image: String,
    pub opacity: f32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
}

impl CachedBackground {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp >= Duration::hours(CACHE_TTL_HOURS)
    }
}

/// 写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    /// 已写入本地存储
    Persisted,
    /// 存储空间不足，仅保留在内存中
    MemoryOnly,
}

pub struct BackgroundCache {
    store: Arc<dyn KeyValueStore>,
    memory: Mutex<Option<CachedBackground>>,
    threshold: usize,
}

impl BackgroundCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_threshold(store, COMPRESS_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<dyn KeyValueStore>, threshold: usize) -> Self {
        Self {
            store,
            memory: Mutex::new(None),
            threshold,
        }
    }

    /// 读取缓存，过期的条目会被删除
    pub fn get(&self) -> Option<CachedBackground> {
        self.get_at(Utc::now())
    }

    pub(crate) fn get_at(&self, now: DateTime<Utc>) -> Option<CachedBackground> {
        if let Ok(mut memory) = self.memory.lock() {
            match memory.as_ref() {
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
                Some(_) => *memory = None,
                None => {}
            }
        }

        let raw = self.store.get(CACHE_KEY)?;
        match serde_json::from_str::<CachedBackground>(&raw) {
            Ok(entry) if !entry.is_expired_at(now) => Some(entry),
            Ok(_) => {
                debug!("背景图缓存已过期，删除");
                self.purge();
                None
            }
            Err(e) => {
                warn!("⚠️ 背景图缓存内容无法解析，删除: {}", e);
                self.purge();
                None
            }
        }
    }

    /// 写入背景图
    ///
    /// `skip_compression` 用于后端已经处理过的图片。
    pub async fn set(
        &self,
        image: String,
        opacity: f32,
        skip_compression: bool,
    ) -> AppResult<CacheWrite> {
        let (image, compression) = if !skip_compression && image.len() > self.threshold {
            match compress_data_uri(image.clone()).await {
                Ok((compressed, info)) => (compressed, info),
                Err(e) => {
                    warn!("⚠️ 背景图压缩失败，按原图缓存: {}", e);
                    (image, None)
                }
            }
        } else {
            (image, None)
        };

        let entry = CachedBackground {
            image,
            opacity: opacity.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            compression,
        };
        let raw = serde_json::to_string(&entry)?;

        if let Ok(mut memory) = self.memory.lock() {
            *memory = Some(entry);
        }

        match self.store.set(CACHE_KEY, &raw) {
            Ok(()) => Ok(CacheWrite::Persisted),
            Err(StorageError::QuotaExceeded { needed, quota, .. }) => {
                warn!(
                    "⚠️ 本地存储空间不足 ({} > {} 字节)，背景图仅在本次运行有效",
                    needed, quota
                );
                // 旧的背景图已被替换，不应在下次启动时再出现
                self.purge();
                Ok(CacheWrite::MemoryOnly)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 清除缓存
    pub fn clear(&self) -> AppResult<()> {
        if let Ok(mut memory) = self.memory.lock() {
            *memory = None;
        }
        self.store.remove(CACHE_KEY)?;
        Ok(())
    }

    fn purge(&self) {
        if let Err(e) = self.store.remove(CACHE_KEY) {
            warn!("⚠️ 删除背景图缓存失败: {}", e);
        }
    }
}

/// 拆分 `data:<mime>;base64,<payload>`
fn split_data_uri(data_uri: &str) -> AppResult<(&str, &str)> {
    data_uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .ok_or(AppError::File(FileError::InvalidDataUri))
}

/// 缩小并重新编码为 JPEG
///
/// 压缩后反而更大时返回原图，压缩信息为 `None`。
pub async fn compress_data_uri(
    data_uri: String,
) -> AppResult<(String, Option<CompressionInfo>)> {
    tokio::task::spawn_blocking(move || compress_blocking(data_uri))
        .await
        .map_err(|e| AppError::Other(format!("图片压缩任务异常: {}", e)))?
}

fn compress_blocking(data_uri: String) -> AppResult<(String, Option<CompressionInfo>)> {
    let (_, payload) = split_data_uri(&data_uri)?;
    let bytes = STANDARD.decode(payload)?;
    let img = image::load_from_memory(&bytes)?;

    let img = if img.width() > MAX_DIMENSION || img.height() > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        img
    };

    let mut encoded = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
        encoder.encode_image(&img.to_rgb8())?;
    }

    let compressed = format!("data:image/jpeg;base64,{}", STANDARD.encode(&encoded));
    if compressed.len() >= data_uri.len() {
        return Ok((data_uri, None));
    }

    let info = CompressionInfo {
        original_size: data_uri.len(),
        compressed_size: compressed.len(),
    };
    info!(
        "🗜️ 背景图已压缩: {} → {} 字节 ({}x{})",
        info.original_size,
        info.compressed_size,
        img.width(),
        img.height()
    );
    Ok((compressed, Some(info)))
}
