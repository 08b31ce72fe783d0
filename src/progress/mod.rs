//! 进度通道
//!
//! 后端的处理进度有两种获取方式：WebSocket 推送和 REST 轮询。
//! 两者实现同一个 `ProgressSource` 接口，状态机只消费 `ProgressEvent`，
//! 不关心事件来自哪个通道。

pub mod poll;
pub mod push;

pub use poll::PollProgressSource;
pub use push::PushProgressSource;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clients::BatchBackend;
use crate::config::Config;
use crate::error::AppResult;
use crate::models::ProgressEvent;

/// 进度通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Push,
    Poll,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Push => f.write_str("WebSocket 推送"),
            SourceKind::Poll => f.write_str("轮询"),
        }
    }
}

/// 进度来源
///
/// 生命周期：subscribe → next_event（多次）→ unsubscribe → dispose。
/// `next_event` 返回 `Ok(None)` 表示该任务不会再有新的进度。
#[async_trait]
pub trait ProgressSource: Send {
    fn kind(&self) -> SourceKind;

    async fn subscribe(&mut self, job_id: &str) -> AppResult<()>;

    async fn next_event(&mut self) -> AppResult<Option<ProgressEvent>>;

    async fn unsubscribe(&mut self) -> AppResult<()>;

    /// 释放底层连接，之后不可再使用
    async fn dispose(&mut self) -> AppResult<()>;
}

/// 按配置选择进度通道
///
/// 优先尝试 WebSocket，连接失败时退回轮询。
pub async fn connect_progress_source(
    config: &Config,
    backend: Arc<dyn BatchBackend>,
) -> Box<dyn ProgressSource> {
    let interval = Duration::from_millis(config.poll_interval_ms);

    if config.prefer_push && !config.ws_url.is_empty() {
        match PushProgressSource::connect(&config.ws_url).await {
            Ok(source) => {
                info!("📡 已连接进度推送: {}", config.ws_url);
                return Box::new(source);
            }
            Err(e) => warn!("⚠️ 进度推送不可用，改用轮询: {}", e),
        }
    }

    info!("🔁 使用轮询获取进度 (间隔 {}ms)", config.poll_interval_ms);
    Box::new(PollProgressSource::new(backend, interval))
}

/// 任务是否已结束，结束后通道不再产生事件
pub(crate) fn is_final_event(event: &ProgressEvent) -> bool {
    use crate::models::BatchJobStatus;
    matches!(
        event.job_status,
        Some(BatchJobStatus::Completed | BatchJobStatus::Failed | BatchJobStatus::Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::FakeBackend;
    use crate::models::BatchJobStatus;

    #[tokio::test]
    async fn test_falls_back_to_poll_when_push_unreachable() {
        let config = Config {
            // 保留端口，不会有服务监听
            ws_url: "ws://127.0.0.1:9/ws/progress".into(),
            ..Config::default()
        };
        let source = connect_progress_source(&config, Arc::new(FakeBackend::new())).await;
        assert_eq!(source.kind(), SourceKind::Poll);
    }

    #[tokio::test]
    async fn test_poll_when_push_disabled() {
        let config = Config {
            prefer_push: false,
            ..Config::default()
        };
        let source = connect_progress_source(&config, Arc::new(FakeBackend::new())).await;
        assert_eq!(source.kind(), SourceKind::Poll);
    }

    #[test]
    fn test_final_event_detection() {
        assert!(is_final_event(&ProgressEvent::job("1", BatchJobStatus::Completed, 100.0)));
        assert!(is_final_event(&ProgressEvent::job("1", BatchJobStatus::Cancelled, 40.0)));
        assert!(!is_final_event(&ProgressEvent::job("1", BatchJobStatus::Running, 40.0)));
    }
}
