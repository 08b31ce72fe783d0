//! 启动时恢复上次的批处理会话
//!
//! 流程：
//! 1. 本地没有记录（或已标记完成）→ 从上传界面开始
//! 2. 向后端查询记录的任务
//!    - 任务不存在 / 已完成 → 清除本地记录，从头开始
//!    - 任务进行中 → 按记录的标签页和模式恢复
//!    - 网络抖动或 5xx → 按策略重试，仍失败则清除本地记录
//!
//! 恢复过程只读不写后端，重复调用不会创建任务。

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::clients::BatchBackend;
use crate::error::AppResult;
use crate::models::{ActiveTab, BatchFileItem, BatchJob, BatchJobStatus, ProcessingMode};
use crate::session::persistence::{PersistedSession, SessionStore};

/// 恢复时遇到临时性错误的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RestorePolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// 不恢复的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshReason {
    NothingPersisted,
    MarkedDone,
    JobMissing,
    JobCompleted,
    FetchFailed(String),
}

#[derive(Debug, Clone)]
pub enum RestoreOutcome {
    Resume {
        job: BatchJob,
        files: Vec<BatchFileItem>,
        tab: ActiveTab,
        mode: ProcessingMode,
    },
    Fresh(FreshReason),
}

impl RestoreOutcome {
    pub fn is_resume(&self) -> bool {
        matches!(self, RestoreOutcome::Resume { .. })
    }
}

/// 尝试恢复上次的会话
pub async fn restore(
    sessions: &SessionStore,
    backend: &dyn BatchBackend,
    policy: RestorePolicy,
) -> AppResult<RestoreOutcome> {
    let Some(persisted) = sessions.load() else {
        let reason = if sessions.is_marked_completed() {
            FreshReason::MarkedDone
        } else {
            FreshReason::NothingPersisted
        };
        return Ok(RestoreOutcome::Fresh(reason));
    };

    info!("🔄 发现未完成的批处理任务 {}，正在恢复...", persisted.job_id);

    let mut attempt = 0;
    loop {
        match fetch_job(backend, &persisted).await {
            Ok(Some((job, _))) if job.status == BatchJobStatus::Completed => {
                info!("任务 {} 已完成，不再恢复", job.id);
                sessions.clear()?;
                return Ok(RestoreOutcome::Fresh(FreshReason::JobCompleted));
            }
            Ok(Some((job, files))) => {
                info!(
                    "✓ 已恢复任务 {} ({}), 标签页 {}, 模式 {}",
                    job.id,
                    job.name,
                    persisted.tab.as_str(),
                    persisted.mode
                );
                return Ok(RestoreOutcome::Resume {
                    job,
                    files,
                    tab: persisted.tab,
                    mode: persisted.mode,
                });
            }
            Ok(None) => {
                warn!("⚠️ 任务 {} 在后端不存在，清除本地记录", persisted.job_id);
                sessions.clear()?;
                return Ok(RestoreOutcome::Fresh(FreshReason::JobMissing));
            }
            Err(e) if e.is_transient() && attempt < policy.retries => {
                attempt += 1;
                warn!(
                    "⚠️ 查询任务失败 (尝试 {}/{}): {}，{:?} 后重试",
                    attempt,
                    policy.retries + 1,
                    e,
                    policy.delay
                );
                sleep(policy.delay).await;
            }
            Err(e) => {
                warn!("⚠️ 无法恢复任务 {}: {}，清除本地记录", persisted.job_id, e);
                sessions.clear()?;
                return Ok(RestoreOutcome::Fresh(FreshReason::FetchFailed(e.to_string())));
            }
        }
    }
}

async fn fetch_job(
    backend: &dyn BatchBackend,
    persisted: &PersistedSession,
) -> AppResult<Option<(BatchJob, Vec<BatchFileItem>)>> {
    let Some(job) = backend.get_batch_job(&persisted.job_id).await? else {
        return Ok(None);
    };
    if job.status == BatchJobStatus::Completed {
        return Ok(Some((job, Vec::new())));
    }
    let files = backend.list_batch_files(&job.id).await?;
    Ok(Some((job, files)))
}
