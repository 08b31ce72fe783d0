//! 单个批处理任务处理器 - 编排层
//!
//! ## 职责
//!
//! 处理一个任务中的所有文件，是任务级别的编排器。
//!
//! ## 两种驱动方式
//!
//! 1. **客户端驱动**（`auto_start = false`）：按顺序对每个未完成的文件调用 OCR，
//!    包括上次运行中断时停在 processing 的文件
//! 2. **服务端驱动**（`auto_start = true`）：后端自行处理，本地只通过
//!    `ProgressSource` 跟随进度并合并到状态机。推送通道中途断开时改用轮询
//!
//! 自动模式下，文件识别完成后立即确认结果并生成报告。
//! 两种方式都会响应暂停标记；只有全部文件进入终态才返回 `Finished`。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clients::BatchBackend;
use crate::config::Config;
use crate::models::{FileStatus, ProcessingMode, ReportStatus};
use crate::progress::{PollProgressSource, ProgressSource, SourceKind};
use crate::workflow::{BatchSession, FileFlow, ProcessResult};

/// 等待进度时检查暂停标记的间隔
const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// 任务处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobStats {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub reports: usize,
}

impl JobStats {
    /// 从当前会话统计
    pub fn from_session(session: &BatchSession) -> Self {
        let mut stats = JobStats::default();
        for file in session.files() {
            match file.status {
                FileStatus::Completed => stats.completed += 1,
                FileStatus::Failed => stats.failed += 1,
                FileStatus::Skipped => stats.skipped += 1,
                FileStatus::Pending | FileStatus::Processing => stats.pending += 1,
            }
        }
        stats.reports = session
            .reports()
            .filter(|r| r.status == ReportStatus::Generated)
            .count();
        stats
    }
}

/// 一次运行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 所有文件都已处于终态
    Finished(JobStats),
    /// 操作员暂停
    Paused(JobStats),
    /// 进度通道提前结束，任务仍未完成
    Interrupted(JobStats),
    /// 当前没有任务
    Idle,
}

/// 跟随进度时的重试与轮询参数
#[derive(Debug, Clone, Copy)]
pub struct FollowPolicy {
    /// 连续临时错误的最大重试次数
    pub retries: u32,
    pub retry_delay: Duration,
    /// 推送断开后改用轮询的间隔
    pub poll_interval: Duration,
}

impl FollowPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.max_file_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

fn pause_requested(session: &mut BatchSession, pause: &AtomicBool) -> bool {
    if pause.load(Ordering::SeqCst) {
        session.pause();
        info!("⏸️ 已暂停任务 {}", session.job().id);
        return true;
    }
    false
}

/// 等到暂停标记被置位
async fn pause_signal(pause: &AtomicBool) {
    while !pause.load(Ordering::SeqCst) {
        sleep(PAUSE_CHECK_INTERVAL).await;
    }
}

fn settle(session: &BatchSession) -> RunOutcome {
    let stats = JobStats::from_session(session);
    if session.is_finished() {
        RunOutcome::Finished(stats)
    } else {
        RunOutcome::Interrupted(stats)
    }
}

/// 客户端驱动：依次识别所有未完成的文件
pub async fn process_locally(
    flow: &FileFlow,
    session: &mut BatchSession,
    pause: &AtomicBool,
) -> Result<RunOutcome> {
    while let Some(index) = session.next_unfinished() {
        if pause_requested(session, pause) {
            return Ok(RunOutcome::Paused(JobStats::from_session(session)));
        }

        session.go_to(index)?;
        info!("\n{}", "─".repeat(30));
        info!(
            "处理第 {}/{} 个文件: {}",
            index + 1,
            session.total_files(),
            session.current_file().filename
        );

        match flow.run_ocr(session, index).await {
            Ok(ProcessResult::Completed) if session.mode() == ProcessingMode::Auto => {
                flow.generate_report(session, index, None)
                    .await
                    .with_context(|| format!("生成报告失败: 文件 {}", index + 1))?;
            }
            Ok(_) => {}
            Err(e) => {
                // 状态机拒绝的流转说明本地状态已不可信，停止本次运行
                error!("文件 {} 处理失败: {}", index + 1, e);
                return Err(e);
            }
        }
    }

    Ok(settle(session))
}

/// 服务端驱动：跟随进度通道直到任务结束
///
/// 临时错误按 `policy` 重试；通道结束但仍有文件未完成时返回 `Interrupted`。
pub async fn follow_progress(
    source: &mut dyn ProgressSource,
    flow: &FileFlow,
    session: &mut BatchSession,
    pause: &AtomicBool,
    policy: &FollowPolicy,
) -> Result<RunOutcome> {
    let job_id = session.job().id.clone();
    source
        .subscribe(&job_id)
        .await
        .with_context(|| format!("无法订阅任务 {} 的进度", job_id))?;
    info!("📡 通过{}跟随任务 {} 的进度", source.kind(), job_id);

    let mut failures = 0;
    let outcome = loop {
        if pause_requested(session, pause) {
            break RunOutcome::Paused(JobStats::from_session(session));
        }
        if session.is_finished() {
            break RunOutcome::Finished(JobStats::from_session(session));
        }

        let next = tokio::select! {
            next = source.next_event() => next,
            _ = pause_signal(pause) => continue,
        };

        let event = match next {
            Ok(Some(event)) => {
                failures = 0;
                event
            }
            Ok(None) => {
                if !session.is_finished() {
                    warn!("⚠️ 进度通道已结束，但任务 {} 仍有文件未处理", job_id);
                }
                break settle(session);
            }
            Err(e) if e.is_transient() && failures < policy.retries => {
                failures += 1;
                warn!(
                    "⚠️ 获取进度失败 (尝试 {}/{}): {}，稍后重试",
                    failures,
                    policy.retries + 1,
                    e
                );
                sleep(policy.retry_delay).await;
                continue;
            }
            Err(e) => {
                error!("❌ 获取任务 {} 的进度失败: {}", job_id, e);
                return Err(e.into());
            }
        };

        if !session.apply_progress(&event) {
            continue;
        }
        if let Some(p) = event.progress_percentage {
            info!("📊 任务 {} 进度 {:.0}%", job_id, p);
        }

        if session.mode() == ProcessingMode::Auto {
            generate_missing_reports(flow, session).await?;
        }
    };

    if let Err(e) = source.unsubscribe().await {
        warn!("⚠️ 取消订阅失败: {}", e);
    }
    Ok(outcome)
}

/// 跟随进度，推送通道中途断开时改用轮询继续
///
/// 结束时释放用过的所有通道。
pub async fn follow_with_fallback(
    mut source: Box<dyn ProgressSource>,
    backend: Arc<dyn BatchBackend>,
    flow: &FileFlow,
    session: &mut BatchSession,
    pause: &AtomicBool,
    policy: &FollowPolicy,
) -> Result<RunOutcome> {
    let mut result = follow_progress(source.as_mut(), flow, session, pause, policy).await;

    if matches!(result, Ok(RunOutcome::Interrupted(_))) && source.kind() == SourceKind::Push {
        warn!("⚠️ 推送通道中断，改用轮询继续跟随任务 {}", session.job().id);
        dispose(source.as_mut()).await;
        source = Box::new(PollProgressSource::new(backend, policy.poll_interval));
        result = follow_progress(source.as_mut(), flow, session, pause, policy).await;
    }

    dispose(source.as_mut()).await;
    result
}

async fn dispose(source: &mut dyn ProgressSource) {
    if let Err(e) = source.dispose().await {
        warn!("⚠️ 关闭进度通道失败: {}", e);
    }
}

/// 为已识别完成但尚未创建报告的文件生成报告
async fn generate_missing_reports(flow: &FileFlow, session: &mut BatchSession) -> Result<()> {
    let ready: Vec<usize> = session
        .files()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.status == FileStatus::Completed && f.ocr_result.is_some())
        .map(|(i, _)| i)
        .filter(|i| session.report(*i).is_none())
        .collect();

    for index in ready {
        flow.generate_report(session, index, None).await?;
    }
    Ok(())
}
