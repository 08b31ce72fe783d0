//! 文件处理流程 - 流程层
//!
//! 核心职责：定义"一张照片"的完整处理流程
//!
//! 流程顺序：
//! 1. pending → processing
//! 2. 调用后端 OCR（临时错误按配置重试）
//! 3. 成功 → completed；失败 → failed 并写入失败记录
//! 4. 自动模式下：确认 OCR 结果 → 生成报告 →（可选）下载报告

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clients::BatchBackend;
use crate::config::Config;
use crate::error::AppError;
use crate::models::{FileStatus, ReportFormat};
use crate::services::FailureLog;
use crate::utils::logging::truncate_text;
use crate::workflow::batch_session::BatchSession;
use crate::workflow::file_ctx::FileCtx;

/// 文件处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// OCR 成功
    Completed,
    /// OCR 失败
    Failed,
}

/// 文件处理流程
///
/// - 编排单个文件的 OCR 与报告生成
/// - 只通过 `BatchSession` 修改文件状态
/// - 只依赖后端能力（BatchBackend）
pub struct FileFlow {
    backend: Arc<dyn BatchBackend>,
    failure_log: FailureLog,
    report_format: ReportFormat,
    report_output_dir: Option<PathBuf>,
    max_retries: u32,
    retry_delay: Duration,
    verbose_logging: bool,
}

impl FileFlow {
    /// 创建新的文件处理流程
    pub fn new(config: &Config, backend: Arc<dyn BatchBackend>) -> Self {
        Self {
            backend,
            failure_log: FailureLog::with_path(&config.failure_log_file),
            report_format: config.report_format,
            report_output_dir: (!config.report_output_dir.is_empty())
                .then(|| PathBuf::from(&config.report_output_dir)),
            max_retries: config.max_file_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            verbose_logging: config.verbose_logging,
        }
    }

    fn ctx(session: &BatchSession, index: usize) -> Result<FileCtx> {
        let file = session.file(index)?;
        Ok(FileCtx::new(
            session.job().id.clone(),
            index + 1,
            session.total_files(),
            file.filename.clone(),
        ))
    }

    /// 对单个文件执行 OCR
    pub async fn run_ocr(&self, session: &mut BatchSession, index: usize) -> Result<ProcessResult> {
        let ctx = Self::ctx(session, index)?;
        let file_id = session.file(index)?.id.clone();
        let settings = session.job().settings.clone();

        if session.file(index)?.status == FileStatus::Processing {
            // 上次运行在识别途中退出，结果未知，重新识别
            info!("{} 🔁 继续识别上次中断的文件...", ctx);
        } else {
            session.begin_processing(index)?;
            info!("{} 🔍 正在识别...", ctx);
        }

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.backend.run_file_ocr(&file_id, &settings).await {
                Ok(ocr) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    let warnings = ocr.validate();
                    if warnings.is_empty() {
                        info!("{} ✓ 识别完成 ({:.1}s)", ctx, elapsed);
                    } else {
                        warn!(
                            "{} ⚠️ 识别完成，有 {} 个字段需要复核 ({:.1}s)",
                            ctx,
                            warnings.len(),
                            elapsed
                        );
                        for w in &warnings {
                            warn!("{}   - {}: {}", ctx, w.field, w.message);
                        }
                    }
                    if self.verbose_logging {
                        if let Some(raw) = &ocr.raw_text {
                            info!("{} 原文: {}", ctx, truncate_text(raw, 80));
                        }
                    }
                    session.complete(index, ocr, Some(elapsed))?;
                    return Ok(ProcessResult::Completed);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} ⚠️ 识别失败 (尝试 {}/{}): {}，稍后重试",
                        ctx,
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!("{} ❌ 识别失败: {}", ctx, e);
                    let reason = e.to_string();
                    session.fail(index, reason.clone())?;
                    self.record_failure(&ctx, "OCR", &reason).await;
                    return Ok(ProcessResult::Failed);
                }
            }
        }
    }

    /// 确认 OCR 结果并生成报告，返回是否生成成功
    ///
    /// `edited_fields` 为操作员修改后的表单；为空时直接使用识别结果。
    pub async fn generate_report(
        &self,
        session: &mut BatchSession,
        index: usize,
        edited_fields: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<bool> {
        let ctx = Self::ctx(session, index)?;
        if session.file(index)?.status != FileStatus::Completed {
            warn!("{} ⚠️ 文件未识别完成，跳过报告生成", ctx);
            return Ok(false);
        }

        let title = report_title(&session.job().name, &ctx.filename);
        let report = session.confirm_ocr(index, title, edited_fields)?.clone();

        info!("{} 📄 正在生成报告: {}", ctx, report.title);
        match self.backend.generate_report(&report, self.report_format).await {
            Ok(url) => {
                session.mark_report_generated(index, &url)?;
                info!("{} ✓ 报告已生成: {}", ctx, url);
                if let Some(dir) = &self.report_output_dir {
                    if let Err(e) = self.download(&url, dir, &report.title).await {
                        warn!("{} ⚠️ 报告下载失败: {}", ctx, e);
                    }
                }
                Ok(true)
            }
            Err(e) => {
                error!("{} ❌ 报告生成失败: {}", ctx, e);
                let reason = e.to_string();
                session.mark_report_error(index, reason.clone())?;
                self.record_failure(&ctx, "报告", &reason).await;
                Ok(false)
            }
        }
    }

    async fn download(&self, url: &str, dir: &Path, title: &str) -> Result<PathBuf> {
        let bytes = self.backend.download_report(url).await?;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("无法创建目录: {}", dir.display()))?;
        let path = dir.join(format!(
            "{}.{}",
            sanitize_filename(title),
            self.report_format.extension()
        ));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        info!("💾 报告已保存: {}", path.display());
        Ok(path)
    }

    async fn record_failure(&self, ctx: &FileCtx, stage: &str, reason: &str) {
        if let Err(e) = self.failure_log.write(ctx, stage, reason).await {
            warn!("{} ⚠️ 写入失败记录失败: {}", ctx, e);
        }
    }
}

/// 报告标题：批次名 - 文件名（去扩展名）
pub fn report_title(job_name: &str, filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    format!("{} - {}", job_name, stem)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
