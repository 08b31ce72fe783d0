//! 批处理会话状态机
//!
//! 文件状态只允许按以下路径流转：
//!
//! ```text
//! pending ──► processing ──► completed
//!    │            │      └──► failed ──(操作员重试)──► pending
//!    └────────────┴──(操作员跳过)──► skipped
//! ```
//!
//! `skipped` 只能由操作员显式触发。任务只有在全部文件进入终态
//! （completed / failed / skipped）后才会变为 completed。
//! 翻页（上一张 / 下一张）只移动索引，不修改任何文件状态。

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    BatchFileItem, BatchJob, BatchJobStatus, FileStatus, FileUpdate, GeneratedReport,
    OcrResult, ProcessingMode, ProgressEvent, ReportStatus,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("批处理任务没有任何文件")]
    EmptyBatch,
    #[error("索引 {index} 超出范围 [0, {total})")]
    IndexOutOfRange { index: usize, total: usize },
    #[error("文件 {file_id} 不能从 {from} 变为 {to}")]
    InvalidTransition {
        file_id: String,
        from: FileStatus,
        to: FileStatus,
    },
    #[error("文件 {file_id} 还没有可确认的 OCR 结果")]
    OcrNotReady { file_id: String },
    #[error("文件 {file_id} 尚未创建报告")]
    NoReport { file_id: String },
}

/// 当前正在操作的批处理任务
#[derive(Debug, Clone)]
pub struct BatchSession {
    job: BatchJob,
    files: Vec<BatchFileItem>,
    reports: BTreeMap<String, GeneratedReport>,
    current_index: usize,
    mode: ProcessingMode,
    paused: bool,
}

impl BatchSession {
    pub fn new(
        job: BatchJob,
        files: Vec<BatchFileItem>,
        mode: ProcessingMode,
    ) -> Result<Self, TransitionError> {
        if files.is_empty() {
            return Err(TransitionError::EmptyBatch);
        }
        let mut session = Self {
            job,
            files,
            reports: BTreeMap::new(),
            current_index: 0,
            mode,
            paused: false,
        };
        session.refresh_job_status();
        Ok(session)
    }

    pub fn job(&self) -> &BatchJob {
        &self.job
    }

    pub fn files(&self) -> &[BatchFileItem] {
        &self.files
    }

    pub fn file(&self, index: usize) -> Result<&BatchFileItem, TransitionError> {
        self.check_index(index)?;
        Ok(&self.files[index])
    }

    pub fn total_files(&self) -> usize {
        self.files.len()
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ProcessingMode) {
        self.mode = mode;
    }

    pub fn report(&self, index: usize) -> Option<&GeneratedReport> {
        self.files
            .get(index)
            .and_then(|f| self.reports.get(&f.id))
    }

    pub fn reports(&self) -> impl Iterator<Item = &GeneratedReport> {
        self.reports.values()
    }

    pub fn index_of(&self, file_id: &str) -> Option<usize> {
        self.files.iter().position(|f| f.id == file_id)
    }

    fn check_index(&self, index: usize) -> Result<(), TransitionError> {
        if index >= self.files.len() {
            return Err(TransitionError::IndexOutOfRange {
                index,
                total: self.files.len(),
            });
        }
        Ok(())
    }

    // ========== 导航 ==========

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_file(&self) -> &BatchFileItem {
        &self.files[self.current_index]
    }

    /// 下一张；已是最后一张时停留原地并返回 false
    pub fn next(&mut self) -> bool {
        if self.current_index + 1 < self.files.len() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    pub fn previous(&mut self) -> bool {
        if self.current_index > 0 {
            self.current_index -= 1;
            true
        } else {
            false
        }
    }

    pub fn go_to(&mut self, index: usize) -> Result<(), TransitionError> {
        self.check_index(index)?;
        self.current_index = index;
        Ok(())
    }

    // ========== 暂停 / 继续 ==========

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // ========== 文件状态流转 ==========

    fn transition(
        &mut self,
        index: usize,
        allowed_from: &[FileStatus],
        to: FileStatus,
    ) -> Result<&mut BatchFileItem, TransitionError> {
        self.check_index(index)?;
        let file = &mut self.files[index];
        if !allowed_from.contains(&file.status) {
            return Err(TransitionError::InvalidTransition {
                file_id: file.id.clone(),
                from: file.status,
                to,
            });
        }
        debug!("文件 {} 状态 {} → {}", file.id, file.status, to);
        file.status = to;
        Ok(file)
    }

    /// pending → processing
    pub fn begin_processing(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(index, &[FileStatus::Pending], FileStatus::Processing)?;
        self.refresh_job_status();
        Ok(())
    }

    /// processing → completed
    pub fn complete(
        &mut self,
        index: usize,
        ocr: OcrResult,
        processing_time_seconds: Option<f64>,
    ) -> Result<(), TransitionError> {
        let file = self.transition(index, &[FileStatus::Processing], FileStatus::Completed)?;
        file.ocr_result = Some(ocr);
        file.error_message = None;
        file.processing_time_seconds = processing_time_seconds;
        self.refresh_job_status();
        Ok(())
    }

    /// processing → failed
    pub fn fail(&mut self, index: usize, message: impl Into<String>) -> Result<(), TransitionError> {
        let file = self.transition(index, &[FileStatus::Processing], FileStatus::Failed)?;
        file.error_message = Some(message.into());
        self.refresh_job_status();
        Ok(())
    }

    /// 操作员跳过：pending / processing → skipped
    pub fn skip(&mut self, index: usize) -> Result<(), TransitionError> {
        self.transition(
            index,
            &[FileStatus::Pending, FileStatus::Processing],
            FileStatus::Skipped,
        )?;
        self.refresh_job_status();
        Ok(())
    }

    /// 操作员重试：failed → pending
    pub fn retry(&mut self, index: usize) -> Result<(), TransitionError> {
        let file = self.transition(index, &[FileStatus::Failed], FileStatus::Pending)?;
        file.error_message = None;
        file.processing_time_seconds = None;
        if self.job.status == BatchJobStatus::Completed {
            self.job.status = BatchJobStatus::Running;
        }
        self.refresh_job_status();
        Ok(())
    }

    /// 下一个待处理文件的索引
    pub fn next_pending(&self) -> Option<usize> {
        self.files
            .iter()
            .position(|f| f.status == FileStatus::Pending)
    }

    /// 下一个尚未进入终态的文件
    ///
    /// 包括上次运行中断时停在 processing 的文件。
    pub fn next_unfinished(&self) -> Option<usize> {
        self.next_pending().or_else(|| {
            self.files
                .iter()
                .position(|f| f.status == FileStatus::Processing)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.files.iter().all(|f| f.status.is_terminal())
    }

    // ========== 报告 ==========

    /// 操作员确认 OCR 结果，为该文件创建（或替换）待生成的报告
    ///
    /// `edited_fields` 为空时使用 OCR 结果展开的字段。
    pub fn confirm_ocr(
        &mut self,
        index: usize,
        title: impl Into<String>,
        edited_fields: Option<BTreeMap<String, String>>,
    ) -> Result<&GeneratedReport, TransitionError> {
        self.check_index(index)?;
        let file = &self.files[index];
        let ocr = match (&file.status, &file.ocr_result) {
            (FileStatus::Completed, Some(ocr)) => ocr,
            _ => {
                return Err(TransitionError::OcrNotReady {
                    file_id: file.id.clone(),
                })
            }
        };
        let fields = edited_fields.unwrap_or_else(|| ocr.to_form_fields());
        let report = GeneratedReport::new(file.id.clone(), title, fields);
        let file_id = file.id.clone();
        self.reports.insert(file_id.clone(), report);
        Ok(&self.reports[&file_id])
    }

    pub fn mark_report_generated(
        &mut self,
        index: usize,
        url: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let report = self.report_mut(index)?;
        report.status = ReportStatus::Generated;
        report.report_url = Some(url.into());
        report.error_message = None;
        Ok(())
    }

    pub fn mark_report_error(
        &mut self,
        index: usize,
        message: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let report = self.report_mut(index)?;
        report.status = ReportStatus::Error;
        report.error_message = Some(message.into());
        Ok(())
    }

    fn report_mut(&mut self, index: usize) -> Result<&mut GeneratedReport, TransitionError> {
        self.check_index(index)?;
        let file_id = &self.files[index].id;
        self.reports
            .get_mut(file_id)
            .ok_or_else(|| TransitionError::NoReport {
                file_id: file_id.clone(),
            })
    }

    // ========== 任务状态 ==========

    /// 根据文件状态重新计算任务计数和状态
    pub fn refresh_job_status(&mut self) {
        let total = self.files.len();
        let finished = self.files.iter().filter(|f| f.status.is_terminal()).count();
        let failed = self
            .files
            .iter()
            .filter(|f| f.status == FileStatus::Failed)
            .count();
        let started = self.files.iter().any(|f| f.status != FileStatus::Pending);

        self.job.total_files = total;
        self.job.processed_files = finished;
        self.job.failed_files = failed;
        self.job.progress_percentage = if total == 0 {
            0.0
        } else {
            finished as f64 / total as f64 * 100.0
        };

        self.job.status = if finished == total {
            BatchJobStatus::Completed
        } else {
            match self.job.status {
                BatchJobStatus::Cancelled | BatchJobStatus::Failed => self.job.status,
                _ if started => BatchJobStatus::Running,
                // 未全部终态时不允许保持 completed
                BatchJobStatus::Completed => BatchJobStatus::Pending,
                other => other,
            }
        };
    }

    /// 合并来自推送或轮询通道的进度事件
    ///
    /// 文件更新同样遵守状态流转规则：缺失的中间步骤会按合法路径补齐，
    /// 非法更新被忽略。返回事件是否改变了会话。
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> bool {
        if event.job_id != self.job.id {
            debug!("忽略其他任务的进度事件: {}", event.job_id);
            return false;
        }

        let mut changed = false;

        if let Some(update) = &event.file {
            changed |= self.apply_file_update(update);
        }

        if let Some(status) = event.job_status {
            match status {
                BatchJobStatus::Cancelled | BatchJobStatus::Failed
                    if self.job.status != status =>
                {
                    self.job.status = status;
                    changed = true;
                }
                BatchJobStatus::Completed if !self.is_finished() => {
                    warn!("⚠️ 后端报告任务 {} 已完成，但仍有文件未处理，忽略", self.job.id);
                }
                _ => {}
            }
        }

        self.refresh_job_status();
        changed
    }

    fn apply_file_update(&mut self, update: &FileUpdate) -> bool {
        let Some(index) = self.index_of(&update.file_id) else {
            warn!("⚠️ 进度事件中的文件 {} 不属于当前任务", update.file_id);
            return false;
        };

        let current = self.files[index].status;
        if current == update.status {
            let file = &mut self.files[index];
            if update.ocr_result.is_some() && file.ocr_result != update.ocr_result {
                file.ocr_result = update.ocr_result.clone();
                return true;
            }
            return false;
        }

        let result = match (current, update.status) {
            (FileStatus::Pending, FileStatus::Processing) => self.begin_processing(index),
            (FileStatus::Pending, FileStatus::Completed)
            | (FileStatus::Pending, FileStatus::Failed) => self
                .begin_processing(index)
                .and_then(|_| self.finish_from_update(index, update)),
            (FileStatus::Processing, FileStatus::Completed)
            | (FileStatus::Processing, FileStatus::Failed) => {
                self.finish_from_update(index, update)
            }
            (FileStatus::Pending, FileStatus::Skipped)
            | (FileStatus::Processing, FileStatus::Skipped) => self.skip(index),
            (FileStatus::Failed, FileStatus::Pending) => self.retry(index),
            (from, to) => Err(TransitionError::InvalidTransition {
                file_id: update.file_id.clone(),
                from,
                to,
            }),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ 忽略非法的进度更新: {}", e);
                false
            }
        }
    }

    fn finish_from_update(&mut self, index: usize, update: &FileUpdate) -> Result<(), TransitionError> {
        if update.status == FileStatus::Completed {
            self.complete(
                index,
                update.ocr_result.clone().unwrap_or_default(),
                update.processing_time_seconds,
            )
        } else {
            let message = update
                .error_message
                .clone()
                .unwrap_or_else(|| "处理失败".to_string());
            self.fail(index, message)
        }
    }
}
