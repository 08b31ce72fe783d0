//! 批处理任务相关的数据结构

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ocr::OcrResult;

/// 批处理任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchJobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BatchJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchJobStatus::Pending => "pending",
            BatchJobStatus::Running => "running",
            BatchJobStatus::Completed => "completed",
            BatchJobStatus::Failed => "failed",
            BatchJobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 批处理任务设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// 多次 OCR 取最优
    #[serde(default)]
    pub use_multi_ocr: bool,
    /// 多次 OCR 的次数
    #[serde(default = "default_ocr_count")]
    pub ocr_count: u32,
    /// 上传后由后端自动开始处理
    #[serde(default)]
    pub auto_start: bool,
}

fn default_ocr_count() -> u32 {
    3
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            use_multi_ocr: false,
            ocr_count: default_ocr_count(),
            auto_start: false,
        }
    }
}

/// 批处理任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: BatchJobStatus,
    #[serde(default)]
    pub total_files: usize,
    #[serde(default)]
    pub processed_files: usize,
    #[serde(default)]
    pub failed_files: usize,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub settings: BatchSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// 单个文件的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl FileStatus {
    /// 终态：completed / failed / skipped
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 批处理中的单个文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFileItem {
    pub id: String,
    pub job_id: String,
    pub filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<OcrResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
}

/// 报告生成状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Generated,
    Error,
}

/// 操作员确认 OCR 结果后为文件创建的报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub file_id: String,
    pub title: String,
    pub form_fields: BTreeMap<String, String>,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GeneratedReport {
    pub fn new(
        file_id: impl Into<String>,
        title: impl Into<String>,
        form_fields: BTreeMap<String, String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            title: title.into(),
            form_fields,
            status: ReportStatus::Pending,
            report_url: None,
            error_message: None,
        }
    }
}
