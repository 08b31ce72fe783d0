//! 进度事件：推送通道和轮询通道统一产出的数据

use serde::{Deserialize, Serialize};

use super::batch::{BatchJobStatus, FileStatus};
use super::ocr::OcrResult;

/// 单个文件的状态更新
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpdate {
    pub file_id: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_result: Option<OcrResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status: Option<BatchJobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileUpdate>,
}

impl ProgressEvent {
    pub fn job(job_id: impl Into<String>, status: BatchJobStatus, progress: f64) -> Self {
        Self {
            job_id: job_id.into(),
            job_status: Some(status),
            progress_percentage: Some(progress),
            file: None,
        }
    }

    pub fn file(job_id: impl Into<String>, update: FileUpdate) -> Self {
        Self {
            job_id: job_id.into(),
            job_status: None,
            progress_percentage: None,
            file: Some(update),
        }
    }
}
