//! 批处理相关的后端能力
//!
//! 状态机、会话恢复和轮询通道都只依赖这个 trait，
//! 生产环境由 `ApiClient` 实现。

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    BatchFileItem, BatchJob, BatchSettings, GeneratedReport, OcrResult, ReportFormat, UploadFile,
};

#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// 上传图片并创建批处理任务
    async fn create_batch_job(
        &self,
        name: &str,
        settings: &BatchSettings,
        files: &[UploadFile],
    ) -> AppResult<BatchJob>;

    /// 查询任务，不存在时返回 None
    async fn get_batch_job(&self, job_id: &str) -> AppResult<Option<BatchJob>>;

    async fn list_batch_files(&self, job_id: &str) -> AppResult<Vec<BatchFileItem>>;

    /// 对单个文件执行 OCR
    async fn run_file_ocr(&self, file_id: &str, settings: &BatchSettings) -> AppResult<OcrResult>;

    async fn skip_file(&self, file_id: &str) -> AppResult<()>;

    async fn retry_file(&self, file_id: &str) -> AppResult<()>;

    /// 生成报告，返回下载地址
    async fn generate_report(
        &self,
        report: &GeneratedReport,
        format: ReportFormat,
    ) -> AppResult<String>;

    /// 下载已生成的报告文件
    async fn download_report(&self, url: &str) -> AppResult<Vec<u8>>;
}
