//! 失败记录服务 - 业务能力层
//!
//! 只负责"把处理失败的文件写入记录文件"，不关心流程

use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::debug;

use crate::workflow::FileCtx;

/// 失败记录服务
///
/// 职责：
/// - 将 OCR 失败、报告生成失败的文件追加到记录文件
/// - 只处理单个文件
/// - 不关心流程顺序
pub struct FailureLog {
    file_path: String,
}

impl FailureLog {
    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.file_path
    }

    /// 写入失败信息
    ///
    /// # 参数
    /// - `ctx`: 文件上下文
    /// - `stage`: 失败阶段（OCR / 报告）
    /// - `reason`: 失败原因
    pub async fn write(&self, ctx: &FileCtx, stage: &str, reason: &str) -> Result<()> {
        debug!("写入失败记录: {} | {} | {}", ctx, stage, reason);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let line = format!(
            "{} | 任务 {} | 文件 {} ({}) | {} | {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            ctx.job_id,
            ctx.file_index,
            ctx.filename,
            stage,
            reason.replace('\n', " ")
        );

        file.write_all(line.as_bytes())?;

        Ok(())
    }
}

impl Default for FailureLog {
    fn default() -> Self {
        Self::with_path("failed_files.txt")
    }
}
