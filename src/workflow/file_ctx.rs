//! 文件处理上下文
//!
//! 封装"我正在处理哪个任务的第几个文件"这一信息

use std::fmt::Display;

/// 文件处理上下文
#[derive(Debug, Clone)]
pub struct FileCtx {
    /// 批处理任务ID
    pub job_id: String,

    /// 文件在任务中的序号（从1开始，仅用于日志显示）
    pub file_index: usize,

    /// 文件总数
    pub total: usize,

    pub filename: String,
}

impl FileCtx {
    /// 创建新的文件上下文
    pub fn new(job_id: String, file_index: usize, total: usize, filename: String) -> Self {
        Self {
            job_id,
            file_index,
            total,
            filename,
        }
    }
}

impl Display for FileCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[任务 {} 文件 {}/{} {}]",
            self.job_id, self.file_index, self.total, self.filename
        )
    }
}
