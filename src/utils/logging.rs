use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、运行日志文件和横幅输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化 tracing 订阅器
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info。
/// 重复调用时忽略（测试中会多次初始化）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 检测报告批处理客户端");
    info!("🌐 后端地址: {}", config.api_base_url);
    info!("⚙️ 处理模式: {}", config.processing_mode);
    info!("{}", "=".repeat(60));
}

/// 记录图片加载信息
///
/// # 参数
/// - `total`: 图片总数
/// - `folder`: 来源目录
pub fn log_files_loaded(total: usize, folder: &str) {
    info!("✓ 在 {} 中找到 {} 张待上传的图片", folder, total);
}

/// 记录任务开始信息
pub fn log_job_start(job_id: &str, name: &str, total: usize, pending: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理任务 {} ({})", job_id, name);
    info!("📄 文件总数: {} / 待处理: {}", total, pending);
    info!("{}", "=".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `completed`: 识别成功数量
/// - `failed`: 失败数量
/// - `skipped`: 跳过数量
/// - `reports`: 生成报告数量
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(
    completed: usize,
    failed: usize,
    skipped: usize,
    reports: usize,
    log_file_path: &str,
) {
    let total = completed + failed + skipped;
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 识别成功: {}/{}", completed, total);
    info!("❌ 失败: {}", failed);
    info!("⏭️ 跳过: {}", skipped);
    info!("📄 已生成报告: {}", reports);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
