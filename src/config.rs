use tracing::warn;

use crate::error::{AppError, AppResult, ConfigError};
use crate::models::{ProcessingMode, ReportFormat};

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    // --- 后端服务 ---
    /// REST API 根地址
    pub api_base_url: String,
    /// 进度推送 WebSocket 地址
    pub ws_url: String,
    pub api_username: String,
    pub api_password: String,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,

    // --- 批处理 ---
    /// 待上传图片所在目录
    pub input_folder: String,
    /// 默认处理模式
    pub processing_mode: ProcessingMode,
    /// 报告格式
    pub report_format: ReportFormat,
    /// 报告下载目录（为空则不下载）
    pub report_output_dir: String,
    /// 单个文件 OCR 临时失败时的重试次数
    pub max_file_retries: u32,
    /// 全部文件处理完后自动标记完成
    pub auto_mark_done: bool,

    // --- 进度通道 ---
    /// 优先使用 WebSocket 推送
    pub prefer_push: bool,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,

    // --- 本地存储 ---
    /// 会话状态文件
    pub state_file: String,
    /// 本地存储配额（字节），0 表示不限制
    pub storage_quota_bytes: usize,
    /// 恢复会话时临时失败的重试次数
    pub restore_retries: u32,
    /// 临时错误的重试间隔（毫秒）
    pub retry_delay_ms: u64,

    // --- 日志 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    /// 失败文件记录
    pub failure_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            ws_url: "ws://127.0.0.1:8000/ws/progress".to_string(),
            api_username: String::new(),
            api_password: String::new(),
            request_timeout_secs: 120,
            input_folder: "input_images".to_string(),
            processing_mode: ProcessingMode::Manual,
            report_format: ReportFormat::Word,
            report_output_dir: String::new(),
            max_file_retries: 2,
            auto_mark_done: true,
            prefer_push: true,
            poll_interval_ms: 2000,
            state_file: ".aqi_session.json".to_string(),
            // 与浏览器 localStorage 的常见上限保持一致
            storage_quota_bytes: 5 * 1024 * 1024,
            restore_retries: 2,
            retry_delay_ms: 1000,
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            failure_log_file: "failed_files.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            api_base_url: env_or("API_BASE_URL", default.api_base_url),
            ws_url: env_or("WS_URL", default.ws_url),
            api_username: env_or("API_USERNAME", default.api_username),
            api_password: env_or("API_PASSWORD", default.api_password),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", default.request_timeout_secs),
            input_folder: env_or("INPUT_FOLDER", default.input_folder),
            processing_mode: env_with(
                "PROCESSING_MODE",
                "manual | auto",
                ProcessingMode::parse,
                default.processing_mode,
            ),
            report_format: env_with(
                "REPORT_FORMAT",
                "word | pdf",
                ReportFormat::parse,
                default.report_format,
            ),
            report_output_dir: env_or("REPORT_OUTPUT_DIR", default.report_output_dir),
            max_file_retries: env_parse("MAX_FILE_RETRIES", default.max_file_retries),
            auto_mark_done: env_parse("AUTO_MARK_DONE", default.auto_mark_done),
            prefer_push: env_parse("PREFER_PUSH", default.prefer_push),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", default.poll_interval_ms),
            state_file: env_or("STATE_FILE", default.state_file),
            storage_quota_bytes: env_parse("STORAGE_QUOTA_BYTES", default.storage_quota_bytes),
            restore_retries: env_parse("RESTORE_RETRIES", default.restore_retries),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", default.retry_delay_ms),
            verbose_logging: Self::verbose_from_env(),
            output_log_file: env_or("OUTPUT_LOG_FILE", default.output_log_file),
            failure_log_file: env_or("FAILURE_LOG_FILE", default.failure_log_file),
        }
    }

    /// 只读取 VERBOSE_LOGGING，用于在加载完整配置前初始化日志
    pub fn verbose_from_env() -> bool {
        env_parse("VERBOSE_LOGGING", Self::default().verbose_logging)
    }

    /// 存储配额，0 视为不限制
    pub fn storage_quota(&self) -> Option<usize> {
        (self.storage_quota_bytes > 0).then_some(self.storage_quota_bytes)
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_username.is_empty() && !self.api_password.is_empty()
    }

    /// 检查启动必需的配置项
    pub fn validate(&self) -> AppResult<()> {
        let required = [
            ("API_BASE_URL", &self.api_base_url),
            ("STATE_FILE", &self.state_file),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::Config(ConfigError::MissingValue {
                    name: name.to_string(),
                }));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(ConfigError::EnvVarParseFailed {
                var_name: "POLL_INTERVAL_MS".to_string(),
                value: "0".to_string(),
                expected_type: "正整数".to_string(),
            }));
        }
        Ok(())
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_with(
        name,
        std::any::type_name::<T>(),
        |v| v.parse().ok(),
        default,
    )
}

/// 读取并转换环境变量，无法转换时记录警告并使用默认值
fn env_with<T>(name: &str, expected: &str, parse: impl Fn(&str) -> Option<T>, default: T) -> T {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    match parse(value.trim()) {
        Some(parsed) => parsed,
        None => {
            let err = ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: expected.to_string(),
            };
            warn!("⚠️ {}，使用默认值", err);
            default
        }
    }
}
