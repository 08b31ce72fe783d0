//! # AQI Batch Client
//!
//! 室内空气检测报告批处理客户端
//!
//! 操作员上传检测报告照片，后端识别（OCR）出电话、日期、温湿度和各检测点数值，
//! 操作员确认后生成 Word / PDF 报告。本 crate 负责客户端的会话状态：
//! 批处理状态机、会话持久化与恢复、背景图缓存、进度通道。
//!
//! ## 架构设计
//!
//! ### ① 基础层
//! - `storage/` - 本地键值存储（文件 / 内存），带容量上限
//! - `clients/` - 后端能力：`BatchBackend` 接口和 REST 实现 `ApiClient`
//! - `progress/` - 进度通道：WebSocket 推送 / REST 轮询
//!
//! ### ② 状态层
//! - `workflow::BatchSession` - 批处理状态机，唯一修改文件状态的地方
//! - `session/` - 记住当前任务，启动时恢复
//! - `cache/` - 背景图缓存（24 小时有效）
//!
//! ### ③ 流程层（Workflow）
//! - `FileCtx` - 日志上下文（任务 ID + 文件序号）
//! - `FileFlow` - 单个文件的流程（OCR → 确认 → 报告）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 应用控制器，持有当前会话
//! - `orchestrator/job_processor` - 单个任务处理器，遍历文件或跟随进度
//!
//! ## 模块结构

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod services;
pub mod session;
pub mod storage;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ApiClient, BatchBackend};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::{App, JobStats, RunOutcome};
pub use progress::{connect_progress_source, ProgressSource};
pub use session::{RestoreOutcome, SessionStore};
pub use workflow::{BatchSession, FileCtx, FileFlow, ProcessResult};
