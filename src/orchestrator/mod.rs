//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务调度和会话管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 应用控制器
//! - 管理应用生命周期（初始化、恢复、运行）
//! - 上传图片并创建任务
//! - 持有当前会话、本地存储和背景图缓存
//! - 响应操作员动作（跳过、重试、确认报告、标记完成）
//!
//! ### `job_processor` - 单个任务处理器
//! - 客户端驱动：遍历 pending 文件，委托 FileFlow 识别
//! - 服务端驱动：跟随进度通道，合并进度事件
//! - 自动模式下生成报告
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (App，持有 Option<BatchSession>)
//!     ↓
//! job_processor (处理 Vec<BatchFileItem>)
//!     ↓
//! workflow::FileFlow (处理单个文件)
//!     ↓
//! clients / services (后端能力、失败记录)
//!     ↓
//! storage (本地键值存储)
//! ```

pub mod batch_processor;
pub mod job_processor;

// 重新导出主要类型
pub use batch_processor::App;
pub use job_processor::{JobStats, RunOutcome};
