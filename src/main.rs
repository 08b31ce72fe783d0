use std::sync::atomic::Ordering;

use aqi_batch_client::utils::logging;
use aqi_batch_client::{App, Config, RunOutcome};
use anyhow::Result;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 先初始化日志，配置解析的警告才能输出
    logging::init(Config::verbose_from_env());

    // 加载配置
    let config = Config::from_env();

    // 初始化应用（包含恢复上次的会话）
    let mut app = App::initialize(config).await?;

    if app.session().is_none() {
        let folder = app.config().input_folder.clone();
        app.start_upload(&folder).await?;
    }

    // Ctrl+C 在当前文件处理完后暂停
    let pause = app.pause_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，当前文件完成后暂停");
            pause.store(true, Ordering::SeqCst);
        }
    });

    match app.run().await? {
        RunOutcome::Paused(stats) | RunOutcome::Interrupted(stats) => {
            info!("任务未完成，剩余 {} 个文件，下次启动将自动恢复", stats.pending);
        }
        RunOutcome::Finished(_) | RunOutcome::Idle => {}
    }

    Ok(())
}
