//! 批处理应用控制器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，持有所有协作对象和当前会话。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：启动日志、登录后端、打开本地存储、恢复上次会话
//! 2. **上传**：扫描图片目录，创建任务，记住会话
//! 3. **运行**：委托 job_processor 处理当前任务
//! 4. **操作员动作**：跳过、重试、确认报告、切换标签页和模式、标记完成
//! 5. **全局统计**：任务结束后输出统计
//!
//! 同一时间只有一个当前任务；开始新的上传会放弃上一个任务的焦点，
//! 但不会删除后端数据。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::cache::BackgroundCache;
use crate::clients::{ApiClient, BatchBackend};
use crate::config::Config;
use crate::models::{
    load_manifest, load_upload_files, ActiveTab, BatchSettings, FileStatus, ProcessingMode,
};
use crate::orchestrator::job_processor::{self, FollowPolicy, JobStats, RunOutcome};
use crate::progress::connect_progress_source;
use crate::session::{restore, RestoreOutcome, RestorePolicy, SessionStore};
use crate::storage::{FileStore, KeyValueStore};
use crate::utils::logging::{
    init_log_file, log_files_loaded, log_job_start, log_startup, print_final_stats,
};
use crate::workflow::{BatchSession, FileFlow};

/// 应用主结构
pub struct App {
    config: Config,
    backend: Arc<dyn BatchBackend>,
    sessions: SessionStore,
    background: BackgroundCache,
    flow: FileFlow,
    session: Option<BatchSession>,
    tab: ActiveTab,
    pause: Arc<AtomicBool>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(&config);

        let client = ApiClient::new(&config)?;
        if config.has_credentials() {
            client
                .login(&config.api_username, &config.api_password)
                .await
                .context("登录后端失败")?;
        } else {
            warn!("⚠️ 未配置 API_USERNAME / API_PASSWORD，以匿名身份访问后端");
        }

        let store = FileStore::open(&config.state_file, config.storage_quota())
            .with_context(|| format!("无法打开本地状态文件: {}", config.state_file))?;

        let mut app = Self::with_backend(config, Arc::new(client), Arc::new(store));
        app.restore().await?;
        Ok(app)
    }

    /// 使用指定的后端和存储创建应用（不做恢复）
    pub fn with_backend(
        config: Config,
        backend: Arc<dyn BatchBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let flow = FileFlow::new(&config, backend.clone());
        Self {
            sessions: SessionStore::new(store.clone()),
            background: BackgroundCache::new(store),
            flow,
            backend,
            config,
            session: None,
            tab: ActiveTab::Upload,
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    // ========== 访问器 ==========

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> Option<&BatchSession> {
        self.session.as_ref()
    }

    /// 用于浏览文件（上一张 / 下一张）
    pub fn session_mut(&mut self) -> Option<&mut BatchSession> {
        self.session.as_mut()
    }

    pub fn active_tab(&self) -> ActiveTab {
        self.tab
    }

    pub fn background(&self) -> &BackgroundCache {
        &self.background
    }

    fn current(&mut self) -> Result<&mut BatchSession> {
        self.session.as_mut().context("当前没有进行中的批处理任务")
    }

    // ========== 会话恢复 ==========

    /// 恢复上次的会话
    pub async fn restore(&mut self) -> Result<RestoreOutcome> {
        let policy = RestorePolicy {
            retries: self.config.restore_retries,
            delay: Duration::from_millis(self.config.retry_delay_ms),
        };
        let outcome = restore(&self.sessions, self.backend.as_ref(), policy).await?;

        match &outcome {
            RestoreOutcome::Resume {
                job,
                files,
                tab,
                mode,
            } => {
                match BatchSession::new(job.clone(), files.clone(), *mode) {
                    Ok(session) => {
                        self.session = Some(session);
                        self.tab = *tab;
                    }
                    Err(e) => {
                        warn!("⚠️ 任务 {} 无法恢复: {}，从上传界面开始", job.id, e);
                        self.sessions.clear()?;
                        self.reset_focus();
                    }
                }
            }
            RestoreOutcome::Fresh(reason) => {
                info!("从上传界面开始 ({:?})", reason);
                self.reset_focus();
            }
        }
        Ok(outcome)
    }

    fn reset_focus(&mut self) {
        self.session = None;
        self.tab = ActiveTab::Upload;
    }

    // ========== 上传 ==========

    /// 上传目录中的所有图片并创建新任务
    pub async fn start_upload(&mut self, folder: &str) -> Result<&BatchSession> {
        info!("\n📁 正在扫描待上传的图片...");
        let files = load_upload_files(folder).await?;
        if files.is_empty() {
            bail!("目录中没有可上传的图片: {}", folder);
        }
        log_files_loaded(files.len(), folder);

        let manifest = load_manifest(Path::new(folder)).await?;
        let (name, settings) = match manifest {
            Some(m) => (m.name, m.settings),
            None => (default_job_name(folder), BatchSettings::default()),
        };

        let job = self
            .backend
            .create_batch_job(&name, &settings, &files)
            .await
            .context("创建批处理任务失败")?;
        let items = self
            .backend
            .list_batch_files(&job.id)
            .await
            .context("获取任务文件列表失败")?;
        info!("✓ 已创建任务 {} ({}), 共 {} 个文件", job.id, job.name, items.len());

        if let Some(previous) = &self.session {
            info!("放弃上一个任务 {} 的焦点", previous.job().id);
        }

        let mode = self.config.processing_mode;
        let tab = if job.settings.auto_start {
            ActiveTab::Progress
        } else {
            ActiveTab::Ocr
        };
        let session = BatchSession::new(job, items, mode)?;
        // 后端已经创建了任务，本地保存失败也要保留当前会话
        if let Err(e) = self.sessions.remember_job(&session.job().id, tab, mode) {
            warn!(
                "⚠️ 无法保存任务 {} 的本地记录，重启后不会自动恢复: {}",
                session.job().id,
                e
            );
        }
        self.pause.store(false, Ordering::SeqCst);
        self.tab = tab;

        Ok(&*self.session.insert(session))
    }

    // ========== 运行 ==========

    /// 处理当前任务直到完成或暂停
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let Some(session) = self.session.as_mut() else {
            warn!("⚠️ 当前没有进行中的批处理任务");
            return Ok(RunOutcome::Idle);
        };

        let pending = session
            .files()
            .iter()
            .filter(|f| !f.status.is_terminal())
            .count();
        log_job_start(
            &session.job().id,
            &session.job().name,
            session.total_files(),
            pending,
        );

        let outcome = if session.job().settings.auto_start {
            let source = connect_progress_source(&self.config, self.backend.clone()).await;
            job_processor::follow_with_fallback(
                source,
                self.backend.clone(),
                &self.flow,
                session,
                &self.pause,
                &FollowPolicy::from_config(&self.config),
            )
            .await?
        } else {
            job_processor::process_locally(&self.flow, session, &self.pause).await?
        };

        if let RunOutcome::Finished(stats) = outcome {
            self.finish(stats)?;
        }
        Ok(outcome)
    }

    fn finish(&mut self, stats: JobStats) -> Result<()> {
        if stats.pending > 0 {
            warn!("⚠️ 仍有 {} 个文件未处理，保留当前任务", stats.pending);
            return Ok(());
        }

        print_final_stats(
            stats.completed,
            stats.failed,
            stats.skipped,
            stats.reports,
            &self.config.output_log_file,
        );

        let mode = self.current()?.mode();
        if mode == ProcessingMode::Auto && self.config.auto_mark_done {
            self.mark_done()?;
        } else {
            // 手动模式下由操作员逐个确认报告
            self.set_tab(ActiveTab::Report)?;
        }
        Ok(())
    }

    /// 返回暂停标记，置为 true 后在下一个文件前暂停
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        self.pause.clone()
    }

    pub fn resume(&mut self) {
        self.pause.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.as_mut() {
            session.resume();
            info!("▶️ 继续任务 {}", session.job().id);
        }
    }

    // ========== 操作员动作 ==========

    /// 跳过文件
    pub async fn skip_file(&mut self, index: usize) -> Result<()> {
        let session = self.current()?;
        let file = session.file(index)?;
        if !matches!(file.status, FileStatus::Pending | FileStatus::Processing) {
            bail!("文件 {} 当前状态为 {}，不能跳过", file.filename, file.status);
        }
        let file_id = file.id.clone();

        self.backend.skip_file(&file_id).await?;
        self.current()?.skip(index)?;
        info!("⏭️ 已跳过文件 {}", file_id);
        Ok(())
    }

    /// 重新处理失败的文件
    pub async fn retry_file(&mut self, index: usize) -> Result<()> {
        let session = self.current()?;
        let file = session.file(index)?;
        if file.status != FileStatus::Failed {
            bail!("文件 {} 当前状态为 {}，只能重试失败的文件", file.filename, file.status);
        }
        let file_id = file.id.clone();

        self.backend.retry_file(&file_id).await?;
        self.current()?.retry(index)?;
        info!("🔁 文件 {} 已重新加入队列", file_id);
        Ok(())
    }

    /// 确认 OCR 结果并生成报告
    pub async fn generate_report(
        &mut self,
        index: usize,
        edited_fields: Option<BTreeMap<String, String>>,
    ) -> Result<bool> {
        let session = self.session.as_mut().context("当前没有进行中的批处理任务")?;
        self.flow.generate_report(session, index, edited_fields).await
    }

    pub fn set_tab(&mut self, tab: ActiveTab) -> Result<()> {
        self.tab = tab;
        self.sessions.set_tab(tab)?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: ProcessingMode) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.set_mode(mode);
        }
        self.sessions.set_mode(mode)?;
        Ok(())
    }

    /// 标记当前任务完成，之后启动时不再自动恢复
    pub fn mark_done(&mut self) -> Result<()> {
        self.sessions.mark_done()?;
        if let Some(session) = self.session.take() {
            info!("✅ 任务 {} 已标记完成", session.job().id);
        }
        self.tab = ActiveTab::Upload;
        Ok(())
    }
}

/// 没有清单时的默认任务名：目录名 + 时间
fn default_job_name(folder: &str) -> String {
    let base = Path::new(folder)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "批处理".to_string());
    format!("{} {}", base, chrono::Local::now().format("%Y-%m-%d %H:%M"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{sample_files, sample_job, FakeBackend};
    use crate::models::ReportStatus;
    use crate::session::FreshReason;
    use crate::storage::MemoryStore;

    fn config(dir: &Path) -> Config {
        Config {
            failure_log_file: dir.join("failed.txt").to_string_lossy().to_string(),
            output_log_file: dir.join("output.txt").to_string_lossy().to_string(),
            retry_delay_ms: 1,
            ..Config::default()
        }
    }

    fn write_images(dir: &Path, count: usize) -> String {
        let folder = dir.join("input");
        std::fs::create_dir_all(&folder).unwrap();
        for i in 0..count {
            std::fs::write(folder.join(format!("room_{}.jpg", i)), b"jpeg").unwrap();
        }
        folder.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_upload_run_and_mark_done_in_auto_mode() {
        let dir = tempfile::tempdir().unwrap();
        let folder = write_images(dir.path(), 2);
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(FakeBackend::new());
        let mut cfg = config(dir.path());
        cfg.processing_mode = ProcessingMode::Auto;
        let mut app = App::with_backend(cfg, backend.clone(), store.clone());

        let session = app.start_upload(&folder).await.unwrap();
        assert_eq!(session.total_files(), 2);
        assert_eq!(session.files()[0].filename, "room_0.jpg");
        assert_eq!(app.active_tab(), ActiveTab::Ocr);

        let outcome = app.run().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(s) if s.reports == 2));

        // 自动标记完成：会话被清除，下次启动不再恢复
        assert!(app.session().is_none());
        assert_eq!(app.active_tab(), ActiveTab::Upload);
        let outcome = app.restore().await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::Fresh(FreshReason::MarkedDone)));
        assert_eq!(backend.created_count(), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_moves_to_report_tab() {
        let dir = tempfile::tempdir().unwrap();
        let folder = write_images(dir.path(), 1);
        let backend = Arc::new(FakeBackend::new());
        let mut app = App::with_backend(
            config(dir.path()),
            backend.clone(),
            Arc::new(MemoryStore::new()),
        );

        app.start_upload(&folder).await.unwrap();
        app.run().await.unwrap();
        assert_eq!(app.active_tab(), ActiveTab::Report);

        let mut fields = BTreeMap::new();
        fields.insert("phone".to_string(), "13900000000".to_string());
        assert!(app.generate_report(0, Some(fields)).await.unwrap());
        let report = app.session().unwrap().report(0).unwrap();
        assert_eq!(report.status, ReportStatus::Generated);
        assert_eq!(report.form_fields["phone"], "13900000000");
    }

    #[tokio::test]
    async fn test_restore_resumes_at_persisted_tab() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(
            FakeBackend::new().with_job(sample_job("job-9", 2), sample_files("job-9", 2)),
        );
        SessionStore::new(store.clone())
            .remember_job("job-9", ActiveTab::Report, ProcessingMode::Auto)
            .unwrap();

        let mut app = App::with_backend(config(dir.path()), backend, store);
        assert!(app.restore().await.unwrap().is_resume());
        assert_eq!(app.active_tab(), ActiveTab::Report);
        let session = app.session().unwrap();
        assert_eq!(session.job().id, "job-9");
        assert_eq!(session.mode(), ProcessingMode::Auto);
    }

    #[tokio::test]
    async fn test_skip_and_retry_call_backend() {
        let dir = tempfile::tempdir().unwrap();
        let folder = write_images(dir.path(), 2);
        let backend = Arc::new(FakeBackend::new().fail_ocr_fatal("f0"));
        let mut app = App::with_backend(
            config(dir.path()),
            backend.clone(),
            Arc::new(MemoryStore::new()),
        );
        app.start_upload(&folder).await.unwrap();

        // 先跳过第二个文件，重复跳过会被拒绝
        app.skip_file(1).await.unwrap();
        assert!(app.skip_file(1).await.is_err());

        app.run().await.unwrap();
        assert_eq!(app.session().unwrap().files()[0].status, FileStatus::Failed);

        app.retry_file(0).await.unwrap();
        assert_eq!(app.session().unwrap().files()[0].status, FileStatus::Pending);

        let calls = backend.calls();
        assert!(calls.contains(&"skip:f1".to_string()));
        assert!(calls.contains(&"retry:f0".to_string()));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let folder = write_images(dir.path(), 2);
        let mut app = App::with_backend(
            config(dir.path()),
            Arc::new(FakeBackend::new()),
            Arc::new(MemoryStore::new()),
        );
        app.start_upload(&folder).await.unwrap();

        app.pause_handle().store(true, Ordering::SeqCst);
        assert!(matches!(app.run().await.unwrap(), RunOutcome::Paused(_)));
        assert!(app.session().unwrap().is_paused());

        app.resume();
        assert!(matches!(app.run().await.unwrap(), RunOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_restored_interrupted_file_is_processed_before_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut files = sample_files("job-9", 2);
        files[0].status = FileStatus::Processing;
        let backend = Arc::new(FakeBackend::new().with_job(sample_job("job-9", 2), files));
        SessionStore::new(store.clone())
            .remember_job("job-9", ActiveTab::Progress, ProcessingMode::Auto)
            .unwrap();

        let mut app = App::with_backend(config(dir.path()), backend.clone(), store);
        assert!(app.restore().await.unwrap().is_resume());

        let outcome = app.run().await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Finished(s) if s.completed == 2 && s.pending == 0 && s.reports == 2
        ));
        assert!(backend.calls().contains(&"ocr:f0".to_string()));

        // 所有文件处理完后才标记完成
        assert!(app.session().is_none());
        let outcome = app.restore().await.unwrap();
        assert!(matches!(outcome, RestoreOutcome::Fresh(FreshReason::MarkedDone)));
    }

    #[tokio::test]
    async fn test_unfinished_stats_never_mark_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(
            FakeBackend::new().with_job(sample_job("job-9", 2), sample_files("job-9", 2)),
        );
        SessionStore::new(store.clone())
            .remember_job("job-9", ActiveTab::Progress, ProcessingMode::Auto)
            .unwrap();
        let mut app = App::with_backend(config(dir.path()), backend, store);
        app.restore().await.unwrap();

        let stats = JobStats::from_session(app.session().unwrap());
        app.finish(stats).unwrap();
        assert!(app.session().is_some());
        assert_eq!(app.active_tab(), ActiveTab::Progress);
    }

    #[tokio::test]
    async fn test_upload_keeps_session_when_storage_full() {
        let dir = tempfile::tempdir().unwrap();
        let folder = write_images(dir.path(), 1);
        let backend = Arc::new(FakeBackend::new());
        let mut app = App::with_backend(
            config(dir.path()),
            backend.clone(),
            Arc::new(MemoryStore::with_quota(4)),
        );

        let session = app.start_upload(&folder).await.unwrap();
        assert_eq!(session.job().id, "job-1");
        assert_eq!(app.active_tab(), ActiveTab::Ocr);
        assert_eq!(backend.created_count(), 1);
        assert!(app.session().is_some());
    }

    #[tokio::test]
    async fn test_initialize_rejects_missing_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            api_base_url: String::new(),
            ..config(dir.path())
        };
        let err = App::initialize(cfg).await.err().unwrap();
        assert!(err.to_string().contains("API_BASE_URL"));
        // 校验失败时不会创建日志文件
        assert!(!dir.path().join("output.txt").exists());
    }

    #[tokio::test]
    async fn test_run_without_session_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::with_backend(
            config(dir.path()),
            Arc::new(FakeBackend::new()),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(app.run().await.unwrap(), RunOutcome::Idle);
        assert!(app.start_upload(dir.path().to_str().unwrap()).await.is_err());
    }
}
