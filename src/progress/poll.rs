//! REST 轮询通道
//!
//! 定时拉取任务和文件列表，与上一次快照对比，把变化转换成进度事件。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{is_final_event, ProgressSource, SourceKind};
use crate::clients::BatchBackend;
use crate::error::AppResult;
use crate::models::{
    BatchFileItem, BatchJob, BatchJobStatus, FileStatus, FileUpdate, ProgressEvent,
};

pub struct PollProgressSource {
    backend: Arc<dyn BatchBackend>,
    interval: Duration,
    job_id: Option<String>,
    last_status: HashMap<String, FileStatus>,
    last_job: Option<(BatchJobStatus, f64)>,
    queue: VecDeque<ProgressEvent>,
    polled_once: bool,
    finished: bool,
}

impl PollProgressSource {
    pub fn new(backend: Arc<dyn BatchBackend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            job_id: None,
            last_status: HashMap::new(),
            last_job: None,
            queue: VecDeque::new(),
            polled_once: false,
            finished: false,
        }
    }

    /// 对比快照，把变化放入队列
    fn diff(&mut self, job: &BatchJob, files: Vec<BatchFileItem>) {
        for file in files {
            let previous = self.last_status.insert(file.id.clone(), file.status);
            let changed = match previous {
                Some(previous) => previous != file.status,
                // 第一次见到的文件只关心已经开始的
                None => file.status != FileStatus::Pending,
            };
            if changed {
                self.queue.push_back(ProgressEvent::file(
                    job.id.clone(),
                    FileUpdate {
                        file_id: file.id,
                        status: file.status,
                        ocr_result: file.ocr_result,
                        error_message: file.error_message,
                        processing_time_seconds: file.processing_time_seconds,
                    },
                ));
            }
        }

        let current = (job.status, job.progress_percentage);
        if self.last_job != Some(current) {
            self.last_job = Some(current);
            self.queue.push_back(ProgressEvent::job(
                job.id.clone(),
                job.status,
                job.progress_percentage,
            ));
        }
    }

    async fn poll(&mut self, job_id: &str) -> AppResult<bool> {
        let Some(job) = self.backend.get_batch_job(job_id).await? else {
            warn!("⚠️ 轮询时任务 {} 已不存在", job_id);
            return Ok(false);
        };
        let files = self.backend.list_batch_files(job_id).await?;
        debug!("轮询任务 {}: {} ({:.0}%)", job_id, job.status, job.progress_percentage);
        self.diff(&job, files);
        Ok(true)
    }
}

#[async_trait]
impl ProgressSource for PollProgressSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Poll
    }

    async fn subscribe(&mut self, job_id: &str) -> AppResult<()> {
        self.job_id = Some(job_id.to_string());
        self.last_status.clear();
        self.last_job = None;
        self.queue.clear();
        self.polled_once = false;
        self.finished = false;
        Ok(())
    }

    async fn next_event(&mut self) -> AppResult<Option<ProgressEvent>> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                if is_final_event(&event) {
                    self.finished = true;
                }
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            let Some(job_id) = self.job_id.clone() else {
                return Ok(None);
            };

            if self.polled_once {
                sleep(self.interval).await;
            }
            self.polled_once = true;

            if !self.poll(&job_id).await? {
                self.finished = true;
            }
        }
    }

    async fn unsubscribe(&mut self) -> AppResult<()> {
        self.job_id = None;
        self.queue.clear();
        Ok(())
    }

    async fn dispose(&mut self) -> AppResult<()> {
        self.unsubscribe().await?;
        self.last_status.clear();
        Ok(())
    }
}
