//! 测试用的内存后端

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::clients::BatchBackend;
use crate::error::{ApiError, AppError, AppResult};
use crate::models::{
    BatchFileItem, BatchJob, BatchJobStatus, BatchSettings, FileStatus, GeneratedReport,
    OcrResult, PointValue, ReportFormat, UploadFile,
};

pub fn sample_job(id: &str, total: usize) -> BatchJob {
    BatchJob {
        id: id.to_string(),
        name: format!("批次 {}", id),
        status: BatchJobStatus::Pending,
        total_files: total,
        processed_files: 0,
        failed_files: 0,
        progress_percentage: 0.0,
        settings: BatchSettings::default(),
        created_at: None,
    }
}

pub fn sample_files(job_id: &str, total: usize) -> Vec<BatchFileItem> {
    (0..total)
        .map(|i| BatchFileItem {
            id: format!("f{}", i),
            job_id: job_id.to_string(),
            filename: format!("report_{}.jpg", i),
            file_size: 1024,
            status: FileStatus::Pending,
            ocr_result: None,
            error_message: None,
            processing_time_seconds: None,
        })
        .collect()
}

pub fn sample_ocr() -> OcrResult {
    OcrResult {
        phone: Some("13812345678".into()),
        date: Some("2024-03-05".into()),
        temperature: Some("22".into()),
        humidity: Some("40%".into()),
        points: vec![PointValue {
            location: "主卧".into(),
            value: "0.03".into(),
        }],
        raw_text: None,
    }
}

fn timeout() -> AppError {
    AppError::api_request_failed(
        "/fake",
        std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
    )
}

#[derive(Default)]
struct FakeState {
    jobs: HashMap<String, BatchJob>,
    files: HashMap<String, Vec<BatchFileItem>>,
    job_fetch_failures: u32,
    ocr_transient: HashMap<String, u32>,
    ocr_fatal: HashSet<String>,
    snapshots: VecDeque<(BatchJob, Vec<BatchFileItem>)>,
    calls: Vec<String>,
    created: usize,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, job: BatchJob, files: Vec<BatchFileItem>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.files.insert(job.id.clone(), files);
            state.jobs.insert(job.id.clone(), job);
        }
        self
    }

    /// 前 n 次查询任务返回超时
    pub fn fail_job_fetch(self, n: u32) -> Self {
        self.state.lock().unwrap().job_fetch_failures = n;
        self
    }

    pub fn fail_ocr_transient(self, file_id: &str, n: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .ocr_transient
            .insert(file_id.to_string(), n);
        self
    }

    pub fn fail_ocr_fatal(self, file_id: &str) -> Self {
        self.state.lock().unwrap().ocr_fatal.insert(file_id.to_string());
        self
    }

    /// 轮询时依次返回的快照
    pub fn push_snapshot(&self, job: BatchJob, files: Vec<BatchFileItem>) {
        self.state.lock().unwrap().snapshots.push_back((job, files));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

#[async_trait]
impl BatchBackend for FakeBackend {
    async fn create_batch_job(
        &self,
        name: &str,
        settings: &BatchSettings,
        files: &[UploadFile],
    ) -> AppResult<BatchJob> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("job-{}", state.created);
        state.calls.push(format!("create:{}", id));

        let mut job = sample_job(&id, files.len());
        job.name = name.to_string();
        job.settings = settings.clone();
        let mut items = sample_files(&id, files.len());
        for (item, file) in items.iter_mut().zip(files) {
            item.filename = file.filename.clone();
            item.file_size = file.size;
        }
        state.files.insert(id.clone(), items);
        state.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_batch_job(&self, job_id: &str) -> AppResult<Option<BatchJob>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_job:{}", job_id));
        if state.job_fetch_failures > 0 {
            state.job_fetch_failures -= 1;
            return Err(timeout());
        }
        if let Some((job, _)) = state.snapshots.front() {
            return Ok(Some(job.clone()));
        }
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn list_batch_files(&self, job_id: &str) -> AppResult<Vec<BatchFileItem>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_files:{}", job_id));
        if let Some((_, files)) = state.snapshots.pop_front() {
            return Ok(files);
        }
        Ok(state.files.get(job_id).cloned().unwrap_or_default())
    }

    async fn run_file_ocr(&self, file_id: &str, _settings: &BatchSettings) -> AppResult<OcrResult> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("ocr:{}", file_id));
        if state.ocr_fatal.contains(file_id) {
            return Err(AppError::Api(ApiError::BadResponse {
                endpoint: format!("/api/batch/files/{}/ocr", file_id),
                status: Some(422),
                code: Some(4001),
                message: Some("图片无法识别".into()),
            }));
        }
        if let Some(remaining) = state.ocr_transient.get_mut(file_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(timeout());
            }
        }
        Ok(sample_ocr())
    }

    async fn skip_file(&self, file_id: &str) -> AppResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("skip:{}", file_id));
        Ok(())
    }

    async fn retry_file(&self, file_id: &str) -> AppResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("retry:{}", file_id));
        Ok(())
    }

    async fn generate_report(
        &self,
        report: &GeneratedReport,
        format: ReportFormat,
    ) -> AppResult<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("report:{}", report.file_id));
        Ok(format!(
            "http://reports.local/{}.{}",
            report.file_id,
            format.extension()
        ))
    }

    async fn download_report(&self, url: &str) -> AppResult<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("download:{}", url));
        Ok(b"PK fake docx".to_vec())
    }
}
