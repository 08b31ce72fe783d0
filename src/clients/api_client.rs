/// 检测业务后端 API 客户端
///
/// 封装所有与后端 REST API 的交互：登录、批处理、OCR、报告、订单与财务报表。
/// 后端统一返回 `{ code, message, data }` 信封，code 为 0 或 200 表示成功。
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clients::BatchBackend;
use crate::config::Config;
use crate::error::{ApiError, AppError, AppResult};
use crate::models::{
    BatchFileItem, BatchJob, BatchSettings, GeneratedReport, MonthlyReport, OcrResult, Order,
    OrderPage, OrderQuery, OrderStatus, ReportFormat, UploadFile,
};

/// 后端响应信封
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ReportData {
    report_url: String,
}

/// 检查信封业务码并取出数据
pub fn unwrap_envelope<T>(endpoint: &str, envelope: Envelope<T>) -> AppResult<Option<T>> {
    if envelope.code != 0 && envelope.code != 200 {
        return Err(AppError::Api(ApiError::BadResponse {
            endpoint: endpoint.to_string(),
            status: None,
            code: Some(envelope.code),
            message: envelope.message,
        }));
    }
    Ok(envelope.data)
}

/// 后端 API 客户端
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// 创建新的 API 客户端
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.read().await.as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// 发送请求并解析信封，HTTP 404 返回 `ApiError::NotFound`
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> AppResult<Option<T>> {
        let builder = self.authorized(builder).await;
        debug!("请求后端: {}", endpoint);

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(AppError::not_found(endpoint)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppError::Api(ApiError::Unauthorized {
                    endpoint: endpoint.to_string(),
                }))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(AppError::Api(ApiError::RateLimited {
                    endpoint: endpoint.to_string(),
                    retry_after,
                }));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<Value>>(&body)
                .ok()
                .and_then(|e| e.message)
                .or_else(|| (!body.is_empty()).then(|| body.clone()));
            return Err(AppError::Api(ApiError::BadResponse {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                code: None,
                message,
            }));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)?;
        unwrap_envelope(endpoint, envelope)
    }

    /// 与 `send` 相同，但要求 data 非空
    async fn send_required<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        builder: RequestBuilder,
    ) -> AppResult<T> {
        self.send(endpoint, builder).await?.ok_or_else(|| {
            AppError::Api(ApiError::EmptyResponse {
                endpoint: endpoint.to_string(),
            })
        })
    }

    // ========== 认证 ==========

    /// 登录并保存令牌
    pub async fn login(&self, username: &str, password: &str) -> AppResult<()> {
        let endpoint = "/api/auth/login";
        let builder = self
            .http
            .post(self.url(endpoint))
            .json(&json!({ "username": username, "password": password }));
        let data: LoginData = self.send_required(endpoint, builder).await?;
        *self.token.write().await = Some(data.token);
        info!("✓ 已登录后端: {}", username);
        Ok(())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.token.read().await.is_some()
    }

    // ========== 订单 ==========

    /// 查询订单列表
    pub async fn list_orders(&self, query: &OrderQuery) -> AppResult<OrderPage> {
        let endpoint = "/api/orders";
        let builder = self.http.get(self.url(endpoint)).query(&query.to_params());
        self.send_required(endpoint, builder).await
    }

    /// 更新订单状态
    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> AppResult<Order> {
        let endpoint = format!("/api/orders/{}/status", order_id);
        let builder = self
            .http
            .put(self.url(&endpoint))
            .json(&json!({ "status": status }));
        self.send_required(&endpoint, builder).await
    }

    // ========== 财务 ==========

    /// 获取月度财务报表
    pub async fn get_monthly_report(&self, year: i32, month: u32) -> AppResult<MonthlyReport> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Other(format!("月份超出范围: {}", month)));
        }
        let endpoint = "/api/finance/monthly";
        let builder = self
            .http
            .get(self.url(endpoint))
            .query(&[("year", year.to_string()), ("month", month.to_string())]);
        self.send_required(endpoint, builder).await
    }
}

#[async_trait]
impl BatchBackend for ApiClient {
    async fn create_batch_job(
        &self,
        name: &str,
        settings: &BatchSettings,
        files: &[UploadFile],
    ) -> AppResult<BatchJob> {
        let endpoint = "/api/batch/jobs";
        let mut form = multipart::Form::new()
            .text("name", name.to_string())
            .text("settings", serde_json::to_string(settings)?);

        for file in files {
            let bytes = tokio::fs::read(&file.path)
                .await
                .map_err(|e| AppError::file_read_failed(file.path.display().to_string(), e))?;
            let part = multipart::Part::bytes(bytes)
                .file_name(file.filename.clone())
                .mime_str(file.mime_type())?;
            form = form.part("files", part);
        }

        info!("📤 正在上传 {} 张图片...", files.len());
        let builder = self.http.post(self.url(endpoint)).multipart(form);
        self.send_required(endpoint, builder).await
    }

    async fn get_batch_job(&self, job_id: &str) -> AppResult<Option<BatchJob>> {
        let endpoint = format!("/api/batch/jobs/{}", job_id);
        let builder = self.http.get(self.url(&endpoint));
        match self.send(&endpoint, builder).await {
            Ok(job) => Ok(job),
            Err(AppError::Api(ApiError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_batch_files(&self, job_id: &str) -> AppResult<Vec<BatchFileItem>> {
        let endpoint = format!("/api/batch/jobs/{}/files", job_id);
        let builder = self.http.get(self.url(&endpoint));
        Ok(self.send(&endpoint, builder).await?.unwrap_or_default())
    }

    async fn run_file_ocr(&self, file_id: &str, settings: &BatchSettings) -> AppResult<OcrResult> {
        let endpoint = format!("/api/batch/files/{}/ocr", file_id);
        let builder = self.http.post(self.url(&endpoint)).json(&json!({
            "use_multi_ocr": settings.use_multi_ocr,
            "ocr_count": settings.ocr_count,
        }));
        self.send_required(&endpoint, builder).await
    }

    async fn skip_file(&self, file_id: &str) -> AppResult<()> {
        let endpoint = format!("/api/batch/files/{}/skip", file_id);
        let builder = self.http.post(self.url(&endpoint));
        self.send::<Value>(&endpoint, builder).await?;
        Ok(())
    }

    async fn retry_file(&self, file_id: &str) -> AppResult<()> {
        let endpoint = format!("/api/batch/files/{}/retry", file_id);
        let builder = self.http.post(self.url(&endpoint));
        self.send::<Value>(&endpoint, builder).await?;
        Ok(())
    }

    async fn generate_report(
        &self,
        report: &GeneratedReport,
        format: ReportFormat,
    ) -> AppResult<String> {
        let endpoint = "/api/reports/generate";
        let builder = self.http.post(self.url(endpoint)).json(&json!({
            "file_id": report.file_id,
            "title": report.title,
            "fields": report.form_fields,
            "format": format,
        }));
        let data: ReportData = self.send_required(endpoint, builder).await?;
        Ok(data.report_url)
    }

    async fn download_report(&self, url: &str) -> AppResult<Vec<u8>> {
        // 后端可能返回相对路径
        let full_url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.url(url)
        };
        let builder = self.authorized(self.http.get(&full_url)).await;
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(url, e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(url));
        }
        if !status.is_success() {
            return Err(AppError::Api(ApiError::BadResponse {
                endpoint: url.to_string(),
                status: Some(status.as_u16()),
                code: None,
                message: None,
            }));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::api_request_failed(url, e))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success_codes() {
        let ok: Envelope<BatchJob> = serde_json::from_str(
            r#"{"code":0,"data":{"id":"1","name":"批次","status":"running"}}"#,
        )
        .unwrap();
        let job = unwrap_envelope("/api/batch/jobs/1", ok).unwrap().unwrap();
        assert_eq!(job.id, "1");

        let also_ok: Envelope<Value> = serde_json::from_str(r#"{"code":200,"data":null}"#).unwrap();
        assert!(unwrap_envelope("/x", also_ok).unwrap().is_none());
    }

    #[test]
    fn test_envelope_business_error() {
        let err: Envelope<Value> =
            serde_json::from_str(r#"{"code":4001,"message":"图片无法识别"}"#).unwrap();
        match unwrap_envelope("/api/batch/files/1/ocr", err) {
            Err(AppError::Api(ApiError::BadResponse { code, message, .. })) => {
                assert_eq!(code, Some(4001));
                assert_eq!(message.as_deref(), Some("图片无法识别"));
            }
            other => panic!("应当返回业务错误, 实际为 {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = Config {
            api_base_url: "http://backend:8000/".into(),
            ..Config::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.url("/api/orders"), "http://backend:8000/api/orders");
    }

    #[tokio::test]
    async fn test_monthly_report_rejects_bad_month() {
        let client = ApiClient::new(&Config::default()).unwrap();
        assert!(client.get_monthly_report(2024, 13).await.is_err());
        assert!(!client.is_logged_in().await);
    }
}
