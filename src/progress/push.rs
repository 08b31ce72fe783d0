//! WebSocket 推送通道

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use async_trait::async_trait;

use super::{is_final_event, ProgressSource, SourceKind};
use crate::error::{AppError, AppResult};
use crate::models::{BatchJobStatus, FileUpdate, ProgressEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 服务端推送的消息
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PushMessage {
    JobProgress {
        job_id: String,
        status: BatchJobStatus,
        #[serde(default)]
        progress_percentage: f64,
    },
    FileUpdate {
        job_id: String,
        file: FileUpdate,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    fn into_event(self) -> Option<ProgressEvent> {
        match self {
            PushMessage::JobProgress {
                job_id,
                status,
                progress_percentage,
            } => Some(ProgressEvent::job(job_id, status, progress_percentage)),
            PushMessage::FileUpdate { job_id, file } => Some(ProgressEvent::file(job_id, file)),
            PushMessage::Ping | PushMessage::Unknown => None,
        }
    }
}

pub struct PushProgressSource {
    url: String,
    stream: Option<WsStream>,
    job_id: Option<String>,
    finished: bool,
}

impl PushProgressSource {
    /// 建立 WebSocket 连接
    pub async fn connect(url: &str) -> AppResult<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| AppError::websocket(url, e))?;
        Ok(Self {
            url: url.to_string(),
            stream: Some(stream),
            job_id: None,
            finished: false,
        })
    }

    fn stream(&mut self) -> AppResult<&mut WsStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| AppError::Other(format!("推送通道已关闭: {}", self.url)))
    }

    async fn send_action(&mut self, action: &str, job_id: &str) -> AppResult<()> {
        let payload = json!({ "action": action, "job_id": job_id }).to_string();
        let url = self.url.clone();
        self.stream()?
            .send(Message::Text(payload))
            .await
            .map_err(|e| AppError::websocket(url, e))
    }
}

#[async_trait]
impl ProgressSource for PushProgressSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Push
    }

    async fn subscribe(&mut self, job_id: &str) -> AppResult<()> {
        self.send_action("subscribe", job_id).await?;
        self.job_id = Some(job_id.to_string());
        self.finished = false;
        info!("📡 已订阅任务 {} 的进度", job_id);
        Ok(())
    }

    async fn next_event(&mut self) -> AppResult<Option<ProgressEvent>> {
        if self.finished {
            return Ok(None);
        }
        let Some(job_id) = self.job_id.clone() else {
            return Ok(None);
        };
        let url = self.url.clone();

        loop {
            let message = match self.stream()?.next().await {
                Some(Ok(message)) => message,
                // 连接出错后不再可用，按断开处理，由调用方改用轮询
                Some(Err(e)) => {
                    warn!("⚠️ 推送通道出错，已断开 ({}): {}", url, e);
                    self.stream = None;
                    return Ok(None);
                }
                None => {
                    warn!("⚠️ 推送通道已断开: {}", url);
                    self.stream = None;
                    return Ok(None);
                }
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    info!("推送通道关闭: {:?}", frame);
                    self.stream = None;
                    return Ok(None);
                }
                _ => continue,
            };

            let event = match serde_json::from_str::<PushMessage>(&text) {
                Ok(msg) => msg.into_event(),
                Err(e) => {
                    warn!("⚠️ 无法解析推送消息: {}", e);
                    None
                }
            };

            match event {
                Some(event) if event.job_id == job_id => {
                    self.finished = is_final_event(&event);
                    return Ok(Some(event));
                }
                Some(event) => debug!("忽略其他任务的推送: {}", event.job_id),
                None => {}
            }
        }
    }

    async fn unsubscribe(&mut self) -> AppResult<()> {
        let Some(job_id) = self.job_id.take() else {
            return Ok(());
        };
        if self.stream.is_some() {
            self.send_action("unsubscribe", &job_id).await?;
        }
        Ok(())
    }

    async fn dispose(&mut self) -> AppResult<()> {
        self.job_id = None;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("关闭推送通道时出错: {}", e);
            }
        }
        Ok(())
    }
}
