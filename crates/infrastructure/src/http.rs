//! REST 客户端
//!
//! 好友目录、历史记录、已读标记、附件上传四个接口共用一个 `reqwest::Client`。
//! 所有响应都是 `{code, msg, data}` 信封。

use std::time::Duration;

use application::{
    AttachmentService, DirectoryService, HistoryService, ReadReceiptService, ServiceError,
};
use async_trait::async_trait;
use domain::{Message, Peer, PeerId};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::wire::{ApiEnvelope, WireChatMessage, WireFriend, WirePage};

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credential: String,
}

impl HttpChatApi {
    pub fn new(
        base_url: impl Into<String>,
        credential: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::unavailable(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, ServiceError> {
        let response = request
            .bearer_auth(&self.credential)
            .send()
            .await
            .map_err(|e| ServiceError::unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ServiceError::unavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                code: i32::from(status.as_u16()),
                message,
            });
        }

        response
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DirectoryService for HttpChatApi {
    async fn list_peers(&self) -> Result<Vec<Peer>, ServiceError> {
        let friends: Vec<WireFriend> = self
            .execute::<Vec<WireFriend>>(self.client.get(self.url("/api/friend/list")))
            .await?
            .into_result()?
            .unwrap_or_default();
        Ok(friends.into_iter().map(WireFriend::into_peer).collect())
    }
}

#[async_trait]
impl HistoryService for HttpChatApi {
    async fn fetch_history(
        &self,
        peer: PeerId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, ServiceError> {
        let request = self.client.get(self.url("/api/chat/history")).query(&[
            ("friendId", peer.0.to_string()),
            ("page", page.to_string()),
            ("size", page_size.to_string()),
        ]);
        let page = self
            .execute::<WirePage<WireChatMessage>>(request)
            .await?
            .into_data()?;

        let mut messages = Vec::with_capacity(page.records.len());
        for record in page.records {
            match record.into_message() {
                Ok(message) => messages.push(message),
                // 单条坏记录不影响整页
                Err(reason) => warn!(peer = %peer, reason = %reason, "跳过无法解析的历史记录"),
            }
        }
        debug!(peer = %peer, count = messages.len(), total = ?page.total, "历史记录已获取");
        Ok(messages)
    }
}

#[async_trait]
impl ReadReceiptService for HttpChatApi {
    async fn mark_conversation_read(&self, peer: PeerId) -> Result<(), ServiceError> {
        let request = self
            .client
            .put(self.url("/api/chat/read"))
            .json(&json!({ "friendId": peer.0 }));
        self.execute::<serde_json::Value>(request)
            .await?
            .into_result()?;
        Ok(())
    }
}

#[async_trait]
impl AttachmentService for HttpChatApi {
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ServiceError> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let request = self.client.post(self.url("/api/chat/upload")).multipart(form);
        self.execute::<String>(request).await?.into_data()
    }
}
