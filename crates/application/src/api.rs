//! 外部服务抽象
//!
//! 目录服务、历史服务、已读回执服务、附件服务，核心逻辑只依赖这些接口。

use async_trait::async_trait;
use domain::{Message, Peer, PeerId};

use crate::error::ServiceError;

/// 好友目录：只提供已授权的好友及其在线状态
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn list_peers(&self) -> Result<Vec<Peer>, ServiceError>;
}

/// 历史消息查询
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// 分页获取与 `peer` 的双向历史，按最新在前返回；`page` 从 1 开始
    async fn fetch_history(
        &self,
        peer: PeerId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, ServiceError>;
}

/// 已读回执
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReadReceiptService: Send + Sync {
    /// 将 `peer` 发给本端的消息全部标记为已读，服务端会向 `peer` 推送回执
    async fn mark_conversation_read(&self, peer: PeerId) -> Result<(), ServiceError>;
}

/// 附件上传
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AttachmentService: Send + Sync {
    /// 上传成功后返回附件 URI，作为图片消息的内容
    async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, ServiceError>;
}
