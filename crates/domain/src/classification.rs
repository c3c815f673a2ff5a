//! 消息类型归类
//!
//! 旧数据里有不少图片消息被标成了文本，这里按内容是否像附件路径做一次兜底归类。
//! 归类只在入库时执行一次，并且是幂等的。

use crate::entities::message::MessageKind;

const ATTACHMENT_DIRS: [&str; 2] = ["/files/", "/uploads/"];
const IMAGE_EXTENSIONS: [&str; 7] = ["jpeg", "jpg", "gif", "png", "bmp", "webp", "svg"];

/// 决定消息最终类型的策略
pub trait KindClassifier: Send + Sync {
    fn classify(&self, tagged: MessageKind, content: &str) -> MessageKind;
}

/// 兼容旧数据的附件路径归类
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyAttachmentClassifier;

impl LegacyAttachmentClassifier {
    /// 内容是否像附件路径
    pub fn looks_like_attachment(content: &str) -> bool {
        let lower = content.trim().to_lowercase();
        if lower.is_empty() {
            return false;
        }
        if ATTACHMENT_DIRS.iter().any(|dir| lower.contains(dir)) {
            return true;
        }
        // 扩展名可能在查询串之前，也可能就在查询串末尾（`img?id=cat.png`）
        let before_query = lower.split_once('?').map(|(path, _)| path);
        has_image_extension(&lower) || before_query.is_some_and(has_image_extension)
    }
}

fn has_image_extension(value: &str) -> bool {
    value
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

impl KindClassifier for LegacyAttachmentClassifier {
    fn classify(&self, tagged: MessageKind, content: &str) -> MessageKind {
        match tagged {
            MessageKind::Image => MessageKind::Image,
            MessageKind::Text if Self::looks_like_attachment(content) => MessageKind::Image,
            MessageKind::Text => MessageKind::Text,
        }
    }
}
