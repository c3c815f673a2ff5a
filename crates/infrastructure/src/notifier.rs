use std::sync::Mutex;

use application::NotificationSink;
use tracing::info;

/// 没有窗口的终端环境：提示音和标题变化写入日志
#[derive(Debug)]
pub struct TracingNotificationSink {
    title: Mutex<String>,
}

impl TracingNotificationSink {
    pub fn new(initial_title: impl Into<String>) -> Self {
        Self {
            title: Mutex::new(initial_title.into()),
        }
    }

    pub fn current_title(&self) -> String {
        self.title
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl NotificationSink for TracingNotificationSink {
    fn audible_cue(&self) {
        info!(target: "moonchat::notify", "提示音：新消息");
    }

    fn set_title(&self, title: &str) {
        let mut current = self.title.lock().unwrap_or_else(|p| p.into_inner());
        if *current != title {
            info!(target: "moonchat::notify", title, "窗口标题");
            *current = title.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_last_title() {
        let sink = TracingNotificationSink::new("MoonChat");
        sink.set_title("(2) MoonChat");
        sink.audible_cue();
        assert_eq!(sink.current_title(), "(2) MoonChat");
    }
}
