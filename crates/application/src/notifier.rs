/// 用户可感知的提醒出口：提示音与窗口标题
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn audible_cue(&self);

    fn set_title(&self, title: &str);
}
