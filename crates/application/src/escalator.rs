//! 未读提醒升级
//!
//! 每个好友两种状态：SILENT / PENDING。非聚焦好友来消息时进入 PENDING；
//! 一次提醒周期开始时只响一次提示音，同时启动标题闪烁，
//! 直到用户与应用交互或所有好友回到 SILENT。
//! 标题闪烁定时器归提醒器实例所有，随会话启动与停止。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::PeerId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::notifier::NotificationSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationConfig {
    pub base_title: String,
    pub flash_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            base_title: "MoonChat".to_string(),
            flash_interval: Duration::from_millis(500),
        }
    }
}

impl EscalationConfig {
    /// 带待提醒总数的标题，例如 `(3) MoonChat`
    pub fn decorated_title(&self, total: u32) -> String {
        decorate(&self.base_title, total)
    }
}

fn decorate(base: &str, total: u32) -> String {
    format!("({total}) {base}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Silent,
    Pending,
}

/// 标题写入点：闪烁任务和提醒器共用，停止后闪烁任务不能再改标题
struct TitleSlot {
    sink: Arc<dyn NotificationSink>,
    inner: Mutex<TitleSlotInner>,
}

struct TitleSlotInner {
    flashing: bool,
    current: String,
}

impl TitleSlot {
    fn new(sink: Arc<dyn NotificationSink>, initial: String) -> Self {
        Self {
            sink,
            inner: Mutex::new(TitleSlotInner {
                flashing: false,
                current: initial,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TitleSlotInner> {
        // 持锁期间只做字符串赋值和一次同步调用，中毒时沿用内部数据
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 闪烁任务写标题；已停止时返回 false
    fn flash(&self, title: String) -> bool {
        let mut inner = self.lock();
        if !inner.flashing {
            return false;
        }
        self.sink.set_title(&title);
        inner.current = title;
        true
    }

    /// 停止闪烁并把标题定在 `title`
    fn rest(&self, title: String) {
        let mut inner = self.lock();
        inner.flashing = false;
        if inner.current != title {
            self.sink.set_title(&title);
            inner.current = title;
        }
    }

    fn set_flashing(&self) {
        self.lock().flashing = true;
    }

    fn current(&self) -> String {
        self.lock().current.clone()
    }
}

/// 标题闪烁定时器：在基础标题与带计数标题之间交替
struct TitleFlasher {
    cancel: CancellationToken,
    total: watch::Sender<u32>,
    task: JoinHandle<()>,
}

impl TitleFlasher {
    fn start(
        slot: Arc<TitleSlot>,
        config: &EscalationConfig,
        total: u32,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let (total_tx, total_rx) = watch::channel(total);
        let base = config.base_title.clone();
        let period = config.flash_interval;
        slot.set_flashing();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut decorated = true;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let title = if decorated {
                            decorate(&base, *total_rx.borrow())
                        } else {
                            base.clone()
                        };
                        if !slot.flash(title) {
                            break;
                        }
                        decorated = !decorated;
                    }
                }
            }
            debug!("标题闪烁任务退出");
        });

        Self {
            cancel,
            total: total_tx,
            task,
        }
    }

    fn update_total(&self, total: u32) {
        self.total.send_replace(total);
    }

    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

pub struct NotificationEscalator {
    config: EscalationConfig,
    sink: Arc<dyn NotificationSink>,
    slot: Arc<TitleSlot>,
    pending: HashSet<PeerId>,
    total: u32,
    flasher: Option<TitleFlasher>,
    cancel: CancellationToken,
}

impl NotificationEscalator {
    /// `cancel` 为会话的取消令牌，闪烁任务是它的子任务
    pub fn new(
        config: EscalationConfig,
        sink: Arc<dyn NotificationSink>,
        cancel: CancellationToken,
    ) -> Self {
        let slot = Arc::new(TitleSlot::new(sink.clone(), config.base_title.clone()));
        Self {
            config,
            sink,
            slot,
            pending: HashSet::new(),
            total: 0,
            flasher: None,
            cancel,
        }
    }

    pub fn state(&self, peer: PeerId) -> EscalationState {
        if self.pending.contains(&peer) {
            EscalationState::Pending
        } else {
            EscalationState::Silent
        }
    }

    pub fn is_flashing(&self) -> bool {
        self.flasher.is_some()
    }

    pub fn total_pending(&self) -> u32 {
        self.total
    }

    /// 当前显示的窗口标题
    pub fn current_title(&self) -> String {
        self.slot.current()
    }

    /// 非聚焦好友来了未读消息；`total` 为所有好友待提醒数之和
    ///
    /// 提示音只在第一个好友从 SILENT 进入 PENDING 时响一次；
    /// 用户交互后仍有好友待提醒时，新消息只重新开始闪烁，不再响。
    pub fn on_unread_arrival(&mut self, peer: PeerId, total: u32) {
        let first_pending = self.pending.is_empty();
        let entered = self.pending.insert(peer);
        self.total = total;

        if entered && first_pending {
            info!(peer = %peer, total, "新的未读提醒周期开始");
            self.sink.audible_cue();
        }

        match &self.flasher {
            Some(flasher) => flasher.update_total(total),
            None => {
                self.flasher = Some(TitleFlasher::start(
                    self.slot.clone(),
                    &self.config,
                    total,
                    &self.cancel,
                ));
            }
        }
    }

    /// 用户打开了 `peer` 的会话，该好友回到 SILENT
    pub fn on_peer_cleared(&mut self, peer: PeerId, total: u32) {
        let was_pending = self.pending.remove(&peer);
        self.total = total;

        if self.pending.is_empty() {
            if was_pending {
                debug!(peer = %peer, "所有好友回到静默");
            }
            self.stop_flashing();
            self.slot.rest(self.config.base_title.clone());
            return;
        }

        match &self.flasher {
            Some(flasher) => flasher.update_total(total),
            None => self.slot.rest(self.config.decorated_title(total)),
        }
    }

    /// 用户与应用发生了交互：停止闪烁，标题停在当前待提醒数上
    pub fn on_attention(&mut self) {
        self.stop_flashing();
        let title = if self.pending.is_empty() {
            self.config.base_title.clone()
        } else {
            self.config.decorated_title(self.total)
        };
        self.slot.rest(title);
    }

    /// 会话结束：停止闪烁定时器
    pub fn shutdown(&mut self) {
        self.stop_flashing();
    }

    fn stop_flashing(&mut self) {
        if let Some(flasher) = self.flasher.take() {
            // 先落标志位，闪烁任务即使已被调度也不会再写标题
            self.slot.rest(self.slot.current());
            flasher.stop();
        }
    }
}

impl Drop for NotificationEscalator {
    fn drop(&mut self) {
        self.stop_flashing();
    }
}

impl std::fmt::Debug for NotificationEscalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEscalator")
            .field("pending", &self.pending)
            .field("total", &self.total)
            .field("flashing", &self.is_flashing())
            .finish()
    }
}
