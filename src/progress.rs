//! 工作任务 -> 协调者的事件通道
//!
//! 工作任务只管发送，从不等待接收方：通道满了或接收方已经离开时事件直接丢弃，
//! 同时每条事件都会写入日志。通道末尾的几个槽位只留给错误事件，
//! 仍然丢失的错误会被计数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 事件通道容量
pub const EVENT_BUFFER: usize = 64;

/// 只留给错误事件的槽位数
pub const ERROR_RESERVE: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress { message: String, percent: u8 },
    Error(String),
}

/// 进度/错误上报句柄
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::Sender<WorkerEvent>>,
    dropped_errors: Arc<AtomicUsize>,
}

impl Reporter {
    /// 创建一对上报句柄和接收端
    pub fn channel() -> (Self, mpsc::Receiver<WorkerEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                tx: Some(tx),
                dropped_errors: Arc::default(),
            },
            rx,
        )
    }

    /// 不上报任何事件（只写日志）
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn progress(&self, message: impl Into<String>, percent: u8) {
        let message = message.into();
        log::info!("[{:>3}%] {}", percent, message);
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.capacity() <= ERROR_RESERVE {
            log::debug!("通道将满，丢弃进度事件");
            return;
        }
        if let Err(e) = tx.try_send(WorkerEvent::Progress {
            message,
            percent: percent.min(100),
        }) {
            log::debug!("事件未送达: {}", e);
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(WorkerEvent::Error(message)) {
            log::debug!("错误事件未送达: {}", e);
            self.dropped_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 未能送达接收方的错误事件数
    pub fn dropped_errors(&self) -> usize {
        self.dropped_errors.load(Ordering::Relaxed)
    }
}

/// 按位置计算百分比（0..=100）
pub fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[cfg(test)]
pub fn drain(rx: &mut mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
