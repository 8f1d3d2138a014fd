//! 修订信箱：能力调用上下文 -> 编排器的单槽交接
//!
//! 生成端可能在自己的执行上下文里调用 request_revision，与等待它的编排流并发；
//! 因此槽位与「本次尝试已请求」标记放在同一把互斥锁里。

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// 待处理的修订请求（只在信箱里短暂存在）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionRequest {
    pub requester: String,
    pub target: String,
    pub instruction: String,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<RevisionRequest>,
    requested_this_attempt: bool,
}

/// 单槽信箱，克隆后共享同一槽位
#[derive(Debug, Clone, Default)]
pub struct RevisionMailbox {
    inner: Arc<Mutex<Slot>>,
}

impl RevisionMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 每次调用尝试（含重试）开始前清除标记
    pub fn reset_for_attempt(&self) {
        self.lock().requested_this_attempt = false;
    }

    /// 本次尝试内第一次设置成功；之后的设置被拒绝且不覆盖已有请求
    pub fn try_set(&self, request: RevisionRequest) -> bool {
        let mut slot = self.lock();
        if slot.requested_this_attempt {
            return false;
        }
        slot.requested_this_attempt = true;
        slot.pending = Some(request);
        true
    }

    /// 原子地取出并清空
    pub fn consume(&self) -> Option<RevisionRequest> {
        self.lock().pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}
