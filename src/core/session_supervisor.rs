//! 运行监管：同一时刻只有一个接力控制流
//!
//! 持有唯一的在途运行句柄（CancellationToken + JoinHandle）；启动新运行前先取消旧运行。

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveRun {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// 运行监管器
#[derive(Debug, Default)]
pub struct RelaySupervisor {
    active: Mutex<Option<ActiveRun>>,
}

impl RelaySupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 取消旧运行并以新令牌启动 flow
    pub fn launch<F, Fut>(&self, flow: F) -> CancellationToken
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.lock();
        if let Some(previous) = active.take() {
            tracing::info!("Superseding active relay run");
            previous.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(flow(cancel.clone()));
        *active = Some(ActiveRun {
            cancel: cancel.clone(),
            handle: Some(handle),
        });
        cancel
    }

    /// 触发取消（协作式，在途调用在检查点收尾）
    pub fn cancel(&self) {
        if let Some(run) = self.lock().as_ref() {
            run.cancel.cancel();
        }
    }

    /// 等待当前运行结束
    pub async fn wait(&self) {
        let handle = self.lock().as_mut().and_then(|run| run.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Relay task ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_launch_supersedes_previous() {
        let supervisor = RelaySupervisor::new();
        let first = supervisor.launch(|token| async move { token.cancelled().await });
        let second = supervisor.launch(|_| async {});
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        supervisor.wait().await;
    }

    #[tokio::test]
    async fn test_cancel_reaches_flow() {
        let supervisor = RelaySupervisor::new();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        let token = supervisor.launch(move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        supervisor.cancel();
        supervisor.wait().await;
        assert!(observed.load(Ordering::SeqCst));
        assert!(token.is_cancelled());
    }
}
