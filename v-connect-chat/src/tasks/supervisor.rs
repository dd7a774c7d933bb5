use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use v::{sleep_or_cancel, Backoff};

use crate::error::Result;

/// 监督循环：运行一次会话，失败后按退避重试，直到取消
/// Supervised loop: run one session, back off on failure, repeat until cancelled.
///
/// 返回 `Ok(())` 表示已取消；终止性错误（客户端已关闭）原样返回。
/// `Ok(())` means cancelled; terminal errors are returned as-is.
pub async fn supervise<F, Fut>(
    component: &str,
    cancel: &CancellationToken,
    backoff: Backoff,
    mut run_once: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            info!(component, "🛑 supervised task cancelled");
            return Ok(());
        }

        let delay = match run_once().await {
            Ok(()) if cancel.is_cancelled() => continue,
            Ok(()) => {
                debug!(component, "session ended, restarting");
                attempt = 0;
                backoff.delay(0)
            }
            Err(e) if e.is_terminal() => {
                error!(component, error = %e, "terminal error, stopping");
                return Err(e);
            }
            Err(e) => {
                let delay = backoff.delay(attempt);
                error!(
                    component,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "failed to consume message"
                );
                attempt = attempt.saturating_add(1);
                delay
            }
        };

        if !sleep_or_cancel(delay, cancel).await {
            info!(component, "🛑 supervised task cancelled during backoff");
            return Ok(());
        }
    }
}
