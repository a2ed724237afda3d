//! Retry decisions for node attempts.
//!
//! Stateless: every decision is a function of the node's `RetryPolicy` and
//! the 1-based attempt number that just failed.

use std::time::Duration;

use capflow_types::workflow::WorkflowNode;
use tokio_util::sync::CancellationToken;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then start attempt `next_attempt`.
    RetryAfter { delay: Duration, next_attempt: u32 },
    /// Attempts are exhausted; the node fails.
    GiveUp,
}

pub struct RetryHandler;

impl RetryHandler {
    /// Decide what follows failed attempt `attempt` of `node`.
    pub fn decide(node: &WorkflowNode, attempt: u32) -> RetryDecision {
        if attempt >= node.max_attempts() {
            return RetryDecision::GiveUp;
        }
        let delay = node
            .retry
            .as_ref()
            .map(|policy| policy.delay_for(attempt))
            .unwrap_or(Duration::ZERO);
        RetryDecision::RetryAfter {
            delay,
            next_attempt: attempt + 1,
        }
    }

    /// Sleep for `delay` unless `cancel` fires first.
    ///
    /// Returns `false` when the wait was interrupted.
    pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
