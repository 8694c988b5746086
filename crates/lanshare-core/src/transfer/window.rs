//! Send window: waits for a congested channel to drain.

use lanshare_transport::Channel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};

/// How a window wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Buffered amount at or below the high-water mark (or channel no
    /// longer open; the next send reports that)
    Open,
    /// Deadline passed while still congested; sending proceeds anyway
    DrainTimeout,
}

/// Wait until `channel` has at most `high_water` bytes buffered.
///
/// Wakes on the channel's low-water event, on every `poll` tick and at
/// `deadline`.
pub async fn wait_open<C>(
    channel: Arc<C>,
    high_water: usize,
    poll: Duration,
    deadline: Instant,
) -> WindowOutcome
where
    C: Channel + ?Sized,
{
    loop {
        if !channel.is_open() || channel.buffered_amount().await <= high_water {
            return WindowOutcome::Open;
        }
        if Instant::now() >= deadline {
            return WindowOutcome::DrainTimeout;
        }

        tokio::select! {
            () = channel.buffered_amount_low() => {}
            () = sleep(poll) => {}
            () = sleep_until(deadline) => {}
        }
    }
}
