//! Watchdog heartbeat to the rotator controller.
//!
//! The controller stops the motor if it hears nothing for a while. While no
//! client-commanded rotation is in progress the bridge sends `STOP` once per
//! period, which both keeps the watchdog fed and guarantees the motor stays
//! still. During a rotation the heartbeat stays silent so it cannot cancel
//! the motion.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::serial::{LinkError, SerialLink};

/// Command sent on each heartbeat.
pub const HEARTBEAT_COMMAND: &str = "STOP";

/// Result of a single heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beat {
    /// `STOP` was written to the device
    Sent,
    /// A rotation is in progress; nothing was sent
    SkippedRotating,
    /// No device connected; nothing was sent
    NotConnected,
    /// The write failed (already reported by the link)
    Failed(LinkError),
}

/// Performs one heartbeat tick.
pub async fn beat(link: &SerialLink) -> Beat {
    if link.is_rotating() {
        return Beat::SkippedRotating;
    }

    match link.write(HEARTBEAT_COMMAND).await {
        Ok(()) => Beat::Sent,
        Err(LinkError::NotConnected) => Beat::NotConnected,
        Err(e) => Beat::Failed(e),
    }
}

/// Spawns the heartbeat task.
///
/// The first beat happens one period after start, then once per period
/// until `cancel` fires.
pub fn spawn_heartbeat(
    link: SerialLink,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = period.as_millis() as u64, "Heartbeat started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Heartbeat shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    match beat(&link).await {
                        Beat::Sent => trace!("Heartbeat sent"),
                        Beat::SkippedRotating => trace!("Heartbeat skipped: rotating"),
                        Beat::NotConnected => trace!("Heartbeat skipped: device not connected"),
                        Beat::Failed(e) => debug!(error = %e, "Heartbeat write failed"),
                    }
                }
            }
        }
    })
}
