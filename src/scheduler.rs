use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::Mutex;

use crate::transport::Transport;

/// RTCP bandwidth share: interval_ms = 360_000 / rate_kbps allocates about
/// five percent of the link for a session of ~1000-bit average packets.
const RTCP_INTERVAL_NUMERATOR: u64 = 360_000;

pub(crate) fn next_interval(rate_kbps: u32, max_interval_ms: u64) -> u64 {
    if rate_kbps == 0 {
        return max_interval_ms;
    }

    let interval = RTCP_INTERVAL_NUMERATOR / u64::from(rate_kbps);
    interval.min(max_interval_ms)
}

/// Vary the interval over [0.5, 1.5] times the computed value to avoid
/// synchronization across participants.
pub(crate) fn randomize_interval(interval_ms: u64) -> u64 {
    let factor = rand::thread_rng().gen_range(5..=15u64);
    interval_ms * factor / 10
}

/// Drive a transport's periodic RTCP until it is closed. One-shot
/// rearming: every fire asks the transport for the next interval.
pub(crate) async fn run_rtcp_loop(transport: Arc<Mutex<Transport>>) {
    let (id, stop_receiver, mut interval) = {
        let mut locked = transport.lock().await;
        let interval = randomize_interval(locked.max_rtcp_interval_ms());
        (locked.id(), locked.take_stop_receiver(), interval)
    };

    let Some(mut stop_receiver) = stop_receiver else {
        tracing::warn!("RTCP loop for transport {} is already running", id);
        return;
    };

    tracing::debug!("RTCP loop for transport {} has started", id);

    loop {
        tokio::select! {
            _ = stop_receiver.recv() => {
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(interval)) => {
                let mut locked = transport.lock().await;
                if locked.is_closed() {
                    break;
                }
                let now_ms = Utc::now().timestamp_millis() as u64;
                interval = locked.on_rtcp_timer(now_ms);
            }
        }
    }

    tracing::debug!("RTCP loop for transport {} has finished", id);
}
