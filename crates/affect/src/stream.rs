//! Streaming loop driving a [`BlinkMonitor`] from a [`FrameSource`]

use std::future::Future;
use std::time::Duration;

use frame_source::FrameSource;
use serde::Serialize;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::FrameAnalysis;
use crate::{AffectError, BlinkMonitor};

/// Counters for a finished stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub frames: u64,
    pub frames_with_face: u64,
    pub errors: u64,
    pub total_blinks: u64,
}

/// Pull frames until the source is exhausted or `shutdown` resolves.
///
/// Frames are paced at the source's fps when it reports one. Frame-level
/// failures are logged and skipped; only model availability errors end the
/// stream early.
pub async fn run_stream<S, F, C>(
    source: &mut S,
    monitor: &mut BlinkMonitor,
    mut sink: F,
    shutdown: C,
) -> Result<StreamSummary, AffectError>
where
    S: FrameSource,
    F: FnMut(&FrameAnalysis),
    C: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut ticker = pacing(source.fps());
    let mut summary = StreamSummary::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Stream stopped after {} frames", summary.frames);
                break;
            }
            _ = next_tick(&mut ticker) => {}
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Frame source exhausted after {} frames", summary.frames);
                break;
            }
            Err(e) => {
                warn!("Skipping unreadable frame: {}", e);
                summary.errors += 1;
                metrics::counter!("affect_frame_errors_total").increment(1);
                continue;
            }
        };

        summary.frames += 1;
        metrics::counter!("affect_frames_total").increment(1);

        match monitor.analyze(&frame) {
            Ok(analysis) => {
                if analysis.face_detected {
                    summary.frames_with_face += 1;
                }
                sink(&analysis);
            }
            Err(e @ (AffectError::ModelUnavailable(_) | AffectError::ModelLoad(_))) => {
                return Err(e);
            }
            Err(e) => {
                warn!("Frame {} analysis failed: {}", frame.sequence, e);
                summary.errors += 1;
                metrics::counter!("affect_frame_errors_total").increment(1);
            }
        }
    }

    summary.total_blinks = monitor.total_blinks();
    debug!("Stream summary: {:?}", summary);
    Ok(summary)
}

fn pacing(fps: u32) -> Option<Interval> {
    if fps == 0 {
        return None;
    }
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}
