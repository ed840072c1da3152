//! Dedicated mixing thread.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::{debug, warn};

use crate::MixerError;
use crate::clock::monotonic_time_ns;
use crate::observer::MixObserver;
use crate::stage::{MixStage, OutputBuffer};

/// Runs [`MixStage::lock_output`] once per period on its own thread and hands every block to a
/// sink.
///
/// The first block starts at destination frame `0`, anchored at the monotonic clock when the
/// thread starts. Blocks follow back to back; when the thread falls behind it mixes the late
/// blocks immediately instead of skipping them.
pub struct MixDriver<O: MixObserver + 'static> {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<MixStage<O>>>,
}

impl<O: MixObserver + 'static> MixDriver<O> {
    /// Start mixing `period_frames` frames per block.
    ///
    /// Panics if `period_frames` is zero or larger than the stage's `max_frames`.
    pub fn spawn<F>(
        mut stage: MixStage<O>,
        period_frames: usize,
        mut sink: F,
    ) -> Result<Self, MixerError>
    where
        F: FnMut(&OutputBuffer<'_>) + Send + 'static,
    {
        assert!(period_frames > 0, "period must hold at least one frame");
        let max_frames = stage.options().max_frames;
        assert!(
            period_frames <= max_frames,
            "period of {period_frames} frames exceeds the stage's max_frames of {max_frames}"
        );
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ns_per_frame = stage.format().frames_per_ns().inverse();

        let thread = std::thread::Builder::new()
            .name("mix_kit-mixer".into())
            .spawn(move || {
                let anchor_ns = monotonic_time_ns();
                let mut next_frame: i64 = 0;
                loop {
                    let reference_time_ns = anchor_ns + ns_per_frame.scale(next_frame);
                    let output = stage.lock_output(reference_time_ns, next_frame, period_frames);
                    sink(&output);
                    next_frame += period_frames as i64;

                    let due_ns = anchor_ns + ns_per_frame.scale(next_frame);
                    let wait_ns = due_ns - monotonic_time_ns();
                    if wait_ns < 0 {
                        warn!(late_ns = -wait_ns, frame = next_frame, "mix_pass_late");
                    }
                    match stop_rx.recv_timeout(Duration::from_nanos(wait_ns.max(0) as u64)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(frames = next_frame, "mix_driver_stopped");
                stage
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    /// Stop the thread and hand the stage back. Returns `None` if the thread panicked.
    pub fn stop(mut self) -> Option<MixStage<O>> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<MixStage<O>> {
        let thread = self.thread.take()?;
        let _ = self.stop_tx.try_send(());
        thread.join().ok()
    }
}

impl<O: MixObserver + 'static> Drop for MixDriver<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
