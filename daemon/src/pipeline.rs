/// Sampling pipeline for one game session.
///
/// A `Pipeline` is started when the game process is detected and stopped
/// when it exits or the recognizers change. It owns:
///   - a sampler task grabbing frames at the reconciler's current interval
///   - a worker task running one orchestration tick per frame
///
/// The two meet in a single-slot [`FrameSlot`]: a frame the worker has not
/// picked up yet is replaced by the next one, so a slow tick never queues
/// stale screenshots.
use std::sync::{Arc, Mutex, PoisonError};

use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
};

use crate::audio::AudioPlayer;
use crate::capture::{Frame, FrameSource};
use crate::scheduler::Scheduler;
use crate::session::{self, lock, Recognizers, SharedSession};

/// A running sampler + worker pair.
pub struct Pipeline {
    /// Setting this to `true` signals all sub-tasks to stop.
    stop_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(
        source: Box<dyn FrameSource>,
        session: SharedSession,
        recognizers: Recognizers,
        scheduler: Scheduler,
        audio: AudioPlayer,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let slot = Arc::new(FrameSlot::default());

        let mut handles = vec![];

        // ── Sampler task ──────────────────────────────────────────────────────
        handles.push(tokio::spawn(run_sampler(
            source,
            Arc::clone(&slot),
            Arc::clone(&session),
            stop_rx.clone(),
        )));

        // ── Worker task ───────────────────────────────────────────────────────
        handles.push(tokio::spawn(run_worker(slot, session, recognizers, scheduler, audio, stop_rx)));

        tracing::info!("sampling started");
        Pipeline { stop_tx, handles }
    }

    /// Signals all sub-tasks to stop and waits for them to finish. A tick
    /// already in flight is abandoned at its next await point.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("sampling stopped");
    }
}

/// Latest unprocessed frame.
#[derive(Default)]
struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    ready: Notify,
}

impl FrameSlot {
    fn put(&self, frame: Frame) {
        let replaced = self.frame.lock().unwrap_or_else(PoisonError::into_inner).replace(frame);
        if replaced.is_some() {
            tracing::trace!("unprocessed frame replaced");
        }
        self.ready.notify_one();
    }

    async fn take(&self) -> Frame {
        loop {
            if let Some(frame) = self.frame.lock().unwrap_or_else(PoisonError::into_inner).take() {
                return frame;
            }
            self.ready.notified().await;
        }
    }
}

async fn run_sampler(
    mut source: Box<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    session: SharedSession,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let interval = lock(&session).reconciler.interval_duration();

        let grabbed = tokio::task::spawn_blocking(move || {
            let result = source.grab();
            (source, result)
        })
        .await;
        let result = match grabbed {
            Ok((returned, result)) => {
                source = returned;
                result
            }
            Err(e) => {
                tracing::error!("frame grab task failed: {e}");
                return;
            }
        };

        match result {
            Ok(frame) => slot.put(frame),
            Err(e) => {
                tracing::warn!("{e:#}");
                lock(&session).diagnostics.last_error = Some(format!("{e:#}"));
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => break,
        }
    }
}

async fn run_worker(
    slot: Arc<FrameSlot>,
    session: SharedSession,
    recognizers: Recognizers,
    scheduler: Scheduler,
    audio: AudioPlayer,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = slot.take() => frame,
            _ = stop_rx.changed() => break,
        };

        tokio::select! {
            result = session::run_tick(&session, frame, &recognizers, &scheduler) => match result {
                Ok(events) => audio.announce(&events),
                Err(e) => {
                    tracing::warn!("tick failed: {e:#}");
                    lock(&session).diagnostics.last_error = Some(format!("{e:#}"));
                }
            },
            _ = stop_rx.changed() => break,
        }
    }
}
