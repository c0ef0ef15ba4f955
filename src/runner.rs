//! Async drive loops for an authority scene and its observers.
//!
//! The authority loop multiplexes a tick interval (timelines advance,
//! queued deltas flush), an action channel (the only mutation path for
//! event handlers and external callers) and a watch-based shutdown.
//! The observer loop mirrors incoming byte frames: the first frame of a
//! session is the snapshot, every later frame is a delta.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::ops::Operation;
use crate::sync::SyncedScene;
use crate::timeline::Timeline;
use crate::value::VarId;

/// Everything the outside world may ask a running scene to do
#[derive(Debug, Clone)]
pub enum SceneAction {
    Modify {
        id: VarId,
        op: Operation,
        originator: String,
    },
    Trigger {
        id: VarId,
        originator: String,
    },
    StartTimeline {
        name: String,
        from_step: usize,
    },
    StopTimeline {
        name: String,
    },
    GoToStep {
        name: String,
        step: usize,
        interrupt: bool,
    },
    Shutdown,
}

/// How often the authority loop ticks timelines and flushes deltas
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

fn apply_action(
    synced: &mut SyncedScene,
    timelines: &mut [Timeline],
    action: SceneAction,
) -> bool {
    match action {
        SceneAction::Modify { id, op, originator } => {
            if let Err(e) = synced.modify(id, &op, &originator) {
                warn!(target: "events", "Action modify on {} failed: {}", id, e);
            }
        }
        SceneAction::Trigger { id, originator } => {
            if let Err(e) = synced.trigger(id, &originator) {
                warn!(target: "events", "Action trigger on {} failed: {}", id, e);
            }
        }
        SceneAction::StartTimeline { name, from_step } => {
            match timelines.iter_mut().find(|t| t.name() == name) {
                Some(timeline) => timeline.start(synced, from_step),
                None => warn!(target: "timeline", "Unknown timeline '{}'", name),
            }
        }
        SceneAction::StopTimeline { name } => {
            match timelines.iter_mut().find(|t| t.name() == name) {
                Some(timeline) => timeline.stop(synced),
                None => warn!(target: "timeline", "Unknown timeline '{}'", name),
            }
        }
        SceneAction::GoToStep {
            name,
            step,
            interrupt,
        } => match timelines.iter_mut().find(|t| t.name() == name) {
            Some(timeline) => timeline.go_to_step(synced, step, interrupt),
            None => warn!(target: "timeline", "Unknown timeline '{}'", name),
        },
        SceneAction::Shutdown => return false,
    }
    true
}

/// Drive the authority until shutdown. Emits the initial snapshot frame
/// immediately, then one delta frame per tick that had changes.
pub async fn run_scene(
    mut synced: SyncedScene,
    mut timelines: Vec<Timeline>,
    mut action_rx: mpsc::UnboundedReceiver<SceneAction>,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut shutdown_rx: Option<watch::Receiver<bool>>,
) {
    info!(target: "events", "Scene runner started");

    match synced.encode_snapshot() {
        Ok(snapshot) => {
            let _ = frame_tx.send(snapshot);
        }
        Err(e) => error!(target: "sync", "Failed to encode initial snapshot: {}", e),
    }

    let mut last_tick = tokio::time::Instant::now();

    loop {
        tokio::select! {
            action = action_rx.recv() => {
                match action {
                    Some(action) => {
                        if !apply_action(&mut synced, &mut timelines, action) {
                            info!(target: "events", "Shutdown action received");
                            break;
                        }
                    }
                    None => {
                        info!(target: "events", "Action channel closed");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(last_tick + TICK_INTERVAL) => {
                last_tick = tokio::time::Instant::now();
                let now = Instant::now();
                for timeline in timelines.iter_mut() {
                    timeline.tick(&mut synced, now);
                }
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!(target: "events", "Shutdown signal received");
                break;
            }
        }

        // flush whatever this pass queued
        match synced.take_delta() {
            Ok(Some(delta)) => {
                if frame_tx.send(delta).is_err() {
                    debug!(target: "sync", "Frame receiver dropped, deltas discarded");
                }
            }
            Ok(None) => {}
            Err(e) => error!(target: "sync", "Failed to encode delta: {}", e),
        }
    }

    info!(target: "events", "Scene runner stopped");
}

/// Mirror a frame stream into an observer replica until the sender goes
/// away. First frame is the snapshot, the rest are deltas.
pub async fn run_observer(
    mut synced: SyncedScene,
    mut frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) -> SyncedScene {
    info!(target: "sync", "Observer runner started");
    let mut saw_snapshot = false;

    while let Some(frame) = frame_rx.recv().await {
        let result = if saw_snapshot {
            synced.apply_delta(&frame)
        } else {
            saw_snapshot = true;
            synced.apply_snapshot(&frame)
        };
        if let Err(e) = result {
            error!(target: "sync", "Discarding undecodable frame: {}", e);
        }
    }

    info!(target: "sync", "Observer runner stopped");
    synced
}

async fn wait_for_shutdown(shutdown_rx: &mut Option<watch::Receiver<bool>>) {
    match shutdown_rx {
        Some(rx) => {
            // changed() resolves on every write; only a true value stops
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        }
        None => std::future::pending::<()>().await,
    }
}
