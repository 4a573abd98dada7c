use std::time::{Duration, Instant};

use doorward_core::{DoorController, DoorState, FaceEvents, Identity, Outcome, TimerCommand};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bus::Publisher;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("door engine task exited")]
    ChannelClosed,
}

/// Point-in-time view of the controller, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorSnapshot {
    pub state: DoorState,
    pub session_active: bool,
    pub pending_relock: Option<u64>,
}

/// Messages sent from the bus adapter and the frame loop to the engine task.
enum DoorRequest {
    RfidPresented(String),
    FaceVerdict(String),
    FaceRecognized { identity: String, at: Instant },
    CooldownTick { at: Instant },
    Snapshot { reply: oneshot::Sender<DoorSnapshot> },
}

/// Clone-safe handle to the door engine.
///
/// Sends never block: events are queued in arrival order and applied one at
/// a time by the engine task, so both event sources see a single serialized
/// controller.
#[derive(Clone)]
pub struct DoorHandle {
    tx: mpsc::UnboundedSender<DoorRequest>,
}

impl DoorHandle {
    pub fn rfid_presented(&self, tag: impl Into<String>) -> Result<(), EngineError> {
        self.send(DoorRequest::RfidPresented(tag.into()))
    }

    pub fn face_verdict(&self, verdict: impl Into<String>) -> Result<(), EngineError> {
        self.send(DoorRequest::FaceVerdict(verdict.into()))
    }

    pub fn face_recognized_at(&self, identity: &str, at: Instant) -> Result<(), EngineError> {
        self.send(DoorRequest::FaceRecognized {
            identity: identity.to_string(),
            at,
        })
    }

    pub fn cooldown_tick_at(&self, at: Instant) -> Result<(), EngineError> {
        self.send(DoorRequest::CooldownTick { at })
    }

    /// Round-trip through the engine queue and report the controller state
    /// after every previously sent event has been applied.
    pub async fn snapshot(&self) -> Result<DoorSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(DoorRequest::Snapshot { reply: reply_tx })?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    fn send(&self, request: DoorRequest) -> Result<(), EngineError> {
        self.tx.send(request).map_err(|_| EngineError::ChannelClosed)
    }
}

impl FaceEvents for DoorHandle {
    fn face_recognized(&self, identity: &Identity, now: Instant) {
        if let Err(e) = self.face_recognized_at(&identity.name, now) {
            tracing::error!(error = %e, identity = %identity.name, "face event dropped");
        }
    }

    fn cooldown_tick(&self, now: Instant) {
        if let Err(e) = self.cooldown_tick_at(now) {
            tracing::error!(error = %e, "cooldown tick dropped");
        }
    }
}

/// Spawn the engine task owning `controller` and `publisher`.
///
/// The task also owns the RFID relock timer: at most one is live, a
/// `Schedule` aborts and replaces it, a `Cancel` aborts it. The task exits
/// once every [`DoorHandle`] has been dropped.
pub fn spawn_door_engine<P: Publisher>(
    controller: DoorController,
    publisher: P,
) -> (DoorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(controller, publisher, rx));
    (DoorHandle { tx }, task)
}

async fn run<P: Publisher>(
    mut controller: DoorController,
    publisher: P,
    mut rx: mpsc::UnboundedReceiver<DoorRequest>,
) {
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<u64>();
    let mut relock: Option<JoinHandle<()>> = None;

    tracing::info!(state = %controller.state(), "door engine started");

    loop {
        let outcome = tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                match request {
                    DoorRequest::RfidPresented(tag) => controller.rfid_presented(&tag),
                    DoorRequest::FaceVerdict(verdict) => controller.face_verdict(&verdict),
                    DoorRequest::FaceRecognized { identity, at } => {
                        controller.face_recognized(&identity, at)
                    }
                    DoorRequest::CooldownTick { at } => controller.cooldown_tick(at),
                    DoorRequest::Snapshot { reply } => {
                        let _ = reply.send(DoorSnapshot {
                            state: controller.state(),
                            session_active: controller.session().is_some(),
                            pending_relock: controller.pending_relock(),
                        });
                        continue;
                    }
                }
            }
            Some(token) = timer_rx.recv() => controller.relock_fired(token),
        };

        apply(outcome, &publisher, &mut relock, &timer_tx);
    }

    if let Some(handle) = relock.take() {
        handle.abort();
    }
    tracing::info!("door engine exiting");
}

fn apply<P: Publisher>(
    outcome: Outcome,
    publisher: &P,
    relock: &mut Option<JoinHandle<()>>,
    timer_tx: &mpsc::UnboundedSender<u64>,
) {
    if let Some(publication) = outcome.publication {
        // Local state is authoritative; a failed publish is only reported.
        if let Err(e) = publisher.publish(publication.topic.as_str(), publication.payload) {
            tracing::error!(error = %e, "publish failed");
        }
    }

    match outcome.timer {
        Some(TimerCommand::Schedule { token, delay }) => {
            if let Some(previous) = relock.take() {
                previous.abort();
            }
            *relock = Some(schedule_relock(token, delay, timer_tx.clone()));
        }
        Some(TimerCommand::Cancel) => {
            if let Some(previous) = relock.take() {
                previous.abort();
                tracing::debug!("pending relock cancelled");
            }
        }
        None => {}
    }
}

fn schedule_relock(token: u64, delay: Duration, timer_tx: mpsc::UnboundedSender<u64>) -> JoinHandle<()> {
    tracing::debug!(token, delay_ms = delay.as_millis() as u64, "relock scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = timer_tx.send(token);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use doorward_core::AccessPolicy;
    use std::sync::{Arc, Mutex};

    const TAG: &str = "43d0531b";

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<(String, String)>>>);

    impl Recording {
        fn messages(&self) -> Vec<(String, String)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Publisher for Recording {
        fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
            self.0
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    struct Unreachable;

    impl Publisher for Unreachable {
        fn publish(&self, topic: &str, _payload: &str) -> Result<(), BusError> {
            Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "broker unreachable".into(),
            })
        }
    }

    fn msg(topic: &str, payload: &str) -> (String, String) {
        (topic.to_string(), payload.to_string())
    }

    fn engine() -> (DoorHandle, Recording) {
        let recording = Recording::default();
        let controller = DoorController::new(AccessPolicy::new([TAG]));
        let (handle, _task) = spawn_door_engine(controller, recording.clone());
        (handle, recording)
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorized_rfid_unlocks_then_relocks() {
        let (door, published) = engine();

        door.rfid_presented(TAG).unwrap();
        assert_eq!(door.snapshot().await.unwrap().state, DoorState::Unlocked);
        assert_eq!(published.messages(), vec![msg("door/lock", "unlock")]);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        door.snapshot().await.unwrap();
        assert_eq!(published.messages().len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let snapshot = door.snapshot().await.unwrap();
        assert_eq!(snapshot.state, DoorState::Locked);
        assert_eq!(snapshot.pending_relock, None);
        assert_eq!(
            published.messages(),
            vec![msg("door/lock", "unlock"), msg("door/lock", "lock")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_rfid_locks_without_timer() {
        let (door, published) = engine();

        door.rfid_presented("deadbeef").unwrap();
        let snapshot = door.snapshot().await.unwrap();
        assert_eq!(snapshot.state, DoorState::Locked);
        assert_eq!(snapshot.pending_relock, None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        door.snapshot().await.unwrap();
        assert_eq!(published.messages(), vec![msg("door/lock", "lock")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_unlock_reschedules_relock() {
        let (door, published) = engine();

        door.rfid_presented(TAG).unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        door.rfid_presented(TAG).unwrap();

        // The first timer would have fired at 3000 ms.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(door.snapshot().await.unwrap().state, DoorState::Unlocked);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(door.snapshot().await.unwrap().state, DoorState::Locked);
        assert_eq!(
            published.messages(),
            vec![
                msg("door/lock", "unlock"),
                msg("door/lock", "unlock"),
                msg("door/lock", "lock")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_cancels_pending_relock() {
        let (door, published) = engine();

        door.rfid_presented(TAG).unwrap();
        door.rfid_presented("deadbeef").unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        door.snapshot().await.unwrap();

        assert_eq!(
            published.messages(),
            vec![msg("door/lock", "unlock"), msg("door/lock", "lock")]
        );
    }

    #[tokio::test]
    async fn test_repeated_face_recognition_publishes_once() {
        let (door, published) = engine();
        let t0 = Instant::now();

        door.face_recognized_at("alice", t0).unwrap();
        door.cooldown_tick_at(t0).unwrap();
        door.face_recognized_at("alice", t0 + Duration::from_secs(1)).unwrap();
        door.cooldown_tick_at(t0 + Duration::from_secs(1)).unwrap();

        let snapshot = door.snapshot().await.unwrap();
        assert!(snapshot.session_active);
        assert_eq!(snapshot.state, DoorState::Unlocked);
        assert_eq!(
            published.messages(),
            vec![msg("door/face_recognition", "recognized")]
        );

        door.cooldown_tick_at(t0 + Duration::from_millis(3001)).unwrap();
        door.cooldown_tick_at(t0 + Duration::from_millis(3100)).unwrap();
        let snapshot = door.snapshot().await.unwrap();
        assert!(!snapshot.session_active);
        assert_eq!(
            published.messages(),
            vec![
                msg("door/face_recognition", "recognized"),
                msg("door/face_recognition", "lock")
            ]
        );
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_state() {
        let controller = DoorController::new(AccessPolicy::new([TAG]));
        let (door, _task) = spawn_door_engine(controller, Unreachable);

        door.rfid_presented(TAG).unwrap();
        assert_eq!(door.snapshot().await.unwrap().state, DoorState::Unlocked);
        door.face_verdict("nope").unwrap();
        assert_eq!(door.snapshot().await.unwrap().state, DoorState::Locked);
    }

    #[tokio::test]
    async fn test_engine_exits_when_handles_dropped() {
        let controller = DoorController::new(AccessPolicy::new([TAG]));
        let (door, task) = spawn_door_engine(controller, Recording::default());
        drop(door);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_face_events_trait_forwards() {
        let (door, published) = engine();
        let alice = Identity {
            name: "alice".into(),
            encoding: doorward_core::Encoding::new(vec![0.0]),
        };

        FaceEvents::face_recognized(&door, &alice, Instant::now());
        FaceEvents::cooldown_tick(&door, Instant::now());
        door.snapshot().await.unwrap();
        assert_eq!(
            published.messages(),
            vec![msg("door/face_recognition", "recognized")]
        );
    }
}
