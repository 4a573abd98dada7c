//! Door lock state machine.
//!
//! [`DoorController`] owns the lock state, the face-path unlock session and
//! the RFID authorization policy. It never touches a clock, a timer or a
//! socket: callers pass `now` in, and every call returns an [`Outcome`]
//! describing what to publish and what to do with the RFID relock timer.
//! That keeps the machine deterministic and lets one actor serialize every
//! event source through it.
//!
//! # Two cooldown paths
//!
//! - RFID unlocks schedule a one-shot relock timer. Each schedule carries a
//!   fresh token; a newer RFID unlock supersedes the older timer and any lock
//!   transition cancels it. Firings with a stale token are ignored.
//! - Face unlocks open an [`UnlockSession`] that is polled by
//!   [`DoorController::cooldown_tick`] once per processed frame.
//!
//! # Invariants
//!
//! - An active session implies `DoorState::Unlocked`: every transition to
//!   `Locked` clears the session.
//! - A pending relock token implies `DoorState::Unlocked` for the same reason.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Inbound RFID tag topic.
pub const TOPIC_RFID: &str = "door/rfid";
/// Lock command topic consumed by the actuator.
pub const TOPIC_LOCK: &str = "door/lock";
/// Face verdict topic, both inbound and outbound.
pub const TOPIC_FACE_RECOGNITION: &str = "door/face_recognition";

/// Face verdict payload that unlocks the door; anything else locks it.
pub const VERDICT_RECOGNIZED: &str = "recognized";
/// Face verdict payload published when the face cooldown expires.
pub const VERDICT_LOCK: &str = "lock";

/// How long a face-triggered unlock suppresses further triggers.
pub const DEFAULT_UNLOCK_DURATION: Duration = Duration::from_secs(3);
/// Delay before an RFID-triggered unlock relocks the door.
pub const DEFAULT_RELOCK_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Locked,
    Unlocked,
}

impl DoorState {
    /// Payload published on [`TOPIC_LOCK`] for this state.
    pub fn payload(&self) -> &'static str {
        match self {
            DoorState::Locked => "lock",
            DoorState::Unlocked => "unlock",
        }
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Locked => write!(f, "Locked"),
            DoorState::Unlocked => write!(f, "Unlocked"),
        }
    }
}

/// Outbound topics the controller publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Lock,
    FaceRecognition,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Lock => TOPIC_LOCK,
            Topic::FaceRecognition => TOPIC_FACE_RECOGNITION,
        }
    }
}

/// One message for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publication {
    pub topic: Topic,
    pub payload: &'static str,
}

impl Publication {
    fn lock_state(state: DoorState) -> Self {
        Self {
            topic: Topic::Lock,
            payload: state.payload(),
        }
    }

    fn face(payload: &'static str) -> Self {
        Self {
            topic: Topic::FaceRecognition,
            payload,
        }
    }
}

/// The live face-path cooldown window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockSession {
    pub started_at: Instant,
}

/// Instruction for whoever owns the RFID relock timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Replace any pending relock with a new one firing after `delay`.
    Schedule { token: u64, delay: Duration },
    /// Drop the pending relock without firing it.
    Cancel,
}

/// Effects of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    pub publication: Option<Publication>,
    pub timer: Option<TimerCommand>,
}

impl Outcome {
    fn publish(publication: Publication) -> Self {
        Self {
            publication: Some(publication),
            timer: None,
        }
    }

    fn with_timer(mut self, timer: Option<TimerCommand>) -> Self {
        self.timer = timer;
        self
    }
}

/// Static authorization and timing policy, fixed at construction.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub authorized_tags: HashSet<String>,
    pub unlock_duration: Duration,
    pub relock_delay: Duration,
}

impl AccessPolicy {
    pub fn new<I, S>(authorized_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authorized_tags: authorized_tags.into_iter().map(Into::into).collect(),
            unlock_duration: DEFAULT_UNLOCK_DURATION,
            relock_delay: DEFAULT_RELOCK_DELAY,
        }
    }

    pub fn with_unlock_duration(mut self, unlock_duration: Duration) -> Self {
        self.unlock_duration = unlock_duration;
        self
    }

    pub fn with_relock_delay(mut self, relock_delay: Duration) -> Self {
        self.relock_delay = relock_delay;
        self
    }

    pub fn is_authorized(&self, tag: &str) -> bool {
        self.authorized_tags.contains(tag)
    }
}

/// The door lock state machine. Starts `Locked` with no session.
#[derive(Debug)]
pub struct DoorController {
    policy: AccessPolicy,
    state: DoorState,
    session: Option<UnlockSession>,
    pending_relock: Option<u64>,
    next_token: u64,
}

impl DoorController {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            state: DoorState::Locked,
            session: None,
            pending_relock: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> DoorState {
        self.state
    }

    pub fn session(&self) -> Option<UnlockSession> {
        self.session
    }

    /// Token of the relock timer that is currently allowed to fire.
    pub fn pending_relock(&self) -> Option<u64> {
        self.pending_relock
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// A tag was read. Authorized tags unlock and arm the relock timer;
    /// anything else locks.
    pub fn rfid_presented(&mut self, tag: &str) -> Outcome {
        if self.policy.is_authorized(tag) {
            self.state = DoorState::Unlocked;
            self.next_token += 1;
            let token = self.next_token;
            self.pending_relock = Some(token);
            tracing::info!(tag, token, "RFID recognized - door unlocked");
            Outcome::publish(Publication::lock_state(self.state)).with_timer(Some(
                TimerCommand::Schedule {
                    token,
                    delay: self.policy.relock_delay,
                },
            ))
        } else {
            let timer = self.lock();
            tracing::info!(tag, "unauthorized RFID attempt - door locked");
            Outcome::publish(Publication::lock_state(self.state)).with_timer(timer)
        }
    }

    /// A face verdict arrived on the bus.
    pub fn face_verdict(&mut self, verdict: &str) -> Outcome {
        if verdict == VERDICT_RECOGNIZED {
            self.state = DoorState::Unlocked;
            tracing::info!("face recognized - door unlocked");
            Outcome::publish(Publication::lock_state(self.state))
        } else {
            let timer = self.lock();
            tracing::info!(verdict, "face not recognized - door locked");
            Outcome::publish(Publication::lock_state(self.state)).with_timer(timer)
        }
    }

    /// The local camera matched `identity`. Opens a session unless one is
    /// already running, in which case the trigger is suppressed.
    pub fn face_recognized(&mut self, identity: &str, now: Instant) -> Outcome {
        if self.session.is_some() {
            tracing::info!(identity, "unlock session active; trigger suppressed");
            return Outcome::default();
        }

        self.state = DoorState::Unlocked;
        self.session = Some(UnlockSession { started_at: now });
        tracing::info!(identity, "recognized - door unlocked");
        Outcome::publish(Publication::face(VERDICT_RECOGNIZED))
    }

    /// Poll the face-path cooldown. Ends the session once strictly more than
    /// the unlock duration has elapsed since it started, and publishes the
    /// `lock` verdict. The door state is left untouched.
    pub fn cooldown_tick(&mut self, now: Instant) -> Outcome {
        let Some(session) = self.session else {
            return Outcome::default();
        };
        if now.saturating_duration_since(session.started_at) <= self.policy.unlock_duration {
            return Outcome::default();
        }

        // Only the session ends here. The lock itself arrives as a verdict
        // through the bus, and a pending RFID relock keeps running.
        self.session = None;
        tracing::info!("cooldown period over - requesting lock");
        Outcome::publish(Publication::face(VERDICT_LOCK))
    }

    /// The relock timer identified by `token` fired.
    pub fn relock_fired(&mut self, token: u64) -> Outcome {
        if self.pending_relock != Some(token) {
            tracing::debug!(token, pending = ?self.pending_relock, "stale relock timer ignored");
            return Outcome::default();
        }

        self.pending_relock = None;
        self.state = DoorState::Locked;
        self.session = None;
        tracing::info!(token, "door locked after unlock duration");
        Outcome::publish(Publication::lock_state(self.state))
    }

    /// Enter `Locked`, clearing the session and any pending relock.
    fn lock(&mut self) -> Option<TimerCommand> {
        self.state = DoorState::Locked;
        self.session = None;
        self.pending_relock.take().map(|_| TimerCommand::Cancel)
    }
}
