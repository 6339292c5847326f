//! Connection state axes
//!
//! Signaling, ICE gathering and ICE connection state are tracked as three
//! independent finite-state machines. The transport reports observed states;
//! each axis decides through its transition function whether the report is
//! a legal move, and legal moves are appended to a bounded transition log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::watch;

/// Transition records kept per axis
pub const TRANSITION_LOG_CAPACITY: usize = 64;

/// One state axis of the session
pub trait StateAxis: Copy + Eq + fmt::Display + fmt::Debug + Send + Sync + 'static {
    /// Axis name used in logs and events
    const AXIS: &'static str;

    /// State before any transition
    fn initial() -> Self;

    /// Transition function: the state after observing `observed` in `self`.
    /// Illegal observations leave the state unchanged.
    fn transition(self, observed: Self) -> Self;
}

/// Offer/answer exchange progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteAnswer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingState::Stable => write!(f, "stable"),
            SignalingState::HaveLocalOffer => write!(f, "have-local-offer"),
            SignalingState::HaveRemoteAnswer => write!(f, "have-remote-answer"),
            SignalingState::Closed => write!(f, "closed"),
        }
    }
}

impl StateAxis for SignalingState {
    const AXIS: &'static str = "signaling";

    fn initial() -> Self {
        SignalingState::Stable
    }

    fn transition(self, observed: Self) -> Self {
        use SignalingState::*;
        match (self, observed) {
            (Closed, _) => Closed,
            (_, Closed) => Closed,
            (Stable, HaveLocalOffer) => HaveLocalOffer,
            (HaveLocalOffer, HaveRemoteAnswer) => HaveRemoteAnswer,
            (HaveLocalOffer, Stable) | (HaveRemoteAnswer, Stable) => Stable,
            (current, _) => current,
        }
    }
}

/// ICE candidate gathering progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceGatheringState::New => write!(f, "new"),
            IceGatheringState::Gathering => write!(f, "gathering"),
            IceGatheringState::Complete => write!(f, "complete"),
        }
    }
}

impl StateAxis for IceGatheringState {
    const AXIS: &'static str = "ice-gathering";

    fn initial() -> Self {
        IceGatheringState::New
    }

    /// Gathering only ever moves forward
    fn transition(self, observed: Self) -> Self {
        self.max(observed)
    }
}

/// ICE connectivity with the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IceConnectionState::New => write!(f, "new"),
            IceConnectionState::Checking => write!(f, "checking"),
            IceConnectionState::Connected => write!(f, "connected"),
            IceConnectionState::Completed => write!(f, "completed"),
            IceConnectionState::Disconnected => write!(f, "disconnected"),
            IceConnectionState::Failed => write!(f, "failed"),
            IceConnectionState::Closed => write!(f, "closed"),
        }
    }
}

impl StateAxis for IceConnectionState {
    const AXIS: &'static str = "ice-connection";

    fn initial() -> Self {
        IceConnectionState::New
    }

    fn transition(self, observed: Self) -> Self {
        match (self, observed) {
            (IceConnectionState::Closed, _) => IceConnectionState::Closed,
            (current, IceConnectionState::New) => current,
            (_, next) => next,
        }
    }
}

/// A single accepted transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord<S> {
    pub from: S,
    pub to: S,
    pub at: DateTime<Utc>,
}

/// Bounded, ordered log of transitions for one axis
#[derive(Debug, Clone)]
pub struct TransitionLog<S> {
    records: VecDeque<TransitionRecord<S>>,
    capacity: usize,
    dropped: usize,
}

impl<S: StateAxis> TransitionLog<S> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(TRANSITION_LOG_CAPACITY)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, record: TransitionRecord<S>) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &TransitionRecord<S>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records evicted by the bound
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Display projection: ` -> gathering -> complete`
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(" ...");
        }
        for record in &self.records {
            out.push_str(" -> ");
            out.push_str(&record.to.to_string());
        }
        out
    }
}

impl<S: StateAxis> Default for TransitionLog<S> {
    fn default() -> Self {
        Self::with_capacity(TRANSITION_LOG_CAPACITY)
    }
}

/// Current state, transition log and subscribers of one axis
pub struct StateTracker<S: StateAxis> {
    current: S,
    log: TransitionLog<S>,
    tx: watch::Sender<S>,
}

impl<S: StateAxis> StateTracker<S> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(S::initial());
        Self {
            current: S::initial(),
            log: TransitionLog::default(),
            tx,
        }
    }

    /// Apply an observed state; returns the record if the state changed
    pub fn observe(&mut self, observed: S) -> Option<TransitionRecord<S>> {
        let next = self.current.transition(observed);
        if next == self.current {
            return None;
        }

        let record = TransitionRecord {
            from: self.current,
            to: next,
            at: Utc::now(),
        };
        self.current = next;
        self.log.push(record.clone());
        self.tx.send_replace(next);
        Some(record)
    }

    pub fn current(&self) -> S {
        self.current
    }

    pub fn log(&self) -> &TransitionLog<S> {
        &self.log
    }

    /// Subscribe to state changes
    pub fn watch(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }
}

impl<S: StateAxis> Default for StateTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three axes of a session
#[derive(Default)]
pub struct SessionStates {
    pub signaling: StateTracker<SignalingState>,
    pub gathering: StateTracker<IceGatheringState>,
    pub connection: StateTracker<IceConnectionState>,
}
