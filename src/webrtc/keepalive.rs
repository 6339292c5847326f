//! Keep-alive and round-trip time over the auxiliary channel
//!
//! Once the channel opens, `ping <elapsed_ms>` is sent every period. The
//! peer echoes the stamp back as `pong <elapsed_ms>` and the difference to
//! the current stamp is the round-trip time. Everything sent and received is
//! appended to the channel log.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use super::transport::{ChannelEvent, DataChannelLink};
use crate::events::{EventBus, SessionEvent};

/// Entries kept in a channel log
pub const CHANNEL_LOG_CAPACITY: usize = 256;

/// Millisecond stamps relative to the first stamp taken
#[derive(Debug, Default)]
pub struct StampClock {
    epoch: Mutex<Option<Instant>>,
}

impl StampClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elapsed milliseconds; the first call defines the epoch and returns 0
    pub fn stamp(&self) -> i64 {
        let now = Instant::now();
        let mut epoch = self.epoch.lock();
        let start = *epoch.get_or_insert(now);
        now.duration_since(start).as_millis() as i64
    }
}

/// One line of the channel log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLogEntry {
    Open,
    Close,
    Sent(String),
    Received(String),
    Rtt(i64),
}

impl fmt::Display for ChannelLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLogEntry::Open => write!(f, "- open"),
            ChannelLogEntry::Close => write!(f, "- close"),
            ChannelLogEntry::Sent(text) => write!(f, "> {}", text),
            ChannelLogEntry::Received(text) => write!(f, "< {}", text),
            ChannelLogEntry::Rtt(ms) => write!(f, " RTT {} ms", ms),
        }
    }
}

/// Bounded, shared channel log
#[derive(Debug, Clone)]
pub struct ChannelLog {
    entries: Arc<Mutex<VecDeque<ChannelLogEntry>>>,
    capacity: usize,
}

impl ChannelLog {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, entry: ChannelLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<ChannelLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Latest round-trip time recorded
    pub fn last_rtt(&self) -> Option<i64> {
        self.entries.lock().iter().rev().find_map(|e| match e {
            ChannelLogEntry::Rtt(ms) => Some(*ms),
            _ => None,
        })
    }

    /// One entry per line, as shown to the user
    pub fn render(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ChannelLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamp echoed in a `pong` message
///
/// The stamp starts after the 5th character (`pong `) and is a non-negative
/// integer; leading digits are parsed and anything after them is ignored.
pub fn parse_pong(text: &str) -> Option<i64> {
    if !text.starts_with("pong") {
        return None;
    }
    let rest = text.get(5..)?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse::<i64>().ok()
}

/// Appends to the channel log and mirrors entries onto the event bus
#[derive(Clone)]
struct Recorder {
    session_id: String,
    log: ChannelLog,
    events: Arc<EventBus>,
}

impl Recorder {
    fn record(&self, entry: ChannelLogEntry) {
        debug!("[{}] channel {}", self.session_id, entry);
        if let ChannelLogEntry::Rtt(ms) = entry {
            self.events.publish(SessionEvent::RttSample {
                session_id: self.session_id.clone(),
                rtt_ms: ms,
            });
        }
        self.events.publish(SessionEvent::ChannelLog {
            session_id: self.session_id.clone(),
            line: entry.to_string(),
        });
        self.log.push(entry);
    }
}

/// Ping emitter and pong tracker for one channel
pub struct KeepAlive {
    link: Arc<dyn DataChannelLink>,
    clock: Arc<StampClock>,
    period: Duration,
    recorder: Recorder,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl KeepAlive {
    pub fn new(
        session_id: impl Into<String>,
        link: Arc<dyn DataChannelLink>,
        log: ChannelLog,
        period: Duration,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            link,
            clock: Arc::new(StampClock::new()),
            period,
            recorder: Recorder {
                session_id: session_id.into(),
                log,
                events,
            },
            timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Drive the keep-alive from the channel's events until it closes
    pub fn spawn(self: Arc<Self>, mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = channel_events.recv().await {
                match event {
                    ChannelEvent::Open => self.on_open(),
                    ChannelEvent::Message(text) => {
                        self.on_message(&text);
                    }
                    ChannelEvent::Close => {
                        self.on_close();
                        break;
                    }
                }
            }
            // Event source dropped without a close
            self.on_close();
        })
    }

    /// Channel opened: start the ping timer
    pub fn on_open(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.recorder.record(ChannelLogEntry::Open);
        info!(
            "Data channel '{}' open, pinging every {:?}",
            self.link.label(),
            self.period
        );

        let link = self.link.clone();
        let clock = self.clock.clone();
        let recorder = self.recorder.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let message = format!("ping {}", clock.stamp());
                recorder.record(ChannelLogEntry::Sent(message.clone()));
                if let Err(e) = link.send_text(&message).await {
                    warn!("Failed to send keep-alive: {}", e);
                }
            }
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Message received; returns the round-trip time if it was a pong
    pub fn on_message(&self, text: &str) -> Option<i64> {
        self.recorder.record(ChannelLogEntry::Received(text.to_string()));
        let sent = parse_pong(text)?;
        let rtt = self.clock.stamp().saturating_sub(sent);
        self.recorder.record(ChannelLogEntry::Rtt(rtt));
        Some(rtt)
    }

    /// Channel closed; returns `true` the first time only
    pub fn on_close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel_timer();
        self.recorder.record(ChannelLogEntry::Close);
        true
    }

    /// Stop the ping timer; `false` if it was not running
    pub fn cancel_timer(&self) -> bool {
        match self.timer.lock().take() {
            Some(handle) => {
                handle.abort();
                debug!("Keep-alive timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_timer_running(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn log(&self) -> &ChannelLog {
        &self.recorder.log
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
