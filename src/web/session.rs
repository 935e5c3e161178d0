//! Per-session progress record.
//!
//! A [`Progress`] owns the session state, the latest output snapshot, the
//! error text and the live channel slot, all behind one lock. Every status
//! message is appended to the session's [`MessageHistory`] and forwarded to
//! the attached channel while that lock is held, and attaching replays the
//! history under the same lock. A viewer therefore always sees the full
//! history, in order, before any message emitted after it attached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use questforge_common::{GenerationState, MessageKind, StatusMessage};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::history::MessageHistory;
use crate::progress::ProgressReporter;

/// What the channel task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized `StatusMessage`.
    Frame(String),
    /// The channel was replaced or the session shut down.
    Close,
}

#[derive(Debug)]
struct ChannelSlot {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSlot {
    fn close(self) {
        // The receiver may already be gone; nothing to do then.
        let _ = self.tx.send(Outbound::Close);
    }
}

#[derive(Debug)]
struct ProgressInner {
    state: GenerationState,
    output: String,
    error: Option<String>,
    active: bool,
    channel: Option<ChannelSlot>,
}

/// Handle returned by [`Progress::attach`].
pub struct ChannelLease {
    pub id: u64,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// Point-in-time view of a session, as served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub state: GenerationState,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
    pub message_count: usize,
}

#[derive(Debug)]
pub struct Progress {
    session_id: String,
    created_at: DateTime<Utc>,
    inner: Mutex<ProgressInner>,
    history: Arc<MessageHistory>,
    done: watch::Sender<bool>,
    next_channel_id: AtomicU64,
}

impl Progress {
    pub fn new(session_id: impl Into<String>, history: Arc<MessageHistory>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            inner: Mutex::new(ProgressInner {
                state: GenerationState::Initialized,
                output: String::new(),
                error: None,
                active: true,
                channel: None,
            }),
            history,
            done,
            next_channel_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> GenerationState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn last_output(&self) -> String {
        self.lock().output.clone()
    }

    pub fn has_channel(&self) -> bool {
        self.lock().channel.is_some()
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.lock();
        ProgressSnapshot {
            session_id: self.session_id.clone(),
            state: inner.state,
            active: inner.active,
            created_at: self.created_at,
            error: inner.error.clone(),
            message_count: self.history.len(),
        }
    }

    /// Record a message and forward it to the live channel. Caller holds the lock.
    fn emit_locked(&self, inner: &mut ProgressInner, kind: MessageKind, message: &str, output: &str) {
        let status = StatusMessage::new(kind, inner.state, message, output);
        self.forward_locked(inner, &status);
        self.history.push(status);
    }

    /// Send to the live channel only. Caller holds the lock.
    fn forward_locked(&self, inner: &ProgressInner, status: &StatusMessage) {
        let frame = match serde_json::to_string(status) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "failed to serialize status message");
                return;
            }
        };
        if let Some(slot) = &inner.channel
            && slot.tx.send(Outbound::Frame(frame)).is_err()
        {
            debug!(session_id = %self.session_id, channel = slot.id, "channel gone, frame dropped");
        }
    }

    fn transition_locked(&self, inner: &mut ProgressInner, next: GenerationState, message: &str) -> bool {
        if !inner.state.can_transition_to(next) {
            warn!(
                session_id = %self.session_id,
                from = %inner.state,
                to = %next,
                "ignoring invalid state transition"
            );
            return false;
        }
        inner.state = next;
        if next == GenerationState::Error {
            inner.error = Some(message.to_string());
        }
        self.emit_locked(inner, MessageKind::State, message, "");
        true
    }

    /// Move to `next` if the transition is legal, announcing it with `message`.
    ///
    /// Entering a terminal state fires the done signal.
    pub fn transition(&self, next: GenerationState, message: &str) -> bool {
        let moved = {
            let mut inner = self.lock();
            self.transition_locked(&mut inner, next, message)
        };
        if moved && next.is_terminal() {
            self.signal_done();
        }
        moved
    }

    /// Force the error state from anywhere except `error` itself.
    pub fn fail(&self, message: &str) -> bool {
        self.transition(GenerationState::Error, message)
    }

    /// Emit a progress line without changing state.
    pub fn update(&self, message: &str) {
        let mut inner = self.lock();
        self.emit_locked(&mut inner, MessageKind::Update, message, "");
    }

    /// Replace the output snapshot and push it to the live viewer.
    ///
    /// Snapshots are not recorded in the history; a viewer that attaches
    /// later gets only the latest one, after the replay.
    pub fn set_output(&self, text: &str) {
        let mut inner = self.lock();
        inner.output = text.to_string();
        let status = StatusMessage::new(MessageKind::Update, inner.state, "", text);
        self.forward_locked(&inner, &status);
    }

    /// Attach a new live channel, closing any previous one first.
    ///
    /// The full history, then the latest output snapshot, is queued on the
    /// new channel before the slot is installed. The first attach moves the
    /// session to `connected`.
    pub fn attach(&self) -> ChannelLease {
        let (tx, outbound) = mpsc::unbounded_channel();
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        if let Some(previous) = inner.channel.take() {
            debug!(session_id = %self.session_id, channel = previous.id, "replacing live channel");
            previous.close();
        }

        for message in self.history.snapshot() {
            match serde_json::to_string(&message) {
                Ok(frame) => {
                    let _ = tx.send(Outbound::Frame(frame));
                }
                Err(e) => warn!(session_id = %self.session_id, error = %e, "skipping unserializable history entry"),
            }
        }
        if !inner.output.is_empty() {
            let latest = StatusMessage::new(MessageKind::Update, inner.state, "", &inner.output);
            if let Ok(frame) = serde_json::to_string(&latest) {
                let _ = tx.send(Outbound::Frame(frame));
            }
        }
        inner.channel = Some(ChannelSlot { id, tx });

        if inner.state == GenerationState::Initialized {
            let announcement = GenerationState::Connected.announcement();
            self.transition_locked(&mut inner, GenerationState::Connected, announcement);
        }
        ChannelLease { id, outbound }
    }

    /// Clear the channel slot if it still belongs to `channel_id`.
    pub fn detach(&self, channel_id: u64) -> bool {
        let mut inner = self.lock();
        match &inner.channel {
            Some(slot) if slot.id == channel_id => {
                inner.channel = None;
                true
            }
            _ => false,
        }
    }

    /// Mark inactive, close the live channel and fire the done signal.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.active = false;
            if let Some(slot) = inner.channel.take() {
                slot.close();
            }
        }
        self.signal_done();
    }

    /// Fire the done signal. Returns `false` if it had already fired.
    pub fn signal_done(&self) -> bool {
        self.done.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done.subscribe()
    }
}

impl ProgressReporter for Progress {
    fn report(&self, message: &str) {
        self.update(message);
    }

    fn output(&self, text: &str) {
        self.set_output(text);
    }

    fn started(&self) {
        self.transition(
            GenerationState::Generating,
            GenerationState::Generating.announcement(),
        );
    }

    fn completed(&self, message: &str) {
        self.transition(GenerationState::Completed, message);
    }

    fn failed(&self, message: &str) {
        self.fail(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> Progress {
        Progress::new("11111111-1111-4111-8111-111111111111", Arc::new(MessageHistory::new()))
    }

    fn drain(lease: &mut ChannelLease) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = lease.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn message_texts(frames: &[Outbound]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                Outbound::Frame(json) => {
                    let msg: StatusMessage = serde_json::from_str(json).unwrap();
                    Some(msg.message)
                }
                Outbound::Close => None,
            })
            .collect()
    }

    #[test]
    fn first_attach_connects() {
        let p = progress();
        let mut lease = p.attach();
        assert_eq!(p.state(), GenerationState::Connected);
        assert_eq!(message_texts(&drain(&mut lease)), vec!["🔌 Viewer connected"]);
    }

    #[test]
    fn pipeline_may_start_before_any_viewer() {
        let p = progress();
        p.started();
        assert_eq!(p.state(), GenerationState::Generating);
        p.attach();
        assert_eq!(p.state(), GenerationState::Generating);
    }

    #[test]
    fn second_channel_gets_full_history_before_live_messages() {
        let p = progress();
        let mut first = p.attach();
        p.started();
        p.update("one");
        p.update("two");
        let recorded = p.history().len();

        let mut second = p.attach();
        p.update("three");

        // the first channel is told to close
        assert_eq!(drain(&mut first).last(), Some(&Outbound::Close));

        let frames = drain(&mut second);
        let texts = message_texts(&frames);
        assert_eq!(texts.len(), recorded + 1);
        assert_eq!(
            &texts[recorded - 2..],
            &["one".to_string(), "two".to_string(), "three".to_string()]
        );
        assert!(p.has_channel());
    }

    #[test]
    fn stale_detach_keeps_newer_channel() {
        let p = progress();
        let first = p.attach();
        let second = p.attach();
        assert!(!p.detach(first.id));
        assert!(p.has_channel());
        assert!(p.detach(second.id));
        assert!(!p.has_channel());
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let p = progress();
        assert!(!p.transition(GenerationState::Completed, "too early"));
        assert_eq!(p.state(), GenerationState::Initialized);
        assert!(p.history().is_empty());
    }

    #[test]
    fn failure_records_error_and_signals_done_once() {
        let p = progress();
        let rx = p.subscribe_done();
        p.started();
        assert!(p.fail("❌ Designing dungeons failed: boom"));
        assert!(!p.fail("second failure"));
        assert_eq!(p.state(), GenerationState::Error);
        assert_eq!(p.error().as_deref(), Some("❌ Designing dungeons failed: boom"));
        assert!(*rx.borrow());
        assert!(!p.signal_done());
    }

    #[test]
    fn shutdown_closes_channel_and_is_repeatable() {
        let p = progress();
        let mut lease = p.attach();
        p.shutdown();
        p.shutdown();
        assert!(!p.is_active());
        assert!(p.is_done());
        assert_eq!(drain(&mut lease).last(), Some(&Outbound::Close));
    }

    #[test]
    fn output_snapshot_is_kept_and_broadcast() {
        let p = progress();
        let mut lease = p.attach();
        drain(&mut lease);
        p.set_output("## Episode: 1");
        assert_eq!(p.last_output(), "## Episode: 1");
        match drain(&mut lease).pop() {
            Some(Outbound::Frame(json)) => assert!(json.contains("## Episode: 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn output_snapshots_stay_out_of_history() {
        let p = progress();
        p.started();
        let recorded = p.history().len();
        let part = "x".repeat(100);
        let mut text = String::new();
        for _ in 0..40 {
            text.push_str(&part);
            p.set_output(&text);
        }
        assert_eq!(p.history().len(), recorded);
        let stored: usize = p.history().snapshot().iter().map(|m| m.output.len()).sum();
        assert!(stored <= text.len(), "{stored}");

        // a late viewer gets the replay followed by one latest snapshot
        let mut lease = p.attach();
        let frames = drain(&mut lease);
        assert_eq!(frames.len(), recorded + 1);
        match frames.last() {
            Some(Outbound::Frame(json)) => {
                let msg: StatusMessage = serde_json::from_str(json).unwrap();
                assert_eq!(msg.output, text);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_emitters_never_reorder_replay() {
        let p = Arc::new(progress());
        p.started();
        let writer = {
            let p = p.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    p.update(&format!("m{i}"));
                    tokio::task::yield_now().await;
                }
            })
        };
        tokio::task::yield_now().await;
        let mut lease = p.attach();
        writer.await.unwrap();

        let texts: Vec<String> = message_texts(&drain(&mut lease))
            .into_iter()
            .filter(|t| t.starts_with('m'))
            .collect();
        let expected: Vec<String> = (0..200).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
    }
}
