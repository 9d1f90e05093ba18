//! Single-writer ingestion and multi-reader fan-out for one conversation.
//!
//! The buffer sits behind a mutex; every append or completion bumps a
//! `watch` version so subscribers wake without the writer ever waiting on
//! them. Each subscriber keeps its own cursor, so a slow reader only delays
//! itself.

use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::watch;

use crate::buffer::TokenBuffer;

/// Lifecycle of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Recording,
    CancelPending,
    Completed,
}

struct RecorderState {
    buffer: TokenBuffer,
    completed_at: Option<Instant>,
}

pub struct Recorder {
    conversation_id: String,
    owner_address: String,
    started_at: DateTime<Utc>,
    state: Mutex<RecorderState>,
    changes: watch::Sender<u64>,
    cancel_requested: AtomicBool,
    subscribers: AtomicUsize,
}

impl Recorder {
    pub fn new(conversation_id: impl Into<String>, owner_address: impl Into<String>) -> Self {
        let (changes, _receiver) = watch::channel(0);
        Self {
            conversation_id: conversation_id.into(),
            owner_address: owner_address.into(),
            started_at: Utc::now(),
            state: Mutex::new(RecorderState {
                buffer: TokenBuffer::new(),
                completed_at: None,
            }),
            changes,
            cancel_requested: AtomicBool::new(false),
            subscribers: AtomicUsize::new(0),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn owner_address(&self) -> &str {
        &self.owner_address
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append a chunk and wake every subscriber. Empty chunks and chunks
    /// arriving after completion are ignored.
    pub fn append(&self, chunk: &str) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let appended = self.state.lock().buffer.append(chunk);
        if appended {
            self.changes.send_modify(|version| *version += 1);
        }
        appended
    }

    /// Mark the recording complete. Only the first call has any effect, so
    /// subscribers see exactly one termination.
    pub fn complete(&self) -> bool {
        let transitioned = {
            let mut state = self.state.lock();
            let transitioned = state.buffer.complete();
            if transitioned {
                state.completed_at = Some(Instant::now());
            }
            transitioned
        };
        if transitioned {
            self.changes.send_modify(|version| *version += 1);
        }
        transitioned
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().buffer.is_complete()
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.state.lock().completed_at
    }

    /// Ask the producer to stop. Returns `true` only for the request that
    /// raised the flag; repeats and completed recordings accept nothing.
    pub fn request_cancel(&self) -> bool {
        if self.is_complete() {
            return false;
        }
        let raised = !self.cancel_requested.swap(true, Ordering::SeqCst);
        if raised {
            tracing::info!(conversation_id = %self.conversation_id, "Cancel requested");
        }
        raised
    }

    /// Current cancel flag as seen by the ingestion path. Not reset by reading.
    pub fn consume_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RecordingStatus {
        if self.is_complete() {
            RecordingStatus::Completed
        } else if self.consume_cancel_requested() {
            RecordingStatus::CancelPending
        } else {
            RecordingStatus::Recording
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn text(&self) -> String {
        self.state.lock().buffer.text()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Replay from `from_position` (a chunk index) and keep following live
    /// appends until completion.
    pub fn subscribe(self: &Arc<Self>, from_position: usize) -> Subscription {
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Subscription {
            recorder: self.clone(),
            changes: self.changes.subscribe(),
            read_position: from_position,
            pending: VecDeque::new(),
            finished: false,
            attached: true,
        }
    }

    fn read_from(&self, position: usize) -> (Vec<String>, bool) {
        let state = self.state.lock();
        (
            state.buffer.slice_from(position).to_vec(),
            state.buffer.is_complete(),
        )
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("conversation_id", &self.conversation_id)
            .field("owner_address", &self.owner_address)
            .field("status", &self.status())
            .field("chunks", &self.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A replay reader attached to a recorder.
pub struct Subscription {
    recorder: Arc<Recorder>,
    changes: watch::Receiver<u64>,
    read_position: usize,
    pending: VecDeque<String>,
    finished: bool,
    attached: bool,
}

impl Subscription {
    /// Number of chunks delivered so far, counting the resume offset.
    pub fn position(&self) -> usize {
        self.read_position - self.pending.len()
    }

    pub fn conversation_id(&self) -> &str {
        self.recorder.conversation_id()
    }

    /// Next chunk in append order, or `None` once the recording completed
    /// and everything up to completion was delivered.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            if self.finished {
                return None;
            }

            // Mark the current version seen before reading, so an append that
            // lands after the read still wakes `changed()` below.
            self.changes.borrow_and_update();
            let (batch, complete) = self.recorder.read_from(self.read_position);
            if !batch.is_empty() {
                self.read_position += batch.len();
                self.pending.extend(batch);
                continue;
            }
            if complete {
                self.finish();
                return None;
            }
            if self.changes.changed().await.is_err() {
                self.finish();
                return None;
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|chunk| (chunk, subscription))
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.detach();
    }

    fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.recorder.subscribers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
