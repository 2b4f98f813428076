//! Chat session: the ordered message list plus the request → typing pipeline.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::delivery::{DeliveryQueue, Enqueued, Posted, TypingSink};
use crate::provider::ResponseClient;
use crate::typing::TypingScheduler;

/// Shown in place of an answer when the model call fails.
pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Entry identifier. Increases with creation order and is never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub id: EntryId,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Change notifications for whatever is rendering the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    EntryAdded(EntryId),
    /// Entry content changed; `len` is its new byte length.
    ContentUpdated { id: EntryId, len: usize },
    Typing(bool),
    Loading(bool),
    Error(Option<String>),
    Cleared,
}

/// What `send_message` did with its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// The answer is being typed out now.
    Started,
    /// The answer is waiting for the running animation to finish.
    Queued,
    /// The model call failed; the apology entry was added, or is held behind
    /// the answer being typed.
    Failed,
    /// The session was cleared while the request was outstanding; the answer was dropped.
    Discarded,
}

#[derive(Default)]
struct SessionState {
    messages: Vec<MessageEntry>,
    next_id: u64,
    in_flight: usize,
    error: Option<String>,
    /// Bumped by `clear_messages` so answers to cleared prompts are dropped.
    generation: u64,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl SessionState {
    fn push(&mut self, content: String, is_user: bool) -> EntryId {
        let id = EntryId::new(self.next_id);
        self.next_id += 1;
        self.messages.push(MessageEntry {
            id,
            content,
            is_user,
            timestamp: Utc::now(),
        });
        self.emit(SessionEvent::EntryAdded(id));
        id
    }

    fn set_error(&mut self, error: Option<String>) {
        if self.error != error {
            self.error = error.clone();
            self.emit(SessionEvent::Error(error));
        }
    }

    fn emit(&mut self, ev: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(ev.clone()).is_ok());
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bridges typing runs to the message list without handing out the list itself.
struct SessionSink {
    state: Arc<Mutex<SessionState>>,
}

impl TypingSink for SessionSink {
    fn begin_entry(&self) -> EntryId {
        lock(&self.state).push(String::new(), false)
    }

    fn update(&self, id: EntryId, content: &str) {
        let mut st = lock(&self.state);
        let Some(entry) = st.messages.iter_mut().rev().find(|m| m.id == id) else {
            debug!(%id, "update for unknown entry ignored");
            return;
        };
        entry.content.clear();
        entry.content.push_str(content);
        st.emit(SessionEvent::ContentUpdated {
            id,
            len: content.len(),
        });
    }

    fn typing(&self, active: bool) {
        lock(&self.state).emit(SessionEvent::Typing(active));
    }
}

/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    state: Arc<Mutex<SessionState>>,
    client: Arc<RwLock<Arc<dyn ResponseClient>>>,
    delivery: DeliveryQueue,
}

impl ChatSession {
    pub fn new(client: Arc<dyn ResponseClient>, scheduler: TypingScheduler) -> Self {
        let state = Arc::new(Mutex::new(SessionState::default()));
        let sink = Arc::new(SessionSink {
            state: state.clone(),
        });
        Self {
            state,
            client: Arc::new(RwLock::new(client)),
            delivery: DeliveryQueue::new(scheduler, sink),
        }
    }

    /// Send one prompt and hand the answer to the typing queue.
    ///
    /// Never fails: a model error becomes an apology entry plus `error()`.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let prompt = text.trim();
        if prompt.is_empty() {
            return SendOutcome::Ignored;
        }

        let generation = {
            let mut st = self.lock();
            st.push(prompt.to_string(), true);
            st.set_error(None);
            st.in_flight += 1;
            if st.in_flight == 1 {
                st.emit(SessionEvent::Loading(true));
            }
            st.generation
        };

        let client = self.client();
        info!(provider = client.name(), model = %client.model(), "requesting response");
        let result = client.generate(prompt.to_string()).await;

        {
            let mut st = self.lock();
            st.in_flight = st.in_flight.saturating_sub(1);
            if st.in_flight == 0 {
                st.emit(SessionEvent::Loading(false));
            }
        }

        // Generation checks run under the queue lock, which `clear_messages`
        // holds while it bumps the generation.
        match result {
            Ok(answer) => match self
                .delivery
                .enqueue_if(answer, || self.lock().generation == generation)
            {
                Some(Enqueued::Started) => SendOutcome::Started,
                Some(Enqueued::Pending { replaced }) => {
                    if replaced {
                        info!("a newer answer replaced the one waiting to be typed");
                    }
                    SendOutcome::Queued
                }
                None => {
                    debug!("session cleared while waiting; dropping response");
                    SendOutcome::Discarded
                }
            },
            Err(err) => {
                warn!(error = %err, "generation failed");
                let message = err.to_string();
                let posted = self.delivery.post_if(APOLOGY.to_string(), || {
                    let mut st = self.lock();
                    if st.generation != generation {
                        return false;
                    }
                    st.set_error(Some(message));
                    true
                });
                match posted {
                    Some(Posted::Appended) => SendOutcome::Failed,
                    Some(Posted::Held) => {
                        debug!("apology held until the running answer finishes");
                        SendOutcome::Failed
                    }
                    None => SendOutcome::Discarded,
                }
            }
        }
    }

    /// Drop every entry, the error, and any running or pending animation.
    pub fn clear_messages(&self) {
        // Queue lock first, then the session's.
        self.delivery.reset_with(|| {
            let mut st = self.lock();
            st.messages.clear();
            st.error = None;
            st.generation += 1;
            st.emit(SessionEvent::Cleared);
        });
    }

    pub fn dismiss_error(&self) {
        self.lock().set_error(None);
    }

    pub fn messages(&self) -> Vec<MessageEntry> {
        self.lock().messages.clone()
    }

    pub fn content_of(&self, id: EntryId) -> Option<String> {
        self.lock()
            .messages
            .iter()
            .rev()
            .find(|m| m.id == id)
            .map(|m| m.content.clone())
    }

    /// True while at least one model call is outstanding.
    pub fn is_loading(&self) -> bool {
        self.lock().in_flight > 0
    }

    /// True while any answer is being typed out, including chained ones.
    pub fn is_typing(&self) -> bool {
        self.delivery.is_active()
    }

    /// An answer is parked behind the one currently being typed.
    pub fn has_queued_answer(&self) -> bool {
        self.delivery.has_pending()
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn client(&self) -> Arc<dyn ResponseClient> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the model client; requests already in flight keep the old one.
    #[cfg(any(test, feature = "tui"))]
    pub fn set_client(&self, client: Arc<dyn ResponseClient>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        lock(&self.state)
    }
}
