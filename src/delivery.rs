//! Serializes typing runs: one active run, one pending slot, newest wins.
//!
//! While a run is active its entry is the newest assistant entry in the
//! session. Finished entries posted meanwhile are held back until it ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::session::EntryId;
use crate::typing::{RunOutcome, TypingScheduler};

/// The only handle a typing run gets on the message list.
pub trait TypingSink: Send + Sync {
    /// Append an empty assistant entry and return its id.
    fn begin_entry(&self) -> EntryId;

    /// Replace the content of entry `id`. Unknown ids are ignored.
    fn update(&self, id: EntryId, content: &str);

    /// A chain of runs started (`true`) or drained (`false`).
    fn typing(&self, active: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// No run was active; this text is being revealed now.
    Started,

    /// Held until the active run finishes. `replaced` is set when an older
    /// pending text was discarded to make room.
    Pending { replaced: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posted {
    /// Appended as a finished entry right away.
    Appended,

    /// A run is active; the entry is appended when it finishes.
    Held,
}

#[derive(Clone)]
pub struct DeliveryQueue {
    state: Arc<Mutex<QueueState>>,
    sink: Arc<dyn TypingSink>,
    scheduler: TypingScheduler,
}

struct QueueState {
    active: bool,
    pending: Option<String>,

    /// Posted while a run was active, in arrival order.
    held: Vec<String>,

    /// Bumped by `reset`; a run only emits while its epoch is current.
    epoch: u64,
    cancel: CancellationToken,
}

impl DeliveryQueue {
    pub fn new(scheduler: TypingScheduler, sink: Arc<dyn TypingSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                active: false,
                pending: None,
                held: Vec::new(),
                epoch: 0,
                cancel: CancellationToken::new(),
            })),
            sink,
            scheduler,
        }
    }

    /// Start revealing `full_text`, or park it if a run is already going.
    ///
    /// `wanted` is checked under the queue lock; if it returns `false` the
    /// text is dropped and `None` is returned. Must be called from within a
    /// tokio runtime.
    pub fn enqueue_if(&self, full_text: String, wanted: impl FnOnce() -> bool) -> Option<Enqueued> {
        let (epoch, cancel) = {
            let mut st = self.lock();
            if !wanted() {
                return None;
            }
            if st.active {
                let replaced = st.pending.replace(full_text).is_some();
                if replaced {
                    debug!("pending delivery replaced by a newer response");
                }
                return Some(Enqueued::Pending { replaced });
            }
            st.active = true;
            self.sink.typing(true);
            (st.epoch, st.cancel.clone())
        };

        tokio::spawn(self.clone().drive(full_text, epoch, cancel));
        Some(Enqueued::Started)
    }

    /// Append `text` as a finished entry, without animation.
    ///
    /// Held behind the active run, if there is one, so the running entry stays
    /// the newest. `wanted` works as in [`enqueue_if`](Self::enqueue_if).
    pub fn post_if(&self, text: String, wanted: impl FnOnce() -> bool) -> Option<Posted> {
        let mut st = self.lock();
        if !wanted() {
            return None;
        }
        if st.active {
            st.held.push(text);
            return Some(Posted::Held);
        }
        self.append(&text);
        Some(Posted::Appended)
    }

    /// Drop pending and held texts and invalidate the active run, if any.
    ///
    /// `then` runs before the queue lock is released, so nothing can be
    /// enqueued between the reset and whatever `then` does.
    pub fn reset_with(&self, then: impl FnOnce()) {
        let mut st = self.lock();
        st.epoch = st.epoch.wrapping_add(1);
        st.cancel.cancel();
        st.cancel = CancellationToken::new();

        let dropped = st.pending.take().is_some();
        st.held.clear();
        let was_active = std::mem::replace(&mut st.active, false);
        if was_active {
            self.sink.typing(false);
        }
        debug!(was_active, dropped, epoch = st.epoch, "delivery queue reset");
        then();
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    async fn drive(self, mut text: String, epoch: u64, cancel: CancellationToken) {
        loop {
            let mut entry: Option<EntryId> = None;
            let outcome = self
                .scheduler
                .run(&text, &cancel, |content| {
                    self.with_epoch(epoch, |sink| match entry {
                        Some(id) => sink.update(id, content),
                        None => entry = Some(sink.begin_entry()),
                    })
                    .is_some()
                })
                .await;

            if outcome == RunOutcome::Cancelled {
                debug!(epoch, "typing run invalidated");
                return;
            }

            text = {
                let mut st = self.lock();
                if st.epoch != epoch {
                    return;
                }
                for note in std::mem::take(&mut st.held) {
                    self.append(&note);
                }
                match st.pending.take() {
                    Some(next) => next,
                    None => {
                        st.active = false;
                        self.sink.typing(false);
                        return;
                    }
                }
            };

            debug!(epoch, "starting pending delivery");
            tokio::task::yield_now().await;
        }
    }

    /// Caller holds the queue lock.
    fn append(&self, text: &str) {
        let id = self.sink.begin_entry();
        self.sink.update(id, text);
    }

    /// Run `f` against the sink while holding the queue lock, only if `epoch`
    /// is still current.
    fn with_epoch<R>(&self, epoch: u64, f: impl FnOnce(&dyn TypingSink) -> R) -> Option<R> {
        let st = self.lock();
        if st.epoch != epoch {
            return None;
        }
        Some(f(self.sink.as_ref()))
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typing::Pacing;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Seen {
        Begin(EntryId),
        Update(EntryId, String),
        Typing(bool),
    }

    #[derive(Default)]
    struct RecordingSink {
        next: AtomicU64,
        log: Mutex<Vec<Seen>>,
    }

    impl RecordingSink {
        fn log(&self) -> Vec<Seen> {
            self.log.lock().unwrap().clone()
        }

        fn final_contents(&self) -> Vec<String> {
            let log = self.log();
            log.iter()
                .filter_map(|s| match s {
                    Seen::Begin(id) => Some(*id),
                    _ => None,
                })
                .map(|id| {
                    log.iter()
                        .rev()
                        .find_map(|s| match s {
                            Seen::Update(u, c) if *u == id => Some(c.clone()),
                            _ => None,
                        })
                        .unwrap_or_default()
                })
                .collect()
        }
    }

    impl TypingSink for RecordingSink {
        fn begin_entry(&self) -> EntryId {
            let id = EntryId::new(self.next.fetch_add(1, Ordering::SeqCst));
            self.log.lock().unwrap().push(Seen::Begin(id));
            id
        }

        fn update(&self, id: EntryId, content: &str) {
            self.log.lock().unwrap().push(Seen::Update(id, content.to_string()));
        }

        fn typing(&self, active: bool) {
            self.log.lock().unwrap().push(Seen::Typing(active));
        }
    }

    fn queue() -> (DeliveryQueue, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = TypingScheduler::new(Pacing {
            unit: Duration::from_millis(2),
            lead_in: Duration::ZERO,
        });
        (DeliveryQueue::new(scheduler, sink.clone()), sink)
    }

    fn push(q: &DeliveryQueue, text: impl Into<String>) -> Enqueued {
        q.enqueue_if(text.into(), || true).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queue_starts_immediately() {
        let (q, sink) = queue();
        assert_eq!(push(&q, "hello"), Enqueued::Started);
        assert!(q.is_active());

        settle().await;
        assert!(!q.is_active());
        assert_eq!(sink.final_contents(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn newest_pending_wins() {
        let (q, sink) = queue();
        assert_eq!(push(&q, "first answer"), Enqueued::Started);
        assert_eq!(push(&q, "second answer"), Enqueued::Pending { replaced: false });
        assert_eq!(push(&q, "third answer"), Enqueued::Pending { replaced: true });
        assert!(q.has_pending());

        settle().await;
        assert_eq!(
            sink.final_contents(),
            vec!["first answer".to_string(), "third answer".to_string()]
        );
        assert!(!q.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn chained_runs_never_interleave() {
        let (q, sink) = queue();
        push(&q, "alpha alpha alpha");
        tokio::time::sleep(Duration::from_millis(3)).await;
        push(&q, "beta");

        settle().await;
        let log = sink.log();
        let second_begin = log
            .iter()
            .position(|s| matches!(s, Seen::Begin(id) if *id == EntryId::new(1)))
            .unwrap();
        let first_done = log
            .iter()
            .position(|s| matches!(s, Seen::Update(id, c) if *id == EntryId::new(0) && c == "alpha alpha alpha"))
            .unwrap();
        assert!(first_done < second_begin);
        assert!(log[second_begin..]
            .iter()
            .all(|s| !matches!(s, Seen::Update(id, _) if *id == EntryId::new(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_flag_spans_the_whole_chain() {
        let (q, sink) = queue();
        push(&q, "one");
        push(&q, "two");
        settle().await;

        let flags: Vec<bool> = sink
            .log()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Typing(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_silences_the_active_run_and_drops_pending() {
        let (q, sink) = queue();
        push(&q, "z".repeat(1200));
        push(&q, "never shown");
        tokio::time::sleep(Duration::from_millis(20)).await;

        q.reset_with(|| {});
        assert!(!q.is_active());
        assert!(!q.has_pending());
        let len = sink.log().len();

        settle().await;
        let log = sink.log();
        assert_eq!(log.len(), len);
        assert!(!log.iter().any(|s| matches!(s, Seen::Update(_, c) if c == "never shown")));
        assert_eq!(log.last(), Some(&Seen::Typing(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn queue_is_usable_after_reset() {
        let (q, sink) = queue();
        push(&q, "z".repeat(800));
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.reset_with(|| {});

        assert_eq!(push(&q, "fresh"), Enqueued::Started);
        settle().await;
        assert_eq!(sink.final_contents().last().map(String::as_str), Some("fresh"));
        assert!(!q.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_still_creates_an_entry() {
        let (q, sink) = queue();
        push(&q, String::new());
        settle().await;
        assert_eq!(
            sink.log(),
            vec![Seen::Typing(true), Seen::Begin(EntryId::new(0)), Seen::Typing(false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn post_on_idle_queue_appends_at_once() {
        let (q, sink) = queue();
        assert_eq!(q.post_if("sorry".into(), || true), Some(Posted::Appended));
        assert_eq!(
            sink.log(),
            vec![Seen::Begin(EntryId::new(0)), Seen::Update(EntryId::new(0), "sorry".into())]
        );
        assert!(!q.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn post_waits_for_the_running_entry_to_finish() {
        let (q, sink) = queue();
        push(&q, "z".repeat(1200));
        push(&q, "after");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(q.post_if("sorry".into(), || true), Some(Posted::Held));
        assert!(!sink.log().iter().any(|s| matches!(s, Seen::Begin(id) if *id != EntryId::new(0))));

        settle().await;
        assert_eq!(
            sink.final_contents(),
            vec!["z".repeat(1200), "sorry".to_string(), "after".to_string()]
        );

        // Every update targets the newest entry begun so far.
        let mut newest = None;
        for s in sink.log() {
            match s {
                Seen::Begin(id) => newest = Some(id),
                Seen::Update(id, _) => assert_eq!(Some(id), newest),
                Seen::Typing(_) => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unwanted_texts_are_dropped_under_the_lock() {
        let (q, sink) = queue();
        assert_eq!(q.enqueue_if("stale".into(), || false), None);
        assert_eq!(q.post_if("stale".into(), || false), None);
        assert!(!q.is_active());
        settle().await;
        assert!(sink.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_drops_held_posts() {
        let (q, sink) = queue();
        push(&q, "z".repeat(1200));
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.post_if("sorry".into(), || true);

        let mut ran = false;
        q.reset_with(|| ran = true);
        assert!(ran);

        settle().await;
        assert!(!sink.log().iter().any(|s| matches!(s, Seen::Update(_, c) if c == "sorry")));
    }
}
