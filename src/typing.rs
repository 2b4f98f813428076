//! Typing animation for completed responses.
//!
//! The model answers in a single round trip, so the scheduler fakes progressive
//! output: it reveals the text as a series of growing prefixes, pausing longer
//! after punctuation and line breaks.

use std::str::CharIndices;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_UNIT: Duration = Duration::from_millis(2);
pub const DEFAULT_LEAD_IN: Duration = Duration::from_millis(200);

/// Delay settings for a typing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Base delay between steps; punctuation and newlines are multiples of it.
    pub unit: Duration,

    /// Pause between creating the empty entry and revealing the first chunk.
    pub lead_in: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            unit: DEFAULT_UNIT,
            lead_in: DEFAULT_LEAD_IN,
        }
    }
}

impl Pacing {
    /// No delays at all; the whole text is revealed as fast as the runtime allows.
    pub fn instant() -> Self {
        Self {
            unit: Duration::ZERO,
            lead_in: Duration::ZERO,
        }
    }

    pub fn delay_after(&self, last: char) -> Duration {
        match last {
            '\n' => self.unit * 5,
            '.' | ',' | '!' | '?' | ';' | ':' => self.unit * 2,
            _ => self.unit,
        }
    }
}

/// Characters revealed per step, keyed to the total length of the response.
pub fn chunk_size(total_chars: usize) -> usize {
    if total_chars > 1000 {
        8
    } else if total_chars > 500 {
        5
    } else {
        2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step<'a> {
    /// Prefix of the full text revealed after this step.
    pub content: &'a str,

    /// Last character of the chunk this step added.
    pub last: char,
}

/// Iterator over the reveal steps of a text. Always cuts on char boundaries.
pub struct Steps<'a> {
    text: &'a str,
    chars: CharIndices<'a>,
    chunk: usize,
}

pub fn steps(text: &str) -> Steps<'_> {
    Steps {
        text,
        chars: text.char_indices(),
        chunk: chunk_size(text.chars().count()),
    }
}

impl<'a> Iterator for Steps<'a> {
    type Item = Step<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, last) = self.chars.by_ref().take(self.chunk).last()?;
        Some(Step {
            content: &self.text[..start + last.len_utf8()],
            last,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TypingScheduler {
    pacing: Pacing,
}

impl TypingScheduler {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing }
    }

    /// Reveal `text` through `emit`.
    ///
    /// The first call to `emit` always carries the empty string; every later call
    /// carries a strictly longer prefix, the last one being `text` itself. `emit`
    /// returns `false` once the run has been invalidated, which ends the run
    /// without emitting anything further. Cancelling `cancel` interrupts the
    /// current pause.
    pub async fn run<F>(&self, text: &str, cancel: &CancellationToken, mut emit: F) -> RunOutcome
    where
        F: FnMut(&str) -> bool,
    {
        if !emit("") {
            return RunOutcome::Cancelled;
        }

        let total = text.chars().count();
        debug!(chars = total, chunk = chunk_size(total), "typing started");

        if total == 0 {
            debug!("typing finished");
            return RunOutcome::Finished;
        }

        if !pause(self.pacing.lead_in, cancel).await {
            return RunOutcome::Cancelled;
        }

        for step in steps(text) {
            if !emit(step.content) {
                return RunOutcome::Cancelled;
            }
            if !pause(self.pacing.delay_after(step.last), cancel).await {
                return RunOutcome::Cancelled;
            }
        }

        debug!(chars = total, "typing finished");
        RunOutcome::Finished
    }
}

/// Returns `false` if the pause was cut short by cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        tokio::task::yield_now().await;
        return !cancel.is_cancelled();
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
