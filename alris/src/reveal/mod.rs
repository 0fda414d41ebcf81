//! Typing-reveal engine.
//!
//! Reveals an already fully received assistant message character by
//! character on a fixed-interval schedule, independent of network timing.
//! Each invocation produces a finite stream of growing prefixes followed
//! by exactly one completion event. The handle owns the timer task, so
//! teardown is a single deterministic `cancel()` call.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::MessageId;

/// Default delay between revealed characters.
pub const DEFAULT_CHAR_DELAY: Duration = Duration::from_millis(30);

/// Event emitted while a reveal is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevealEvent {
    /// The revealed prefix grew by one character.
    Prefix(String),
    /// The full text has been revealed. Emitted exactly once, last.
    Completed,
}

/// Handle to an in-progress reveal.
///
/// A reveal is not restartable; superseding a message means cancelling
/// its handle and starting a fresh reveal for the new target.
#[derive(Debug)]
pub struct RevealHandle {
    target: MessageId,
    events: mpsc::Receiver<RevealEvent>,
    task: JoinHandle<()>,
}

impl RevealHandle {
    /// The message this reveal targets.
    pub const fn target(&self) -> MessageId {
        self.target
    }

    /// Receive the next event. Returns `None` once the stream has ended,
    /// whether by completion or cancellation.
    pub async fn next_event(&mut self) -> Option<RevealEvent> {
        self.events.recv().await
    }

    /// Cancel the reveal. Pending ticks are dropped and no completion
    /// event is delivered after this returns.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Start revealing `text`, one character per tick.
///
/// Empty text completes immediately without scheduling a tick. Prefix
/// boundaries are Unicode character boundaries, never byte offsets.
pub fn reveal(target: MessageId, text: &str, char_delay: Duration) -> RevealHandle {
    let (tx, rx) = mpsc::channel(64);
    let text = text.to_string();

    let task = tokio::spawn(async move {
        if text.is_empty() {
            let _ = tx.send(RevealEvent::Completed).await;
            return;
        }

        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();

        for end in boundaries {
            tokio::time::sleep(char_delay).await;
            let prefix = text[..end].to_string();
            if tx.send(RevealEvent::Prefix(prefix)).await.is_err() {
                // Receiver gone; stop ticking.
                return;
            }
        }

        let _ = tx.send(RevealEvent::Completed).await;
    });

    RevealHandle {
        target,
        events: rx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn target() -> MessageId {
        MessageId::from_parts(1_000, Role::Assistant)
    }

    #[tokio::test(start_paused = true)]
    async fn reveals_growing_prefixes_then_completes_once() {
        let mut handle = reveal(target(), "abc", DEFAULT_CHAR_DELAY);

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                RevealEvent::Prefix("a".to_string()),
                RevealEvent::Prefix("ab".to_string()),
                RevealEvent::Prefix("abc".to_string()),
                RevealEvent::Completed,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_text_completes_immediately() {
        let mut handle = reveal(target(), "", DEFAULT_CHAR_DELAY);

        assert_eq!(handle.next_event().await, Some(RevealEvent::Completed));
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_first_tick_suppresses_completion() {
        let mut handle = reveal(target(), "abc", DEFAULT_CHAR_DELAY);

        assert_eq!(
            handle.next_event().await,
            Some(RevealEvent::Prefix("a".to_string()))
        );
        handle.cancel();

        // The stream ends without ever delivering a completion event.
        while let Some(event) = handle.next_event().await {
            assert_ne!(event, RevealEvent::Completed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prefixes_respect_character_boundaries() {
        let text = "日本語";
        let mut handle = reveal(target(), text, DEFAULT_CHAR_DELAY);

        let mut prefixes = Vec::new();
        while let Some(event) = handle.next_event().await {
            if let RevealEvent::Prefix(prefix) = event {
                assert!(text.starts_with(&prefix));
                prefixes.push(prefix);
            }
        }

        assert_eq!(prefixes, vec!["日", "日本", "日本語"]);
    }
}
