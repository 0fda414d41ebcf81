//! Message-lifecycle state machine for one chat session.
//!
//! Owns the ordered transcript, the processing state, the typing cursor,
//! and the error banner, and sequences the rate-limit store, the command
//! gateway, and the typing reveal. The machine itself is synchronous:
//! [`ChatSession::submit`] and [`ChatSession::resolve`] are plain
//! transitions returning instruction values, and the async driver performs
//! the network call and the reveal between them. That split keeps every
//! lifecycle property testable without I/O.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::gateway::{CommandReply, GatewayError};
use crate::limits::{LimitStorage, LimitStore};
use crate::models::{Message, MessageId, Role};

/// Banner text when the quota is exhausted.
pub const QUOTA_BANNER: &str =
    "Message limit reached. Please wait 5 hours for your limit to reset.";

/// Commands that look like video requests get a video-flavored pending
/// indicator in the driver.
static VIDEO_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(youtube\.com|youtu\.be|play (a )?video|video)")
        .expect("video pattern compiles")
});

/// Whether a command reads like a video request.
pub fn is_video_command(command: &str) -> bool {
    VIDEO_COMMAND.is_match(command)
}

/// Lifecycle state of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    /// No request in flight, nothing typing.
    Idle,
    /// Request sent, response pending.
    Awaiting,
    /// Response received, typing reveal active.
    Revealing,
    /// Quota exhausted; submissions are guarded no-ops.
    Blocked,
    /// Last cycle failed. Visible in the transcript, does not halt
    /// future submissions.
    Errored,
}

/// Outcome of a submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Accepted; the driver sends `command` to the gateway.
    Accepted {
        /// The trimmed command text.
        command: String,
        /// Whether the command reads like a video request.
        is_video: bool,
    },
    /// Whitespace-only input; nothing changed.
    RejectedEmpty,
    /// A request or reveal is already in flight; nothing changed.
    RejectedBusy,
    /// Quota exhausted; no request is sent.
    Blocked {
        /// The quota banner text.
        banner: String,
    },
}

/// Outcome of resolving a gateway reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Assistant reply appended; the driver starts revealing it.
    Reveal {
        /// Identity of the appended assistant message.
        message: MessageId,
        /// Full reply text to reveal.
        content: String,
        /// Video URLs attached to the reply.
        media_links: Vec<String>,
    },
    /// Cycle failed; the error text is in the transcript and the banner.
    Failed {
        /// The error text.
        banner: String,
    },
}

/// The message-lifecycle state machine.
pub struct ChatSession<S> {
    messages: Vec<Message>,
    state: ChatState,
    typing: Option<MessageId>,
    banner: Option<String>,
    limits: LimitStore<S>,
}

impl<S: LimitStorage> ChatSession<S> {
    /// Create a session over an initialized rate-limit store.
    ///
    /// The store's window-expiry check has already run in
    /// [`LimitStore::initialize`], so a previously exhausted-but-stale
    /// quota is back to full before the first submission is evaluated.
    pub fn new(limits: LimitStore<S>) -> Self {
        Self {
            messages: Vec::new(),
            state: ChatState::Idle,
            typing: None,
            banner: None,
            limits,
        }
    }

    /// Attempt to submit user input.
    ///
    /// Appends the user message optimistically on acceptance; the entry is
    /// never rolled back, even when the cycle later fails.
    pub fn submit(&mut self, input: &str, now: DateTime<Utc>) -> Submission {
        let command = input.trim();
        if command.is_empty() {
            return Submission::RejectedEmpty;
        }

        // Double-submit guard: one request/reveal in flight at a time.
        if matches!(self.state, ChatState::Awaiting | ChatState::Revealing) {
            return Submission::RejectedBusy;
        }

        if self.limits.remaining() == 0 {
            self.state = ChatState::Blocked;
            self.banner = Some(QUOTA_BANNER.to_string());
            return Submission::Blocked {
                banner: QUOTA_BANNER.to_string(),
            };
        }

        let id = self.next_id(now, Role::User);
        self.messages.push(Message::new(id, command.to_string()));
        self.state = ChatState::Awaiting;
        self.banner = None;

        Submission::Accepted {
            command: command.to_string(),
            is_video: is_video_command(command),
        }
    }

    /// Resolve the gateway result for the in-flight request.
    ///
    /// Callers pair every `Accepted` submission with exactly one call
    /// here. On success the assistant message is appended, the quota is
    /// consumed and persisted, and the reveal begins; on failure the error
    /// text lands in both the transcript and the banner.
    pub fn resolve(
        &mut self,
        result: Result<CommandReply, GatewayError>,
        now: DateTime<Utc>,
    ) -> Resolution {
        match result {
            Ok(reply) => {
                let id = self.next_id(now, Role::Assistant);
                self.messages.push(Message::with_media(
                    id,
                    reply.text.clone(),
                    reply.video_urls.clone(),
                ));

                let remaining = self.limits.consume();
                tracing::debug!(remaining, "command cycle completed");

                self.typing = Some(id);
                self.state = ChatState::Revealing;
                Resolution::Reveal {
                    message: id,
                    content: reply.text,
                    media_links: reply.video_urls,
                }
            }
            Err(e) => {
                let banner = e.to_string();
                let id = self.next_id(now, Role::Assistant);
                // The failure stays visible in history, not just the banner.
                self.messages.push(Message::new(id, banner.clone()));
                self.banner = Some(banner.clone());
                self.state = ChatState::Errored;
                Resolution::Failed { banner }
            }
        }
    }

    /// The typing engine reported completion for `target`.
    ///
    /// Stale completions (a cancelled or superseded reveal) are ignored.
    pub fn reveal_complete(&mut self, target: MessageId) {
        if self.typing == Some(target) {
            self.typing = None;
            self.state = ChatState::Idle;
        }
    }

    /// The ordered transcript. Append-only for the session's lifetime.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ChatState {
        self.state
    }

    /// Identity of the assistant message currently being revealed.
    pub const fn typing(&self) -> Option<MessageId> {
        self.typing
    }

    /// Current banner text, if a failure or block is being surfaced.
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Messages left in the current quota window.
    pub const fn remaining(&self) -> u32 {
        self.limits.remaining()
    }

    /// Access the rate-limit store.
    pub const fn limits(&self) -> &LimitStore<S> {
        &self.limits
    }

    /// Next message identifier: unique and non-decreasing even when two
    /// entries land in the same millisecond.
    fn next_id(&self, now: DateTime<Utc>, role: Role) -> MessageId {
        let candidate = MessageId::new(now, role);
        match self.messages.last() {
            Some(last) if candidate <= last.id => {
                MessageId::from_parts(last.id.timestamp_ms() + 1, role)
            }
            _ => candidate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::DELIVERY_FAILURE_TEXT;
    use crate::limits::{FileStorage, LimitStorage, MemoryStorage, StoredLimits, MESSAGE_QUOTA};
    use chrono::Duration;

    fn session() -> ChatSession<MemoryStorage> {
        let store = LimitStore::initialize(MemoryStorage::default(), Utc::now()).unwrap();
        ChatSession::new(store)
    }

    fn exhausted_session() -> ChatSession<MemoryStorage> {
        let now = Utc::now();
        let mut storage = MemoryStorage::default();
        storage
            .store(&StoredLimits {
                remaining: 0,
                window_start: now - Duration::hours(1),
            })
            .unwrap();
        ChatSession::new(LimitStore::initialize(storage, now).unwrap())
    }

    fn hello_reply() -> CommandReply {
        CommandReply {
            text: "Hello".to_string(),
            video_urls: Vec::new(),
        }
    }

    #[test]
    fn accepted_submission_appends_one_user_message() {
        let mut chat = session();

        let submission = chat.submit("Schedule a reminder", Utc::now());
        assert!(matches!(submission, Submission::Accepted { .. }));
        assert_eq!(chat.state(), ChatState::Awaiting);
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].role, Role::User);
        assert_eq!(chat.messages()[0].content, "Schedule a reminder");
    }

    #[test]
    fn whitespace_only_input_is_rejected_without_state_change() {
        let mut chat = session();

        assert_eq!(chat.submit("   \t  ", Utc::now()), Submission::RejectedEmpty);
        assert_eq!(chat.state(), ChatState::Idle);
        assert!(chat.messages().is_empty());
    }

    #[test]
    fn submissions_while_awaiting_are_noops() {
        let mut chat = session();
        chat.submit("first", Utc::now());

        assert_eq!(chat.submit("second", Utc::now()), Submission::RejectedBusy);
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.state(), ChatState::Awaiting);
    }

    #[test]
    fn submissions_while_revealing_are_noops() {
        let mut chat = session();
        chat.submit("first", Utc::now());
        chat.resolve(Ok(hello_reply()), Utc::now());
        assert_eq!(chat.state(), ChatState::Revealing);

        assert_eq!(chat.submit("second", Utc::now()), Submission::RejectedBusy);
        assert_eq!(chat.messages().len(), 2);
    }

    #[test]
    fn exhausted_quota_blocks_without_touching_the_log() {
        let mut chat = exhausted_session();

        let submission = chat.submit("hello", Utc::now());
        assert_eq!(
            submission,
            Submission::Blocked {
                banner: QUOTA_BANNER.to_string()
            }
        );
        assert!(chat.messages().is_empty());
        assert_eq!(chat.state(), ChatState::Blocked);
        assert_eq!(chat.banner(), Some(QUOTA_BANNER));
    }

    #[test]
    fn successful_cycle_round_trip() {
        let mut chat = session();
        chat.submit("say hello", Utc::now());

        let resolution = chat.resolve(Ok(hello_reply()), Utc::now());
        let Resolution::Reveal { message, content, media_links } = resolution else {
            panic!("expected a reveal");
        };
        assert_eq!(content, "Hello");
        assert!(media_links.is_empty());

        // Transcript gained exactly one assistant message.
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[1].role, Role::Assistant);
        assert_eq!(chat.messages()[1].content, "Hello");

        // Quota decremented by exactly one and persisted.
        assert_eq!(chat.remaining(), MESSAGE_QUOTA - 1);
        let persisted = chat.limits().storage().load().unwrap().unwrap();
        assert_eq!(persisted.remaining, MESSAGE_QUOTA - 1);

        // Reveal completion returns the session to idle.
        assert_eq!(chat.state(), ChatState::Revealing);
        assert_eq!(chat.typing(), Some(message));
        chat.reveal_complete(message);
        assert_eq!(chat.state(), ChatState::Idle);
        assert_eq!(chat.typing(), None);
    }

    #[test]
    fn error_envelope_lands_in_transcript_and_banner() {
        let mut chat = session();
        chat.submit("do something", Utc::now());

        let resolution = chat.resolve(
            Err(GatewayError::Application("rate limited upstream".to_string())),
            Utc::now(),
        );
        assert_eq!(
            resolution,
            Resolution::Failed {
                banner: "rate limited upstream".to_string()
            }
        );

        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[1].role, Role::Assistant);
        assert_eq!(chat.messages()[1].content, "rate limited upstream");
        assert_eq!(chat.banner(), Some("rate limited upstream"));
        assert_eq!(chat.state(), ChatState::Errored);

        // Quota is only consumed by successful cycles.
        assert_eq!(chat.remaining(), MESSAGE_QUOTA);
        let persisted = chat.limits().storage().load().unwrap().unwrap();
        assert_eq!(persisted.remaining, MESSAGE_QUOTA);
    }

    #[test]
    fn delivery_failure_uses_the_fixed_text() {
        let mut chat = session();
        chat.submit("do something", Utc::now());

        chat.resolve(Err(GatewayError::Delivery), Utc::now());
        assert_eq!(chat.banner(), Some(DELIVERY_FAILURE_TEXT));
        assert_eq!(chat.messages()[1].content, DELIVERY_FAILURE_TEXT);
    }

    #[test]
    fn optimistic_user_message_survives_a_failed_cycle() {
        let mut chat = session();
        chat.submit("doomed request", Utc::now());
        chat.resolve(Err(GatewayError::Delivery), Utc::now());

        assert_eq!(chat.messages()[0].role, Role::User);
        assert_eq!(chat.messages()[0].content, "doomed request");
    }

    #[test]
    fn errored_session_accepts_new_submissions() {
        let mut chat = session();
        chat.submit("first", Utc::now());
        chat.resolve(Err(GatewayError::Delivery), Utc::now());
        assert_eq!(chat.state(), ChatState::Errored);

        let submission = chat.submit("second", Utc::now());
        assert!(matches!(submission, Submission::Accepted { .. }));
        // Accepting a new submission clears the stale banner.
        assert_eq!(chat.banner(), None);
    }

    #[test]
    fn message_ids_are_unique_and_nondecreasing() {
        let now = Utc::now();
        let mut chat = session();

        chat.submit("one", now);
        let Resolution::Reveal { message, .. } = chat.resolve(Ok(hello_reply()), now) else {
            panic!("expected a reveal");
        };
        chat.reveal_complete(message);
        chat.submit("two", now);
        chat.resolve(Ok(hello_reply()), now);

        let ids: Vec<_> = chat.messages().iter().map(|m| m.id).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "ids out of order: {pair:?}");
        }
    }

    #[test]
    fn blocked_session_unblocks_after_the_window_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.json");
        let now = Utc::now();

        let mut storage = FileStorage::open_at(path.clone());
        storage
            .store(&StoredLimits {
                remaining: 0,
                window_start: now - Duration::hours(1),
            })
            .unwrap();

        let mut chat =
            ChatSession::new(LimitStore::initialize(storage, now).unwrap());
        assert!(matches!(
            chat.submit("hello", now),
            Submission::Blocked { .. }
        ));

        // A later initialization finds the window elapsed and resets it.
        let later = now + Duration::hours(6);
        let store = LimitStore::initialize(FileStorage::open_at(path), later).unwrap();
        let mut chat = ChatSession::new(store);
        assert!(matches!(
            chat.submit("hello", later),
            Submission::Accepted { .. }
        ));
    }

    #[test]
    fn video_commands_are_detected() {
        assert!(is_video_command("Play a video of red pandas"));
        assert!(is_video_command("play video"));
        assert!(is_video_command("open youtube.com/watch?v=abc"));
        assert!(is_video_command("https://youtu.be/abc"));
        assert!(is_video_command("Search for a video"));
        assert!(!is_video_command("Schedule a reminder for 9am"));
    }
}
