//! The display list and its reconciliation rules.
//!
//! Two sources feed one ordered list: the history fetched once when the chat
//! view opens, and the live stream of confirmations. Outbound sends are shown
//! straight away as pending entries and replaced when the server confirms
//! them. Entries keep insertion order; nothing is ever re-sorted.
//!
//! Each pending entry carries a correlation nonce. A confirmation that echoes
//! a nonce resolves exactly that entry, so several sends can be in flight at
//! once. A confirmation without a nonce comes from a server that does not
//! correlate, and clears every pending entry.
//!
//! A send the server refuses is failed the same way: by its nonce when the
//! refusal echoes one, otherwise every pending entry goes.

use chat_shared::{Message, UserRef};
use chrono::Utc;
use rand::Rng;
use thiserror::Error;

/// Placeholder ids start here. Server ids never get this large.
pub const PLACEHOLDER_ID_FLOOR: u64 = 1_000_000_000_000;

pub fn is_placeholder_id(id: u64) -> bool {
    id >= PLACEHOLDER_ID_FLOOR
}

/// Author shown on pending entries.
pub fn local_author() -> UserRef {
    UserRef {
        id: 0,
        username: "You".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending { nonce: String },
    Confirmed,
}

/// One row of the display list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub message: Message,
    pub delivery: DeliveryState,
}

impl DisplayMessage {
    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, DeliveryState::Pending { .. })
    }

    fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// Where outbound content goes after it is shown.
pub trait OutboundSink {
    /// Transmit `content` tagged with `nonce`. `false` if it could not be sent.
    fn send_correlated(&self, content: &str, nonce: &str) -> bool;
}

impl OutboundSink for crate::ws::TransportHandle {
    fn send_correlated(&self, content: &str, nonce: &str) -> bool {
        crate::ws::TransportHandle::send_correlated(self, content, nonce)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message is empty")]
    Empty,
    #[error("Failed to send message")]
    NotSent,
}

/// Outcome of applying a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// The id was already on the list; nothing changed.
    Duplicate,
    /// Appended, after dropping `resolved` pending entries.
    Appended { resolved: usize },
}

/// A newly shown pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTicket {
    pub placeholder_id: u64,
    pub nonce: String,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    entries: Vec<DisplayMessage>,
    author: UserRef,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(local_author())
    }
}

impl Reconciler {
    /// `author` is shown on pending entries.
    pub fn new(author: UserRef) -> Self {
        Self {
            entries: Vec::new(),
            author,
        }
    }

    /// Replace the list wholesale with fetched history, in the order given.
    pub fn load_history(&mut self, messages: Vec<Message>) {
        tracing::debug!(count = messages.len(), "history loaded");
        self.entries = messages.into_iter().map(DisplayMessage::confirmed).collect();
    }

    /// Show `content` as pending, then hand it to `sink`.
    ///
    /// If the sink refuses, the pending entry is removed again and the list
    /// is exactly as it was before the call.
    pub fn submit_outbound(
        &mut self,
        content: &str,
        sink: &dyn OutboundSink,
    ) -> Result<PendingTicket, SendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::Empty);
        }

        let ticket = self.push_pending(content);
        if sink.send_correlated(content, &ticket.nonce) {
            Ok(ticket)
        } else {
            tracing::error!(placeholder = ticket.placeholder_id, "send failed; retracting pending entry");
            self.retract(ticket.placeholder_id);
            Err(SendError::NotSent)
        }
    }

    /// Apply a confirmation from the server.
    pub fn receive_confirmed(&mut self, message: Message, nonce: Option<&str>) -> Reconciled {
        if self.contains_confirmed(message.id) {
            tracing::debug!(id = message.id, "duplicate confirmation ignored");
            return Reconciled::Duplicate;
        }

        let resolved = match nonce {
            Some(nonce) => self.retract_pending(nonce),
            None => self.retract_all_pending(),
        };

        self.entries.push(DisplayMessage::confirmed(message));
        Reconciled::Appended { resolved }
    }

    /// Remove the pending entry tagged `nonce`, whether it was confirmed or
    /// refused. Returns how many entries were removed.
    pub fn retract_pending(&mut self, nonce: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| match &entry.delivery {
            DeliveryState::Pending { nonce: pending } => pending != nonce,
            DeliveryState::Confirmed => true,
        });
        before - self.entries.len()
    }

    /// Remove every pending entry. Returns how many were removed.
    pub fn retract_all_pending(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.is_pending());
        before - self.entries.len()
    }

    /// Append a record obtained outside the socket (the REST send path).
    ///
    /// Deduplicates by id like a confirmation but leaves pending entries alone.
    pub fn append_confirmed(&mut self, message: Message) -> Reconciled {
        if self.contains_confirmed(message.id) {
            return Reconciled::Duplicate;
        }
        self.entries.push(DisplayMessage::confirmed(message));
        Reconciled::Appended { resolved: 0 }
    }

    pub fn entries(&self) -> &[DisplayMessage] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn pending(&self) -> impl Iterator<Item = &DisplayMessage> {
        self.entries.iter().filter(|entry| entry.is_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn contains_confirmed(&self, id: u64) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.is_pending() && entry.message.id == id)
    }

    fn push_pending(&mut self, content: &str) -> PendingTicket {
        let placeholder_id = self.fresh_placeholder_id();
        let nonce = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        self.entries.push(DisplayMessage {
            message: Message {
                id: placeholder_id,
                content: content.to_string(),
                user_id: self.author.id,
                author: self.author.clone(),
                created_at: now,
            },
            delivery: DeliveryState::Pending {
                nonce: nonce.clone(),
            },
        });

        PendingTicket {
            placeholder_id,
            nonce,
        }
    }

    fn retract(&mut self, placeholder_id: u64) {
        self.entries
            .retain(|entry| !(entry.is_pending() && entry.message.id == placeholder_id));
    }

    fn fresh_placeholder_id(&self) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(PLACEHOLDER_ID_FLOOR..PLACEHOLDER_ID_FLOOR * 2);
            if !self.entries.iter().any(|entry| entry.message.id == id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;

    fn msg(id: u64, content: &str) -> Message {
        Message {
            id,
            content: content.to_string(),
            user_id: 1,
            author: UserRef {
                id: 1,
                username: "alice".into(),
            },
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    /// Records what it was asked to send.
    struct RecordingSink {
        accept: bool,
        sent: RefCell<Vec<(String, String)>>,
    }

    impl RecordingSink {
        fn accepting() -> Self {
            Self {
                accept: true,
                sent: RefCell::default(),
            }
        }

        fn refusing() -> Self {
            Self {
                accept: false,
                sent: RefCell::default(),
            }
        }
    }

    impl OutboundSink for RecordingSink {
        fn send_correlated(&self, content: &str, nonce: &str) -> bool {
            self.sent
                .borrow_mut()
                .push((content.to_string(), nonce.to_string()));
            self.accept
        }
    }

    fn ids(r: &Reconciler) -> Vec<u64> {
        r.messages().map(|m| m.id).collect()
    }

    #[test]
    fn history_alone_is_preserved_in_order() {
        let mut r = Reconciler::default();
        let history = vec![msg(5, "e"), msg(1, "a"), msg(3, "c")];
        r.load_history(history.clone());
        assert_eq!(r.messages().cloned().collect::<Vec<_>>(), history);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn load_history_replaces_everything() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "a")]);
        r.submit_outbound("x", &RecordingSink::accepting()).unwrap();
        r.load_history(vec![msg(2, "b")]);
        assert_eq!(ids(&r), vec![2]);
    }

    #[test]
    fn optimistic_send_then_confirmation() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);

        let sink = RecordingSink::accepting();
        let ticket = r.submit_outbound("yo", &sink).unwrap();
        assert!(is_placeholder_id(ticket.placeholder_id));
        assert_eq!(r.len(), 2);
        assert_eq!(r.entries()[1].message.content, "yo");
        assert_eq!(r.entries()[1].message.author.username, "You");
        assert!(r.entries()[1].is_pending());
        assert_eq!(sink.sent.borrow()[0], ("yo".to_string(), ticket.nonce.clone()));

        let outcome = r.receive_confirmed(msg(2, "yo"), None);
        assert_eq!(outcome, Reconciled::Appended { resolved: 1 });
        assert_eq!(ids(&r), vec![1, 2]);
        assert_eq!(r.entries()[1].message.content, "yo");
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn uncorrelated_confirmation_clears_all_pending() {
        let mut r = Reconciler::default();
        let sink = RecordingSink::accepting();
        r.submit_outbound("one", &sink).unwrap();
        r.submit_outbound("two", &sink).unwrap();

        r.receive_confirmed(msg(9, "someone else"), None);
        assert_eq!(r.pending_count(), 0);
        assert_eq!(ids(&r), vec![9]);
    }

    #[test]
    fn correlated_confirmation_resolves_only_its_send() {
        let mut r = Reconciler::default();
        let sink = RecordingSink::accepting();
        let first = r.submit_outbound("one", &sink).unwrap();
        let second = r.submit_outbound("two", &sink).unwrap();

        let outcome = r.receive_confirmed(msg(10, "two"), Some(&second.nonce));
        assert_eq!(outcome, Reconciled::Appended { resolved: 1 });
        assert_eq!(ids(&r), vec![first.placeholder_id, 10]);

        // another user's correlated message leaves our pending send alone
        r.receive_confirmed(msg(11, "theirs"), Some("not-ours"));
        assert_eq!(r.pending_count(), 1);

        r.receive_confirmed(msg(12, "one"), Some(&first.nonce));
        assert_eq!(ids(&r), vec![10, 11, 12]);
    }

    #[test]
    fn repeated_confirmation_is_idempotent() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);
        assert_eq!(
            r.receive_confirmed(msg(2, "yo"), None),
            Reconciled::Appended { resolved: 0 }
        );
        assert_eq!(r.receive_confirmed(msg(2, "yo"), None), Reconciled::Duplicate);
        assert_eq!(r.receive_confirmed(msg(2, "yo"), Some("n")), Reconciled::Duplicate);
        assert_eq!(ids(&r).iter().filter(|&&id| id == 2).count(), 1);
    }

    #[test]
    fn duplicate_confirmation_keeps_pending_entries() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);
        r.submit_outbound("pending", &RecordingSink::accepting()).unwrap();
        assert_eq!(r.receive_confirmed(msg(1, "hi"), None), Reconciled::Duplicate);
        assert_eq!(r.pending_count(), 1);
    }

    #[test]
    fn failed_send_leaves_list_unchanged() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);
        let before = r.entries().to_vec();

        let err = r.submit_outbound("yo", &RecordingSink::refusing()).unwrap_err();
        assert_eq!(err, SendError::NotSent);
        assert_eq!(r.entries(), before.as_slice());
    }

    #[test]
    fn blank_content_is_not_sent() {
        let mut r = Reconciler::default();
        let sink = RecordingSink::accepting();
        assert_eq!(r.submit_outbound("   ", &sink), Err(SendError::Empty));
        assert!(r.is_empty());
        assert!(sink.sent.borrow().is_empty());
    }

    #[test]
    fn content_is_trimmed_before_sending() {
        let mut r = Reconciler::default();
        let sink = RecordingSink::accepting();
        r.submit_outbound("  hello \n", &sink).unwrap();
        assert_eq!(sink.sent.borrow()[0].0, "hello");
        assert_eq!(r.entries()[0].message.content, "hello");
    }

    #[test]
    fn rest_append_dedupes_without_touching_pending() {
        let mut r = Reconciler::default();
        r.submit_outbound("socket send", &RecordingSink::accepting()).unwrap();
        assert_eq!(
            r.append_confirmed(msg(4, "rest")),
            Reconciled::Appended { resolved: 0 }
        );
        assert_eq!(r.pending_count(), 1);
        assert_eq!(r.append_confirmed(msg(4, "rest")), Reconciled::Duplicate);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn refused_send_is_removed_by_nonce() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);
        let sink = RecordingSink::accepting();
        let refused = r.submit_outbound("early", &sink).unwrap();
        let kept = r.submit_outbound("later", &sink).unwrap();

        assert_eq!(r.retract_pending(&refused.nonce), 1);
        assert_eq!(ids(&r), vec![1, kept.placeholder_id]);
        assert_eq!(r.retract_pending(&refused.nonce), 0);

        r.receive_confirmed(msg(2, "later"), Some(&kept.nonce));
        assert_eq!(ids(&r), vec![1, 2]);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn uncorrelated_failure_clears_every_pending_entry() {
        let mut r = Reconciler::default();
        r.load_history(vec![msg(1, "hi")]);
        let sink = RecordingSink::accepting();
        r.submit_outbound("one", &sink).unwrap();
        r.submit_outbound("two", &sink).unwrap();

        assert_eq!(r.retract_all_pending(), 2);
        assert_eq!(ids(&r), vec![1]);
        assert_eq!(r.retract_all_pending(), 0);
    }

    #[test]
    fn placeholder_range_is_disjoint() {
        assert!(!is_placeholder_id(999_999_999_999));
        assert!(is_placeholder_id(PLACEHOLDER_ID_FLOOR));
    }
}
