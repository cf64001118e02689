use std::collections::HashSet;
use std::fmt;

use tracing::{event, Level};

/// How important a [`Message`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A piece of progress narration or a diagnostic, tagged with its
/// [`Severity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub text: String,
    pub severity: Severity,
}

impl Message {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Info)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Warning)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An ordered batch of messages, as produced by a single checker update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Messages(pub Vec<Message>);

impl Messages {
    pub fn push(&mut self, message: Message) {
        self.0.push(message);
    }

    pub fn extend(&mut self, other: Messages) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.0.iter()
    }

    /// Messages whose severity is one of `severities`, in order.
    pub fn with_severity(&self, severities: &[Severity]) -> Messages {
        Messages(
            self.0
                .iter()
                .filter(|m| severities.contains(&m.severity))
                .cloned()
                .collect(),
        )
    }

    pub fn infos(&self) -> Messages {
        self.with_severity(&[Severity::Info])
    }

    pub fn warnings(&self) -> Messages {
        self.with_severity(&[Severity::Warning])
    }

    pub fn errors(&self) -> Messages {
        self.with_severity(&[Severity::Error])
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|m| m.severity == Severity::Error)
    }
}

impl FromIterator<Message> for Messages {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Messages(iter.into_iter().collect())
    }
}

impl IntoIterator for Messages {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A deduplicating message log that remembers the order in which each
/// distinct message was first seen.
#[derive(Debug, Clone, Default)]
pub struct TimeOrderedLogSet {
    messages: Vec<Message>,
    seen: HashSet<Message>,
}

impl TimeOrderedLogSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` unless an identical message is already present.
    /// Returns whether the message was new.
    pub fn add(&mut self, message: Message) -> bool {
        if self.seen.contains(&message) {
            return false;
        }
        self.seen.insert(message.clone());
        self.messages.push(message);
        true
    }

    pub fn add_all(&mut self, messages: Messages) {
        for message in messages {
            self.add(message);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Message texts in first-seen order.
    pub fn texts(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.text.clone()).collect()
    }
}

/// Receives progress narration from an awaiter.
///
/// Narration is purely informational: awaiters behave identically whether
/// or not anything is listening.
pub trait StatusSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

/// A [`StatusSink`] which forwards narration to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => event!(Level::INFO, "{}", message),
            Severity::Warning => event!(Level::WARN, "{}", message),
            Severity::Error => event!(Level::ERROR, "{}", message),
        }
    }
}
