//! A small framework for expressing readiness as a list of conditions.
//!
//! A [`Condition`] is a pure function from an object to a [`ConditionResult`].
//! A [`StateChecker`] evaluates every condition on each update, collects
//! their messages, and reports the object ready once every governing
//! condition is satisfied.

pub mod job;
pub mod pod;

use crate::logging::{Message, Messages};

/// The outcome of evaluating one condition against one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionResult {
    pub satisfied: bool,
    /// What the condition is waiting for, used as progress narration while
    /// it is unsatisfied.
    pub description: String,
    pub message: Option<Message>,
}

impl ConditionResult {
    pub fn waiting(description: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            description: description.into(),
            message: None,
        }
    }

    pub fn satisfied(mut self) -> Self {
        self.satisfied = true;
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

pub type ConditionFn<K> = fn(&K) -> ConditionResult;

/// A named condition. Non-governing conditions contribute messages but do
/// not hold up readiness.
pub struct Condition<K> {
    pub check: ConditionFn<K>,
    pub governing: bool,
}

impl<K> Condition<K> {
    pub const fn governing(check: ConditionFn<K>) -> Self {
        Self {
            check,
            governing: true,
        }
    }

    pub const fn advisory(check: ConditionFn<K>) -> Self {
        Self {
            check,
            governing: false,
        }
    }
}

pub struct StateChecker<K> {
    conditions: Vec<Condition<K>>,
    ready_message: &'static str,
    ready: bool,
}

impl<K> StateChecker<K> {
    pub fn new(conditions: Vec<Condition<K>>, ready_message: &'static str) -> Self {
        Self {
            conditions,
            ready_message,
            ready: false,
        }
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Evaluates every condition against `obj` and returns the messages
    /// they produced, in condition order.
    pub fn update(&mut self, obj: &K) -> Messages {
        let mut messages = Messages::default();
        let mut ready = true;
        for condition in &self.conditions {
            let result = (condition.check)(obj);
            if !result.satisfied {
                if condition.governing {
                    ready = false;
                }
                messages.push(Message::info(result.description));
            }
            if let Some(message) = result.message {
                messages.push(message);
            }
        }
        self.ready = ready;
        if ready {
            messages.push(Message::info(self.ready_message));
        }
        messages
    }
}
