//! Outcome of a step the caller is allowed to skip.
//!
//! Screenshots after a failure, body reads of already-collected responses and
//! load-state waits are tolerated failures. They come back as `Skipped` with a
//! reason instead of an error escaping to the caller.

use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Done(T),
    Skipped(String),
}

impl<T> Attempt<T> {
    pub fn from_result<E: Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Attempt::Done(value),
            Err(e) => Attempt::Skipped(e.to_string()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Attempt::Done(value) => Attempt::Done(f(value)),
            Attempt::Skipped(reason) => Attempt::Skipped(reason),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Attempt<U>) -> Attempt<U> {
        match self {
            Attempt::Done(value) => f(value),
            Attempt::Skipped(reason) => Attempt::Skipped(reason),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Attempt::Done(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Attempt::Done(value) => Some(value),
            Attempt::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Attempt::Done(_) => None,
            Attempt::Skipped(reason) => Some(reason),
        }
    }

    /// Log the skip reason at warn level under `what`, passing the value through.
    pub fn warn_skipped(self, what: &str) -> Self {
        if let Attempt::Skipped(reason) = &self {
            tracing::warn!("{} skipped: {}", what, reason);
        }
        self
    }

    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.ok().unwrap_or_default()
    }
}
