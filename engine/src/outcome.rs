//! Outcome reports returned from batch operations.
//!
//! [`Registry::dispatch_all`](crate::dispatch::Registry::dispatch_all),
//! [`Broker::publish`](crate::route::Broker::publish) and mediator deliveries all return a
//! [`Report`]: one [`Outcome`] per item, in the order the items were dispatched. A caller
//! always gets the full picture; there is no silent partial failure.

use std::{fmt, slice};

use crate::error::Failure;

/// What happened to a single item in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The item ran and succeeded.
    Ok,
    /// The item ran and failed.
    Failed(Failure),
    /// The item was never run.
    Skipped,
}

impl Status {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// The failure, if the item failed.
    #[inline]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<Result<(), Failure>> for Status {
    #[inline]
    fn from(result: Result<(), Failure>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(failure) => Self::Failed(failure),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Failed(failure) => write!(f, "failed({failure})"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// The status of one identified item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<I> {
    pub id: I,
    pub status: Status,
}

impl<I> Outcome<I> {
    #[inline]
    pub fn new(id: I, status: Status) -> Self {
        Self { id, status }
    }
}

/// An ordered sequence of per-item outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report<I> {
    outcomes: Vec<Outcome<I>>,
}

impl<I> Report<I> {
    /// Create an empty report.
    #[inline]
    pub const fn new() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    /// Create an empty report with room for `capacity` outcomes.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: Vec::with_capacity(capacity),
        }
    }

    /// Append an outcome.
    #[inline]
    pub fn push(&mut self, id: I, status: Status) {
        self.outcomes.push(Outcome::new(id, status));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Iterate over the outcomes in dispatch order.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, Outcome<I>> {
        self.outcomes.iter()
    }

    /// The statuses alone, in dispatch order.
    pub fn statuses(&self) -> impl Iterator<Item = &Status> {
        self.outcomes.iter().map(|outcome| &outcome.status)
    }

    /// Returns `true` if every item ran and succeeded. An empty report is all ok.
    pub fn all_ok(&self) -> bool {
        self.statuses().all(Status::is_ok)
    }

    /// The failed items and their failures.
    pub fn failures(&self) -> impl Iterator<Item = (&I, &Failure)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.status.failure().map(|failure| (&outcome.id, failure)))
    }

    /// The items that were never run.
    pub fn skipped(&self) -> impl Iterator<Item = &I> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status.is_skipped())
            .map(|outcome| &outcome.id)
    }

    /// Number of successful items.
    pub fn ok_count(&self) -> usize {
        self.statuses().filter(|status| status.is_ok()).count()
    }

    /// Number of failed items.
    pub fn failed_count(&self) -> usize {
        self.statuses().filter(|status| status.is_failed()).count()
    }

    /// Number of skipped items.
    pub fn skipped_count(&self) -> usize {
        self.statuses().filter(|status| status.is_skipped()).count()
    }

    /// Consume the report into its outcomes.
    #[inline]
    pub fn into_outcomes(self) -> Vec<Outcome<I>> {
        self.outcomes
    }
}

impl<I> Default for Report<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> FromIterator<Outcome<I>> for Report<I> {
    fn from_iter<T: IntoIterator<Item = Outcome<I>>>(iter: T) -> Self {
        Self {
            outcomes: iter.into_iter().collect(),
        }
    }
}

impl<I> IntoIterator for Report<I> {
    type Item = Outcome<I>;
    type IntoIter = std::vec::IntoIter<Outcome<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

impl<'a, I> IntoIterator for &'a Report<I> {
    type Item = &'a Outcome<I>;
    type IntoIter = slice::Iter<'a, Outcome<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}
