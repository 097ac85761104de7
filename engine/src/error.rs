//! Error types shared across dispatch and routing.
//!
//! Only [`ConfigurationError`] is fatal: it is returned from
//! [`mediator::Builder::build`](crate::route::mediator::Builder::build) and the mediator is never
//! created. Per-item problems ([`Failure`]) are aggregated into a
//! [`Report`](crate::outcome::Report) and never propagate past a batch. Routing rejections
//! ([`RouteError`]) drop the offending event and leave the mediator usable.

use std::borrow::Cow;

use thiserror::Error;

use crate::event::Topic;

/// The reason a worker or subscriber failed.
///
/// Returned from [`Perform::perform`](crate::dispatch::Perform::perform) and
/// [`Subscriber::notify`](crate::route::Subscriber::notify), then recorded in the outcome
/// report as `failed(reason)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{reason}")]
pub struct Failure {
    reason: Cow<'static, str>,
}

impl Failure {
    /// Create a failure with the given reason.
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Build a failure from any error value, keeping its display text.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(err.to_string())
    }

    /// Build a failure from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            message
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.as_str()
        } else {
            "unknown panic payload"
        };
        Self::new(format!("panicked: {message}"))
    }

    /// The failure reason.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<&'static str> for Failure {
    fn from(reason: &'static str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for Failure {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

/// A mediator could not resolve an event's topic to exactly one route.
///
/// The rejected event is dropped; it is not queued and not retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// No route pattern matches the topic.
    #[error("no route for topic `{topic}`")]
    NoRoute { topic: Topic },

    /// Two or more routes match the topic with the same, highest specificity.
    #[error("ambiguous route for topic `{topic}`: {patterns:?} are equally specific")]
    AmbiguousRoute {
        topic: Topic,
        patterns: Vec<String>,
    },
}

impl RouteError {
    /// The topic that failed to route.
    pub fn topic(&self) -> &Topic {
        match self {
            Self::NoRoute { topic } | Self::AmbiguousRoute { topic, .. } => topic,
        }
    }
}

/// Operational errors from a running mediator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediatorError {
    /// The event could not be routed.
    #[error(transparent)]
    Route(#[from] RouteError),

    /// The named target does not appear in the routing table.
    #[error("unknown target channel `{0}`")]
    UnknownTarget(String),
}

/// A malformed routing table. The mediator refuses to start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("routing table is empty")]
    EmptyTable,

    #[error("route pattern is empty")]
    EmptyPattern,

    #[error("route pattern `{pattern}` has an empty segment")]
    EmptySegment { pattern: String },

    #[error("route pattern `{pattern}`: `#` is only allowed as the last segment")]
    MisplacedTail { pattern: String },

    #[error("route pattern `{pattern}`: segment `{segment}` mixes wildcards and literals")]
    MixedSegment { pattern: String, segment: String },

    #[error("route pattern `{pattern}` has an empty target")]
    EmptyTarget { pattern: String },

    #[error("route pattern `{pattern}` is declared more than once")]
    DuplicatePattern { pattern: String },
}
