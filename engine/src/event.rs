//! Events and topics.
//!
//! An [`Event`] pairs a [`Topic`] with an opaque payload. Both the broker and the mediator
//! deliver events by shared reference, so a single event is never copied per subscriber and
//! can not be changed once it has been submitted or published.

use std::{borrow::Borrow, fmt, sync::Arc};

/// The identity an event is routed by.
///
/// Topics are free-form strings. The mediator reads `.` as a segment separator when matching
/// route patterns; the broker compares topics for equality only. Cloning a topic is a
/// reference count bump.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Create a topic from a string.
    pub fn new(topic: impl AsRef<str>) -> Self {
        Self(Arc::from(topic.as_ref()))
    }

    /// The topic text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the `.`-separated segments of the topic.
    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        Self::new(topic)
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        Self(Arc::from(topic))
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// A topic plus an opaque payload.
///
/// The fields are private: after construction an event can only be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<P> {
    topic: Topic,
    payload: P,
}

impl<P> Event<P> {
    /// Create an event on `topic` carrying `payload`.
    pub fn new(topic: impl Into<Topic>, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// The topic this event is routed by.
    #[inline]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// The event payload.
    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Take the payload back out of the event.
    #[inline]
    pub fn into_payload(self) -> P {
        self.payload
    }
}
