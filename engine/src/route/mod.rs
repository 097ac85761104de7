//! Event routing.
//!
//! Two routers sit on top of [`Channel`]:
//!
//! - [`Mediator`]: producers submit to a central queue, and a fixed routing table picks one
//!   target channel per topic by pattern.
//! - [`Broker`]: no queue and no table. Publishing delivers straight to the subscribers of
//!   the event's exact topic.
//!
//! Both implement [`Router`], so code that only needs to hand events off can be written once
//! for either.

pub mod broker;
pub mod channel;
pub mod mediator;
pub mod pattern;

pub use broker::Broker;
pub use channel::{Channel, Snapshot, Subscriber, SubscriberId};
pub use mediator::{Forwarded, Mediator, Ticket};
pub use pattern::{Pattern, Route, Table};

use crate::event::Event;

/// Accepts events for delivery.
///
/// What accepting means is up to the router: the broker delivers immediately and returns
/// the delivery report, the mediator queues and returns a ticket.
pub trait Router<P> {
    type Receipt;
    type Error;

    fn accept(&self, event: Event<P>) -> Result<Self::Receipt, Self::Error>;
}
