//! Closed-set dispatch and event routing.
//!
//! - [`dispatch`]: run every worker in a [`Registry`](dispatch::Registry) of enum-wrapped
//!   workers against a shared context, and get back one outcome per worker.
//! - [`route`]: deliver [`Event`]s through a [`Mediator`](route::Mediator) (central queue,
//!   pattern routing table) or a [`Broker`](route::Broker) (direct topic fan-out).
//!
//! Failures never escape a batch. Every pass and every delivery returns a
//! [`Report`](outcome::Report) listing what succeeded, what failed and what was skipped.

// Lets `#[derive(Variant)]` name `::switchyard` from inside this crate too.
extern crate self as switchyard;

pub mod dispatch;
pub mod error;
pub mod event;
pub mod outcome;
pub mod route;
pub mod tasks;

pub use error::{ConfigurationError, Failure, MediatorError, RouteError};
pub use event::{Event, Topic};
pub use outcome::{Outcome, Report, Status};

pub mod prelude {
    pub use crate::{
        dispatch::{Perform, Registry, Variant},
        error::Failure,
        event::{Event, Topic},
        outcome::{Report, Status},
        route::{Broker, Mediator, Router, Subscriber, SubscriberId},
    };
}
