//! Closed-set worker dispatch.
//!
//! # Overview
//!
//! A worker set is an enum whose variants each wrap one worker type. Deriving
//! [`Variant`] on it generates a [`Perform`] implementation that
//! matches on the active variant and calls the wrapped worker directly: no boxing, no vtable,
//! and the value is exactly the size of the enum.
//!
//! ```rust,ignore
//! use switchyard::{Failure, dispatch::{Perform, Registry, Variant}};
//!
//! struct Request { user: u64 }
//!
//! struct Resize { width: u32 }
//! impl Perform<Request> for Resize {
//!     fn perform(&self, req: &Request) -> Result<(), Failure> {
//!         // ...
//!         Ok(())
//!     }
//! }
//!
//! struct Notify;
//! impl Perform<Request> for Notify {
//!     fn perform(&self, _req: &Request) -> Result<(), Failure> {
//!         Err(Failure::new("mail relay offline"))
//!     }
//! }
//!
//! #[derive(Variant)]
//! enum Worker {
//!     Resize(Resize),
//!     Notify(Notify),
//! }
//!
//! let mut registry = Registry::<Worker>::new();
//! registry.register(Resize { width: 640 });
//! registry.register(Notify);
//!
//! let report = registry.dispatch_all(&Request { user: 7 });
//! assert_eq!(report.failed_count(), 1);
//! ```
//!
//! # Extending the set
//!
//! Adding a new *kind* means adding a variant to the enum and recompiling every dispatch
//! point. Adding another *instance* of an existing kind is just another
//! [`Registry::register`] call.
//!
//! # Stateless operations
//!
//! [`Perform::perform`] takes `&self` and an explicit context. Anything that varies per call
//! travels in the context, never in fields the worker mutates behind the caller's back. This
//! is what lets [`registry::Shared`] run dispatch passes from several threads at once under a
//! read lock.

use std::fmt;

use crate::error::Failure;

pub mod registry;

pub use registry::Registry;
pub use switchyard_macros::Variant;

/// A unit of work that runs against a caller-supplied context.
///
/// Implementations must not depend on mutable state of their own across calls; per-call data
/// belongs in `ctx`.
pub trait Perform<C: ?Sized> {
    fn perform(&self, ctx: &C) -> Result<(), Failure>;
}

impl<C: ?Sized, T: Perform<C> + ?Sized> Perform<C> for &T {
    #[inline]
    fn perform(&self, ctx: &C) -> Result<(), Failure> {
        (**self).perform(ctx)
    }
}

impl<C: ?Sized, T: Perform<C> + ?Sized> Perform<C> for Box<T> {
    #[inline]
    fn perform(&self, ctx: &C) -> Result<(), Failure> {
        (**self).perform(ctx)
    }
}

/// A closed set of worker kinds.
///
/// Implemented by `#[derive(Variant)]`. `KINDS` lists the variant names in declaration order;
/// `kind` names the active one.
pub trait Variant {
    const KINDS: &'static [&'static str];

    fn kind(&self) -> &'static str;
}

/// The position of a worker in a [`Registry`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(usize);

impl Id {
    /// Construct a worker Id from its position in registration order.
    #[inline]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the index of this worker in registration order.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for Id {
    #[inline]
    fn from(index: usize) -> Self {
        Self::new(index)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// Dispatch behaviour for a [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Halt a pass at the first failure and report every remaining worker as skipped.
    pub stop_on_first_failure: bool,

    /// Record a panicking worker as failed instead of unwinding out of the pass.
    pub catch_panics: bool,
}

impl Config {
    /// Run every worker and catch panics.
    pub const fn new() -> Self {
        Self {
            stop_on_first_failure: false,
            catch_panics: true,
        }
    }

    pub const fn stop_on_first_failure(mut self, enabled: bool) -> Self {
        self.stop_on_first_failure = enabled;
        self
    }

    pub const fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Context {
        scale: u32,
    }

    struct Double;
    impl Perform<Context> for Double {
        fn perform(&self, ctx: &Context) -> Result<(), Failure> {
            if ctx.scale * 2 > 10 {
                return Err(Failure::new("too large"));
            }
            Ok(())
        }
    }

    struct Reject(&'static str);
    impl Perform<Context> for Reject {
        fn perform(&self, _ctx: &Context) -> Result<(), Failure> {
            Err(Failure::new(self.0))
        }
    }

    #[derive(Variant)]
    enum Worker {
        Double(Double),
        Reject(Reject),
    }

    // ==================== Derive ====================

    #[test]
    fn derive_lists_kinds_in_declaration_order() {
        assert_eq!(Worker::KINDS, &["Double", "Reject"]);
    }

    #[test]
    fn derive_names_active_kind() {
        assert_eq!(Worker::Double(Double).kind(), "Double");
        assert_eq!(Worker::Reject(Reject("x")).kind(), "Reject");
    }

    #[test]
    fn derive_forwards_perform_to_active_kind() {
        let ctx = Context { scale: 3 };
        assert_eq!(Worker::Double(Double).perform(&ctx), Ok(()));
        assert_eq!(
            Worker::Reject(Reject("nope")).perform(&ctx),
            Err(Failure::new("nope"))
        );
    }

    #[test]
    fn derive_generates_from_conversions() {
        let worker: Worker = Reject("x").into();
        assert_eq!(worker.kind(), "Reject");
    }

    #[test]
    fn variant_is_no_larger_than_its_largest_kind_plus_tag() {
        // Dispatching through the enum never boxes: the enum stores the worker inline.
        assert!(std::mem::size_of::<Worker>() <= std::mem::size_of::<Reject>() + 8);
    }

    // ==================== Blanket impls ====================

    #[test]
    fn references_and_boxes_perform() {
        let ctx = Context { scale: 9 };
        let boxed: Box<dyn Perform<Context>> = Box::new(Double);
        assert_eq!(boxed.perform(&ctx), Err(Failure::new("too large")));
        assert_eq!((&Double).perform(&Context { scale: 1 }), Ok(()));
    }

    // ==================== Id / Config ====================

    #[test]
    fn id_index_and_display() {
        let id = Id::from(3_usize);
        assert_eq!(id.index(), 3);
        assert_eq!(id.to_string(), "worker#3");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn id_keeps_indices_past_u32() {
        let index = u32::MAX as usize + 1;
        assert_eq!(Id::from(index).index(), index);
        assert_ne!(Id::from(index), Id::from(0_usize));
    }

    #[test]
    fn config_defaults_and_builders() {
        let config = Config::default();
        assert!(!config.stop_on_first_failure);
        assert!(config.catch_panics);

        let config = Config::new().stop_on_first_failure(true).catch_panics(false);
        assert!(config.stop_on_first_failure);
        assert!(!config.catch_panics);
    }
}
