//! Interception layer.
//!
//! Two cooperating strategies feed the tier queues:
//!
//! - [`creation`]: the element-creation override. Script elements created
//!   through the engine come back wrapped in a [`GovernedElement`]; assigning
//!   their source is classified *before* any fetch can start.
//! - [`mutation`]: the document mutation fallback. Always on while the
//!   engine is active; catches scripts and iframes inserted through channels
//!   the override cannot see, after insertion, and lazy-loads images and
//!   iframes below the fold.

pub mod creation;
pub mod mutation;

pub use creation::{CreationOverride, ElementOp, GovernedElement};
