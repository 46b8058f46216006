//! The single long-lived coordination context.
//!
//! [`Coordinator`] owns the engine gateway and the result store and answers
//! request envelopes from surfaces; [`CoordinatorController`] runs it as the
//! `background` surface of a [`SurfaceBus`](contextaware_protocol::SurfaceBus).

pub mod config;
pub mod coordinator;
pub mod error;
pub mod phase;
pub mod runtime;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use phase::{RequestOutcome, RequestPhase};
pub use runtime::{CoordinatorController, CoordinatorHandle, CoordinatorPhase, CoordinatorStatus};
