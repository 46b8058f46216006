//! Uniform access to the two opaque inference engines.
//!
//! Every entry point funnels through probe → acquire → use → release, so a
//! session can never outlive the request it was created for, whether the
//! call succeeds, fails, or the caller abandons a stream half way.

pub mod engine;
pub mod error;
pub mod gateway;
pub mod platform;
pub mod scripted;
pub mod stream;

pub use contextaware_protocol::{Availability, EngineKind};
pub use engine::{EngineOptions, EngineSession, FragmentStream, InferenceEngine};
pub use error::GatewayError;
pub use gateway::EngineGateway;
pub use platform::PlatformEngine;
pub use stream::SessionStream;
