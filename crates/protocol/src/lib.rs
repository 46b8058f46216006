//! Wire protocol shared by every ContextAware execution context.
//!
//! Contexts (the background coordinator, page agents, panels and popups)
//! never share memory. They exchange owned [`Envelope`]s over a
//! [`SurfaceBus`], addressed by [`SurfaceName`]. This crate also carries the
//! data model those envelopes transport, so every context agrees on the
//! shape of a cached result or a site context.

pub mod bus;
pub mod envelope;
pub mod keys;
pub mod messages;
pub mod model;

pub use bus::{BusError, Delivery, Mailbox, SurfaceBus, SurfaceBusConfig, SurfaceName};
pub use envelope::{Envelope, MessageType, RequestId};
pub use keys::{page_key, site_key};
pub use messages::{
    ChunkData, ContextQuery, ContextReply, EnginesReply, PageContextData, PanelSummarizeData,
    PreferencesReply, ReplyError, SaveSummaryData, SummarizeData, SummarizeReply, SummaryQuery,
    SummaryReply, SuccessReply,
};
pub use model::{
    now_millis, Availability, EngineKind, ErrorKind, PageResult, Preferences, PreferencesPatch,
    SiteContext, SummaryMode, Theme,
};
