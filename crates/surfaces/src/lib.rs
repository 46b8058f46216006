//! Short-lived contexts around the coordinator: the per-page agent and the
//! panels that render results.

pub mod page;
pub mod page_agent;
pub mod panel;

pub use page::{InMemoryPage, PageHost};
pub use page_agent::{AgentError, PageAgent, PageEvent, SELECTION_READY_CHARS};
pub use panel::{Panel, PanelError, PanelRoute, PanelView};
