use std::sync::{Mutex, PoisonError};

/// What a page agent needs from the page it lives in.
pub trait PageHost: Send + Sync {
    fn url(&self) -> String;

    fn title(&self) -> String;

    /// Live text selection, untrimmed.
    fn selected_text(&self) -> String;

    /// Whether the agent's control is already on the page.
    fn has_control(&self) -> bool;

    fn install_control(&self);

    fn set_panel_visible(&self, visible: bool);

    /// Presentation hint on the control; carries no data.
    fn set_selection_ready(&self, ready: bool);
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    title: String,
    selection: String,
    control_installed: bool,
    panel_visible: bool,
    selection_ready: bool,
}

/// A page held entirely in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryPage {
    state: Mutex<PageState>,
}

impl InMemoryPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                title: title.into(),
                ..PageState::default()
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut PageState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn select(&self, text: impl Into<String>) {
        let text = text.into();
        self.with_state(|state| state.selection = text);
    }

    pub fn navigate(&self, url: impl Into<String>, title: impl Into<String>) {
        let (url, title) = (url.into(), title.into());
        self.with_state(|state| {
            state.url = url;
            state.title = title;
            state.selection.clear();
        });
    }

    pub fn panel_visible(&self) -> bool {
        self.with_state(|state| state.panel_visible)
    }

    pub fn selection_ready(&self) -> bool {
        self.with_state(|state| state.selection_ready)
    }
}

impl PageHost for InMemoryPage {
    fn url(&self) -> String {
        self.with_state(|state| state.url.clone())
    }

    fn title(&self) -> String {
        self.with_state(|state| state.title.clone())
    }

    fn selected_text(&self) -> String {
        self.with_state(|state| state.selection.clone())
    }

    fn has_control(&self) -> bool {
        self.with_state(|state| state.control_installed)
    }

    fn install_control(&self) {
        self.with_state(|state| state.control_installed = true);
    }

    fn set_panel_visible(&self, visible: bool) {
        self.with_state(|state| state.panel_visible = visible);
    }

    fn set_selection_ready(&self, ready: bool) {
        self.with_state(|state| state.selection_ready = ready);
    }
}
