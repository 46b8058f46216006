use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Which inference capability a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// On-device summariser: quick, lower quality.
    Fast,
    /// Prompt-driven model: slower, deeper analysis.
    Deep,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Deep => "deep",
        }
    }

    pub fn mode(&self) -> SummaryMode {
        match self {
            Self::Fast => SummaryMode::Local,
            Self::Deep => SummaryMode::Cloud,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `mode` field carried on the wire. Maps one to one onto [`EngineKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryMode {
    Local,
    Cloud,
}

impl SummaryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" | "fast" => Some(Self::Local),
            "cloud" | "deep" => Some(Self::Cloud),
            _ => None,
        }
    }

    pub fn engine_kind(&self) -> EngineKind {
        match self {
            Self::Local => EngineKind::Fast,
            Self::Cloud => EngineKind::Deep,
        }
    }
}

impl FromStr for SummaryMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or(())
    }
}

impl From<EngineKind> for SummaryMode {
    fn from(kind: EngineKind) -> Self {
        kind.mode()
    }
}

impl From<SummaryMode> for EngineKind {
    fn from(mode: SummaryMode) -> Self {
        mode.engine_kind()
    }
}

/// Result of probing an inference capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    #[serde(rename = "no")]
    Unsupported,
    #[serde(rename = "after-download")]
    NeedsDownload,
    #[serde(rename = "readily")]
    Ready,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsupported => "no",
            Self::NeedsDownload => "after-download",
            Self::Ready => "readily",
        }
    }

    /// Maps the host's capability string. Anything unrecognised is treated
    /// as unsupported.
    pub fn from_capability(value: &str) -> Self {
        match value {
            "readily" => Self::Ready,
            "after-download" => Self::NeedsDownload,
            _ => Self::Unsupported,
        }
    }

    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error taxonomy surfaced to requesting surfaces.
///
/// Persistence failures are deliberately absent: the store absorbs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    EngineUnavailable,
    EngineDownloadRequired,
    EngineRequestFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::EngineUnavailable => "EngineUnavailable",
            Self::EngineDownloadRequired => "EngineDownloadRequired",
            Self::EngineRequestFailed => "EngineRequestFailed",
        };
        f.write_str(label)
    }
}

/// A computed summary for one page. Immutable; a newer result for the same
/// key supersedes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub key: String,
    pub content: String,
    pub engine_kind: EngineKind,
    /// Unix milliseconds.
    pub produced_at: u64,
}

/// Aggregated history for one site (host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteContext {
    pub site_key: String,
    pub visit_count: u64,
    pub last_visit_at: u64,
    /// Most recent last.
    #[serde(default)]
    pub recent_results: Vec<PageResult>,
}

impl SiteContext {
    pub fn new(site_key: impl Into<String>, now: u64) -> Self {
        Self {
            site_key: site_key.into(),
            visit_count: 0,
            last_visit_at: now,
            recent_results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "Preferences::default_engine_kind")]
    pub default_engine_kind: EngineKind,
    #[serde(default)]
    pub speech_enabled: bool,
    #[serde(default)]
    pub auto_run: bool,
}

impl Preferences {
    fn default_engine_kind() -> EngineKind {
        EngineKind::Fast
    }

    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(kind) = patch.default_engine_kind {
            self.default_engine_kind = kind;
        }
        if let Some(enabled) = patch.speech_enabled {
            self.speech_enabled = enabled;
        }
        if let Some(auto_run) = patch.auto_run {
            self.auto_run = auto_run;
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            default_engine_kind: Self::default_engine_kind(),
            speech_enabled: false,
            auto_run: false,
        }
    }
}

/// Field-level preference update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_engine_kind: Option<EngineKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_run: Option<bool>,
}

impl PreferencesPatch {
    pub fn is_empty(&self) -> bool {
        self.theme.is_none()
            && self.default_engine_kind.is_none()
            && self.speech_enabled.is_none()
            && self.auto_run.is_none()
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_maps_capability_strings() {
        assert_eq!(Availability::from_capability("readily"), Availability::Ready);
        assert_eq!(
            Availability::from_capability("after-download"),
            Availability::NeedsDownload
        );
        assert_eq!(Availability::from_capability("no"), Availability::Unsupported);
        assert_eq!(
            Availability::from_capability("maybe"),
            Availability::Unsupported
        );
        assert!(!Availability::Unsupported.is_usable());
        assert!(Availability::NeedsDownload.is_usable());
    }

    #[test]
    fn mode_and_kind_line_up() {
        assert_eq!(EngineKind::Fast.mode(), SummaryMode::Local);
        assert_eq!(EngineKind::from(SummaryMode::Cloud), EngineKind::Deep);
        assert_eq!(SummaryMode::parse("deep"), Some(SummaryMode::Cloud));
        assert_eq!(SummaryMode::parse("turbo"), None);
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut prefs = Preferences::default();
        prefs.apply(&PreferencesPatch {
            speech_enabled: Some(true),
            ..PreferencesPatch::default()
        });
        assert!(prefs.speech_enabled);
        assert_eq!(prefs.theme, Theme::System);
        assert_eq!(prefs.default_engine_kind, EngineKind::Fast);
    }

    #[test]
    fn preferences_tolerate_missing_fields() {
        let prefs: Preferences = serde_json::from_str(r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(prefs.theme, Theme::Dark);
        assert_eq!(prefs.default_engine_kind, EngineKind::Fast);
        assert!(!prefs.auto_run);
    }
}
