//! Typed `data` payloads for each [`MessageType`](crate::MessageType).

use serde::{Deserialize, Serialize};

use crate::model::{
    now_millis, Availability, ErrorKind, PageResult, Preferences, SiteContext, SummaryMode,
};

/// `SUMMARIZE_LOCAL` / `SUMMARIZE_CLOUD`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeData {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Custom instruction; only meaningful for the deep engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Ask the coordinator to forward `SUMMARY_CHUNK`s while generating.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl SummarizeData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ReplyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }
}

/// Reply to a summarize request; also the payload of `SUMMARIZE_RESPONSE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub mode: SummaryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl SummarizeReply {
    pub fn completed(mode: SummaryMode, summary: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: true,
            summary: Some(summary.into()),
            mode,
            timestamp: Some(timestamp),
            error: None,
        }
    }

    pub fn failed(mode: SummaryMode, error: ReplyError) -> Self {
        Self {
            success: false,
            summary: None,
            mode,
            timestamp: None,
            error: Some(error),
        }
    }
}

/// `GET_CONTEXT`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<SiteContext>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

/// `SAVE_SUMMARY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSummaryData {
    pub url: String,
    pub summary: String,
    pub mode: SummaryMode,
}

/// Generic `{success, error?}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl SuccessReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: ReplyError) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// `GET_SUMMARY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryQuery {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

/// `CHECK_ENGINES` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginesReply {
    pub success: bool,
    pub fast: Availability,
    pub deep: Availability,
}

/// `SUMMARY_CHUNK`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    pub chunk: String,
}

/// `PAGE_CONTEXT`, sent by a page agent to its panel when the panel opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContextData {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub selected_text: String,
    #[serde(default = "now_millis")]
    pub sent_at: u64,
}

/// `SUMMARIZE`, sent by an embedded panel to its page agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSummarizeData {
    pub text: String,
    pub mode: SummaryMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summarize_reply_omits_empty_fields() {
        let reply = SummarizeReply::failed(
            SummaryMode::Cloud,
            ReplyError::new(ErrorKind::EngineUnavailable, "deep engine unavailable"),
        );
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            value,
            json!({
                "success": false,
                "mode": "cloud",
                "error": { "kind": "EngineUnavailable", "message": "deep engine unavailable" }
            })
        );
    }

    #[test]
    fn save_summary_rejects_unknown_mode() {
        let parsed: Result<SaveSummaryData, _> = serde_json::from_value(json!({
            "url": "https://example.com",
            "summary": "text",
            "mode": "psychic"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn page_context_uses_camel_case() {
        let data: PageContextData = serde_json::from_value(json!({
            "url": "https://example.com/a",
            "title": "A",
            "selectedText": "hello"
        }))
        .unwrap();
        assert_eq!(data.selected_text, "hello");
    }
}
