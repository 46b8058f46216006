use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::SummaryMode;

/// Correlates a reply (or a relayed reply) with the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every message type understood by some context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    SummarizeLocal,
    SummarizeCloud,
    GetContext,
    SaveSummary,
    GetSummary,
    GetPreferences,
    UpdatePreferences,
    CheckEngines,
    ClearAllData,
    SummaryChunk,
    ToggleSidebar,
    PageContext,
    Summarize,
    SummarizeResponse,
    CloseSidebar,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SummarizeLocal => "SUMMARIZE_LOCAL",
            Self::SummarizeCloud => "SUMMARIZE_CLOUD",
            Self::GetContext => "GET_CONTEXT",
            Self::SaveSummary => "SAVE_SUMMARY",
            Self::GetSummary => "GET_SUMMARY",
            Self::GetPreferences => "GET_PREFERENCES",
            Self::UpdatePreferences => "UPDATE_PREFERENCES",
            Self::CheckEngines => "CHECK_ENGINES",
            Self::ClearAllData => "CLEAR_ALL_DATA",
            Self::SummaryChunk => "SUMMARY_CHUNK",
            Self::ToggleSidebar => "TOGGLE_SIDEBAR",
            Self::PageContext => "PAGE_CONTEXT",
            Self::Summarize => "SUMMARIZE",
            Self::SummarizeResponse => "SUMMARIZE_RESPONSE",
            Self::CloseSidebar => "CLOSE_SIDEBAR",
        }
    }

    /// Coordinator request type for a summarize in `mode`.
    pub fn summarize_for(mode: SummaryMode) -> Self {
        match mode {
            SummaryMode::Local => Self::SummarizeLocal,
            SummaryMode::Cloud => Self::SummarizeCloud,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUMMARIZE_LOCAL" => Some(Self::SummarizeLocal),
            "SUMMARIZE_CLOUD" => Some(Self::SummarizeCloud),
            "GET_CONTEXT" => Some(Self::GetContext),
            "SAVE_SUMMARY" => Some(Self::SaveSummary),
            "GET_SUMMARY" => Some(Self::GetSummary),
            "GET_PREFERENCES" => Some(Self::GetPreferences),
            "UPDATE_PREFERENCES" => Some(Self::UpdatePreferences),
            "CHECK_ENGINES" => Some(Self::CheckEngines),
            "CLEAR_ALL_DATA" => Some(Self::ClearAllData),
            "SUMMARY_CHUNK" => Some(Self::SummaryChunk),
            "TOGGLE_SIDEBAR" => Some(Self::ToggleSidebar),
            "PAGE_CONTEXT" => Some(Self::PageContext),
            "SUMMARIZE" => Some(Self::Summarize),
            "SUMMARIZE_RESPONSE" => Some(Self::SummarizeResponse),
            "CLOSE_SIDEBAR" => Some(Self::CloseSidebar),
            _ => None,
        }
    }
}

impl FromStr for MessageType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value).ok_or(())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ type, data, requestId? }`: the only shape that crosses a context
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Envelope {
    /// Fire-and-forget message without correlation.
    pub fn new(kind: MessageType, data: impl Serialize) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data: serde_json::to_value(data).unwrap_or_default(),
            request_id: None,
        }
    }

    /// Message stamped with a fresh request id.
    pub fn request(kind: MessageType, data: impl Serialize) -> Self {
        Self::new(kind, data).with_request_id(RequestId::new())
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Builds the reply to this envelope, echoing its type and request id.
    pub fn reply(&self, data: impl Serialize) -> Self {
        Self {
            kind: self.kind.clone(),
            data: serde_json::to_value(data).unwrap_or_default(),
            request_id: self.request_id.clone(),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    pub fn is(&self, kind: MessageType) -> bool {
        self.kind == kind.as_str()
    }

    /// Decodes `data`, treating a missing payload as `{}`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            Value::Null => serde_json::from_value(Value::Object(Default::default())),
            data => serde_json::from_value(data.clone()),
        }
    }
}
