//! Deterministic engines that answer from a script instead of a model.
//!
//! Tests across the workspace drive the gateway with them, and the CLI's
//! `--scripted-reply` mode serves every prompt from one.
//!
//! A [`ScriptedEngine`] is a cheap handle: clones share the reply queue and
//! the session counters, so a test can register one clone with a gateway and
//! keep another to assert `acquired() == released()` afterwards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use contextaware_protocol::{Availability, EngineKind};
use futures::stream::{self, StreamExt};

use crate::engine::{EngineOptions, EngineSession, FragmentStream, InferenceEngine};

/// What the next prompt on a session produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    Stream(Vec<String>),
    StreamThenFail(Vec<String>, String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn stream<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream(fragments.into_iter().map(Into::into).collect())
    }

    pub fn stream_then_fail<I, S>(fragments: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StreamThenFail(
            fragments.into_iter().map(Into::into).collect(),
            message.into(),
        )
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback: Mutex<Option<ScriptedReply>>,
    inputs: Mutex<Vec<String>>,
    options: Mutex<Vec<EngineOptions>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    probes: AtomicUsize,
}

impl Script {
    fn next_reply(&self) -> ScriptedReply {
        let queued = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        queued
            .or_else(|| {
                self.fallback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_else(|| ScriptedReply::fail("scripted engine ran out of replies"))
    }

    fn record_input(&self, input: &str) {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(input.to_string());
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    kind: EngineKind,
    availability: Availability,
    probe_fails: bool,
    session_fails: bool,
    latency: Option<Duration>,
    script: Arc<Script>,
}

impl ScriptedEngine {
    pub fn new(kind: EngineKind, availability: Availability) -> Self {
        Self {
            kind,
            availability,
            probe_fails: false,
            session_fails: false,
            latency: None,
            script: Arc::new(Script::default()),
        }
    }

    pub fn ready(kind: EngineKind) -> Self {
        Self::new(kind, Availability::Ready)
    }

    /// Queues a reply for the next prompt.
    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.push_reply(reply);
        self
    }

    /// Reply used once the queue is empty.
    pub fn with_fallback(self, reply: ScriptedReply) -> Self {
        *self
            .script
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reply);
        self
    }

    /// Every prompt waits this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn with_failing_sessions(mut self) -> Self {
        self.session_fails = true;
        self
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.script
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    pub fn acquired(&self) -> usize {
        self.script.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.script.released.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.script.probes.load(Ordering::SeqCst)
    }

    /// Inputs received by prompts, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.script
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Options each session was created with.
    pub fn session_options(&self) -> Vec<EngineOptions> {
        self.script
            .options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn availability(&self) -> Result<Availability> {
        self.script.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_fails {
            return Err(anyhow!("capability probe threw"));
        }
        Ok(self.availability)
    }

    async fn create_session(&self, options: &EngineOptions) -> Result<Box<dyn EngineSession>> {
        if self.session_fails {
            return Err(anyhow!("session constructor rejected the options"));
        }
        self.script
            .options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(options.clone());
        self.script.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            latency: self.latency,
            destroyed: false,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Script>,
    latency: Option<Duration>,
    destroyed: bool,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn prompt(&mut self, input: &str) -> Result<String> {
        if self.destroyed {
            return Err(anyhow!("prompt on destroyed session"));
        }
        self.script.record_input(input);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.script.next_reply() {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Stream(fragments) => Ok(fragments.concat()),
            ScriptedReply::Fail(message) | ScriptedReply::StreamThenFail(_, message) => {
                Err(anyhow!(message))
            }
        }
    }

    fn prompt_streaming(&mut self, input: &str) -> Result<FragmentStream> {
        if self.destroyed {
            return Err(anyhow!("prompt on destroyed session"));
        }
        self.script.record_input(input);
        let (fragments, failure) = match self.script.next_reply() {
            ScriptedReply::Text(text) => (vec![text], None),
            ScriptedReply::Stream(fragments) => (fragments, None),
            ScriptedReply::StreamThenFail(fragments, message) => (fragments, Some(message)),
            ScriptedReply::Fail(message) => return Err(anyhow!(message)),
        };

        let latency = self.latency;
        let items = fragments
            .into_iter()
            .map(Ok)
            .chain(failure.map(|message| Err(anyhow!(message))));
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(latency) = latency {
                    tokio::time::sleep(latency).await;
                }
                item
            })
            .boxed())
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.script.released.fetch_add(1, Ordering::SeqCst);
    }
}
