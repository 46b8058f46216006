use std::pin::Pin;
use std::task::{Context, Poll};

use contextaware_protocol::EngineKind;
use futures::stream::{FusedStream, Stream, StreamExt};
use tracing::debug;

use crate::engine::{EngineSession, FragmentStream};
use crate::error::GatewayError;

/// Owns an acquired session and destroys it exactly once: on explicit
/// release or, failing that, on drop. Dropping covers a caller abandoning
/// the request mid-await.
pub(crate) struct SessionGuard {
    kind: EngineKind,
    session: Box<dyn EngineSession>,
    released: bool,
}

impl SessionGuard {
    pub(crate) fn new(kind: EngineKind, session: Box<dyn EngineSession>) -> Self {
        Self {
            kind,
            session,
            released: false,
        }
    }

    pub(crate) fn session(&mut self) -> &mut dyn EngineSession {
        self.session.as_mut()
    }

    pub(crate) fn release(mut self) {
        self.destroy_once();
    }

    fn destroy_once(&mut self) {
        if !self.released {
            self.released = true;
            self.session.destroy();
            debug!(target: "engine_gateway", kind = %self.kind, "session released");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.destroy_once();
    }
}

/// Lazy, finite, non-restartable sequence of content fragments.
///
/// The session behind it is released when the engine's output ends, when it
/// yields an error (the error is the last item), or when the stream is
/// dropped before either happens.
pub struct SessionStream {
    kind: EngineKind,
    fragments: Option<FragmentStream>,
    guard: Option<SessionGuard>,
}

impl SessionStream {
    pub(crate) fn new(kind: EngineKind, fragments: FragmentStream, guard: SessionGuard) -> Self {
        Self {
            kind,
            fragments: Some(fragments),
            guard: Some(guard),
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }

    /// Drains the stream, concatenating fragments.
    pub async fn collect_text(mut self) -> Result<String, GatewayError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    fn finish(&mut self) {
        // The engine's stream goes first; it may still reference the session.
        self.fragments = None;
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }
}

impl Stream for SessionStream {
    type Item = Result<String, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(fragments) = this.fragments.as_mut() else {
            return Poll::Ready(None);
        };

        match fragments.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => Poll::Ready(Some(Ok(fragment))),
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(GatewayError::request_failed(err))))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl FusedStream for SessionStream {
    fn is_terminated(&self) -> bool {
        self.fragments.is_none()
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if self.guard.is_some() {
            debug!(target: "engine_gateway", kind = %self.kind, "stream abandoned before completion");
        }
        self.finish();
    }
}
