//! Session registry
//!
//! Maps session ids to live sessions for an embedding layer that can only
//! pass integers around. Ids are never reused.

use crate::decoder::{MediaBackend, RenderTarget};
use crate::player::{
    PlaybackStats, Session, SessionBuilder, SessionEventHandler, SessionId, SessionSnapshot,
};
use crate::utils::config::PumpConfig;
use crate::utils::error::{PumpError, Result};
use log::{error, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Owns every live session created through one backend
pub struct SessionRegistry<B: MediaBackend> {
    backend: Arc<B>,
    config: PumpConfig,
    sessions: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicU64,
}

impl<B: MediaBackend> SessionRegistry<B> {
    pub fn new(backend: Arc<B>, config: PumpConfig) -> Self {
        Self {
            backend,
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Backend streams are opened and decoders created with
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Open `source`, build a session on it and start it paused
    pub fn create_session(
        &self,
        source: &str,
        target: Option<Arc<dyn RenderTarget>>,
    ) -> Result<SessionId> {
        self.create_session_with_handler(source, target, None)
    }

    /// Like [`create_session`](Self::create_session), with an event handler attached
    pub fn create_session_with_handler(
        &self,
        source: &str,
        target: Option<Arc<dyn RenderTarget>>,
        handler: Option<Box<dyn SessionEventHandler>>,
    ) -> Result<SessionId> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let demuxer = self
            .backend
            .open_stream(source)
            .inspect_err(|e| error!("{}: failed to open {}: {}", id, source, e))?;

        let mut builder = SessionBuilder::new(demuxer, &*self.backend)
            .with_id(id)
            .with_config(self.config.clone());
        if let Some(target) = target {
            builder = builder.with_render_target(target);
        }
        if let Some(handler) = handler {
            builder = builder.with_event_handler(handler);
        }

        let session = builder.build()?;
        self.sessions.lock().insert(id, session);
        info!("{}: registered for {}", id, source);
        Ok(id)
    }

    /// Binding-layer form of `create_session`: the id, or a negative error code
    pub fn create_session_or_code(
        &self,
        source: &str,
        target: Option<Arc<dyn RenderTarget>>,
    ) -> i64 {
        match self.create_session(source, target) {
            Ok(id) => id.0 as i64,
            Err(e) => e.code() as i64,
        }
    }

    fn with_session<T>(&self, id: SessionId, f: impl FnOnce(&Session) -> T) -> Result<T> {
        let sessions = self.sessions.lock();
        let session = sessions.get(&id).ok_or(PumpError::UnknownSession(id))?;
        Ok(f(session))
    }

    pub fn set_playing(&self, id: SessionId, playing: bool) -> Result<()> {
        self.with_session(id, |s| s.set_playing(playing))
    }

    pub fn seek(&self, id: SessionId) -> Result<()> {
        self.with_session(id, |s| s.seek())
    }

    pub fn set_render_target(&self, id: SessionId, target: Arc<dyn RenderTarget>) -> Result<()> {
        self.with_session(id, |s| s.set_render_target(target))
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot> {
        self.with_session(id, |s| s.snapshot())
    }

    pub fn stats(&self, id: SessionId) -> Result<PlaybackStats> {
        self.with_session(id, |s| s.stats())
    }

    /// Shut a session down and forget it
    ///
    /// The worker is joined outside the registry lock.
    pub fn shutdown(&self, id: SessionId) -> Result<PlaybackStats> {
        let mut session = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or(PumpError::UnknownSession(id))?;
        session.shutdown();
        Ok(session.stats())
    }

    /// Shut down every session
    pub fn shutdown_all(&self) {
        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for mut session in sessions {
            session.shutdown();
        }
    }

    /// Ids of live sessions, ascending
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: MediaBackend> Drop for SessionRegistry<B> {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}
