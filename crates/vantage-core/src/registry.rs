//! Session registry
//!
//! Maps each live channel to the resources it owns (at most one terminal
//! handle and a set of named job handles) and enforces single-owner
//! teardown: `on_close` is the only path that releases a record, it releases
//! everything the record owns, and it is idempotent so repeated transport
//! close signals cannot double-free anything.
//!
//! Records are never shared across channels; every mutation goes through a
//! registry method, called either by the owning channel's handlers or by the
//! teardown path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::jobs::JobHandle;
use crate::pty::TerminalHandle;

/// The agent-side resource-ownership record for one open channel.
#[derive(Debug)]
struct SessionRecord {
    principal: Principal,
    sink: mpsc::UnboundedSender<AgentEvent>,
    terminal: Option<TerminalHandle>,
    jobs: HashMap<String, JobHandle>,
    opened_at: DateTime<Utc>,
}

/// Registry of live channels and their owned resources.
///
/// Cheap to clone; all clones share one map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionRecord>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly authenticated channel with an empty record.
    pub async fn on_open(
        &self,
        id: Uuid,
        principal: Principal,
        sink: mpsc::UnboundedSender<AgentEvent>,
    ) {
        let record = SessionRecord {
            principal,
            sink,
            terminal: None,
            jobs: HashMap::new(),
            opened_at: Utc::now(),
        };
        self.sessions.write().await.insert(id, record);
        info!(channel = %id, "channel registered");
    }

    /// Tear down everything a channel owns and forget it.
    ///
    /// Cancels every job, terminates the terminal subprocess, removes the
    /// record. Safe to call any number of times; only the first call finds
    /// a record to release.
    pub async fn on_close(&self, id: Uuid) {
        let record = self.sessions.write().await.remove(&id);
        let Some(mut record) = record else {
            debug!(channel = %id, "close for unknown channel ignored");
            return;
        };
        for (name, job) in record.jobs.drain() {
            debug!(channel = %id, job = %name, "cancelling channel job");
            job.cancel();
        }
        if let Some(terminal) = record.terminal.take() {
            terminal.terminate();
        }
        let lifetime = Utc::now() - record.opened_at;
        info!(channel = %id, lifetime_secs = lifetime.num_seconds(), "channel closed");
    }

    /// Attach a terminal handle to a channel's record.
    ///
    /// Fails with [`Error::AlreadyAttached`] if the slot is occupied;
    /// callers treat a duplicate start request as a silent no-op.
    pub async fn attach_terminal(&self, id: Uuid, handle: TerminalHandle) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(&id).ok_or(Error::NotRegistered(id))?;
        if record.terminal.is_some() {
            return Err(Error::AlreadyAttached);
        }
        record.terminal = Some(handle);
        Ok(())
    }

    /// Clear a channel's terminal slot after the subprocess exited, so a
    /// later start works again. No-op for unknown channels.
    pub async fn clear_terminal(&self, id: Uuid) {
        if let Some(record) = self.sessions.write().await.get_mut(&id) {
            record.terminal = None;
        }
    }

    /// The channel's live terminal handle, if any.
    pub async fn terminal(&self, id: Uuid) -> Option<TerminalHandle> {
        self.sessions
            .read()
            .await
            .get(&id)
            .and_then(|r| r.terminal.clone())
    }

    /// Whether the channel currently has a terminal attached.
    pub async fn has_terminal(&self, id: Uuid) -> bool {
        self.terminal(id).await.is_some()
    }

    /// Attach a job handle, cancelling any prior job with the same name
    /// (stop-before-start, so executions of the two never interleave).
    pub async fn attach_job(&self, id: Uuid, handle: JobHandle) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(&id).ok_or(Error::NotRegistered(id))?;
        if let Some(old) = record.jobs.remove(handle.name()) {
            old.cancel();
        }
        record.jobs.insert(handle.name().to_string(), handle);
        Ok(())
    }

    /// Cancel and remove a channel's job by name. No-op if absent.
    pub async fn cancel_job(&self, id: Uuid, name: &str) {
        if let Some(record) = self.sessions.write().await.get_mut(&id) {
            if let Some(job) = record.jobs.remove(name) {
                job.cancel();
            }
        }
    }

    /// Number of jobs a channel currently owns (0 for unknown channels).
    pub async fn job_count(&self, id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .get(&id)
            .map_or(0, |r| r.jobs.len())
    }

    /// The principal a channel authenticated as.
    pub async fn principal(&self, id: Uuid) -> Option<Principal> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|r| r.principal.clone())
    }

    /// Send an event to one channel. Returns `false` if the channel is gone.
    pub async fn send(&self, id: Uuid, event: AgentEvent) -> bool {
        match self.sessions.read().await.get(&id) {
            Some(record) => record.sink.send(event).is_ok(),
            None => false,
        }
    }

    /// Broadcast an event to every registered channel.
    pub async fn broadcast(&self, event: AgentEvent) {
        let sessions = self.sessions.read().await;
        for record in sessions.values() {
            let _ = record.sink.send(event.clone());
        }
    }

    /// Number of registered channels.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no channels are registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn admin() -> Principal {
        Principal {
            role: "admin".to_string(),
        }
    }

    async fn open_channel(
        registry: &SessionRegistry,
    ) -> (Uuid, mpsc::UnboundedReceiver<AgentEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.on_open(id, admin(), tx).await;
        (id, rx)
    }

    #[tokio::test]
    async fn test_open_close_lifecycle() {
        let registry = SessionRegistry::new();
        let (id, _rx) = open_channel(&registry).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.principal(id).await.is_some());

        registry.on_close(id).await;
        assert!(registry.is_empty().await);
        assert!(registry.principal(id).await.is_none());

        // Idempotent: the transport may signal closure more than once.
        registry.on_close(id).await;
    }

    #[tokio::test]
    async fn test_close_cancels_owned_jobs() {
        let registry = SessionRegistry::new();
        let (id, _rx) = open_channel(&registry).await;

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let job = jobs::schedule("process-watch", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        registry.attach_job(id, job).await.unwrap();
        assert_eq!(registry.job_count(id).await, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.on_close(id).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_close = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_close);
        assert_eq!(registry.job_count(id).await, 0);
    }

    #[tokio::test]
    async fn test_attach_job_replaces_same_name() {
        let registry = SessionRegistry::new();
        let (id, _rx) = open_channel(&registry).await;

        let first = jobs::schedule("process-watch", Duration::from_secs(60), || async {
            Ok(())
        });
        registry.attach_job(id, first.clone()).await.unwrap();

        let second = jobs::schedule("process-watch", Duration::from_secs(60), || async {
            Ok(())
        });
        registry.attach_job(id, second.clone()).await.unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.job_count(id).await, 1);

        registry.on_close(id).await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_unwatch_cancels_job() {
        let registry = SessionRegistry::new();
        let (id, _rx) = open_channel(&registry).await;

        let job = jobs::schedule("process-watch", Duration::from_secs(60), || async {
            Ok(())
        });
        registry.attach_job(id, job.clone()).await.unwrap();

        registry.cancel_job(id, "process-watch").await;
        assert!(job.is_cancelled());
        assert_eq!(registry.job_count(id).await, 0);
    }

    #[tokio::test]
    async fn test_attach_job_to_unknown_channel_fails() {
        let registry = SessionRegistry::new();
        let job = jobs::schedule("process-watch", Duration::from_secs(60), || async {
            Ok(())
        });
        let result = registry.attach_job(Uuid::new_v4(), job.clone()).await;
        assert!(matches!(result, Err(Error::NotRegistered(_))));
        job.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_channels() {
        let registry = SessionRegistry::new();
        let (_a, mut rx_a) = open_channel(&registry).await;
        let (_b, mut rx_b) = open_channel(&registry).await;

        registry.broadcast(AgentEvent::Pong).await;

        assert!(matches!(rx_a.recv().await, Some(AgentEvent::Pong)));
        assert!(matches!(rx_b.recv().await, Some(AgentEvent::Pong)));
    }

    #[tokio::test]
    async fn test_send_to_closed_channel_is_false() {
        let registry = SessionRegistry::new();
        let (id, _rx) = open_channel(&registry).await;
        registry.on_close(id).await;
        assert!(!registry.send(id, AgentEvent::Pong).await);
    }
}
