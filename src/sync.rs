//! Sync orchestrator.
//!
//! Ties the other pieces together: a poll loop that ingests newer remote
//! state, a debounced push that uploads the freshly collected aggregate,
//! and the merge between them. Everything is injected — store, remote
//! client, settings — so the service can run against an in-memory remote
//! in tests and be torn down cleanly.
//!
//! Consumers listen on the event channel handed out by the constructor;
//! the service itself never blocks on a slow receiver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::aggregate;
use crate::config::Config;
use crate::document::{DocumentMeta, PlannerDocument, METADATA};
use crate::identity;
use crate::merge;
use crate::remote::{RemoteStore, ReplaceOutcome};
use crate::store::PlannerStore;

/// Failure that must reach the user instead of being retried: the remote
/// document belongs to someone else, and merging it would corrupt their
/// data. Matched via `Error::downcast_ref` at the call sites that care.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote document belongs to {found}, local identity is {expected}")]
    IdentityMismatch { expected: String, found: String },
}

/// Notifications for whatever UI sits on top.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Newer remote state was merged into the local slices.
    RemoteApplied { last_updated: DateTime<Utc> },
    /// The local aggregate landed on the remote store.
    Uploaded { document_id: String },
    /// A cycle failed; the next one retries on its own.
    SyncFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotConfigured,
    Idle,
    Checking,
    Downloading,
    Merging,
    Applying,
    Uploading,
    Error,
}

/// Point-in-time snapshot for a status line or indicator.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    NotConfigured,
    /// No document exists for this identity yet; the first push creates it.
    NoRemote,
    UpToDate,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NotConfigured,
    /// Another upload holds the slot; this one was dropped, not queued.
    InFlight,
    Uploaded { document_id: String },
}

pub struct SyncService {
    store: Arc<PlannerStore>,
    remote: Arc<dyn RemoteStore>,
    identity: Option<String>,
    poll_interval: Duration,
    push_debounce: Duration,
    status: Mutex<SyncStatus>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    upload_slot: Arc<Semaphore>,
    pending_push: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Build the service and hand back the event stream. Reconciles the
    /// stored identity with the configured credential (clearing the cached
    /// pointer if the credential changed) and seeds the pointer from config
    /// when the store has none.
    pub fn new(
        store: Arc<PlannerStore>,
        remote: Arc<dyn RemoteStore>,
        config: &Config,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SyncEvent>)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let identity = if config.remote.api_key.is_empty() {
            None
        } else {
            Some(identity::ensure_identity(&store, &config.remote.api_key)?)
        };

        if identity.is_some()
            && !config.remote.document_id.is_empty()
            && store.remote_document_id()?.is_none()
        {
            store.set_remote_document_id(Some(&config.remote.document_id))?;
        }

        let state = if identity.is_some() {
            SyncState::Idle
        } else {
            SyncState::NotConfigured
        };

        let service = Arc::new(Self {
            store,
            remote,
            identity,
            poll_interval: config.sync.poll_interval(),
            push_debounce: config.sync.push_debounce(),
            status: Mutex::new(SyncStatus {
                state,
                last_synced: None,
                last_error: None,
            }),
            event_tx,
            upload_slot: Arc::new(Semaphore::new(1)),
            pending_push: Mutex::new(None),
        });
        Ok((service, event_rx))
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.lock().await.clone()
    }

    /// One poll cycle: resolve the remote document, compare freshness,
    /// merge and apply if it is newer than what this device last saw.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(identity) = self.identity.clone() else {
            return Ok(PollOutcome::NotConfigured);
        };
        self.set_state(SyncState::Checking).await;
        match self.poll_inner(&identity).await {
            Ok(outcome) => {
                self.finish_ok().await;
                Ok(outcome)
            }
            Err(err) => {
                self.finish_err(&err).await;
                Err(err)
            }
        }
    }

    async fn poll_inner(&self, identity: &str) -> Result<PollOutcome> {
        let Some(payload) = self.resolve_remote_payload(identity).await? else {
            debug!("no remote document yet, staying in empty state");
            return Ok(PollOutcome::NoRemote);
        };

        self.set_state(SyncState::Downloading).await;
        let (remote_doc, meta) = PlannerDocument::from_remote_value(payload);

        if let Some(owner) = meta.as_ref().and_then(|m| m.user_id.as_deref()) {
            if owner != identity {
                return Err(SyncError::IdentityMismatch {
                    expected: identity.to_string(),
                    found: owner.to_string(),
                }
                .into());
            }
        }

        let remote_updated = meta
            .as_ref()
            .and_then(|m| m.last_updated)
            .unwrap_or(DateTime::UNIX_EPOCH);
        if let Some(seen) = self.store.last_seen_updated()? {
            if remote_updated <= seen {
                debug!("remote unchanged since {seen}");
                return Ok(PollOutcome::UpToDate);
            }
        }

        self.set_state(SyncState::Merging).await;
        let local = aggregate::collect(&self.store)?;
        let merged = merge::merge_documents(&local, &remote_doc);

        self.set_state(SyncState::Applying).await;
        aggregate::apply(&self.store, &merged)?;
        self.store.set_last_seen_updated(Some(remote_updated))?;

        let _ = self.event_tx.send(SyncEvent::RemoteApplied {
            last_updated: remote_updated,
        });
        Ok(PollOutcome::Applied)
    }

    /// Upload the current aggregate now. At most one upload runs at a time;
    /// a push arriving while one is in flight is dropped — the next
    /// debounce cycle recomputes the aggregate and carries the edits.
    pub async fn push_once(&self) -> Result<PushOutcome> {
        let Some(identity) = self.identity.clone() else {
            return Ok(PushOutcome::NotConfigured);
        };
        let _permit = match self.upload_slot.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                debug!("upload already in flight, dropping this push");
                return Ok(PushOutcome::InFlight);
            }
        };
        self.set_state(SyncState::Uploading).await;
        match self.push_inner(&identity).await {
            Ok(document_id) => {
                self.finish_ok().await;
                let _ = self.event_tx.send(SyncEvent::Uploaded {
                    document_id: document_id.clone(),
                });
                Ok(PushOutcome::Uploaded { document_id })
            }
            Err(err) => {
                self.finish_err(&err).await;
                Err(err)
            }
        }
    }

    async fn push_inner(&self, identity: &str) -> Result<String> {
        // Collected at fire time, not schedule time, so edits made while
        // the debounce was pending ride along.
        let doc = aggregate::collect(&self.store)?;
        let meta = DocumentMeta::stamp(identity, &doc);
        let payload = doc.to_remote_value(&meta);

        if let Some(id) = self.store.remote_document_id()? {
            match self.remote.replace_document(&id, &payload).await? {
                ReplaceOutcome::Replaced => {
                    self.record_upload(&meta)?;
                    return Ok(id);
                }
                ReplaceOutcome::StaleId => {
                    warn!("cached document {id} no longer exists, rediscovering");
                    self.store.set_remote_document_id(None)?;
                }
            }
        }

        // No usable pointer. Search for an existing document before
        // creating one, so two devices sharing a credential do not mint
        // duplicates.
        if let Some((id, _)) = self.discover_document(identity).await? {
            self.store.set_remote_document_id(Some(&id))?;
            if let ReplaceOutcome::Replaced = self.remote.replace_document(&id, &payload).await? {
                self.record_upload(&meta)?;
                return Ok(id);
            }
            self.store.set_remote_document_id(None)?;
        }

        let id = self.remote.create_document(&payload).await?;
        self.store.set_remote_document_id(Some(&id))?;
        self.record_upload(&meta)?;
        Ok(id)
    }

    /// Schedule a debounced upload, collapsing bursts of edits: a new call
    /// aborts the previously scheduled one and restarts the delay.
    ///
    /// Only a still-sleeping debounce can be aborted. Once the delay has
    /// elapsed the task clears its own handle under the lock before calling
    /// [`Self::push_once`], so a later schedule can never cancel an upload
    /// that is already on the wire — it is the semaphore that drops the
    /// late trigger instead.
    pub async fn schedule_push(self: &Arc<Self>) {
        let mut pending = self.pending_push.lock().await;
        if let Some(task) = pending.take() {
            task.abort();
        }
        let service = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(service.push_debounce).await;
            service.pending_push.lock().await.take();
            if let Err(err) = service.push_once().await {
                warn!("debounced upload failed: {err:#}");
            }
        }));
    }

    /// Spawn the poll loop. The first cycle runs immediately, then every
    /// poll interval until the handle is stopped.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let service = Arc::clone(self);
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            let mut ticker = interval(service.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = service.poll_once().await {
                            warn!("poll cycle failed: {err:#}");
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        });
        SyncHandle { task, shutdown }
    }

    /// Resolve the payload to consider: the cached pointer first, then
    /// identity-based discovery once the pointer proves stale or absent.
    async fn resolve_remote_payload(&self, identity: &str) -> Result<Option<Value>> {
        if let Some(id) = self.store.remote_document_id()? {
            if let Some(payload) = self.remote.fetch_latest(&id).await? {
                return Ok(Some(payload));
            }
            debug!("cached document {id} is gone, falling back to discovery");
            self.store.set_remote_document_id(None)?;
        }
        match self.discover_document(identity).await? {
            Some((id, payload)) => {
                self.store.set_remote_document_id(Some(&id))?;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Walk every document the credential can see and fetch each one until
    /// one carries our identity. O(number of documents) by construction —
    /// the list endpoint returns summaries without bodies.
    async fn discover_document(&self, identity: &str) -> Result<Option<(String, Value)>> {
        let ids = self.remote.list_documents().await?;
        debug!("checking {} candidate documents for {identity}", ids.len());
        for id in ids {
            let payload = match self.remote.fetch_latest(&id).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(err) => {
                    debug!("skipping candidate {id}: {err:#}");
                    continue;
                }
            };
            let owner = payload
                .get(METADATA)
                .and_then(|m| m.get("userId"))
                .and_then(Value::as_str);
            if owner == Some(identity) {
                debug!("document {id} belongs to this identity");
                return Ok(Some((id, payload)));
            }
        }
        Ok(None)
    }

    /// After a successful upload, our own timestamp becomes the last-seen
    /// mark — the next poll must not re-ingest the write we just made —
    /// and local state counts as verified again.
    fn record_upload(&self, meta: &DocumentMeta) -> Result<()> {
        self.store.set_last_seen_updated(meta.last_updated)?;
        self.store.set_pending_unverified(false)?;
        Ok(())
    }

    async fn set_state(&self, state: SyncState) {
        self.status.lock().await.state = state;
    }

    async fn finish_ok(&self) {
        let mut status = self.status.lock().await;
        status.state = SyncState::Idle;
        status.last_synced = Some(Utc::now());
        status.last_error = None;
    }

    async fn finish_err(&self, err: &anyhow::Error) {
        let message = format!("{err:#}");
        {
            let mut status = self.status.lock().await;
            status.state = SyncState::Error;
            status.last_error = Some(message.clone());
        }
        let _ = self.event_tx.send(SyncEvent::SyncFailed { message });
    }
}

/// Handle to the running poll loop.
pub struct SyncHandle {
    task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl SyncHandle {
    /// Stop the poll loop and wait for it to wind down.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}
