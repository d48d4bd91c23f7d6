// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Local mirrors of watched resources.
//!
//! Each `ResourceMirror` owns one background task that consumes a list-watch
//! stream and publishes immutable snapshots. Readers never block and never
//! fail: before the first list completes the snapshot is empty, and across a
//! disconnect it is the last complete state.
//!
//! A full relist is buffered and swapped in only when it completes, so a
//! reader never observes half of a list. A periodic resync reopens the stream
//! to correct any missed events.

use arc_swap::ArcSwap;
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::Client;
use kube::runtime::watcher::Event;
use kube::runtime::{WatchStreamExt, watcher};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::workers::Workers;
use super::{CollectorKind, ObjectKey, WatchedResource, object_key};
use crate::config::NamespaceScope;

/// Pause before reopening a stream that ended on its own
const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Synchronization state of one mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// Not started
    Unsynced,
    /// Waiting for a complete list, initially or after a disconnect
    Syncing,
    /// Snapshot reflects the remote state
    Synced,
    /// Periodic relist in progress, previous snapshot still served
    Resyncing,
    /// Shut down
    Stopped,
}

impl fmt::Display for MirrorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MirrorState::Unsynced => "unsynced",
            MirrorState::Syncing => "syncing",
            MirrorState::Synced => "synced",
            MirrorState::Resyncing => "resyncing",
            MirrorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One change reported by a list-watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A full list begins
    Relist,
    /// An object of the list in progress
    Listed(WatchedResource),
    /// The list in progress is complete
    RelistDone,
    /// An object was added or modified
    Upsert(WatchedResource),
    /// An object was deleted
    Remove(ObjectKey),
    /// The stream lost its connection; it may recover on its own
    Disconnected(String),
}

/// Source of list-watch streams for one kind and namespace scope
pub trait ListWatch: Send + Sync {
    /// Open a fresh stream, starting with a full list
    fn open(&self) -> BoxStream<'static, SyncEvent>;
}

/// `ListWatch` over the Kubernetes API using the kube runtime watcher
pub struct KubeListWatch {
    api: Api<DynamicObject>,
}

impl KubeListWatch {
    pub fn new(client: Client, resource: &ApiResource, namespace: Option<&str>) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, resource),
            None => Api::all_with(client, resource),
        };
        Self { api }
    }
}

impl ListWatch for KubeListWatch {
    fn open(&self) -> BoxStream<'static, SyncEvent> {
        watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .map(|event| match event {
                Ok(Event::Init) => SyncEvent::Relist,
                Ok(Event::InitApply(obj)) => SyncEvent::Listed(obj.into()),
                Ok(Event::InitDone) => SyncEvent::RelistDone,
                Ok(Event::Apply(obj)) => SyncEvent::Upsert(obj.into()),
                Ok(Event::Delete(obj)) => SyncEvent::Remove(object_key(&obj)),
                Err(e) => SyncEvent::Disconnected(e.to_string()),
            })
            .boxed()
    }
}

type Snapshot = Vec<Arc<WatchedResource>>;

/// Local store for one (kind, namespace scope) pair
pub struct ResourceMirror {
    /// `<kind>/<namespace>` or `<kind>/*`, for logs
    label: String,
    source: Arc<dyn ListWatch>,
    resync: Duration,
    snapshot: Arc<ArcSwap<Snapshot>>,
    state: Arc<watch::Sender<MirrorState>>,
    started: AtomicBool,
}

impl ResourceMirror {
    pub fn new(label: impl Into<String>, source: Arc<dyn ListWatch>, resync: Duration) -> Self {
        let (state, _) = watch::channel(MirrorState::Unsynced);
        Self {
            label: label.into(),
            source,
            resync,
            snapshot: Arc::new(ArcSwap::from_pointee(Vec::new())),
            state: Arc::new(state),
            started: AtomicBool::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Spawn the synchronization task.
    /// Returns `None` if the mirror was already started.
    pub fn start(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!(mirror = %self.label, "Mirror already started");
            return None;
        }

        let task = SyncTask {
            label: self.label.clone(),
            source: Arc::clone(&self.source),
            resync: self.resync,
            snapshot: Arc::clone(&self.snapshot),
            state: Arc::clone(&self.state),
            store: BTreeMap::new(),
            pending: None,
            listed_once: false,
        };
        Some(tokio::spawn(task.run(token)))
    }

    /// Current snapshot, sorted by (namespace, name)
    pub fn list(&self) -> Snapshot {
        self.snapshot.load().as_ref().clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> MirrorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MirrorState> {
        self.state.subscribe()
    }
}

/// State owned by the background task of one mirror
struct SyncTask {
    label: String,
    source: Arc<dyn ListWatch>,
    resync: Duration,
    snapshot: Arc<ArcSwap<Snapshot>>,
    state: Arc<watch::Sender<MirrorState>>,
    store: BTreeMap<ObjectKey, Arc<WatchedResource>>,
    /// Objects of the relist in progress
    pending: Option<BTreeMap<ObjectKey, Arc<WatchedResource>>>,
    /// Whether any list has completed yet
    listed_once: bool,
}

impl SyncTask {
    async fn run(mut self, token: CancellationToken) {
        info!(mirror = %self.label, resync = ?self.resync, "Starting mirror");
        self.set_state(MirrorState::Syncing);

        let mut events = self.source.open();
        let mut resync = tokio::time::interval_at(Instant::now() + self.resync, self.resync);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = resync.tick() => {
                    debug!(mirror = %self.label, "Periodic resync");
                    self.pending = None;
                    if self.listed_once {
                        self.set_state(MirrorState::Resyncing);
                    }
                    events = self.source.open();
                }
                event = events.next() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        warn!(mirror = %self.label, "Watch stream ended, serving last known state");
                        self.pending = None;
                        self.set_state(MirrorState::Syncing);
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(REOPEN_DELAY) => {}
                        }
                        events = self.source.open();
                    }
                },
            }
        }

        self.set_state(MirrorState::Stopped);
        info!(mirror = %self.label, "Mirror stopped");
    }

    fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Relist => {
                self.pending = Some(BTreeMap::new());
                if self.listed_once {
                    self.set_state(MirrorState::Resyncing);
                }
            }
            SyncEvent::Listed(resource) => {
                let pending = self.pending.get_or_insert_with(BTreeMap::new);
                pending.insert(resource.key(), Arc::new(resource));
            }
            SyncEvent::RelistDone => {
                self.store = self.pending.take().unwrap_or_default();
                self.listed_once = true;
                self.publish();
                self.set_state(MirrorState::Synced);
                debug!(mirror = %self.label, objects = self.store.len(), "List complete");
            }
            SyncEvent::Upsert(resource) => {
                let resource = Arc::new(resource);
                if let Some(pending) = self.pending.as_mut() {
                    pending.insert(resource.key(), Arc::clone(&resource));
                }
                self.store.insert(resource.key(), resource);
                self.publish();
                self.recovered();
            }
            SyncEvent::Remove(key) => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.remove(&key);
                }
                self.store.remove(&key);
                self.publish();
                self.recovered();
            }
            SyncEvent::Disconnected(reason) => {
                if self.pending.take().is_some() {
                    debug!(mirror = %self.label, "Discarding interrupted list");
                }
                warn!(
                    mirror = %self.label,
                    error = %reason,
                    "Watch disconnected, serving last known state"
                );
                self.set_state(MirrorState::Syncing);
            }
        }
    }

    /// A watch that resumed without relisting is back in sync
    fn recovered(&mut self) {
        if self.listed_once && self.pending.is_none() {
            self.set_state(MirrorState::Synced);
        }
    }

    fn publish(&self) {
        let snapshot: Snapshot = self.store.values().cloned().collect();
        self.snapshot.store(Arc::new(snapshot));
    }

    fn set_state(&self, state: MirrorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(mirror = %self.label, from = %previous, to = %state, "Mirror state changed");
        }
    }
}

/// The mirrors of one kind across the configured namespaces
pub struct MirrorSet {
    mirrors: Vec<ResourceMirror>,
}

impl MirrorSet {
    pub fn new(mirrors: Vec<ResourceMirror>) -> Self {
        Self { mirrors }
    }

    /// One mirror per namespace, or a single cluster-wide mirror
    pub fn for_kind(
        client: &Client,
        kind: CollectorKind,
        scope: &NamespaceScope,
        resync: Duration,
    ) -> Self {
        let resource = kind.api_resource();
        let mirrors = match scope {
            NamespaceScope::All => vec![ResourceMirror::new(
                format!("{}/*", kind),
                Arc::new(KubeListWatch::new(client.clone(), &resource, None)),
                resync,
            )],
            NamespaceScope::Only(namespaces) => namespaces
                .iter()
                .map(|ns| {
                    ResourceMirror::new(
                        format!("{}/{}", kind, ns),
                        Arc::new(KubeListWatch::new(client.clone(), &resource, Some(ns))),
                        resync,
                    )
                })
                .collect(),
        };
        Self::new(mirrors)
    }

    /// Start every mirror, handing their tasks to `workers`
    pub fn start(&self, workers: &mut Workers) {
        for mirror in &self.mirrors {
            if let Some(handle) = mirror.start(workers.token()) {
                workers.track(handle);
            }
        }
    }

    /// Concatenation of the members' snapshots
    pub fn list(&self) -> Snapshot {
        self.mirrors.iter().flat_map(ResourceMirror::list).collect()
    }

    /// State receivers of every member, keyed by mirror label
    pub fn subscriptions(&self) -> Vec<(String, watch::Receiver<MirrorState>)> {
        self.mirrors
            .iter()
            .map(|m| (m.label().to_string(), m.subscribe()))
            .collect()
    }

    /// Log when each member completes its first list.
    /// The reporting tasks are tracked by `workers` and end on its shutdown.
    pub fn report_initial_sync(&self, workers: &mut Workers) {
        for (label, mut rx) in self.subscriptions() {
            let token = workers.token();
            workers.track(tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    synced = wait_synced(&mut rx) => {
                        if synced {
                            info!(mirror = %label, "Initial sync complete");
                        } else {
                            debug!(mirror = %label, "Mirror stopped before first sync");
                        }
                    }
                }
            }));
        }
    }
}

/// Whether the mirror reached `Synced` before stopping
async fn wait_synced(rx: &mut watch::Receiver<MirrorState>) -> bool {
    match rx
        .wait_for(|s| matches!(s, MirrorState::Synced | MirrorState::Stopped))
        .await
    {
        Ok(state) => *state == MirrorState::Synced,
        Err(_) => false,
    }
}
