//! Backend sync: pushes the full mod list to an external consumer
//!
//! The store stays the source of truth. Sinks receive copies, delivery
//! failures are logged and never reach the caller of the write that
//! triggered them.

use crate::db::{ContributorGroup, Engine, GameBananaLink, ModRecord};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

/// `group` value for mods outside any folder
pub const NO_FOLDER_GROUP: &str = "none";

/// Whether a snapshot reflects committed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Sent before the write, computed in memory
    Optimistic,
    /// Read back from the store after commit
    Authoritative,
}

/// Mod record as the consumer sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub executable_path: Option<String>,
    pub icon_data: Option<String>,
    pub banner_data: Option<String>,
    pub logo_data: Option<String>,
    pub logo_position: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub engine: Engine,
    pub display_order: i64,
    pub display_order_in_folder: i64,
    pub folder_id: Option<String>,
    /// `folder_id`, or [`NO_FOLDER_GROUP`]
    pub group: String,
    pub last_played: Option<i64>,
    pub date_added: Option<i64>,
    pub save_terminal_output: bool,
    pub contributors: Option<Vec<ContributorGroup>>,
    pub gamebanana: Option<GameBananaLink>,
}

impl From<&ModRecord> for SyncRecord {
    fn from(m: &ModRecord) -> Self {
        Self {
            id: m.id.clone(),
            name: m.name.clone(),
            path: m.path.clone(),
            executable_path: m.executable_path.clone(),
            icon_data: m.icon_data.clone(),
            banner_data: m.banner_data.clone(),
            logo_data: m.logo_data.clone(),
            logo_position: m.logo_position.map(|p| p.as_str().to_string()),
            version: m.version.clone(),
            description: m.description.clone(),
            engine: m.engine.clone(),
            display_order: m.display_order,
            display_order_in_folder: m.display_order_in_folder,
            folder_id: m.folder_id.clone(),
            group: m
                .folder_id
                .clone()
                .unwrap_or_else(|| NO_FOLDER_GROUP.to_string()),
            last_played: m.last_played,
            date_added: m.date_added,
            save_terminal_output: m.save_terminal_output,
            contributors: m.contributors.clone(),
            gamebanana: m.gamebanana.clone(),
        }
    }
}

/// The complete mod list at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub kind: SnapshotKind,
    pub mods: Vec<SyncRecord>,
}

impl SyncSnapshot {
    pub fn new(kind: SnapshotKind, mods: &[ModRecord]) -> Self {
        Self {
            kind,
            mods: mods.iter().map(SyncRecord::from).collect(),
        }
    }
}

/// Receives mod list snapshots
#[async_trait]
pub trait SyncSink: Send + Sync {
    async fn publish(&self, snapshot: SyncSnapshot) -> Result<()>;
}

/// Sink for stores that have no consumer
pub struct NoopSink;

#[async_trait]
impl SyncSink for NoopSink {
    async fn publish(&self, _snapshot: SyncSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Forwards snapshots over a tokio channel to whatever task owns the receiver
pub struct ChannelSink {
    tx: mpsc::Sender<SyncSnapshot>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SyncSnapshot>) -> Self {
        Self { tx }
    }

    /// Create a sink together with its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SyncSink for ChannelSink {
    async fn publish(&self, snapshot: SyncSnapshot) -> Result<()> {
        self.tx
            .send(snapshot)
            .await
            .map_err(|_| anyhow::anyhow!("Sync channel receiver dropped"))
    }
}

/// In-process mirror of the mod list, keyed by id.
///
/// Each snapshot replaces the whole map.
#[derive(Default)]
pub struct ModsMirror {
    mods: RwLock<HashMap<String, SyncRecord>>,
}

impl ModsMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<SyncRecord> {
        self.mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mirrored mods in display order
    pub fn list(&self) -> Vec<SyncRecord> {
        let mut list: Vec<SyncRecord> = self
            .mods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            (a.display_order, &a.name, &a.id).cmp(&(b.display_order, &b.name, &b.id))
        });
        list
    }
}

#[async_trait]
impl SyncSink for ModsMirror {
    async fn publish(&self, snapshot: SyncSnapshot) -> Result<()> {
        tracing::debug!(
            "Mirroring {} mods ({:?} snapshot)",
            snapshot.mods.len(),
            snapshot.kind
        );
        let mut mods = self.mods.write().unwrap_or_else(PoisonError::into_inner);
        mods.clear();
        for record in snapshot.mods {
            mods.insert(record.id.clone(), record);
        }
        Ok(())
    }
}

/// Delivers snapshots to a sink on behalf of the store
pub struct SyncBridge {
    sink: Arc<dyn SyncSink>,
    optimistic: bool,
    /// Last authoritative mod list, the base for optimistic snapshots
    last: Mutex<Option<Vec<ModRecord>>>,
    /// Held from the committed read until its delivery returns
    publishing: tokio::sync::Mutex<()>,
}

impl SyncBridge {
    pub fn new(sink: Arc<dyn SyncSink>, optimistic: bool) -> Self {
        Self {
            sink,
            optimistic,
            last: Mutex::new(None),
            publishing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// Apply `change` to the last authoritative list and send the result.
    ///
    /// Returns whether a snapshot was sent. Nothing is sent when optimistic
    /// sync is off or no authoritative list has been published yet.
    pub async fn publish_optimistic(
        &self,
        label: &str,
        change: impl FnOnce(&mut Vec<ModRecord>),
    ) -> bool {
        if !self.optimistic {
            return false;
        }

        let base = self
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(mut mods) = base else {
            tracing::debug!("No synced state yet, skipping optimistic sync for '{}'", label);
            return false;
        };

        change(&mut mods);
        self.deliver(SyncSnapshot::new(SnapshotKind::Optimistic, &mods), label)
            .await;
        true
    }

    /// Reserve the delivery slot for one authoritative snapshot.
    ///
    /// Take it before reading the committed list and keep it until
    /// [`publish_authoritative`](Self::publish_authoritative) returns, so
    /// snapshots reach the sink in the order they were read.
    pub async fn begin_authoritative(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.publishing.lock().await
    }

    /// Send the committed mod list and remember it as the new base
    pub async fn publish_authoritative(&self, mods: Vec<ModRecord>, reason: &str) {
        let snapshot = SyncSnapshot::new(SnapshotKind::Authoritative, &mods);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(mods);
        self.deliver(snapshot, reason).await;
    }

    async fn deliver(&self, snapshot: SyncSnapshot, reason: &str) {
        let kind = snapshot.kind;
        let count = snapshot.mods.len();
        match self.sink.publish(snapshot).await {
            Ok(()) => tracing::debug!("Synced {} mods ({:?}) after '{}'", count, kind, reason),
            Err(e) => tracing::error!("Backend sync failed after '{}': {:#}", reason, e),
        }
    }
}

/// Sink that records every snapshot, optionally failing delivery
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    snapshots: Mutex<Vec<SyncSnapshot>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingSink {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<SyncSnapshot> {
        std::mem::take(&mut *self.snapshots.lock().unwrap())
    }
}

#[cfg(test)]
#[async_trait]
impl SyncSink for RecordingSink {
    async fn publish(&self, snapshot: SyncSnapshot) -> Result<()> {
        self.snapshots.lock().unwrap().push(snapshot);
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("consumer unavailable");
        }
        Ok(())
    }
}
