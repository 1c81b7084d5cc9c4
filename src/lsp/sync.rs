//! Synchronization between host documents and their fragments
//!
//! The controller owns the [`FragmentStore`] and the text of every tracked
//! host document. Each host sits behind its own lock, so every pass for one
//! host (scan, store replacement, notification) runs strictly in arrival
//! order while passes for different hosts proceed independently.
//!
//! Every pass produces a [`ChangeBatch`]. The batch is returned to the
//! caller and published on a broadcast channel for subscribers.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, TextEdit, Url, WorkspaceEdit};

use crate::language_regions::{
    Fragment, FragmentCollection, FragmentStore, GrammarMode, HostId, IdentityFormatError, TextCoordinates,
    VirtualId, scan, to_local_position,
};
use crate::lsp::document::{HostDocumentState, StaleVersion, TextDelta};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentChange {
    pub kind: ChangeKind,
    pub id: VirtualId,
}

/// All notifications produced by one synchronization pass over one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub host_id: HostId,
    pub changes: Vec<FragmentChange>,
}

impl ChangeBatch {
    fn empty(host_id: HostId) -> Self {
        ChangeBatch {
            host_id,
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changed(&self) -> impl Iterator<Item = &VirtualId> {
        self.ids(ChangeKind::Changed)
    }

    pub fn deleted(&self) -> impl Iterator<Item = &VirtualId> {
        self.ids(ChangeKind::Deleted)
    }

    fn ids(&self, kind: ChangeKind) -> impl Iterator<Item = &VirtualId> {
        self.changes
            .iter()
            .filter(move |change| change.kind == kind)
            .map(|change| &change.id)
    }
}

/// The single host replacement produced by writing a fragment
///
/// Offsets and the range are expressed against the host text as it was
/// before the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEdit {
    pub uri: Url,
    pub start: usize,
    pub end: usize,
    pub range: Range,
    pub new_text: String,
    /// Host text `new_text` replaced, kept so a rejected edit can be undone
    pub old_text: String,
}

impl HostEdit {
    pub fn to_workspace_edit(&self) -> WorkspaceEdit {
        let edit = TextEdit {
            range: self.range,
            new_text: self.new_text.clone(),
        };
        WorkspaceEdit {
            changes: Some([(self.uri.clone(), vec![edit])].into_iter().collect()),
            ..Default::default()
        }
    }
}

/// Content of a fragment viewed as a standalone document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDocument {
    pub id: VirtualId,
    pub uri: String,
    pub language_tag: String,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("host document {0} is not tracked")]
    HostNotTracked(HostId),
    #[error("no fragment for {0}")]
    FragmentNotFound(VirtualId),
    #[error("invalid virtual identity: {0}")]
    InvalidIdentity(#[from] IdentityFormatError),
    #[error("stale change rejected: {0}")]
    Stale(#[from] StaleVersion),
    #[error("host document {0} changed after the edit")]
    Superseded(HostId),
}

type HostSlot = Arc<Mutex<Option<HostDocumentState>>>;

/// Keeps fragment collections in step with host document text
#[derive(Debug)]
pub struct SyncController {
    store: FragmentStore,
    hosts: DashMap<HostId, HostSlot>,
    changes: broadcast::Sender<ChangeBatch>,
}

impl Default for SyncController {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncController {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        SyncController {
            store: FragmentStore::new(),
            hosts: DashMap::new(),
            changes,
        }
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Receives every change batch published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.changes.subscribe()
    }

    fn slot(&self, host_id: &HostId) -> Option<HostSlot> {
        self.hosts.get(host_id).map(|slot| Arc::clone(slot.value()))
    }

    fn is_current(&self, host_id: &HostId, slot: &HostSlot) -> bool {
        self.hosts
            .get(host_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Starts tracking a host document, or replaces it if already tracked
    pub fn open(&self, uri: &Url, text: &str, language_id: &str, version: Option<i32>) -> ChangeBatch {
        let state = HostDocumentState::new(uri.clone(), language_id, text, version);
        let host_id = state.host_id.clone();
        info!("Opening host document {} ({})", uri, language_id);

        // A concurrent close may detach the slot between lookup and lock.
        loop {
            let slot = Arc::clone(self.hosts.entry(host_id.clone()).or_default().value());
            let mut guard = slot.lock();
            if !self.is_current(&host_id, &slot) {
                continue;
            }
            if guard.is_some() {
                debug!("Host {} re-opened, replacing tracked state", host_id);
            }
            let state = guard.insert(state);
            return self.resync(state);
        }
    }

    /// Applies byte deltas to a tracked host and re-synchronizes its fragments
    pub fn change(&self, uri: &Url, version: Option<i32>, deltas: &[TextDelta]) -> ChangeBatch {
        self.update(uri, |state| state.apply(deltas, version))
    }

    /// Applies LSP content changes to a tracked host and re-synchronizes its fragments
    pub fn apply_content_changes(
        &self,
        uri: &Url,
        version: Option<i32>,
        changes: &[TextDocumentContentChangeEvent],
    ) -> ChangeBatch {
        self.update(uri, |state| state.apply_changes(changes, version))
    }

    fn update(
        &self,
        uri: &Url,
        apply: impl FnOnce(&mut HostDocumentState) -> Result<(), StaleVersion>,
    ) -> ChangeBatch {
        let host_id = HostId::from_url(uri);
        let Some(slot) = self.slot(&host_id) else {
            warn!("Change for untracked host document {}", uri);
            return ChangeBatch::empty(host_id);
        };
        let mut guard = slot.lock();
        let Some(state) = guard.as_mut() else {
            warn!("Change for closed host document {}", uri);
            return ChangeBatch::empty(host_id);
        };
        if let Err(e) = apply(state) {
            warn!("Ignoring change for {}: {}", uri, e);
            return ChangeBatch::empty(host_id);
        }
        self.resync(state)
    }

    /// Stops tracking a host document, reporting all of its fragments as deleted
    pub fn close(&self, uri: &Url) -> ChangeBatch {
        let host_id = HostId::from_url(uri);
        let Some(slot) = self.slot(&host_id) else {
            debug!("Close for untracked host document {}", uri);
            return ChangeBatch::empty(host_id);
        };
        let mut guard = slot.lock();
        if guard.take().is_none() {
            return ChangeBatch::empty(host_id);
        }
        self.hosts.remove_if(&host_id, |_, current| Arc::ptr_eq(current, &slot));

        let changes = self
            .store
            .remove(&host_id)
            .map(|collection| {
                collection
                    .virtual_ids()
                    .into_iter()
                    .map(|id| FragmentChange {
                        kind: ChangeKind::Deleted,
                        id,
                    })
                    .collect()
            })
            .unwrap_or_default();
        info!("Closed host document {}", uri);
        self.publish(ChangeBatch { host_id, changes })
    }

    /// Writes new content into a fragment and splices it back into its host
    ///
    /// The fragment's whole `[start, end)` range is replaced in one edit,
    /// after which the host is rescanned like after any other change.
    pub fn write_fragment(&self, id: &VirtualId, content: &str) -> Result<(HostEdit, ChangeBatch), SyncError> {
        let slot = self
            .slot(&id.host)
            .ok_or_else(|| SyncError::HostNotTracked(id.host.clone()))?;
        let mut guard = slot.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| SyncError::HostNotTracked(id.host.clone()))?;
        let fragment = self
            .store
            .fragment(id)
            .filter(|fragment| fragment.language_tag == id.language_tag)
            .ok_or_else(|| SyncError::FragmentNotFound(id.clone()))?;

        let edit = HostEdit {
            uri: state.uri.clone(),
            start: fragment.start,
            end: fragment.end,
            range: Range {
                start: state.position_at(fragment.start),
                end: state.position_at(fragment.end),
            },
            new_text: content.to_string(),
            old_text: fragment.content.clone(),
        };
        debug!(
            "Writing {} bytes into {} (host bytes {}..{})",
            content.len(),
            id,
            fragment.start,
            fragment.end
        );
        state.apply(&[TextDelta::new(fragment.start, fragment.len(), content)], None)?;
        let batch = self.resync(state);
        Ok((edit, batch))
    }

    /// Undoes a [`write_fragment`](Self::write_fragment) edit the editor refused
    ///
    /// Only reverts while the host still holds `new_text` where the edit put
    /// it; any later change supersedes the edit and is left alone.
    pub fn revert_write(&self, edit: &HostEdit) -> Result<ChangeBatch, SyncError> {
        let host_id = HostId::from_url(&edit.uri);
        let slot = self
            .slot(&host_id)
            .ok_or_else(|| SyncError::HostNotTracked(host_id.clone()))?;
        let mut guard = slot.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| SyncError::HostNotTracked(host_id.clone()))?;

        let written = edit.start..edit.start + edit.new_text.len();
        if state.text().get(written) != Some(edit.new_text.as_str()) {
            return Err(SyncError::Superseded(host_id));
        }
        debug!("Reverting edit of {} at host bytes {}..{}", edit.uri, edit.start, edit.end);
        state.apply(&[TextDelta::new(edit.start, edit.new_text.len(), &edit.old_text)], None)?;
        Ok(self.resync(state))
    }

    /// Parses `uri` and writes into the fragment it names
    pub fn write_fragment_uri(&self, uri: &str, content: &str) -> Result<(HostEdit, ChangeBatch), SyncError> {
        self.write_fragment(&VirtualId::decode(uri)?, content)
    }

    pub fn fragment(&self, id: &VirtualId) -> Result<Fragment, SyncError> {
        self.store
            .fragment(id)
            .filter(|fragment| fragment.language_tag == id.language_tag)
            .ok_or_else(|| SyncError::FragmentNotFound(id.clone()))
    }

    /// Fragment of a host containing a byte offset, boundaries included
    pub fn fragment_at(&self, host_id: &HostId, offset: usize) -> Option<(VirtualId, Fragment)> {
        let (index, fragment) = self.store.fragment_at(host_id, offset)?;
        let id = VirtualId::new(host_id.clone(), index, &fragment.language_tag);
        Some((id, fragment))
    }

    /// Fragment under a host position, with the position in fragment coordinates
    pub fn fragment_at_position(&self, uri: &Url, position: Position) -> Option<(VirtualId, Fragment, Position)> {
        let host_id = HostId::from_url(uri);
        self.with_host(uri, |state| {
            let (id, fragment) = self.fragment_at(&host_id, state.offset_at(position))?;
            let local = to_local_position(&fragment, position, state)?;
            Some((id, fragment, local))
        })
        .flatten()
    }

    /// The fragment named by `id` as a standalone document
    pub fn fragment_document(&self, id: &VirtualId) -> Result<FragmentDocument, SyncError> {
        let fragment = self.fragment(id)?;
        Ok(FragmentDocument {
            id: id.clone(),
            uri: id.encode(),
            language_tag: fragment.language_tag,
            content: fragment.content,
        })
    }

    pub fn fragments(&self, host_id: &HostId) -> Option<Arc<FragmentCollection>> {
        self.store.get(host_id)
    }

    /// Runs `f` against a tracked host while holding that host's lock
    pub fn with_host<R>(&self, uri: &Url, f: impl FnOnce(&HostDocumentState) -> R) -> Option<R> {
        let slot = self.slot(&HostId::from_url(uri))?;
        let guard = slot.lock();
        guard.as_ref().map(f)
    }

    pub fn host_text(&self, uri: &Url) -> Option<String> {
        self.with_host(uri, HostDocumentState::text)
    }

    pub fn is_tracked(&self, uri: &Url) -> bool {
        self.with_host(uri, |_| ()).is_some()
    }

    /// Rescans a host, replaces its collection and publishes the diff
    fn resync(&self, state: &HostDocumentState) -> ChangeBatch {
        let text = state.text();
        let mut fragments = scan(&text, GrammarMode::for_language(&state.language_id));
        let previous = self.store.get(&state.host_id);
        if let Some(previous) = previous.as_deref() {
            carry_timestamps(&previous.fragments, &mut fragments);
        }

        let collection = FragmentCollection::new(state.host_id.clone(), state.language_id.clone(), fragments);
        let current = collection.virtual_ids();
        self.store.replace(collection);

        let surviving: HashSet<&VirtualId> = current.iter().collect();
        let mut changes: Vec<FragmentChange> = previous
            .map(|previous| previous.virtual_ids())
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !surviving.contains(id))
            .map(|id| FragmentChange {
                kind: ChangeKind::Deleted,
                id,
            })
            .collect();
        changes.extend(current.iter().cloned().map(|id| FragmentChange {
            kind: ChangeKind::Changed,
            id,
        }));

        trace!("Synchronized {}: {} changes", state.host_id, changes.len());
        self.publish(ChangeBatch {
            host_id: state.host_id.clone(),
            changes,
        })
    }

    fn publish(&self, batch: ChangeBatch) -> ChangeBatch {
        // No subscribers is not an error.
        let _ = self.changes.send(batch.clone());
        batch
    }
}

// Index-keyed identities: a fragment keeps its creation time while the same
// index holds the same tag, and its modification time while its content is
// unchanged.
fn carry_timestamps(previous: &[Fragment], fragments: &mut [Fragment]) {
    for (old, new) in previous.iter().zip(fragments.iter_mut()) {
        if old.language_tag != new.language_tag {
            continue;
        }
        new.created_at = old.created_at;
        if old.content == new.content {
            new.modified_at = old.modified_at;
        }
    }
}
