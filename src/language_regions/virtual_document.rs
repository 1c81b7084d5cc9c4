//! Fragment store for embedded language regions
//!
//! Holds the most recent scan result of every tracked host document and
//! answers the lookups needed to treat each fragment as a virtual document.
//! Collections are replaced wholesale on every scan; readers hold an `Arc`
//! to the collection they looked up and never observe a partial update.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use super::scanner::Fragment;
use super::virtual_uri::{HostId, VirtualId};

/// The ordered fragments of one host document
///
/// Fragment `i` is addressed by the virtual identity with index `i`; index
/// order is ascending host offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentCollection {
    /// Identity of the host the fragments were scanned from
    pub host_id: HostId,
    /// Declared language id of the host document
    pub language_id: String,
    /// Fragments in ascending offset order
    pub fragments: Vec<Fragment>,
}

impl FragmentCollection {
    pub fn new(host_id: HostId, language_id: impl Into<String>, fragments: Vec<Fragment>) -> Self {
        FragmentCollection {
            host_id,
            language_id: language_id.into(),
            fragments,
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Virtual identity of the fragment at `index`
    pub fn virtual_id(&self, index: usize) -> Option<VirtualId> {
        self.fragments
            .get(index)
            .map(|fragment| VirtualId::new(self.host_id.clone(), index, &fragment.language_tag))
    }

    /// Virtual identities of all fragments, in index order
    pub fn virtual_ids(&self) -> Vec<VirtualId> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(index, fragment)| VirtualId::new(self.host_id.clone(), index, &fragment.language_tag))
            .collect()
    }

    /// First fragment whose closed range `[start, end]` contains `offset`
    ///
    /// Both boundaries count, so a cursor sitting right after the last
    /// character of a fragment still resolves to it.
    pub fn fragment_at(&self, offset: usize) -> Option<(usize, &Fragment)> {
        let index = self.fragments.partition_point(|fragment| fragment.end < offset);
        self.fragments
            .get(index)
            .filter(|fragment| fragment.start <= offset)
            .map(|fragment| (index, fragment))
    }
}

/// Registry of fragment collections, keyed by host identity
#[derive(Debug, Default)]
pub struct FragmentStore {
    collections: DashMap<HostId, Arc<FragmentCollection>>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the collection of a host, returning the previous one
    pub fn replace(&self, collection: FragmentCollection) -> Option<Arc<FragmentCollection>> {
        debug!(
            "Storing {} fragments for {}",
            collection.len(),
            collection.host_id
        );
        self.collections
            .insert(collection.host_id.clone(), Arc::new(collection))
    }

    /// Drops the collection of a host
    pub fn remove(&self, host_id: &HostId) -> Option<Arc<FragmentCollection>> {
        let removed = self.collections.remove(host_id).map(|(_, collection)| collection);
        if removed.is_some() {
            trace!("Removed fragment collection for {}", host_id);
        }
        removed
    }

    pub fn get(&self, host_id: &HostId) -> Option<Arc<FragmentCollection>> {
        self.collections.get(host_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Looks up the fragment a virtual identity refers to
    ///
    /// Identities are index-keyed, so this is `None` once a rescan leaves
    /// fewer fragments than `id.index + 1`.
    pub fn fragment(&self, id: &VirtualId) -> Option<Fragment> {
        let collection = self.get(&id.host)?;
        collection.fragments.get(id.index).cloned()
    }

    pub fn virtual_ids(&self, host_id: &HostId) -> Vec<VirtualId> {
        self.get(host_id)
            .map(|collection| collection.virtual_ids())
            .unwrap_or_default()
    }

    /// Fragment of `host_id` containing `offset`, with its index
    pub fn fragment_at(&self, host_id: &HostId, offset: usize) -> Option<(usize, Fragment)> {
        let collection = self.get(host_id)?;
        collection
            .fragment_at(offset)
            .map(|(index, fragment)| (index, fragment.clone()))
    }

    pub fn host_ids(&self) -> Vec<HostId> {
        self.collections.iter().map(|entry| entry.key().clone()).collect()
    }
}
