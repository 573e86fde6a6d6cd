//! Ownership bookkeeping for a single workload
//!
//! The index is rebuilt from `status.resources` at the start of every pass
//! and replaced wholesale by the references applied in that pass. It never
//! performs I/O; the garbage collector and the workload reconciler drive it.

use std::collections::BTreeMap;

use crate::crd::ResourceReference;

/// uid of the resource applied in this pass, per kind name
pub type KeptResources = BTreeMap<String, String>;

/// Resources currently owned by one workload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnershipIndex {
    references: Vec<ResourceReference>,
}

impl OwnershipIndex {
    /// Index seeded from a persisted status resource list
    pub fn from_status(resources: &[ResourceReference]) -> Self {
        Self {
            references: resources.to_vec(),
        }
    }

    /// Every recorded reference, in recorded order
    pub fn references(&self) -> &[ResourceReference] {
        &self.references
    }

    /// Replace the whole index with the references applied in this pass
    pub fn replace(&mut self, applied: Vec<ResourceReference>) {
        self.references = applied;
    }

    /// Per-kind uid map of the recorded references.
    ///
    /// References without a uid are skipped. A later entry of the same kind
    /// wins, matching the one-resource-per-tracked-kind model.
    pub fn kept(&self) -> KeptResources {
        self.references
            .iter()
            .filter_map(|r| r.uid.as_ref().map(|uid| (r.kind.clone(), uid.clone())))
            .collect()
    }

    /// Recorded references whose kind is in `tracked` and whose uid differs
    /// from the uid kept for that kind
    pub fn orphans<'a>(
        &'a self,
        kept: &'a KeptResources,
        tracked: impl Fn(&str) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ResourceReference> + 'a {
        self.references.iter().filter(move |r| {
            tracked(&r.kind) && kept.get(&r.kind).map(String::as_str) != r.uid.as_deref()
        })
    }

    /// True when `other` holds the same set of references, in any order
    pub fn same_set(&self, other: &[ResourceReference]) -> bool {
        if self.references.len() != other.len() {
            return false;
        }
        let key = |r: &ResourceReference| {
            (
                r.api_version.clone(),
                r.kind.clone(),
                r.name.clone(),
                r.uid.clone(),
            )
        };
        let mut mine: Vec<_> = self.references.iter().map(key).collect();
        let mut theirs: Vec<_> = other.iter().map(key).collect();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}
