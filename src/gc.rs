//! Garbage collection of resources a workload no longer renders
//!
//! Diff-by-uid-per-kind: for every tracked kind, the uid applied in this
//! pass is kept and every other previously recorded resource of that kind
//! is deleted. At most one resource per tracked kind is kept per workload.

use tracing::{debug, info};

use crate::crd::ResourceReference;
use crate::object::ManagedObject;
use crate::ownership::{KeptResources, OwnershipIndex};
use crate::registry::TypeRegistry;
use crate::store::ObjectStore;
use crate::Error;

/// Delete the orphans in `previous` that are not kept.
///
/// A missing orphan counts as already collected. A live object that now
/// carries the kept uid is never deleted. Returns the references that were
/// deleted.
pub async fn collect_orphans(
    store: &dyn ObjectStore,
    registry: &TypeRegistry,
    namespace: &str,
    previous: &OwnershipIndex,
    kept: &KeptResources,
) -> Result<Vec<ResourceReference>, Error> {
    let mut deleted = Vec::new();

    for orphan in previous.orphans(kept, |kind| registry.tracked(kind).is_some()) {
        let Some(kind) = registry.tracked(&orphan.kind) else {
            continue;
        };
        debug!(
            kind = %orphan.kind,
            name = %orphan.name,
            uid = ?orphan.uid,
            "found orphaned resource"
        );

        let live = store
            .get(kind, namespace, &orphan.name)
            .await
            .map_err(|e| Error::gc(&orphan.kind, &orphan.name, e))?;
        let Some(live) = live else {
            continue;
        };

        let live_uid = ManagedObject::uid(&live).map(str::to_string);
        if live_uid.is_some() && live_uid.as_ref() == kept.get(&orphan.kind) {
            continue;
        }

        let removed = store
            .delete(kind, namespace, &orphan.name, orphan.uid.clone())
            .await
            .map_err(|e| Error::gc(&orphan.kind, &orphan.name, e))?;
        if removed {
            info!(
                kind = %orphan.kind,
                name = %orphan.name,
                uid = ?orphan.uid,
                "removed orphaned resource"
            );
            deleted.push(orphan.clone());
        }
    }

    Ok(deleted)
}
