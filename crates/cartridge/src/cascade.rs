use std::collections::BTreeSet;

use crate::manifest::{ItemId, Manifest};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Seed identifiers that named a resource and were removed.
    pub removed_resources: BTreeSet<String>,
    /// Items detached, counting whole subtrees.
    pub removed_items: usize,
    pub removed_dependencies: usize,
}

impl CascadeOutcome {
    pub fn is_empty(&self) -> bool {
        self.removed_resources.is_empty() && self.removed_items == 0 && self.removed_dependencies == 0
    }
}

/// Removes the seed resources, then prunes to a fixpoint: items naming a
/// missing resource, items left with neither a reference nor children, and
/// dependency edges naming a missing resource.
///
/// Seeds that name no resource are ignored, so an empty seed set is a pure
/// consistency sweep. Removing `A` then `B` leaves the same graph as removing
/// `A ∪ B` once.
pub fn remove(manifest: &mut Manifest, seeds: &BTreeSet<String>) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    for id in seeds {
        if manifest.remove_resource(id).is_some() {
            tracing::debug!(resource = %id, "removed resource");
            outcome.removed_resources.insert(id.clone());
        }
    }

    loop {
        let surviving = manifest.resource_ids();
        let mut changed = false;

        let dangling: Vec<ItemId> = manifest
            .live_items()
            .filter(|(_, item)| {
                item.identifierref
                    .as_ref()
                    .is_some_and(|reference| !surviving.contains(reference))
            })
            .map(|(id, _)| id)
            .collect();
        for id in dangling {
            let detached = manifest.detach_item(id);
            changed |= detached > 0;
            outcome.removed_items += detached;
        }

        let vacuous: Vec<ItemId> = manifest
            .live_items()
            .map(|(id, _)| id)
            .filter(|id| manifest.is_vacuous(*id))
            .collect();
        for id in vacuous {
            let detached = manifest.detach_item(id);
            changed |= detached > 0;
            outcome.removed_items += detached;
        }

        for resource in &mut manifest.resources {
            let before = resource.dependencies.len();
            resource
                .dependencies
                .retain(|dependency| surviving.contains(dependency));
            let dropped = before - resource.dependencies.len();
            if dropped > 0 {
                tracing::debug!(resource = %resource.identifier, dropped, "pruned dependency edges");
                outcome.removed_dependencies += dropped;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    if !outcome.is_empty() {
        tracing::info!(
            resources = outcome.removed_resources.len(),
            items = outcome.removed_items,
            dependencies = outcome.removed_dependencies,
            "cascading removal finished"
        );
    }
    outcome
}
