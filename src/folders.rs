//! Folder hierarchy reconstruction.
//!
//! The sidecar holds folders as a flat list. Before inserting them every
//! folder's parent must already exist. Ordering is done in bounded passes
//! so self-referencing or cyclic parents end up reported, not looped on.

use std::collections::HashSet;

use crate::models::Folder;

/// Upper bound on ordering passes
pub const MAX_FOLDER_PASSES: usize = 10;

/// Insertion order for a folder list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderOrder {
    /// Folders in an order where each parent precedes its children
    pub ordered: Vec<Folder>,
    /// Folders whose parent never resolved within the pass bound
    pub unresolved: Vec<Folder>,
    /// Passes actually run
    pub passes: usize,
}

/// Order `folders` so each one comes after its parent.
///
/// A parent counts as available when it is null, already ordered, or an
/// existing local folder that the list does not redefine. Duplicate ids
/// keep their first entry.
pub fn order_folders(folders: &[Folder], existing_ids: &HashSet<i64>, max_passes: usize) -> FolderOrder {
    let mut seen = HashSet::new();
    let mut pending: Vec<Folder> = folders
        .iter()
        .filter(|f| seen.insert(f.id))
        .cloned()
        .collect();

    let listed: HashSet<i64> = pending.iter().map(|f| f.id).collect();
    let mut resolved: HashSet<i64> = existing_ids.difference(&listed).copied().collect();

    let mut order = FolderOrder::default();

    while !pending.is_empty() && order.passes < max_passes {
        order.passes += 1;
        let before = pending.len();

        let mut still_pending = Vec::new();
        for folder in pending {
            let ready = match folder.parent_id {
                None => true,
                Some(parent) => parent != folder.id && resolved.contains(&parent),
            };
            if ready {
                resolved.insert(folder.id);
                order.ordered.push(folder);
            } else {
                still_pending.push(folder);
            }
        }
        pending = still_pending;

        if pending.len() == before {
            break;
        }
    }

    order.unresolved = pending;
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(folders: &[Folder]) -> Vec<i64> {
        folders.iter().map(|f| f.id).collect()
    }

    #[test]
    fn test_children_listed_before_parents() {
        let folders = vec![
            Folder::new(3, "Leaf", Some(2)),
            Folder::new(2, "Middle", Some(1)),
            Folder::new(1, "Root", None),
        ];
        let order = order_folders(&folders, &HashSet::new(), MAX_FOLDER_PASSES);

        assert_eq!(ids(&order.ordered), vec![1, 2, 3]);
        assert!(order.unresolved.is_empty());
        assert_eq!(order.passes, 3);
    }

    #[test]
    fn test_existing_local_parent_counts_as_resolved() {
        let folders = vec![Folder::new(5, "Child", Some(40))];
        let existing = HashSet::from([40]);
        let order = order_folders(&folders, &existing, MAX_FOLDER_PASSES);
        assert_eq!(ids(&order.ordered), vec![5]);
    }

    #[test]
    fn test_missing_parent_is_unresolved() {
        let folders = vec![Folder::new(1, "Root", None), Folder::new(2, "Orphan", Some(99))];
        let order = order_folders(&folders, &HashSet::new(), MAX_FOLDER_PASSES);
        assert_eq!(ids(&order.ordered), vec![1]);
        assert_eq!(ids(&order.unresolved), vec![2]);
    }

    #[test]
    fn test_self_reference_terminates() {
        // Existing locally does not help: the list redefines it
        let folders = vec![Folder::new(7, "Loop", Some(7))];
        let order = order_folders(&folders, &HashSet::from([7]), MAX_FOLDER_PASSES);
        assert!(order.ordered.is_empty());
        assert_eq!(ids(&order.unresolved), vec![7]);
        assert_eq!(order.passes, 1);
    }

    #[test]
    fn test_mutual_cycle_terminates() {
        let folders = vec![
            Folder::new(1, "A", Some(2)),
            Folder::new(2, "B", Some(1)),
            Folder::new(3, "Fine", None),
        ];
        let order = order_folders(&folders, &HashSet::new(), MAX_FOLDER_PASSES);
        assert_eq!(ids(&order.ordered), vec![3]);
        assert_eq!(ids(&order.unresolved), vec![1, 2]);
        assert!(order.passes <= MAX_FOLDER_PASSES);
    }

    #[test]
    fn test_pass_bound_is_respected() {
        // A 12-deep chain listed leaf first resolves one level per pass
        let folders: Vec<Folder> = (1..=12)
            .rev()
            .map(|id| Folder::new(id, format!("F{}", id), if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let order = order_folders(&folders, &HashSet::new(), MAX_FOLDER_PASSES);

        assert_eq!(order.passes, MAX_FOLDER_PASSES);
        assert_eq!(order.ordered.len(), 10);
        assert_eq!(ids(&order.unresolved), vec![12, 11]);
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let folders = vec![Folder::new(1, "First", None), Folder::new(1, "Second", None)];
        let order = order_folders(&folders, &HashSet::new(), MAX_FOLDER_PASSES);
        assert_eq!(order.ordered.len(), 1);
        assert_eq!(order.ordered[0].name, "First");
    }
}
