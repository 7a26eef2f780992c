//! Row counts reported by cascading deletes.
//!
//! A task may be linked to several controls. Deleting it from one control
//! only removes that link unless it was the last one, in which case the
//! task, its transition history and its remaining links go with it. Stores
//! report what they removed in a [`DeleteCounts`] and check it before
//! committing.

use crate::enums::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::gid::Gid;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteCounts {
    /// Links the entity had before the delete
    pub link_count: i64,
    /// The one link the caller asked to sever
    pub unlinked: i64,
    /// Other link rows removed along with the entity
    pub deleted_links: i64,
    pub deleted_transitions: i64,
    pub deleted_entities: i64,
    /// Tasks destroyed because a deleted control held their last link
    pub deleted_tasks: i64,
}

impl DeleteCounts {
    /// Whether the entity row itself was removed.
    pub fn destroyed(&self) -> bool {
        self.deleted_entities > 0
    }

    pub fn accumulate(&mut self, other: &DeleteCounts) {
        self.link_count += other.link_count;
        self.unlinked += other.unlinked;
        self.deleted_links += other.deleted_links;
        self.deleted_transitions += other.deleted_transitions;
        self.deleted_entities += other.deleted_entities;
        self.deleted_tasks += other.deleted_tasks;
    }

    /// Check the outcome of removing a task from one control.
    ///
    /// With more than one link only that link may disappear. With one link
    /// the link, the task row and at least its initial transition must all
    /// be gone.
    pub fn verify_unlink(&self, task_id: Gid) -> CoreResult<()> {
        let fail = |reason: String| CoreError::IncompleteCascade {
            entity_type: EntityType::Task,
            id: task_id,
            reason,
        };

        if self.unlinked != 1 {
            return Err(fail(format!("expected to remove 1 link, removed {}", self.unlinked)));
        }

        if self.link_count <= 1 {
            if self.deleted_entities != 1 || self.deleted_transitions == 0 {
                return Err(fail(format!(
                    "task not fully removed: links={}, transitions={}, tasks={}",
                    self.deleted_links, self.deleted_transitions, self.deleted_entities
                )));
            }
        } else if self.deleted_entities != 0
            || self.deleted_transitions != 0
            || self.deleted_links != 0
        {
            return Err(fail(format!(
                "shared task was removed with {} links remaining",
                self.link_count - 1
            )));
        }
        Ok(())
    }

    /// Check the outcome of destroying an entity outright.
    ///
    /// Every link it had must be gone and, for stateful entities, at least
    /// the initial transition.
    pub fn verify_destroy(&self, id: Gid, stateful: bool) -> CoreResult<()> {
        let fail = |reason: String| CoreError::IncompleteCascade {
            entity_type: id.entity_type(),
            id,
            reason,
        };

        if self.deleted_entities != 1 {
            return Err(fail(format!("removed {} rows", self.deleted_entities)));
        }
        if self.deleted_links != self.link_count {
            return Err(fail(format!(
                "removed {} of {} links",
                self.deleted_links, self.link_count
            )));
        }
        if stateful && self.deleted_transitions == 0 {
            return Err(fail("transition history not removed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::gid::TenantId;

    fn task_id() -> Gid {
        Gid::new(TenantId::generate(), EntityType::Task)
    }

    #[test]
    fn test_unlink_last_link_requires_full_removal() {
        let id = task_id();
        let complete = DeleteCounts {
            link_count: 1,
            unlinked: 1,
            deleted_transitions: 2,
            deleted_entities: 1,
            ..Default::default()
        };
        assert!(complete.verify_unlink(id).is_ok());
        assert!(complete.destroyed());

        let missing_task = DeleteCounts {
            deleted_entities: 0,
            ..complete
        };
        assert_eq!(
            missing_task.verify_unlink(id).err().map(|e| e.kind()),
            Some(ErrorKind::IncompleteCascade)
        );

        let missing_history = DeleteCounts {
            deleted_transitions: 0,
            ..complete
        };
        assert!(missing_history.verify_unlink(id).is_err());
    }

    #[test]
    fn test_unlink_shared_task_only_removes_link() {
        let id = task_id();
        let shared = DeleteCounts {
            link_count: 2,
            unlinked: 1,
            ..Default::default()
        };
        assert!(shared.verify_unlink(id).is_ok());
        assert!(!shared.destroyed());

        let overreach = DeleteCounts {
            deleted_entities: 1,
            ..shared
        };
        assert!(overreach.verify_unlink(id).is_err());

        let no_link = DeleteCounts {
            unlinked: 0,
            ..shared
        };
        assert!(no_link.verify_unlink(id).is_err());
    }

    #[test]
    fn test_verify_destroy() {
        let id = Gid::new(TenantId::generate(), EntityType::Control);
        let ok = DeleteCounts {
            link_count: 3,
            deleted_links: 3,
            deleted_transitions: 1,
            deleted_entities: 1,
            deleted_tasks: 2,
            ..Default::default()
        };
        assert!(ok.verify_destroy(id, true).is_ok());
        assert!(DeleteCounts { deleted_links: 2, ..ok }.verify_destroy(id, true).is_err());
        assert!(DeleteCounts { deleted_transitions: 0, ..ok }.verify_destroy(id, true).is_err());
        assert!(DeleteCounts { deleted_transitions: 0, ..ok }.verify_destroy(id, false).is_ok());
    }

    #[test]
    fn test_accumulate() {
        let mut total = DeleteCounts::default();
        total.accumulate(&DeleteCounts { deleted_entities: 1, deleted_tasks: 2, ..Default::default() });
        total.accumulate(&DeleteCounts { deleted_entities: 1, deleted_links: 4, ..Default::default() });
        assert_eq!(total.deleted_entities, 2);
        assert_eq!(total.deleted_tasks, 2);
        assert_eq!(total.deleted_links, 4);
    }
}
