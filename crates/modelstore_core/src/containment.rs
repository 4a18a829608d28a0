//! Single-parent bookkeeping for containment references.
//!
//! The tracker never rejects a write. Attaching a child that already has
//! a container first removes it from the old holder feature, so after any
//! sequence of mutations every entity has at most one container edge and
//! that edge names the feature actually holding it.

use crate::error::CoreResult;
use crate::feature::{ContainerEdge, SingleFeatureKey, Slot};
use crate::id::Id;
use crate::mapper::DataMapper;
use tracing::trace;

/// Keeps container edges in step with containment features.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainmentTracker;

impl ContainmentTracker {
    /// Creates a tracker.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Detaches `child` from any holder other than `holder`, then records
    /// `holder` as its container.
    ///
    /// Call before writing `child` into `holder`.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn attach<M>(&self, mapper: &M, child: &Id, holder: &SingleFeatureKey) -> CoreResult<()>
    where
        M: DataMapper + ?Sized,
    {
        if let Some(edge) = mapper.container_of(child)? {
            if edge.container == holder.owner && edge.feature == holder.name {
                return Ok(());
            }
            self.remove_from_holder(mapper, child, &edge.holder_key())?;
        }
        mapper.container_for(child, ContainerEdge::new(holder.owner, holder.name.clone()))?;
        trace!(%child, holder = %holder, "attached");
        Ok(())
    }

    /// Drops the container edge of `child` if it still names `holder`.
    ///
    /// Call after `child` left `holder` through a replace, remove, clear
    /// or unset.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn release<M>(&self, mapper: &M, child: &Id, holder: &SingleFeatureKey) -> CoreResult<()>
    where
        M: DataMapper + ?Sized,
    {
        match mapper.container_of(child)? {
            Some(edge) if edge.container == holder.owner && edge.feature == holder.name => {
                mapper.remove_container(child)?;
                trace!(%child, holder = %holder, "released");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Removes `child` from its current holder and drops its edge.
    ///
    /// # Errors
    ///
    /// Propagates backend failures.
    pub fn detach<M>(&self, mapper: &M, child: &Id) -> CoreResult<Option<ContainerEdge>>
    where
        M: DataMapper + ?Sized,
    {
        let Some(edge) = mapper.container_of(child)? else {
            return Ok(None);
        };
        self.remove_from_holder(mapper, child, &edge.holder_key())?;
        mapper.remove_container(child)?;
        trace!(%child, container = %edge.container, feature = %edge.feature, "detached");
        Ok(Some(edge))
    }

    fn remove_from_holder<M>(
        &self,
        mapper: &M,
        child: &Id,
        holder: &SingleFeatureKey,
    ) -> CoreResult<()>
    where
        M: DataMapper + ?Sized,
    {
        let slot = Slot::Reference(*child);
        if mapper.get_single(holder)? == Some(slot.clone()) {
            mapper.unset_single(holder)?;
        } else if let Some(position) = mapper.index_of(holder, &slot)? {
            mapper.remove_at(&holder.with_position(position))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_backend::GraphBackend;

    #[test]
    fn attach_moves_child_between_many_holders() {
        let mapper = GraphBackend::in_memory();
        let tracker = ContainmentTracker::new();
        let (p1, p2, c) = (Id::generate(), Id::generate(), Id::generate());
        let first = SingleFeatureKey::new(p1, "children");
        let second = SingleFeatureKey::new(p2, "children");

        tracker.attach(&mapper, &c, &first).unwrap();
        mapper.append(&first, Slot::Reference(c)).unwrap();
        tracker.attach(&mapper, &c, &second).unwrap();
        mapper.append(&second, Slot::Reference(c)).unwrap();

        assert_eq!(mapper.size_of(&first).unwrap(), 0);
        assert_eq!(mapper.all_of(&second).unwrap(), vec![Slot::Reference(c)]);
        assert_eq!(
            mapper.container_of(&c).unwrap(),
            Some(ContainerEdge::new(p2, "children"))
        );
    }

    #[test]
    fn attach_unsets_single_holder() {
        let mapper = GraphBackend::in_memory();
        let tracker = ContainmentTracker::new();
        let (p, c) = (Id::generate(), Id::generate());
        let single = SingleFeatureKey::new(p, "root");
        let many = SingleFeatureKey::new(p, "children");

        tracker.attach(&mapper, &c, &single).unwrap();
        mapper.set_single(&single, Slot::Reference(c)).unwrap();
        tracker.attach(&mapper, &c, &many).unwrap();

        assert_eq!(mapper.get_single(&single).unwrap(), None);
        assert_eq!(mapper.container_of(&c).unwrap(), Some(ContainerEdge::new(p, "children")));
    }

    #[test]
    fn release_ignores_other_holders() {
        let mapper = GraphBackend::in_memory();
        let tracker = ContainmentTracker::new();
        let (p, q, c) = (Id::generate(), Id::generate(), Id::generate());
        let holder = SingleFeatureKey::new(p, "children");
        tracker.attach(&mapper, &c, &holder).unwrap();

        tracker
            .release(&mapper, &c, &SingleFeatureKey::new(q, "children"))
            .unwrap();
        assert!(mapper.container_of(&c).unwrap().is_some());
        tracker.release(&mapper, &c, &holder).unwrap();
        assert!(mapper.container_of(&c).unwrap().is_none());
    }

    #[test]
    fn detach_removes_from_holder() {
        let mapper = GraphBackend::in_memory();
        let tracker = ContainmentTracker::new();
        let (p, c) = (Id::generate(), Id::generate());
        let holder = SingleFeatureKey::new(p, "children");
        tracker.attach(&mapper, &c, &holder).unwrap();
        mapper.append(&holder, Slot::Reference(c)).unwrap();

        let edge = tracker.detach(&mapper, &c).unwrap();
        assert_eq!(edge, Some(ContainerEdge::new(p, "children")));
        assert_eq!(mapper.size_of(&holder).unwrap(), 0);
        assert_eq!(tracker.detach(&mapper, &c).unwrap(), None);
    }
}
