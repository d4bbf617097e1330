mod simple;

pub use simple::SimpleAllocator;

use crate::error::{ClusterError, ClusterResult};
use crate::id::{FrameworkId, SlaveId};
use crate::resource::Resources;

/// A read-only snapshot of the cluster handed to allocation policies.
/// Slaves appear in registration order; `free` already excludes both
/// resources used by running tasks and resources locked in outstanding
/// offers.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterView {
    pub frameworks: Vec<FrameworkView>,
    pub slaves: Vec<SlaveView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkView {
    pub id: FrameworkId,
    /// Resources currently held by the framework's non-terminal tasks.
    pub held: Resources,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlaveView {
    pub id: SlaveId,
    pub free: Resources,
}

/// A proposed offer: one framework, one or more slave slices.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferBundle {
    pub framework_id: FrameworkId,
    pub slices: Vec<(SlaveId, Resources)>,
}

/// The allocation policy contract. Each callback observes a snapshot of
/// the cluster and proposes offer bundles; the master turns them into
/// offers. Policies must never propose more than a slave's free
/// remainder, must never name an unknown framework, and must be
/// deterministic given equal snapshots.
pub trait Allocator: Send + 'static {
    fn framework_added(
        &mut self,
        view: &ClusterView,
        framework_id: FrameworkId,
    ) -> ClusterResult<Vec<OfferBundle>>;

    fn framework_removed(
        &mut self,
        view: &ClusterView,
        framework_id: FrameworkId,
    ) -> ClusterResult<Vec<OfferBundle>>;

    fn slave_added(
        &mut self,
        view: &ClusterView,
        slave_id: SlaveId,
    ) -> ClusterResult<Vec<OfferBundle>>;

    fn slave_removed(
        &mut self,
        view: &ClusterView,
        slave_id: SlaveId,
    ) -> ClusterResult<Vec<OfferBundle>>;

    /// A framework declined part of an offer.
    fn resources_unused(
        &mut self,
        view: &ClusterView,
        framework_id: FrameworkId,
        slave_id: SlaveId,
        resources: &Resources,
    ) -> ClusterResult<Vec<OfferBundle>>;

    /// A task reached a terminal state and its resources are free again.
    fn resources_recovered(
        &mut self,
        view: &ClusterView,
        framework_id: FrameworkId,
        slave_id: SlaveId,
        resources: &Resources,
    ) -> ClusterResult<Vec<OfferBundle>>;
}

pub fn create_allocator(kind: &str) -> ClusterResult<Box<dyn Allocator>> {
    match kind {
        "simple" => Ok(Box::new(SimpleAllocator::new())),
        _ => Err(ClusterError::InvalidArgument(format!(
            "unknown allocator: {kind}"
        ))),
    }
}
