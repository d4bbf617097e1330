use std::collections::HashMap;

use crate::allocator::{Allocator, ClusterView, OfferBundle};
use crate::error::ClusterResult;
use crate::id::{FrameworkId, SlaveId};
use crate::resource::Resources;

/// The default allocation policy. Frameworks are sorted ascending by the
/// scalar sum of resources they currently hold (lexical id breaks ties),
/// slaves are visited in registration order, and each free slave's entire
/// remainder goes to the next framework in that sorted order, cycling, so
/// every free slave is handed out on each pass.
///
/// The policy is stateless: every callback recomputes offers from the
/// snapshot alone, which makes it trivially deterministic.
#[derive(Debug, Default)]
pub struct SimpleAllocator;

impl SimpleAllocator {
    pub fn new() -> Self {
        Self
    }

    fn make_offers(&self, view: &ClusterView) -> Vec<OfferBundle> {
        if view.frameworks.is_empty() {
            return vec![];
        }
        let mut order = view.frameworks.iter().collect::<Vec<_>>();
        order.sort_by_key(|framework| (framework.held.scalar_sum(), framework.id.to_string()));

        let mut slices: HashMap<FrameworkId, Vec<(SlaveId, Resources)>> = HashMap::new();
        let mut next = 0;
        for slave in view.slaves.iter() {
            if slave.free.is_empty() {
                continue;
            }
            let framework = order[next % order.len()];
            next += 1;
            slices
                .entry(framework.id)
                .or_default()
                .push((slave.id, slave.free.clone()));
        }

        order
            .iter()
            .filter_map(|framework| {
                slices.remove(&framework.id).map(|slices| OfferBundle {
                    framework_id: framework.id,
                    slices,
                })
            })
            .collect()
    }
}

impl Allocator for SimpleAllocator {
    fn framework_added(
        &mut self,
        view: &ClusterView,
        _framework_id: FrameworkId,
    ) -> ClusterResult<Vec<OfferBundle>> {
        Ok(self.make_offers(view))
    }

    fn framework_removed(
        &mut self,
        view: &ClusterView,
        _framework_id: FrameworkId,
    ) -> ClusterResult<Vec<OfferBundle>> {
        Ok(self.make_offers(view))
    }

    fn slave_added(
        &mut self,
        view: &ClusterView,
        _slave_id: SlaveId,
    ) -> ClusterResult<Vec<OfferBundle>> {
        Ok(self.make_offers(view))
    }

    fn slave_removed(
        &mut self,
        _view: &ClusterView,
        _slave_id: SlaveId,
    ) -> ClusterResult<Vec<OfferBundle>> {
        // Bookkeeping only: a lost slave frees nothing offerable.
        Ok(vec![])
    }

    fn resources_unused(
        &mut self,
        view: &ClusterView,
        _framework_id: FrameworkId,
        _slave_id: SlaveId,
        _resources: &Resources,
    ) -> ClusterResult<Vec<OfferBundle>> {
        Ok(self.make_offers(view))
    }

    fn resources_recovered(
        &mut self,
        view: &ClusterView,
        _framework_id: FrameworkId,
        _slave_id: SlaveId,
        _resources: &Resources,
    ) -> ClusterResult<Vec<OfferBundle>> {
        Ok(self.make_offers(view))
    }
}
