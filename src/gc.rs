use log::{debug, info};

use crate::config::GcPolicy;
use crate::heap::{Heap, HeapStats, SweepCounts, Traced};
use crate::stack::FrameStack;
use crate::value::EnvRef;

/// Outcome of one collection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcReport {
    pub before: HeapStats,
    pub after: HeapStats,
    pub freed: SweepCounts,
}

/// Mark-and-sweep driver. Roots are the global environment plus every frame
/// on the evaluation stack.
pub struct Collector {
    policy: GcPolicy,
    limit: usize,
    collections: u64,
}

impl Collector {
    pub fn new(policy: GcPolicy) -> Self {
        let limit = match policy {
            GcPolicy::Always => 0,
            GcPolicy::Threshold { initial_bytes } => initial_bytes,
        };
        Collector {
            policy,
            limit,
            collections: 0,
        }
    }

    /// Current byte limit (only meaningful for the threshold policy).
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn collections(&self) -> u64 {
        self.collections
    }

    pub fn should_collect(&self, heap: &Heap) -> bool {
        match self.policy {
            GcPolicy::Always => true,
            GcPolicy::Threshold { .. } => heap.footprint() > self.limit,
        }
    }

    /// Collect if the policy says so.
    pub fn maybe_collect(
        &mut self,
        heap: &mut Heap,
        global: EnvRef,
        stack: &FrameStack,
    ) -> Option<GcReport> {
        if self.should_collect(heap) {
            Some(self.collect(heap, global, stack))
        } else {
            None
        }
    }

    /// Run a full cycle regardless of policy.
    pub fn collect(&mut self, heap: &mut Heap, global: EnvRef, stack: &FrameStack) -> GcReport {
        let before = heap.stats();

        let mut worklist = Vec::new();
        heap.mark(Traced::Env(global), &mut worklist);
        stack.for_each_root(|root| heap.mark(root, &mut worklist));
        heap.process_worklist(&mut worklist);

        let freed = heap.sweep();
        let after = heap.stats();
        self.collections += 1;

        debug!(
            "gc #{}: before [{}] after [{}] freed {} vals {} lambdas {} envs",
            self.collections,
            before,
            after,
            freed.values,
            freed.closures,
            freed.environments
        );

        if let GcPolicy::Threshold { .. } = self.policy {
            let footprint = heap.footprint();
            while footprint > self.limit {
                self.limit = self.limit.max(1) * 2;
                info!(
                    "gc threshold raised to {} bytes (live footprint {} bytes)",
                    self.limit, footprint
                );
            }
        }

        GcReport {
            before,
            after,
            freed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{create_binding, make_environment};
    use crate::value::SymbolId;

    #[test]
    fn globals_and_stack_roots_survive() {
        let mut heap = Heap::new(1 << 12);
        let mut stack = FrameStack::new();
        let global = make_environment(&mut heap, None).unwrap();
        let bound = heap.make_float(1.0).unwrap();
        create_binding(&mut heap, global, SymbolId(50), bound);

        let expr = heap.make_float(2.0).unwrap();
        let frame = stack.push(global, expr);
        let slot = stack.register();
        let rooted = heap.make_string("rooted").unwrap();
        stack.set_value(slot, rooted);
        let garbage = heap.make_string("garbage").unwrap();

        let mut collector = Collector::new(GcPolicy::Always);
        let report = collector.collect(&mut heap, global, &stack);
        assert_eq!(report.freed.values, 1);
        assert!(heap.contains_value(bound));
        assert!(heap.contains_value(expr));
        assert!(heap.contains_value(rooted));
        assert!(!heap.contains_value(garbage));

        stack.pop(frame, None).unwrap();
        let report = collector.collect(&mut heap, global, &stack);
        assert_eq!(report.freed.values, 2);
        assert_eq!(collector.collections(), 2);
    }

    #[test]
    fn second_collection_frees_nothing() {
        let mut heap = Heap::new(1 << 12);
        let stack = FrameStack::new();
        let global = make_environment(&mut heap, None).unwrap();
        let v = heap.make_float(1.0).unwrap();
        create_binding(&mut heap, global, SymbolId(50), v);
        heap.make_nil().unwrap();

        let mut collector = Collector::new(GcPolicy::Always);
        collector.collect(&mut heap, global, &stack);
        let again = collector.collect(&mut heap, global, &stack);
        assert_eq!(again.freed.total(), 0);
        assert_eq!(again.before, again.after);
    }

    #[test]
    fn threshold_policy_waits_and_doubles() {
        let mut heap = Heap::new(1 << 12);
        let stack = FrameStack::new();
        let global = make_environment(&mut heap, None).unwrap();

        let mut collector = Collector::new(GcPolicy::Threshold { initial_bytes: 1 });
        assert!(collector.should_collect(&heap));

        for i in 0..8 {
            let v = heap.make_float(i as f32).unwrap();
            create_binding(&mut heap, global, SymbolId(100 + i), v);
        }
        collector.collect(&mut heap, global, &stack);
        assert!(collector.limit() >= heap.footprint());
        assert!(!collector.should_collect(&heap));

        let lazy = Collector::new(GcPolicy::Threshold {
            initial_bytes: usize::MAX / 4,
        });
        assert!(!lazy.should_collect(&heap));
    }
}
