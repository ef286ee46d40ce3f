//! Dense reachability matrix over a schedule DAG.

use super::{ReachFlags, ScheduleDag};
use crate::unit::UnitKey;
use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use rpsched_core::hash::FixedHasher;

/// Converts a 2D row-major pair of indices into a 1D array index
#[inline]
fn index(row: usize, col: usize, num_cols: usize) -> usize {
    debug_assert!(col < num_cols);
    (row * num_cols) + col
}

/// Boolean reachability matrix for a graph: `path(u, v)` answers "is there a
/// directed walk from u to v" in O(1) after O(|U|·(|U|+|E|)) construction
///
/// The matrix is a snapshot; it does not follow later graph mutations. The
/// rewrites that use it rely on exactly that, they consult paths of the
/// graph as it was when the rewrite round started.
pub struct PathMap {
    bits: FixedBitSet,
    indices: IndexMap<UnitKey, usize, FixedHasher>,
    n: usize,
}

impl PathMap {
    pub fn build(dag: &ScheduleDag) -> PathMap {
        let n = dag.unit_count();
        let mut indices: IndexMap<UnitKey, usize, FixedHasher> = IndexMap::default();
        for (i, unit) in dag.units().enumerate() {
            indices.insert(unit, i);
        }

        let mut bits = FixedBitSet::with_capacity(n * n);
        for (unit, &i) in &indices {
            let reach = dag.reachable(*unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::INCLUDE_UNIT);
            for target in &reach {
                bits.insert(index(i, indices[target], n));
            }
        }

        PathMap { bits, indices, n }
    }

    /// True iff a directed path (of length >= 0) leads from `from` to `to`
    pub fn path(&self, from: UnitKey, to: UnitKey) -> bool {
        self.bits[index(self.indices[&from], self.indices[&to], self.n)]
    }

    /// The dense index assigned to `unit`
    pub fn index_of(&self, unit: UnitKey) -> usize {
        self.indices[&unit]
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::unit;
    use crate::graph::{Dep, Reg, ScheduleDag};
    use crate::unit::Units;

    #[test]
    fn paths_follow_both_dep_kinds() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        let d = unit(&mut units, "d");
        dag.add_units([a, b, c, d]);
        dag.add_dep(Dep::data(a, b, Reg(1)));
        dag.add_dep(Dep::order(b, c));

        let map = dag.build_path_map();
        assert!(map.path(a, a));
        assert!(map.path(a, b));
        assert!(map.path(a, c));
        assert!(!map.path(c, a));
        assert!(!map.path(a, d));
        assert!(!map.path(d, a));
    }
}
