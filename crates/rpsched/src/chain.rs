//! An actual schedule: a list of units in a fixed order.

use crate::graph::{Reg, ScheduleDag};
use crate::unit::{UnitKey, Units};
use rpsched_core::collections::{HashMap, HashSet};

/// Ordered sequence of schedule units, mutable by position
///
/// Schedulers append to a chain; transformations splice composite units back
/// into their parts once scheduling below them is done.
#[derive(Clone, Default)]
pub struct ScheduleChain {
    units: Vec<UnitKey>,
}

impl ScheduleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn at(&self, pos: usize) -> UnitKey {
        self.units[pos]
    }

    pub fn units(&self) -> &[UnitKey] {
        &self.units
    }

    pub fn set(&mut self, pos: usize, unit: UnitKey) {
        self.units[pos] = unit;
    }

    pub fn insert(&mut self, pos: usize, unit: UnitKey) {
        self.units.insert(pos, unit);
    }

    pub fn insert_many(&mut self, pos: usize, units: &[UnitKey]) {
        self.units.splice(pos..pos, units.iter().copied());
    }

    pub fn remove(&mut self, pos: usize) -> UnitKey {
        self.units.remove(pos)
    }

    /// Replace the unit at `pos` with a sequence, in place
    pub fn expand(&mut self, pos: usize, units: &[UnitKey]) {
        self.units.splice(pos..pos + 1, units.iter().copied());
    }

    pub fn append(&mut self, unit: UnitKey) {
        self.units.push(unit);
    }

    pub fn position(&self, unit: UnitKey) -> Option<usize> {
        self.units.iter().position(|&u| u == unit)
    }

    /// True iff the chain contains exactly the units of `dag` and every
    /// dependency goes forward in the chain
    pub fn check_against_dag(&self, dag: &ScheduleDag) -> bool {
        if self.units.len() != dag.unit_count() {
            return false;
        }
        let mut pos: HashMap<UnitKey, usize> = HashMap::default();
        for (i, &unit) in self.units.iter().enumerate() {
            pos.insert(unit, i);
        }
        for unit in dag.units() {
            if !pos.contains_key(&unit) {
                return false;
            }
        }
        dag.deps().iter().all(|dep| pos[&dep.from] < pos[&dep.to])
    }

    /// Simulate register liveness along the chain and return the peak
    /// pressure
    ///
    /// Use counts are tracked per dependency on both the create and the kill
    /// side, so the result agrees with the schedulers' own accounting. With
    /// `ignore_external` the DAG is treated as restricted to the chain's
    /// units; without it, registers with consumers outside the chain stay
    /// live to the end.
    pub fn compute_rp_against_dag(
        &self,
        units: &Units,
        dag: &ScheduleDag,
        ignore_external: bool,
    ) -> usize {
        let member: HashSet<UnitKey> = self.units.iter().copied().collect();
        let mut live: HashMap<Reg, usize> = HashMap::default();
        let mut peak = 0usize;

        for &unit in &self.units {
            if !dag.contains_unit(unit) {
                continue;
            }
            for dep in dag.preds(unit) {
                if !dep.is_data() || !member.contains(&dep.from) {
                    continue;
                }
                if let Some(left) = live.get_mut(&dep.reg) {
                    *left -= 1;
                    if *left == 0 {
                        live.remove(&dep.reg);
                    }
                }
            }

            peak = peak.max(live.len() + units.internal_pressure(unit) as usize);

            for dep in dag.succs(unit) {
                if !dep.is_data() {
                    continue;
                }
                if ignore_external && !member.contains(&dep.to) {
                    continue;
                }
                *live.entry(dep.reg).or_insert(0) += 1;
            }

            peak = peak.max(live.len());
        }

        peak
    }
}
