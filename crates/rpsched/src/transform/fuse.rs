//! Fusing unit pairs that cannot make pressure worse.

use super::{Transformation, TransformationStatus};
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{Dep, ReachFlags, ScheduleDag};
use crate::sched::Scheduler;
use crate::unit::{UnitKey, Units};

/// Merges a unit into its sole neighbour when doing so cannot raise the
/// peak: a unit destroying at least as many registers as it creates fuses
/// into its only predecessor, and symmetrically for creators with a single
/// successor
///
/// Two passes run over the graph: the first only accepts fusions whose
/// chain IRP is exact, the second (if permitted) also takes safe upper
/// bounds. With weak fusing enabled, a pair that refuses to fuse is instead
/// pinned together by order deps from the successor's other predecessors.
pub struct SmartFuseTwoUnits {
    allow_non_optimal_irp: bool,
    allow_weak_fusing: bool,
}

impl SmartFuseTwoUnits {
    pub fn new(allow_non_optimal_irp: bool, allow_weak_fusing: bool) -> Self {
        Self {
            allow_non_optimal_irp,
            allow_weak_fusing,
        }
    }

    /// Order every other predecessor of `b` after `a`, so scheduling keeps
    /// the pair adjacent-ish without hiding registers inside a chain unit
    fn weak_fuse(&self, dag: &mut ScheduleDag, a: UnitKey, b: UnitKey) -> bool {
        let mut to_add = Vec::new();
        for dep in dag.preds(b).to_vec() {
            let pred = dep.from;
            if pred == a {
                continue;
            }
            let below = dag.reachable(pred, ReachFlags::FOLLOW_SUCCS);
            if !below.contains(&a) {
                to_add.push(Dep::order(pred, a));
            }
        }
        let added = !to_add.is_empty();
        dag.add_deps(to_add);
        added
    }
}

impl Transformation for SmartFuseTwoUnits {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        log::trace!("---> smart fuse two units");
        status.begin();

        let mut allow_approx = false;
        let mut modified = false;
        let mut fused: Vec<UnitKey> = Vec::new();

        'rounds: loop {
            for unit in dag.units().collect::<Vec<_>>() {
                let created = dag.reg_create(unit);
                let used = dag.reg_use(unit);
                let destroyed = dag.reg_destroy(unit);
                let ipreds =
                    dag.reachable(unit, ReachFlags::FOLLOW_PREDS | ReachFlags::IMMEDIATE);
                let isuccs =
                    dag.reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE);
                let irp = units.internal_pressure(unit) as usize;

                if ipreds.len() == 1 && destroyed.len() >= created.len() && irp <= destroyed.len()
                {
                    let pred = dag.preds(unit)[0].from;
                    if let Some(c) = dag.fuse_units(units, pred, unit, !allow_approx) {
                        fused.push(c);
                        modified = true;
                        continue 'rounds;
                    }
                } else if isuccs.len() == 1 && created.len() >= used.len() && irp <= created.len()
                {
                    let succ = dag.succs(unit)[0].to;
                    match dag.fuse_units(units, unit, succ, !allow_approx) {
                        Some(c) => {
                            fused.push(c);
                            modified = true;
                            continue 'rounds;
                        }
                        None if self.allow_weak_fusing => {
                            if self.weak_fuse(dag, unit, succ) {
                                modified = true;
                                continue 'rounds;
                            }
                        }
                        None => {}
                    }
                }
            }

            if !allow_approx && self.allow_non_optimal_irp {
                allow_approx = true;
                continue;
            }
            break;
        }

        status.set_modified(modified);
        status.set_deadlock(false);
        status.set_junction(false);

        inner.schedule(units, dag, chain)?;

        // expand chains back to their parts, newest first so nested fusions
        // unfold outside-in
        for &chain_unit in fused.iter().rev() {
            let pos = chain
                .position(chain_unit)
                .ok_or(ScheduleError::IncompleteChain {
                    transformation: "smart_fuse_two_units",
                })?;
            let parts = units
                .chain_parts(chain_unit)
                .expect("fused unit is a chain unit")
                .to_vec();
            chain.expand(pos, &parts);
            units.remove(chain_unit);
        }

        status.end();
        log::trace!("<--- smart fuse two units");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::unit;
    use crate::graph::Reg;
    use crate::sched::ListScheduler;
    use crate::transform::BasicStatus;

    #[test]
    fn straight_chain_fuses_to_one_unit() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        dag.add_units([a, b, c]);
        dag.add_dep(Dep::data(a, b, Reg(1)));
        dag.add_dep(Dep::data(b, c, Reg(2)));

        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        let full = dag.dup();
        SmartFuseTwoUnits::new(false, true)
            .transform(
                &mut units,
                &mut dag,
                &ListScheduler::new(),
                &mut chain,
                &status,
            )
            .unwrap();

        assert!(status.modified());
        assert_eq!(dag.unit_count(), 1);
        assert!(chain.check_against_dag(&full));
        assert_eq!(chain.units(), [a, b, c]);
    }

    #[test]
    fn fusion_does_not_change_the_peak() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        let d = unit(&mut units, "d");
        dag.add_units([a, b, c, d]);
        dag.add_dep(Dep::data(a, b, Reg(1)));
        dag.add_dep(Dep::data(a, c, Reg(2)));
        dag.add_dep(Dep::data(b, d, Reg(3)));
        dag.add_dep(Dep::data(c, d, Reg(4)));

        let full = dag.dup();
        let reference = {
            let mut chain = ScheduleChain::new();
            ListScheduler::new()
                .schedule(&mut units, &mut dag.dup(), &mut chain)
                .unwrap();
            chain.compute_rp_against_dag(&units, &full, true)
        };

        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        SmartFuseTwoUnits::new(false, true)
            .transform(
                &mut units,
                &mut dag,
                &ListScheduler::new(),
                &mut chain,
                &status,
            )
            .unwrap();

        assert!(chain.check_against_dag(&full));
        assert!(chain.compute_rp_against_dag(&units, &full, true) <= reference.max(2));
    }
}
