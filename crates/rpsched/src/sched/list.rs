//! Greedy list scheduler biased towards low register pressure.

use super::Scheduler;
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{ReachFlags, Reg, ScheduleDag};
use crate::unit::{UnitKey, Units};
use rpsched_core::collections::HashMap;

/// Deterministic fallback scheduler: repeatedly emits the ready unit with
/// the lowest score `max(IRP, |created|) - |dying uses|`, ties broken by
/// position in the ready list
///
/// A ready unit that would bring a physical register live while another
/// unit still needs a different value in the same slot is treated as
/// non-schedulable this round.
#[derive(Default)]
pub struct ListScheduler;

impl ListScheduler {
    pub fn new() -> Self {
        Self
    }
}

struct LiveReg {
    /// uses still to be scheduled before the register dies
    uses_left: usize,
}

impl Scheduler for ListScheduler {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError> {
        log::debug!("---> list scheduler");

        let mut deps_left: HashMap<UnitKey, usize> = HashMap::default();
        for unit in dag.units() {
            let preds = dag.reachable(unit, ReachFlags::FOLLOW_PREDS | ReachFlags::IMMEDIATE);
            deps_left.insert(unit, preds.len());
        }

        let mut live: HashMap<Reg, LiveReg> = HashMap::default();
        let mut ready: Vec<UnitKey> = dag.roots().to_vec();
        let mut emitted = ScheduleChain::new();
        let total = dag.unit_count();

        while !ready.is_empty() {
            let mut best: Option<(usize, i64)> = None;
            for (i, &unit) in ready.iter().enumerate() {
                let use_regs = dag.reg_use(unit);

                // a created physical register that is already live must also
                // be killed here, otherwise the pick is illegal
                let conflict = dag.reg_phys_create(unit).iter().any(|reg| {
                    live.get(reg).is_some_and(|slot| {
                        !(use_regs.contains(reg) && slot.uses_left == 1)
                    })
                });
                if conflict {
                    continue;
                }

                let mut score = i64::from(units.internal_pressure(unit))
                    .max(dag.reg_create(unit).len() as i64);
                for reg in &use_regs {
                    if live[reg].uses_left == 1 {
                        score -= 1;
                    }
                }
                if best.is_none_or(|(_, s)| score < s) {
                    best = Some((i, score));
                }
            }

            let Some((idx, _)) = best else {
                return Err(ScheduleError::NoSchedulableUnit(total - emitted.len()));
            };

            let unit = ready.swap_remove(idx);
            log::trace!("  * schedule {}", units.label(unit));
            emitted.append(unit);

            for next in &dag.reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE) {
                let left = deps_left.get_mut(next).expect("unknown successor");
                *left -= 1;
                if *left == 0 {
                    log::trace!("    * release {}", units.label(*next));
                    ready.push(*next);
                }
            }

            for dep in dag.preds(unit) {
                if !dep.is_data() {
                    continue;
                }
                let slot = live.get_mut(&dep.reg).expect("used register is not live");
                slot.uses_left -= 1;
                if slot.uses_left == 0 {
                    log::trace!("    * kill {}", dep.reg);
                    live.remove(&dep.reg);
                }
            }

            for dep in dag.succs(unit) {
                if !dep.is_data() {
                    continue;
                }
                live.entry(dep.reg).or_insert(LiveReg { uses_left: 0 }).uses_left += 1;
            }
        }

        if emitted.len() != total {
            return Err(ScheduleError::NoSchedulableUnit(total - emitted.len()));
        }
        if !emitted.check_against_dag(dag) {
            return Err(ScheduleError::InvalidSchedule {
                scheduler: "list scheduler",
            });
        }

        chain.insert_many(chain.len(), emitted.units());
        log::debug!("<--- list scheduler");
        Ok(())
    }
}
