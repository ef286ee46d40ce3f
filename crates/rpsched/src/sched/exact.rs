//! Exact register-pressure-minimizing scheduler.
//!
//! Exhaustive search over ready sets with branch-and-bound pruning and
//! memoization keyed by the set of already-scheduled units. Two prefixes
//! reaching the same scheduled set leave the same live registers and the
//! same ready units behind, so the best achievable peak over any completion
//! is a function of that set alone and can be cached together with the
//! first move of a completion achieving it.

use super::Scheduler;
use crate::chain::ScheduleChain;
use crate::error::ScheduleError;
use crate::graph::{ReachFlags, Reg, ScheduleDag};
use crate::unit::{UnitKey, Units};
use fixedbitset::FixedBitSet;
use rpsched_core::collections::HashMap;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Expansions between two looks at the clock
const CLOCK_DIVIDER: u32 = 100;

type UnitIdx = u16;

/// Minimizes peak register pressure over all legal orders of a DAG
///
/// A wall-clock budget bounds the search; on timeout the best complete
/// schedule found so far is used, and if none was found the fallback
/// scheduler runs on the untouched DAG.
pub struct ExactScheduler {
    fallback: Box<dyn Scheduler>,
    timeout: Option<Duration>,
}

impl ExactScheduler {
    pub fn new(fallback: Box<dyn Scheduler>, timeout: Option<Duration>) -> Self {
        Self { fallback, timeout }
    }
}

struct StaticUnitInfo {
    /// registers read, one entry per incoming data dep
    reg_use: SmallVec<[Reg; 4]>,
    /// registers created, with their total number of consuming deps
    reg_create: SmallVec<[(Reg, usize); 2]>,
    /// immediate predecessors
    depend: SmallVec<[UnitIdx; 4]>,
    /// immediate successors
    release: SmallVec<[UnitIdx; 4]>,
    irp: usize,
}

#[derive(Clone, Copy)]
struct Completion {
    found: bool,
    /// best peak over the remaining suffix, counting the instants of the
    /// moves made after the keyed state
    tail_peak: usize,
}

struct CacheEntry {
    completion: Completion,
    best_unit: Option<UnitIdx>,
}

struct TimedOut;

struct Search {
    sinfo: Vec<StaticUnitInfo>,
    nb_units: usize,

    live: HashMap<Reg, usize>,
    ready: Vec<UnitIdx>,
    deps_left: Vec<usize>,
    cur_peak: usize,
    cur_schedule: Vec<UnitIdx>,

    best_schedule: Option<(usize, Vec<UnitIdx>)>,

    cache: HashMap<FixedBitSet, CacheEntry>,
    scheduled: FixedBitSet,

    deadline: Option<Instant>,
    clock_countdown: u32,
}

impl Search {
    fn new(units: &Units, dag: &ScheduleDag, timeout: Option<Duration>) -> Search {
        let nb_units = dag.unit_count();
        let mut index: HashMap<UnitKey, UnitIdx> = HashMap::default();
        for (i, unit) in dag.units().enumerate() {
            index.insert(unit, i as UnitIdx);
        }

        let mut sinfo = Vec::with_capacity(nb_units);
        for unit in dag.units() {
            let depend = dag
                .reachable(unit, ReachFlags::FOLLOW_PREDS | ReachFlags::IMMEDIATE)
                .iter()
                .map(|u| index[u])
                .collect();
            let release = dag
                .reachable(unit, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE)
                .iter()
                .map(|u| index[u])
                .collect();
            let reg_use = dag
                .preds(unit)
                .iter()
                .filter(|d| d.is_data())
                .map(|d| d.reg)
                .collect();
            let reg_create = dag
                .reg_create(unit)
                .into_iter()
                .map(|reg| {
                    let uses = dag
                        .succs(unit)
                        .iter()
                        .filter(|d| d.is_data() && d.reg == reg)
                        .count();
                    (reg, uses)
                })
                .collect();

            sinfo.push(StaticUnitInfo {
                reg_use,
                reg_create,
                depend,
                release,
                irp: units.internal_pressure(unit) as usize,
            });
        }

        let ready = (0..nb_units as UnitIdx)
            .filter(|&u| sinfo[u as usize].depend.is_empty())
            .collect();
        let deps_left = sinfo.iter().map(|info| info.depend.len()).collect();

        Search {
            nb_units,
            live: HashMap::default(),
            ready,
            deps_left,
            cur_peak: 0,
            cur_schedule: Vec::with_capacity(nb_units),
            best_schedule: None,
            cache: HashMap::default(),
            scheduled: FixedBitSet::with_capacity(nb_units),
            deadline: timeout.map(|t| Instant::now() + t),
            clock_countdown: CLOCK_DIVIDER,
            sinfo,
        }
    }

    fn expired(&mut self) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        self.clock_countdown -= 1;
        if self.clock_countdown == 0 {
            self.clock_countdown = CLOCK_DIVIDER;
            return Instant::now() >= deadline;
        }
        false
    }

    fn best_peak(&self) -> Option<usize> {
        self.best_schedule.as_ref().map(|(peak, _)| *peak)
    }

    /// Rebuild a full schedule from the current prefix by chasing cached
    /// best moves; `None` when the chain of cached states has a gap (a
    /// state on it was withheld from the memo, see below)
    fn rebuild_from_cache(&self) -> Option<Vec<UnitIdx>> {
        let mut schedule = self.cur_schedule.clone();
        let mut bits = self.scheduled.clone();
        while let Some(entry) = self.cache.get(&bits) {
            let next = entry.best_unit?;
            schedule.push(next);
            bits.insert(next as usize);
        }
        (schedule.len() == self.nb_units).then_some(schedule)
    }

    fn search(&mut self) -> Result<Completion, TimedOut> {
        if let Some(entry) = self.cache.get(&self.scheduled) {
            if !entry.completion.found {
                return Ok(Completion {
                    found: false,
                    tail_peak: usize::MAX,
                });
            }
            let completion = entry.completion;
            let peak = self.cur_peak.max(completion.tail_peak);
            if self.best_peak().is_some_and(|best| peak >= best) {
                return Ok(Completion {
                    found: false,
                    tail_peak: usize::MAX,
                });
            }
            // a broken chase falls through to a fresh expansion
            if let Some(schedule) = self.rebuild_from_cache() {
                self.best_schedule = Some((peak, schedule));
                return Ok(completion);
            }
        }

        if self.expired() {
            return Err(TimedOut);
        }

        if self.best_peak().is_some_and(|best| self.cur_peak >= best) {
            return Ok(Completion {
                found: false,
                tail_peak: usize::MAX,
            });
        }

        if self.ready.is_empty() {
            debug_assert!(self.live.is_empty(), "values alive at end of schedule");
            if self.best_peak().is_none_or(|best| self.cur_peak < best) {
                self.best_schedule = Some((self.cur_peak, self.cur_schedule.clone()));
            }
            return Ok(Completion {
                found: true,
                tail_peak: 0,
            });
        }

        let mut result = Completion {
            found: false,
            tail_peak: usize::MAX,
        };
        let mut best_unit = None;

        for i in 0..self.ready.len() {
            let saved_live = self.live.clone();
            let saved_ready = self.ready.clone();
            let saved_deps_left = self.deps_left.clone();
            let saved_peak = self.cur_peak;

            let unit = self.ready[i];
            self.ready.swap_remove(i);
            self.cur_schedule.push(unit);

            let instant_peak = self.emit(unit);

            self.scheduled.insert(unit as usize);
            let tail = self.search()?;
            self.scheduled.set(unit as usize, false);

            if tail.found {
                result.found = true;
                let tail_peak = tail.tail_peak.max(instant_peak);
                if tail_peak < result.tail_peak {
                    result.tail_peak = tail_peak;
                    best_unit = Some(unit);
                }
            }

            self.cur_peak = saved_peak;
            self.cur_schedule.pop();
            self.live = saved_live;
            self.ready = saved_ready;
            self.deps_left = saved_deps_left;
        }

        // a bound that has collapsed onto the prefix pressure cuts tails for
        // prefix-dependent reasons; memoizing those would poison later,
        // cheaper prefixes reaching the same state. Entries are also
        // write-once: stored tails reference the entries of their successor
        // states, and replacing one underneath them would break that chain.
        if self.best_peak().is_none_or(|best| self.cur_peak < best) {
            self.cache
                .entry(self.scheduled.clone())
                .or_insert(CacheEntry {
                    completion: result,
                    best_unit,
                });
        }

        Ok(result)
    }

    /// Apply the transition for `unit`: kill used registers, account the
    /// instant peak, create produced registers, release successors
    fn emit(&mut self, unit: UnitIdx) -> usize {
        let info = &self.sinfo[unit as usize];

        for reg in &info.reg_use {
            let left = self.live.get_mut(reg).expect("used register is not live");
            *left -= 1;
            if *left == 0 {
                self.live.remove(reg);
            }
        }

        let mut instant_peak = self.live.len() + info.irp;

        for &(reg, uses) in &info.reg_create {
            debug_assert!(!self.live.contains_key(&reg), "register already live");
            self.live.insert(reg, uses);
        }
        instant_peak = instant_peak.max(self.live.len());
        self.cur_peak = self.cur_peak.max(instant_peak);

        for r in 0..info.release.len() {
            let next = self.sinfo[unit as usize].release[r] as usize;
            self.deps_left[next] -= 1;
            if self.deps_left[next] == 0 {
                self.ready.push(next as UnitIdx);
            }
        }

        instant_peak
    }
}

impl Scheduler for ExactScheduler {
    fn schedule(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        chain: &mut ScheduleChain,
    ) -> Result<(), ScheduleError> {
        let _span = tracing::debug_span!("exact_schedule", units = dag.unit_count()).entered();

        let mut search = Search::new(units, dag, self.timeout);
        let timed_out = search.search().is_err();
        if timed_out {
            log::debug!("exact scheduler timed out after {} units", dag.unit_count());
        }

        match search.best_schedule {
            Some((peak, schedule)) => {
                log::debug!("exact scheduler found a schedule with peak {peak}");
                let keys: Vec<UnitKey> = dag.units().collect();
                #[cfg(debug_assertions)]
                let mut emitted = ScheduleChain::new();
                for idx in schedule {
                    chain.append(keys[idx as usize]);
                    #[cfg(debug_assertions)]
                    emitted.append(keys[idx as usize]);
                }
                // the search's accounting and the chain simulation must
                // agree on the peak
                #[cfg(debug_assertions)]
                assert_eq!(
                    peak,
                    emitted.compute_rp_against_dag(units, dag, true),
                    "announced and simulated pressure differ"
                );
                Ok(())
            }
            None => self.fallback.schedule(units, dag, chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::unit;
    use crate::graph::Dep;
    use crate::sched::ListScheduler;

    fn exact() -> ExactScheduler {
        ExactScheduler::new(Box::new(ListScheduler::new()), None)
    }

    /// Minimum peak over every topological order, by exhaustive enumeration
    fn brute_force_min_peak(units: &Units, dag: &ScheduleDag) -> usize {
        fn recurse(
            units: &Units,
            dag: &ScheduleDag,
            chain: &mut ScheduleChain,
            remaining: &mut Vec<UnitKey>,
            best: &mut usize,
        ) {
            if remaining.is_empty() {
                *best = (*best).min(chain.compute_rp_against_dag(units, dag, true));
                return;
            }
            for i in 0..remaining.len() {
                let candidate = remaining[i];
                let ready = dag
                    .preds(candidate)
                    .iter()
                    .all(|d| chain.position(d.from).is_some());
                if !ready {
                    continue;
                }
                remaining.remove(i);
                chain.append(candidate);
                recurse(units, dag, chain, remaining, best);
                chain.remove(chain.len() - 1);
                remaining.insert(i, candidate);
            }
        }

        let mut best = usize::MAX;
        let mut remaining: Vec<UnitKey> = dag.units().collect();
        recurse(units, dag, &mut ScheduleChain::new(), &mut remaining, &mut best);
        best
    }

    #[test]
    fn diamond_is_scheduled_at_two() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        let d = unit(&mut units, "d");
        dag.add_units([a, b, c, d]);
        dag.add_dep(Dep::data(a, b, Reg(1)));
        dag.add_dep(Dep::data(a, c, Reg(1)));
        dag.add_dep(Dep::data(b, d, Reg(2)));
        dag.add_dep(Dep::data(c, d, Reg(3)));

        let mut chain = ScheduleChain::new();
        exact().schedule(&mut units, &mut dag, &mut chain).unwrap();
        assert!(chain.check_against_dag(&dag));
        assert_eq!(chain.compute_rp_against_dag(&units, &dag, true), 2);
    }

    #[test]
    fn retires_independent_branches_one_at_a_time() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let p = unit(&mut units, "p");
        let q = unit(&mut units, "q");
        let x1 = unit(&mut units, "x1");
        let x2 = unit(&mut units, "x2");
        dag.add_units([p, q, x1, x2]);
        dag.add_dep(Dep::data(p, x1, Reg(1)));
        dag.add_dep(Dep::data(q, x2, Reg(2)));

        let mut chain = ScheduleChain::new();
        exact().schedule(&mut units, &mut dag, &mut chain).unwrap();
        assert_eq!(chain.compute_rp_against_dag(&units, &dag, true), 1);
    }

    #[test]
    fn matches_brute_force_on_a_bushy_graph() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let a = unit(&mut units, "a");
        let b = unit(&mut units, "b");
        let c = unit(&mut units, "c");
        let d = unit(&mut units, "d");
        let e = unit(&mut units, "e");
        let f = unit(&mut units, "f");
        let g = unit(&mut units, "g");
        dag.add_units([a, b, c, d, e, f, g]);
        dag.add_dep(Dep::data(a, c, Reg(1)));
        dag.add_dep(Dep::data(a, d, Reg(1)));
        dag.add_dep(Dep::data(b, d, Reg(2)));
        dag.add_dep(Dep::data(b, e, Reg(2)));
        dag.add_dep(Dep::data(c, f, Reg(3)));
        dag.add_dep(Dep::data(d, f, Reg(4)));
        dag.add_dep(Dep::data(d, g, Reg(4)));
        dag.add_dep(Dep::data(e, g, Reg(5)));

        let expected = brute_force_min_peak(&units, &dag);
        let mut chain = ScheduleChain::new();
        exact().schedule(&mut units, &mut dag, &mut chain).unwrap();
        assert!(chain.check_against_dag(&dag));
        assert_eq!(chain.compute_rp_against_dag(&units, &dag, true), expected);
    }

    #[test]
    fn zero_budget_still_yields_a_legal_schedule() {
        let mut units = Units::new();
        let mut dag = ScheduleDag::new();
        let keys: Vec<UnitKey> = (0..12).map(|_| unit(&mut units, "n")).collect();
        dag.add_units(keys.iter().copied());
        // a wide two-layer graph: far more than CLOCK_DIVIDER expansions
        for i in 0..6 {
            for j in 6..12 {
                dag.add_dep(Dep::data(keys[i], keys[j], Reg((i * 6 + j) as u32)));
            }
        }

        let sched = ExactScheduler::new(Box::new(ListScheduler::new()), Some(Duration::ZERO));
        let mut chain = ScheduleChain::new();
        sched.schedule(&mut units, &mut dag, &mut chain).unwrap();
        assert!(chain.check_against_dag(&dag));
    }
}
