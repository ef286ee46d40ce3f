//! Property-based tests using proptest.
//!
//! Covers the structural invariants of the scheduler:
//! - DAG consistency survives arbitrary mutation sequences
//! - every transformation emits a complete legal chain
//! - the path matrix agrees with a BFS reference
//! - register renaming maps (producer, old reg) classes bijectively
//! - exact fusion preserves simulated pressure
//! - the exact scheduler matches brute force on small graphs
//! - transformations never increase the achieved pressure

use proptest::prelude::*;
use rpsched::ddl::parse_ddl;
use rpsched::sched::{ExactScheduler, ListScheduler, Scheduler};
use rpsched::transform::{
    BasicStatus, BreakSymmetricalBranchMerge, CollapseChains, Pipeline, SimplifyOrderCuts,
    SmartFuseTwoUnits, SplitDefUseDomUseDeps, SplitMergeBranchUnits, StripDatalessUnits,
    StripUselessOrderDeps, Transformation, TransformationLoop, UniqueRegIds,
};
use rpsched::{Dep, DepKind, ReachFlags, Reg, ScheduleChain, ScheduleDag, UnitKey, Units};
use std::collections::BTreeSet;

/// Pure description of a random DAG; edges always go from a lower index to
/// a higher one, so the graph is acyclic by construction. Every data edge
/// out of node `i` carries register `i + 1` (one value per producer).
#[derive(Debug, Clone)]
struct DagSpec {
    nodes: usize,
    edges: Vec<(usize, usize, bool)>,
}

fn arb_dag_spec(max_nodes: usize) -> impl Strategy<Value = DagSpec> {
    (2..=max_nodes).prop_flat_map(|nodes| {
        proptest::collection::vec(
            (0..nodes, 0..nodes, proptest::bool::ANY),
            0..nodes * 2,
        )
        .prop_map(move |raw| {
            let edges = raw
                .into_iter()
                .filter(|(a, b, _)| a != b)
                .map(|(a, b, order)| if a < b { (a, b, order) } else { (b, a, order) })
                .collect();
            DagSpec { nodes, edges }
        })
    })
}

struct SimpleUnit;

impl rpsched::ScheduleUnit for SimpleUnit {
    fn label(&self) -> String {
        "unit".into()
    }
    fn dup(&self) -> Box<dyn rpsched::ScheduleUnit> {
        Box::new(SimpleUnit)
    }
    fn internal_pressure(&self) -> u32 {
        0
    }
}

fn build(spec: &DagSpec) -> (Units, ScheduleDag, Vec<UnitKey>) {
    let mut units = Units::new();
    let mut dag = ScheduleDag::new();
    let keys: Vec<UnitKey> = (0..spec.nodes)
        .map(|_| units.insert(Box::new(SimpleUnit)))
        .collect();
    dag.add_units(keys.iter().copied());
    for &(a, b, order) in &spec.edges {
        if order {
            dag.add_dep(Dep::order(keys[a], keys[b]));
        } else {
            dag.add_dep(Dep::data(keys[a], keys[b], Reg(a as u32 + 1)));
        }
    }
    (units, dag, keys)
}

fn list_schedule(units: &mut Units, dag: &ScheduleDag) -> ScheduleChain {
    let mut chain = ScheduleChain::new();
    ListScheduler::new()
        .schedule(units, &mut dag.dup(), &mut chain)
        .expect("list scheduler succeeds");
    chain
}

/// Minimum peak over every topological order
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
            if !dag
                .preds(candidate)
                .iter()
                .all(|d| chain.position(d.from).is_some())
            {
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
    recurse(
        units,
        dag,
        &mut ScheduleChain::new(),
        &mut remaining,
        &mut best,
    );
    best
}

fn transformations() -> Vec<(&'static str, Box<dyn Transformation>)> {
    vec![
        ("unique_reg_ids", Box::new(UniqueRegIds)),
        ("strip_useless_order_deps", Box::new(StripUselessOrderDeps)),
        ("strip_dataless_units", Box::new(StripDatalessUnits)),
        ("simplify_order_cuts", Box::new(SimplifyOrderCuts)),
        (
            "split_def_use_dom_use_deps",
            Box::new(SplitDefUseDomUseDeps::new(true)),
        ),
        ("smart_fuse_two_units", Box::new(SmartFuseTwoUnits::new(true, false))),
        (
            "break_symmetrical_branch_merge",
            Box::new(BreakSymmetricalBranchMerge),
        ),
        ("collapse_chains", Box::new(CollapseChains)),
        ("split_merge_branch_units", Box::new(SplitMergeBranchUnits)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_consistency_survives_mutations(
        spec in arb_dag_spec(10),
        removals in proptest::collection::vec((proptest::bool::ANY, 0usize..32), 0..12),
    ) {
        let (_units, mut dag, keys) = build(&spec);
        prop_assert!(dag.is_consistent());

        for (remove_unit, pick) in removals {
            if remove_unit {
                if dag.unit_count() == 0 {
                    continue;
                }
                let unit = keys[pick % keys.len()];
                if dag.contains_unit(unit) {
                    dag.remove_unit(unit);
                }
            } else {
                if dag.deps().is_empty() {
                    continue;
                }
                let dep = dag.deps()[pick % dag.deps().len()];
                dag.remove_dep(dep);
            }
            prop_assert!(dag.is_consistent());
        }
    }

    #[test]
    fn prop_every_transformation_emits_a_legal_chain(spec in arb_dag_spec(9)) {
        for (name, transformation) in transformations() {
            let (mut units, mut dag, _keys) = build(&spec);
            let original = dag.dup();
            let status = BasicStatus::new();
            let mut chain = ScheduleChain::new();
            transformation
                .transform(&mut units, &mut dag, &ListScheduler::new(), &mut chain, &status)
                .unwrap_or_else(|e| panic!("{name} failed: {e}"));
            prop_assert_eq!(chain.len(), original.unit_count(), "{} chain length", name);
            prop_assert!(chain.check_against_dag(&original), "{} legality", name);
        }
    }

    #[test]
    fn prop_path_map_matches_bfs(spec in arb_dag_spec(10)) {
        let (_units, dag, keys) = build(&spec);
        let map = dag.build_path_map();
        for &from in &keys {
            let reach = dag.reachable(from, ReachFlags::FOLLOW_SUCCS | ReachFlags::INCLUDE_UNIT);
            for &to in &keys {
                prop_assert_eq!(map.path(from, to), reach.contains(&to));
            }
        }
    }

    #[test]
    fn prop_unique_reg_ids_biject_producer_classes(spec in arb_dag_spec(10)) {
        let (mut units, mut dag, keys) = build(&spec);
        let before: Vec<Vec<(Reg, UnitKey)>> = keys
            .iter()
            .map(|&u| {
                dag.succs(u)
                    .iter()
                    .filter(|d| d.is_data())
                    .map(|d| (d.reg, d.to))
                    .collect()
            })
            .collect();

        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        UniqueRegIds
            .transform(&mut units, &mut dag, &ListScheduler::new(), &mut chain, &status)
            .unwrap();

        let mut all_new: BTreeSet<Reg> = BTreeSet::new();
        for (i, &u) in keys.iter().enumerate() {
            let after: Vec<(Reg, UnitKey)> = dag
                .succs(u)
                .iter()
                .filter(|d| d.is_data())
                .map(|d| (d.reg, d.to))
                .collect();
            // same number of deps, and distinct register classes per unit
            prop_assert_eq!(after.len(), before[i].len());
            let old_classes: BTreeSet<Reg> = before[i].iter().map(|&(r, _)| r).collect();
            let new_classes: BTreeSet<Reg> = after.iter().map(|&(r, _)| r).collect();
            prop_assert_eq!(old_classes.len(), new_classes.len());
            for reg in &new_classes {
                prop_assert!(reg.0 != 0);
                prop_assert!(all_new.insert(*reg), "register shared across classes");
            }
        }
    }

    #[test]
    fn prop_destroy_is_an_underapproximation(spec in arb_dag_spec(10)) {
        let (_units, dag, keys) = build(&spec);
        for &unit in &keys {
            let weak = dag.reg_destroy(unit);
            let exact = dag.reg_destroy_exact(unit);
            prop_assert!(weak.is_subset(&exact));
        }
    }

    #[test]
    fn prop_exact_fusion_preserves_simulated_pressure(spec in arb_dag_spec(8)) {
        let (mut units, dag, keys) = build(&spec);

        // find a pair with a single immediate successor and try to fuse it
        for &a in &keys {
            let isuccs = dag.reachable(a, ReachFlags::FOLLOW_SUCCS | ReachFlags::IMMEDIATE);
            if isuccs.len() != 1 {
                continue;
            }
            let b = dag.succs(a)[0].to;

            let mut fused_dag = dag.dup();
            let Some(chain_unit) = fused_dag.fuse_units(&mut units, a, b, true) else {
                continue;
            };

            let schedule = list_schedule(&mut units, &fused_dag);
            let fused_rp = schedule.compute_rp_against_dag(&units, &fused_dag, true);

            let mut expanded = schedule.clone();
            let pos = expanded.position(chain_unit).expect("chain unit scheduled");
            expanded.expand(pos, &[a, b]);
            let expanded_rp = expanded.compute_rp_against_dag(&units, &dag, true);

            prop_assert_eq!(fused_rp, expanded_rp);
            break;
        }
    }

    #[test]
    fn prop_exact_scheduler_is_optimal(spec in arb_dag_spec(7)) {
        let (mut units, mut dag, _keys) = build(&spec);
        let expected = brute_force_min_peak(&units, &dag);

        let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
        let mut chain = ScheduleChain::new();
        scheduler.schedule(&mut units, &mut dag, &mut chain).unwrap();

        prop_assert!(chain.check_against_dag(&dag));
        prop_assert_eq!(chain.compute_rp_against_dag(&units, &dag, true), expected);
    }

    #[test]
    fn prop_transformations_never_increase_the_peak(spec in arb_dag_spec(7)) {
        let (mut units, dag, _keys) = build(&spec);

        let plain_rp = {
            let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
            let mut plain = dag.dup();
            let mut chain = ScheduleChain::new();
            scheduler.schedule(&mut units, &mut plain, &mut chain).unwrap();
            chain.compute_rp_against_dag(&units, &dag, true)
        };

        // the standard stage list, without the weak-fusing extension
        let mut body = Pipeline::new();
        body.add_stage(Box::new(StripDatalessUnits));
        body.add_stage(Box::new(StripUselessOrderDeps));
        body.add_stage(Box::new(SimplifyOrderCuts));
        body.add_stage(Box::new(SplitDefUseDomUseDeps::new(true)));
        body.add_stage(Box::new(SmartFuseTwoUnits::new(false, false)));
        body.add_stage(Box::new(BreakSymmetricalBranchMerge));
        body.add_stage(Box::new(CollapseChains));
        body.add_stage(Box::new(SplitMergeBranchUnits));
        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Box::new(UniqueRegIds));
        pipeline.add_stage(Box::new(TransformationLoop::new(Box::new(body))));

        let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
        let mut transformed = dag.dup();
        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        pipeline
            .transform(&mut units, &mut transformed, &scheduler, &mut chain, &status)
            .unwrap();

        prop_assert!(chain.check_against_dag(&dag));
        prop_assert!(chain.compute_rp_against_dag(&units, &dag, true) <= plain_rp);
    }

    #[test]
    fn prop_ddl_programs_schedule_completely(defs in proptest::collection::vec(0u8..4, 1..8)) {
        // derive a well-formed ddl program from the byte pattern
        let mut source = String::from("n0 <- \n");
        for (i, &picks) in defs.iter().enumerate() {
            let mut ins = Vec::new();
            for j in 0..=picks.min(i as u8) {
                ins.push(format!("n{}", i.saturating_sub(j as usize)));
            }
            ins.dedup();
            source.push_str(&format!("n{} <- {}\n", i + 1, ins.join(", ")));
        }

        let mut units = Units::new();
        let program = parse_ddl(&source, &mut units).unwrap();
        let mut dag = ScheduleDag::new();
        rpsched::ddl::build_dag_from_ddl(&program, &units, &mut dag).unwrap();
        let original = dag.dup();

        let pipeline = rpsched::reduction_pipeline();
        let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
        let status = BasicStatus::new();
        let mut chain = ScheduleChain::new();
        pipeline
            .transform(&mut units, &mut dag, &scheduler, &mut chain, &status)
            .unwrap();
        prop_assert!(chain.check_against_dag(&original));
    }
}

#[test]
fn dep_kinds_expose_the_expected_predicates() {
    let mut units = Units::new();
    let a = units.insert(Box::new(SimpleUnit));
    let b = units.insert(Box::new(SimpleUnit));
    let data = Dep::data(a, b, Reg(1));
    let phys = Dep::phys(a, b, Reg(1));
    let order = Dep::order(a, b);
    assert!(data.is_data() && !data.is_phys() && !data.is_order());
    assert!(phys.is_data() && phys.is_phys());
    assert!(order.is_order() && !order.is_data());
    assert_eq!(order.reg, Reg::NONE);
    assert_eq!(data.kind, DepKind::Data);
}
