//! End-to-end scheduling scenarios through the full reduction pipeline.

use rpsched::ddl::{build_dag_from_ddl, parse_ddl};
use rpsched::lsd::parse_lsd;
use rpsched::sched::{ExactScheduler, ListScheduler};
use rpsched::transform::BasicStatus;
use rpsched::{
    reduction_pipeline, ScheduleChain, ScheduleDag, Transformation, Units,
};

/// Parse DDL, run the standard pipeline around the exact scheduler, and
/// return the original graph plus the resulting chain
fn schedule_ddl(source: &str) -> (Units, ScheduleDag, ScheduleChain) {
    let mut units = Units::new();
    let program = parse_ddl(source, &mut units).expect("valid ddl");
    let mut dag = ScheduleDag::new();
    build_dag_from_ddl(&program, &units, &mut dag).expect("well-defined ddl");
    let original = dag.dup();

    let pipeline = reduction_pipeline();
    let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
    let mut chain = ScheduleChain::new();
    let status = BasicStatus::new();
    pipeline
        .transform(&mut units, &mut dag, &scheduler, &mut chain, &status)
        .expect("pipeline succeeds");

    (units, original, chain)
}

fn schedule_lsd(source: &str) -> (Units, ScheduleDag, ScheduleChain) {
    let mut units = Units::new();
    let mut dag = ScheduleDag::new();
    parse_lsd(source, &mut units, &mut dag).expect("valid lsd");
    let original = dag.dup();

    let pipeline = reduction_pipeline();
    let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), None);
    let mut chain = ScheduleChain::new();
    let status = BasicStatus::new();
    pipeline
        .transform(&mut units, &mut dag, &scheduler, &mut chain, &status)
        .expect("pipeline succeeds");

    (units, original, chain)
}

#[test]
fn s1_fan_in_program_schedules_at_two() {
    let (units, original, chain) = schedule_ddl(
        "a <- \n\
         b <- \n\
         c <- a\n\
         d <- a, b\n\
         <- c, d\n",
    );
    assert!(chain.check_against_dag(&original));
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 2);
}

#[test]
fn s2_diamond_schedules_at_two() {
    let (units, original, chain) = schedule_ddl(
        "a <- \n\
         b <- a\n\
         c <- a\n\
         d <- b, c\n",
    );
    assert!(chain.check_against_dag(&original));
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 2);
}

#[test]
fn s3_straight_chain_is_emitted_verbatim_at_one() {
    let (units, original, chain) = schedule_ddl(
        "a <- \n\
         b <- a\n\
         c <- b\n\
         d <- c\n\
         e <- d\n",
    );
    assert!(chain.check_against_dag(&original));
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 1);
    // a chain admits exactly one topological order
    let labels: Vec<String> = chain.units().iter().map(|&u| units.label(u)).collect();
    assert_eq!(labels[0], "a <- ");
    assert_eq!(labels[4], "e <- d");
}

#[test]
fn s4_symmetric_branch_merge_schedules_at_two() {
    let (units, original, chain) = schedule_ddl(
        "u <- \n\
         v1 <- u\n\
         v2 <- u\n\
         w <- v1, v2\n",
    );
    assert!(chain.check_against_dag(&original));
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 2);
}

#[test]
fn s5_dominated_uses_schedule_at_two() {
    let (units, original, chain) = schedule_ddl(
        "x <- \n\
         a <- x\n\
         b <- a\n\
         c <- a\n\
         d <- b, c\n",
    );
    assert!(chain.check_against_dag(&original));
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 2);
}

#[test]
fn s6_order_cut_splits_into_independent_chains() {
    let (units, original, chain) = schedule_lsd(
        "Unit a1 Name a1\n\
         To a2 Latency 1 Kind data Reg 1\n\
         To b1 Latency 1 Kind order\n\
         Unit a2 Name a2\n\
         To b2 Latency 1 Kind order\n\
         Unit b1 Name b1\n\
         To b2 Latency 1 Kind data Reg 2\n\
         Unit b2 Name b2\n",
    );
    assert!(chain.check_against_dag(&original));
    // each side is a one-register chain; the cut keeps them independent
    assert_eq!(chain.compute_rp_against_dag(&units, &original, true), 1);
}
