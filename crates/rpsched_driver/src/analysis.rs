//! Plain-text live-range report for a scheduled chain.

use rpsched::{ScheduleChain, ScheduleDag, Units};
use std::collections::BTreeMap;
use std::io::Write;

/// Write one line per scheduled unit with the registers alive across it and
/// the pressure at that point, then the overall peak
pub fn write_chain_analysis(
    units: &Units,
    dag: &ScheduleDag,
    chain: &ScheduleChain,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    let mut live: BTreeMap<rpsched::Reg, usize> = BTreeMap::new();
    let mut peak = 0usize;

    for pos in 0..chain.len() {
        let unit = chain.at(pos);

        for dep in dag.preds(unit) {
            if !dep.is_data() {
                continue;
            }
            if let Some(left) = live.get_mut(&dep.reg) {
                *left -= 1;
                if *left == 0 {
                    live.remove(&dep.reg);
                }
            }
        }

        let irp = units.internal_pressure(unit) as usize;
        let during = live.len() + irp;
        peak = peak.max(during);

        for dep in dag.succs(unit) {
            if dep.is_data() {
                *live.entry(dep.reg).or_insert(0) += 1;
            }
        }
        peak = peak.max(live.len());

        let label = units.label(unit).replace('\n', " / ");
        let regs: Vec<String> = live.keys().map(|reg| reg.to_string()).collect();
        writeln!(
            out,
            "{pos:4}  rp={during:<3} live=[{}]  {label}",
            regs.join(" ")
        )?;
    }

    writeln!(out, "peak RP: {peak}")
}
