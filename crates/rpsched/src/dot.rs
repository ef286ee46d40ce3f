//! Rendering a schedule DAG to Graphviz.

use crate::graph::{Dep, DepKind, ScheduleDag};
use crate::unit::{UnitKey, Units};
use rpsched_core::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

/// Decorative options for [`write_dot`]
pub enum DotOption {
    /// Color one node
    ColorNode { unit: UnitKey, color: String },
    /// Color and/or restyle matching deps; with `match_all` unset only the
    /// first occurrence of the dep is decorated
    ColorDep {
        dep: Dep,
        color: Option<String>,
        style: Option<String>,
        match_all: bool,
    },
    /// Hide edge labels per dependency class
    HideDepLabels {
        hide_virt: bool,
        hide_phys: bool,
        hide_order: bool,
    },
}

fn escape_label(label: &str) -> String {
    let multiline = label.contains('\n');
    let mut out = String::with_capacity(label.len() + 8);
    if multiline {
        out.push('{');
    }
    for c in label.chars() {
        match c {
            '\n' => out.push_str(" | "),
            ' ' => out.push_str("\\ "),
            '<' => out.push_str("\\<"),
            '>' => out.push_str("\\>"),
            '[' => out.push_str("\\["),
            ']' => out.push_str("\\]"),
            '|' => out.push_str("\\|"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    if multiline {
        out.push('}');
    }
    out
}

fn shape_for(label: &str) -> &'static str {
    if label.contains('\n') { "Mrecord" } else { "box" }
}

/// Write `dag` as a Graphviz digraph: order deps dashed blue, physical deps
/// red with a diamond head, labels `rN`/`pN`/`order`
pub fn write_dot(
    units: &Units,
    dag: &ScheduleDag,
    out: &mut dyn Write,
    opts: &[DotOption],
) -> std::io::Result<()> {
    const TAB: &str = "    ";

    let mut hide_virt = false;
    let mut hide_phys = false;
    let mut hide_order = false;
    for opt in opts {
        if let DotOption::HideDepLabels {
            hide_virt: v,
            hide_phys: p,
            hide_order: o,
        } = opt
        {
            hide_virt = *v;
            hide_phys = *p;
            hide_order = *o;
        }
    }

    writeln!(out, "digraph G {{")?;

    let mut names: HashMap<UnitKey, String> = HashMap::default();
    for (i, unit) in dag.units().enumerate() {
        let name = format!("node{i}");
        let label = units.label(unit).replace("<-", "&larr;");

        writeln!(out, "{TAB}{name} [")?;
        writeln!(out, "{TAB}{TAB}label = \"{}\"", escape_label(&label))?;
        writeln!(out, "{TAB}{TAB}shape = {}", shape_for(&label))?;
        writeln!(out, "{TAB}{TAB}style = rounded")?;
        for opt in opts {
            if let DotOption::ColorNode { unit: u, color } = opt {
                if *u == unit {
                    writeln!(out, "{TAB}{TAB}color = \"{color}\"")?;
                }
            }
        }
        writeln!(out, "{TAB}];")?;
        names.insert(unit, name);
    }

    let mut already_matched: HashSet<Dep> = HashSet::default();
    for dep in dag.deps() {
        let label = match dep.kind {
            DepKind::Data if !hide_virt => Some(format!("{}", dep.reg)),
            DepKind::Phys if !hide_phys => Some(format!("p{}", dep.reg.0)),
            DepKind::Order if !hide_order => Some("order".to_string()),
            _ => None,
        };

        writeln!(out, "{TAB}{} -> {} [", names[&dep.from], names[&dep.to])?;
        if let Some(label) = label {
            writeln!(out, "{TAB}{TAB}label = \"{label}\"")?;
        }

        let mut has_color = false;
        let mut has_style = false;
        for opt in opts {
            let DotOption::ColorDep {
                dep: wanted,
                color,
                style,
                match_all,
            } = opt
            else {
                continue;
            };
            if wanted != dep {
                continue;
            }
            if !match_all && already_matched.contains(dep) {
                continue;
            }
            if !match_all {
                already_matched.insert(*dep);
            }
            if let Some(color) = color {
                writeln!(out, "{TAB}{TAB}color = \"{color}\"")?;
                has_color = true;
            }
            if let Some(style) = style {
                writeln!(out, "{TAB}{TAB}style = \"{style}\"")?;
                has_style = true;
            }
            break;
        }

        match dep.kind {
            DepKind::Order => {
                if !has_color {
                    writeln!(out, "{TAB}{TAB}color = blue")?;
                }
                if !has_style {
                    writeln!(out, "{TAB}{TAB}style = dashed")?;
                }
            }
            DepKind::Phys => {
                if !has_color {
                    writeln!(out, "{TAB}{TAB}color = red")?;
                }
                writeln!(out, "{TAB}{TAB}arrowhead = odiamond")?;
            }
            DepKind::Data => {}
        }
        writeln!(out, "{TAB}];")?;
    }

    writeln!(out, "}}")
}

pub fn dump_dot_file(
    units: &Units,
    dag: &ScheduleDag,
    path: &Path,
    opts: &[DotOption],
) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_dot(units, dag, &mut file, opts)
}
