//! Command-line driver: read a dependence graph, schedule it for minimal
//! register pressure, write the result.
//!
//! ```text
//! driver -<in-fmt> <in-path> -<out-fmt> <out-path>
//! ```

use rpsched::ddl::{build_dag_from_ddl, load_ddl_file, DdlError};
use rpsched::dot::{dump_dot_file, DotOption};
use rpsched::lsd::{dump_lsd_file, load_lsd_file, LsdError};
use rpsched::sched::{ExactScheduler, ListScheduler};
use rpsched::transform::{BasicStatus, Transformation, TransformationStatus};
use rpsched::{ScheduleChain, ScheduleDag, ScheduleError, Units};
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitCode};
use std::time::Duration;

mod analysis;

/// Budget for the exact scheduler before the list scheduler takes over
const EXACT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(thiserror::Error, Debug)]
enum DriverError {
    #[error(transparent)]
    Ddl(#[from] DdlError),
    #[error(transparent)]
    Lsd(#[from] LsdError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("schedule chain does not match the input graph")]
    BadSchedule,
    #[error("'dot' failed rendering {0}")]
    DotRender(String),
}

type ReadFn = fn(&Path, &mut Units, &mut ScheduleDag) -> Result<(), DriverError>;
type WriteFn = fn(&Units, &ScheduleDag, &Path) -> Result<(), DriverError>;
type ChainWriteFn =
    fn(&Units, &ScheduleDag, &ScheduleChain, &Path) -> Result<(), DriverError>;

struct Format {
    name: &'static str,
    desc: &'static str,
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    chain_write: Option<ChainWriteFn>,
}

fn ddl_read(path: &Path, units: &mut Units, dag: &mut ScheduleDag) -> Result<(), DriverError> {
    let program = load_ddl_file(path, units)?;
    build_dag_from_ddl(&program, units, dag)?;
    Ok(())
}

fn lsd_read(path: &Path, units: &mut Units, dag: &mut ScheduleDag) -> Result<(), DriverError> {
    load_lsd_file(path, units, dag)?;
    Ok(())
}

fn lsd_write(units: &Units, dag: &ScheduleDag, path: &Path) -> Result<(), DriverError> {
    dump_lsd_file(units, dag, path)?;
    Ok(())
}

fn dot_opts() -> Vec<DotOption> {
    vec![DotOption::HideDepLabels {
        hide_virt: false,
        hide_phys: false,
        hide_order: true,
    }]
}

fn dot_write(units: &Units, dag: &ScheduleDag, path: &Path) -> Result<(), DriverError> {
    dump_dot_file(units, dag, path, &dot_opts())?;
    Ok(())
}

fn dot_render(
    units: &Units,
    dag: &ScheduleDag,
    path: &Path,
    format: &str,
) -> Result<(), DriverError> {
    let tmp = std::env::temp_dir().join(format!("rpsched-{}.dot", std::process::id()));
    dump_dot_file(units, dag, &tmp, &dot_opts())?;
    let status = Command::new("dot")
        .arg(format!("-T{format}"))
        .arg("-o")
        .arg(path)
        .arg(&tmp)
        .status();
    let _ = std::fs::remove_file(&tmp);
    match status {
        Ok(s) if s.success() => Ok(()),
        _ => Err(DriverError::DotRender(path.display().to_string())),
    }
}

fn dotsvg_write(units: &Units, dag: &ScheduleDag, path: &Path) -> Result<(), DriverError> {
    dot_render(units, dag, path, "svg")
}

fn dotpdf_write(units: &Units, dag: &ScheduleDag, path: &Path) -> Result<(), DriverError> {
    dot_render(units, dag, path, "pdf")
}

fn null_write(_units: &Units, _dag: &ScheduleDag, _path: &Path) -> Result<(), DriverError> {
    Ok(())
}

fn analysis_write(
    units: &Units,
    dag: &ScheduleDag,
    chain: &ScheduleChain,
    path: &Path,
) -> Result<(), DriverError> {
    let mut file = std::fs::File::create(path)?;
    analysis::write_chain_analysis(units, dag, chain, &mut file)?;
    Ok(())
}

const FORMATS: &[Format] = &[
    Format {
        name: "ddl",
        desc: "Data Dependency Language file",
        read: Some(ddl_read),
        write: None,
        chain_write: None,
    },
    Format {
        name: "lsd",
        desc: "LLVM Schedule DAG file",
        read: Some(lsd_read),
        write: Some(lsd_write),
        chain_write: None,
    },
    Format {
        name: "dot",
        desc: "Graphviz file",
        read: None,
        write: Some(dot_write),
        chain_write: None,
    },
    Format {
        name: "dotsvg",
        desc: "Graphviz file rendered to SVG",
        read: None,
        write: Some(dotsvg_write),
        chain_write: None,
    },
    Format {
        name: "dotpdf",
        desc: "Graphviz file rendered to PDF",
        read: None,
        write: Some(dotpdf_write),
        chain_write: None,
    },
    Format {
        name: "null",
        desc: "Drop output to the void",
        read: None,
        write: Some(null_write),
        chain_write: None,
    },
    Format {
        name: "analysis",
        desc: "Live analysis of the resulting schedule",
        read: None,
        write: None,
        chain_write: Some(analysis_write),
    },
];

/// Captures a snapshot of the DAG as it passes through the pipeline, so the
/// final chain can be validated and measured against the renamed graph
#[derive(Default)]
struct DagAccumulator {
    snapshot: RefCell<ScheduleDag>,
}

impl Transformation for DagAccumulator {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn rpsched::Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        status.begin();
        status.set_modified(false);
        status.set_junction(false);
        status.set_deadlock(false);

        let mut snapshot = self.snapshot.borrow_mut();
        snapshot.add_units(dag.units());
        snapshot.add_deps(dag.deps().iter().copied());
        drop(snapshot);

        inner.schedule(units, dag, chain)?;
        status.end();
        Ok(())
    }
}

fn display_usage() {
    println!("usage: driver <fmt> <input> <fmt> <output>");
    println!("Formats:");
    let width = FORMATS.iter().map(|f| f.name.len()).max().unwrap_or(0);
    for format in FORMATS {
        println!(" -{:width$}\t{}", format.name, format.desc);
    }
}

fn find_format(arg: &str) -> Option<&'static Format> {
    let name = arg.strip_prefix('-')?;
    FORMATS.iter().find(|f| f.name == name)
}

fn run(args: &[String]) -> Result<ExitCode, DriverError> {
    if args.len() < 4 {
        display_usage();
        return Ok(ExitCode::FAILURE);
    }

    let Some(from) = find_format(&args[0]) else {
        println!("Unknown input format '{}'", args[0]);
        return Ok(ExitCode::FAILURE);
    };
    let Some(read) = from.read else {
        println!("Format '{}' cannot be used as input", from.name);
        return Ok(ExitCode::FAILURE);
    };
    let Some(to) = find_format(&args[2]) else {
        println!("Unknown output format '{}'", args[2]);
        return Ok(ExitCode::FAILURE);
    };
    if to.write.is_none() && to.chain_write.is_none() {
        println!("Format '{}' cannot be used as output", to.name);
        return Ok(ExitCode::FAILURE);
    }

    let mut units = Units::new();
    let mut dag = ScheduleDag::new();
    read(Path::new(&args[1]), &mut units, &mut dag)?;
    dag.check_consistency()?;

    println!("#nodes: {}", dag.unit_count());
    println!("#deps: {}", dag.deps().len());

    // register renaming first, then the reduction loop; the accumulator in
    // between snapshots the graph every later stage is measured against
    let mut pipeline = rpsched::Pipeline::new();
    pipeline.add_stage(Box::new(rpsched::transform::UniqueRegIds));
    let accumulator = std::rc::Rc::new(DagAccumulator::default());
    pipeline.add_stage(Box::new(SharedStage(accumulator.clone())));
    pipeline.add_stage(Box::new(rpsched::TransformationLoop::new(Box::new(
        rpsched::transform::reduction_loop_body(),
    ))));

    let scheduler = ExactScheduler::new(Box::new(ListScheduler::new()), Some(EXACT_TIMEOUT));
    let mut chain = ScheduleChain::new();
    let status = BasicStatus::new();
    pipeline.transform(&mut units, &mut dag, &scheduler, &mut chain, &status)?;

    let renamed = accumulator.snapshot.borrow();
    if !chain.check_against_dag(&renamed) {
        return Err(DriverError::BadSchedule);
    }
    println!("RP={}", chain.compute_rp_against_dag(&units, &renamed, true));

    let out_path = Path::new(&args[3]);
    if let Some(write) = to.write {
        write(&units, &renamed, out_path)?;
    }
    if let Some(chain_write) = to.chain_write {
        chain_write(&units, &renamed, &chain, out_path)?;
    }

    Ok(ExitCode::SUCCESS)
}

/// Adapter so one accumulator can live in the pipeline and be read after it
struct SharedStage(std::rc::Rc<DagAccumulator>);

impl Transformation for SharedStage {
    fn transform(
        &self,
        units: &mut Units,
        dag: &mut ScheduleDag,
        inner: &dyn rpsched::Scheduler,
        chain: &mut ScheduleChain,
        status: &dyn TransformationStatus,
    ) -> Result<(), ScheduleError> {
        self.0.transform(units, dag, inner, chain, status)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(code) => code,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}
