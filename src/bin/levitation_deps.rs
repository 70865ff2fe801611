//! Standalone dependency-solver sub-tool: parses `.ldeps` manifests
//! already on disk, builds the graph, solves it, and dumps each unit's
//! transitive dependency chain. Does not invoke the C++ front end or
//! linker -- it assumes a prior parse phase already produced manifests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use levitation_build::fsutil;
use levitation_build::graph::{DependencyGraph, NodeKind};
use levitation_build::parsed_deps::ParsedDependencies;
use levitation_build::solver::{self, render_chain};
use levitation_build::string_pool::StringPool;
use levitation_build::unit::UnitId;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Project source root
    #[arg(long = "src-root")]
    src_root: PathBuf,

    /// Build root containing already-produced `.ldeps` manifests
    #[arg(long = "build-root")]
    build_root: PathBuf,

    /// Main source file, relative to `--src-root` unless absolute
    #[arg(long = "main-file", default_value = "main.cpp")]
    main_file: PathBuf,

    /// Enable verbose (debug-level) logs
    #[arg(long)]
    verbose: bool,
}

fn load_parsed_dependencies(src_root: &std::path::Path, build_root: &std::path::Path) -> Result<(ParsedDependencies, StringPool)> {
    let sources = fsutil::collect_files(src_root, "cppl").context("enumerating source units")?;
    let mut parsed = ParsedDependencies::new();

    for source in &sources {
        let rel = fsutil::make_relative(source, src_root);
        let unit_id = UnitId::from_relative_path(&rel);
        let ldeps_path = build_root.join(unit_id.to_relative_path("ldeps"));
        let bytes = std::fs::read(&ldeps_path)
            .with_context(|| format!("reading manifest {}", ldeps_path.display()))?;
        let (manifest, local_pool) = levitation_build::codec::read_dependency_manifest(&bytes)
            .with_context(|| format!("decoding manifest {}", ldeps_path.display()))?;
        parsed.insert(unit_id, manifest, &local_pool);
    }

    let pool = parsed.pool().clone();
    Ok((parsed, pool))
}

fn run(cli: &Cli) -> Result<()> {
    let (parsed, pool) = load_parsed_dependencies(&cli.src_root, &cli.build_root)?;

    let main_rel = fsutil::make_relative(&cli.main_file, &cli.src_root);
    let main_unit_id = UnitId::from_relative_path(&main_rel);
    let main_path_id = pool
        .find(&main_unit_id.path_key())
        .with_context(|| format!("main unit {} not found among parsed manifests", main_unit_id.render()))?;

    let graph = DependencyGraph::build(&parsed, main_path_id).context("building dependency graph")?;
    let solved = solver::solve(&graph, &pool).context("solving dependency graph")?;

    for unit in parsed.units() {
        let node = levitation_build::graph::NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Declaration);
        println!("{}: {}", unit.unit_id.render(), render_chain(&solved, node, &pool));
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let filter = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new().filter_level(filter).format_timestamp(None).init();

    if let Err(e) = run(&cli) {
        log::error!("{e:#}");
        std::process::exit(2);
    }
}
