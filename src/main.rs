use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use levitation_build::driver::{Driver, DriverConfig, SubprocessToolchain};

/// Drive the preamble -> parse -> solve -> decl/object -> link pipeline
/// for a Levitation project.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_flag = true)]
struct Cli {
    /// Project root
    #[arg(short = 'r', long = "root")]
    root: Option<PathBuf>,

    /// Derived artifact root
    #[arg(long = "buildRoot")]
    build_root: Option<PathBuf>,

    /// Main source file, relative to `--root` unless absolute
    #[arg(short = 'm', long = "main", default_value = "main.cpp")]
    main: PathBuf,

    /// Precompiled-preamble source; enables the preamble phase
    #[arg(long = "preamble")]
    preamble: Option<PathBuf>,

    /// Emit a synthesized header to this path
    #[arg(short = 'h')]
    header: Option<PathBuf>,

    /// Print help
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: Option<bool>,

    /// Worker pool size
    #[arg(short = 'j', default_value_t = 1)]
    jobs: usize,

    /// Output executable (link mode) or directory (with `-c`)
    #[arg(short = 'o')]
    output: Option<PathBuf>,

    /// Disable the link phase
    #[arg(short = 'c')]
    no_link: bool,

    /// Enable verbose (debug-level) logs
    #[arg(long)]
    verbose: bool,

    /// Dry run: log the commands each phase would execute, take no action
    #[arg(name = "###", long = "dry-run")]
    dry_run: bool,

    /// Extra args for the preamble phase
    #[arg(long = "FH")]
    extra_preamble: Option<String>,

    /// Extra args for the parse phase
    #[arg(long = "FP")]
    extra_parse: Option<String>,

    /// Extra args for the codegen phase
    #[arg(long = "FC")]
    extra_codegen: Option<String>,

    /// Extra args for the link phase
    #[arg(long = "FL")]
    extra_link: Option<String>,

    /// Path to the C++ front-end binary this core shells out to
    #[arg(long, default_value = "clang-levitation")]
    frontend: PathBuf,

    /// Path to the linker binary this core shells out to
    #[arg(long, default_value = "clang-levitation-link")]
    linker: PathBuf,
}

fn split_extra_args(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect()).unwrap_or_default()
}

struct ProcessedCli {
    driver_config: DriverConfig,
    frontend: PathBuf,
    linker: PathBuf,
}

impl ProcessedCli {
    fn from(cli: &Cli) -> Result<Self> {
        let root = cli
            .root
            .clone()
            .map(Ok)
            .unwrap_or_else(std::env::current_dir)
            .context("resolving project root")?;
        let build_root = cli.build_root.clone().unwrap_or_else(|| root.join(".build"));
        let main_source = if cli.main.is_absolute() { cli.main.clone() } else { root.join(&cli.main) };
        let output = cli.output.clone().unwrap_or_else(|| root.join("a.out"));
        let num_workers = if cli.jobs == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            cli.jobs
        };

        Ok(Self {
            driver_config: DriverConfig {
                project_root: root,
                build_root,
                main_source,
                preamble_source: cli.preamble.clone(),
                header_out: cli.header.clone(),
                num_workers,
                link: !cli.no_link,
                output,
                dry_run: cli.dry_run,
                extra_preamble_args: split_extra_args(cli.extra_preamble.as_deref()),
                extra_parse_args: split_extra_args(cli.extra_parse.as_deref()),
                extra_codegen_args: split_extra_args(cli.extra_codegen.as_deref()),
                extra_link_args: split_extra_args(cli.extra_link.as_deref()),
            },
            frontend: cli.frontend.clone(),
            linker: cli.linker.clone(),
        })
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::new().filter_level(filter).format_timestamp(None).init();

    let processed = match ProcessedCli::from(&cli) {
        Ok(p) => p,
        Err(e) => {
            log::error!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    let toolchain = Arc::new(SubprocessToolchain { frontend: processed.frontend, linker: processed.linker });
    let driver = Driver::new(processed.driver_config, toolchain);

    if let Err(e) = driver.run() {
        log::error!("{e}");
        std::process::exit(e.exit_code());
    }
}
