//! The phase orchestrator: preamble → parse → solve → declarations and
//! objects → link, plus optional header synthesis (spec §4.7).
//!
//! The actual C++ front end and linker are out of scope for this core;
//! they're reached through the [`Toolchain`] trait so tests can supply
//! fakes instead of spawning real processes (spec §8b).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::BuildError;
use crate::fsutil;
use crate::graph::{DependencyGraph, NodeId, NodeKind};
use crate::header;
use crate::parsed_deps::ParsedDependencies;
use crate::solver::{self, SolvedInfo};
use crate::string_pool::StringPool;
use crate::tasks::TaskManager;
use crate::unit::UnitId;

/// The out-of-scope collaborators this core shells out to: the C++
/// front end (parse/decl/object/preamble modes) and the linker.
pub trait Toolchain: Send + Sync {
    fn build_preamble(&self, main_source: &Path, extra_args: &[String]) -> Result<(), BuildError>;

    /// Parse mode: emits `ast_out` and `ldeps_out`.
    fn build_ast(
        &self,
        unit_source: &Path,
        ast_out: &Path,
        ldeps_out: &Path,
        extra_args: &[String],
    ) -> Result<(), BuildError>;

    /// Import-only mode for the main unit: emits only `ldeps_out`.
    fn import_only(&self, unit_source: &Path, ldeps_out: &Path, extra_args: &[String]) -> Result<(), BuildError>;

    fn build_decl_ast(
        &self,
        unit_source: &Path,
        decl_ast_out: &Path,
        decl_deps: &[PathBuf],
        extra_args: &[String],
    ) -> Result<(), BuildError>;

    fn build_object(
        &self,
        unit_source: &Path,
        object_out: &Path,
        decl_ast_out: &Path,
        deps: &[PathBuf],
        extra_args: &[String],
    ) -> Result<(), BuildError>;

    fn link(&self, objects: &[PathBuf], output: &Path, extra_args: &[String]) -> Result<(), BuildError>;
}

/// Shells out to the real front end/linker binaries via [`subprocess`].
pub struct SubprocessToolchain {
    pub frontend: PathBuf,
    pub linker: PathBuf,
}

impl SubprocessToolchain {
    fn run(&self, tool: &str, program: &Path, args: Vec<String>) -> Result<(), BuildError> {
        let status = subprocess::Exec::cmd(program)
            .args(&args)
            .stdout(subprocess::Redirection::Merge)
            .capture()
            .map_err(|e| BuildError::Subprocess { tool: tool.to_string(), status: e.to_string() })?;

        if !status.success() {
            return Err(BuildError::Subprocess { tool: tool.to_string(), status: format!("{:?}", status.exit_status) });
        }
        Ok(())
    }
}

impl Toolchain for SubprocessToolchain {
    fn build_preamble(&self, main_source: &Path, extra_args: &[String]) -> Result<(), BuildError> {
        let mut args = vec!["-build-preamble".to_string(), main_source.display().to_string()];
        args.extend(extra_args.iter().cloned());
        self.run("frontend(preamble)", &self.frontend, args)
    }

    fn build_ast(
        &self,
        unit_source: &Path,
        ast_out: &Path,
        ldeps_out: &Path,
        extra_args: &[String],
    ) -> Result<(), BuildError> {
        let mut args = vec![
            "-build-ast".to_string(),
            unit_source.display().to_string(),
            "-o".to_string(),
            ast_out.display().to_string(),
            "-ldeps-out".to_string(),
            ldeps_out.display().to_string(),
        ];
        args.extend(extra_args.iter().cloned());
        self.run("frontend(parse)", &self.frontend, args)
    }

    fn import_only(&self, unit_source: &Path, ldeps_out: &Path, extra_args: &[String]) -> Result<(), BuildError> {
        let mut args = vec![
            "-import-only".to_string(),
            unit_source.display().to_string(),
            "-ldeps-out".to_string(),
            ldeps_out.display().to_string(),
        ];
        args.extend(extra_args.iter().cloned());
        self.run("frontend(parse)", &self.frontend, args)
    }

    fn build_decl_ast(
        &self,
        unit_source: &Path,
        decl_ast_out: &Path,
        decl_deps: &[PathBuf],
        extra_args: &[String],
    ) -> Result<(), BuildError> {
        let mut args = vec![
            "-build-decl-ast".to_string(),
            unit_source.display().to_string(),
            "-o".to_string(),
            decl_ast_out.display().to_string(),
        ];
        for dep in decl_deps {
            args.push("-decl-dep".to_string());
            args.push(dep.display().to_string());
        }
        args.extend(extra_args.iter().cloned());
        self.run("frontend(codegen)", &self.frontend, args)
    }

    fn build_object(
        &self,
        unit_source: &Path,
        object_out: &Path,
        decl_ast_out: &Path,
        deps: &[PathBuf],
        extra_args: &[String],
    ) -> Result<(), BuildError> {
        let mut args = vec![
            "-build-object".to_string(),
            unit_source.display().to_string(),
            "-decl-ast".to_string(),
            decl_ast_out.display().to_string(),
            "-o".to_string(),
            object_out.display().to_string(),
        ];
        for dep in deps {
            args.push("-dep".to_string());
            args.push(dep.display().to_string());
        }
        args.extend(extra_args.iter().cloned());
        self.run("frontend(codegen)", &self.frontend, args)
    }

    fn link(&self, objects: &[PathBuf], output: &Path, extra_args: &[String]) -> Result<(), BuildError> {
        let mut args: Vec<String> = objects.iter().map(|p| p.display().to_string()).collect();
        args.push("-o".to_string());
        args.push(output.display().to_string());
        args.extend(extra_args.iter().cloned());
        self.run("linker", &self.linker, args)
    }
}

/// Fully-resolved driver configuration (the `ProcessedCli` side of the
/// two-stage config split, see §7d).
pub struct DriverConfig {
    pub project_root: PathBuf,
    pub build_root: PathBuf,
    pub main_source: PathBuf,
    pub preamble_source: Option<PathBuf>,
    pub header_out: Option<PathBuf>,
    pub num_workers: usize,
    pub link: bool,
    pub output: PathBuf,
    pub dry_run: bool,
    pub extra_preamble_args: Vec<String>,
    pub extra_parse_args: Vec<String>,
    pub extra_codegen_args: Vec<String>,
    pub extra_link_args: Vec<String>,
}

pub struct Driver {
    config: DriverConfig,
    toolchain: Arc<dyn Toolchain>,
}

impl Driver {
    pub fn new(config: DriverConfig, toolchain: Arc<dyn Toolchain>) -> Self {
        Self { config, toolchain }
    }

    pub fn run(&self) -> Result<(), BuildError> {
        if let Some(preamble) = &self.config.preamble_source {
            self.run_preamble(preamble)?;
        }

        let sources = fsutil::collect_files(&self.config.project_root, "cppl")?;
        log::info!("found {} source unit(s)", sources.len());

        let (parsed, pool) = self.run_parse_phase(&sources)?;

        if self.config.dry_run {
            log::info!("(dry run) stopping after parse phase; solve/codegen/link are not simulated");
            return Ok(());
        }

        let main_rel = fsutil::make_relative(&self.config.main_source, &self.config.project_root);
        let main_unit_id = UnitId::from_relative_path(&main_rel);
        let main_path_id = pool
            .find(&main_unit_id.path_key())
            .ok_or_else(|| BuildError::Internal("main unit missing from parsed dependencies".to_string()))?;

        let graph = DependencyGraph::build(&parsed, main_path_id)?;
        let solved = solver::solve(&graph, &pool)?;

        let objects = self.run_decl_object_phase(&graph, &solved, &parsed, main_path_id)?;

        if self.config.link {
            self.run_link_phase(&objects)?;
        } else {
            self.run_place_objects_phase(&objects)?;
        }

        if let Some(header_out) = self.config.header_out.clone() {
            self.run_header_phase(&header_out)?;
        }

        Ok(())
    }

    fn run_preamble(&self, preamble: &Path) -> Result<(), BuildError> {
        log::info!("preamble phase: {}", preamble.display());
        if self.config.dry_run {
            log::info!("(dry run) would build preamble from {}", preamble.display());
            return Ok(());
        }
        self.toolchain.build_preamble(preamble, &self.config.extra_preamble_args)
    }

    fn run_parse_phase(&self, sources: &[PathBuf]) -> Result<(ParsedDependencies, StringPool), BuildError> {
        log::info!("parse phase: {} unit(s)", sources.len());
        let progress = if log::log_enabled!(log::Level::Debug) {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(sources.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };

        let manager = TaskManager::new(self.config.num_workers.max(1));
        let mut ids = Vec::new();

        for source in sources {
            let rel = fsutil::make_relative(source, &self.config.project_root);
            let unit_id = UnitId::from_relative_path(&rel);
            let ast_out = self.config.build_root.join(unit_id.to_relative_path("ast"));
            let ldeps_out = self.config.build_root.join(unit_id.to_relative_path("ldeps"));
            let is_main = source == &self.config.main_source;
            let toolchain = Arc::clone(&self.toolchain);
            let extra_args = self.config.extra_parse_args.clone();
            let source = source.clone();
            let dry_run = self.config.dry_run;
            let progress = progress.clone();

            ids.push(manager.add_task(move || {
                let result = if dry_run {
                    log::info!("(dry run) would parse {}", source.display());
                    Ok(())
                } else if is_main {
                    toolchain.import_only(&source, &ldeps_out, &extra_args)
                } else {
                    toolchain.build_ast(&source, &ast_out, &ldeps_out, &extra_args)
                };
                progress.inc(1);
                if let Err(e) = &result {
                    log::error!("parse failed for {}: {e}", source.display());
                }
                result.is_ok()
            }));
        }

        let ok = manager.wait_for_tasks(&ids);
        progress.finish_and_clear();
        if !ok {
            return Err(BuildError::Internal("one or more parse tasks failed".to_string()));
        }

        if self.config.dry_run {
            return Ok((ParsedDependencies::new(), StringPool::new()));
        }

        let mut parsed = ParsedDependencies::new();
        for source in sources {
            let rel = fsutil::make_relative(source, &self.config.project_root);
            let unit_id = UnitId::from_relative_path(&rel);
            let ldeps_path = self.config.build_root.join(unit_id.to_relative_path("ldeps"));
            let bytes = std::fs::read(&ldeps_path).map_err(|e| BuildError::Io { path: ldeps_path.clone(), source: e })?;
            let (manifest, local_pool) = crate::codec::read_dependency_manifest(&bytes)
                .map_err(|e| BuildError::Codec { path: ldeps_path.clone(), source: e })?;
            parsed.insert(unit_id, manifest, &local_pool);
        }

        let pool = parsed.pool().clone();
        Ok((parsed, pool))
    }

    fn run_decl_object_phase(
        &self,
        graph: &DependencyGraph,
        solved: &SolvedInfo,
        parsed: &ParsedDependencies,
        main_path_id: crate::string_pool::StringId,
    ) -> Result<Vec<PathBuf>, BuildError> {
        log::info!("declaration + object phase");
        if self.config.dry_run {
            return Ok(Vec::new());
        }

        // Held as an `Arc` so each task's body can itself call
        // `wait_for_tasks` on its own dependency handles without
        // conflicting with the `&self` borrow used to submit it.
        let manager = Arc::new(TaskManager::new(self.config.num_workers.max(1)));

        let decl_path = |node: NodeId| -> Option<PathBuf> {
            let raw = node.path_id_raw()?;
            let id = crate::string_pool::StringId::from_raw(raw)?;
            let unit = parsed.get(id)?;
            Some(self.config.build_root.join(unit.unit_id.to_relative_path("decl-ast")))
        };
        let object_path = |node: NodeId| -> Option<PathBuf> {
            let raw = node.path_id_raw()?;
            let id = crate::string_pool::StringId::from_raw(raw)?;
            let unit = parsed.get(id)?;
            Some(self.config.build_root.join(unit.unit_id.to_relative_path("o")))
        };

        let declaration_nodes: Vec<NodeId> =
            graph.nodes().filter(|n| n.kind() == NodeKind::Declaration).collect();

        let decl_handles = graph.expand_jobs(declaration_nodes, |node, dep_handles: &[crate::tasks::TaskId]| {
            let dep_handles = dep_handles.to_vec();
            let mgr = Arc::clone(&manager);
            let toolchain = Arc::clone(&self.toolchain);
            let extra_args = self.config.extra_codegen_args.clone();
            let dep_paths: Vec<PathBuf> =
                solved.dependencies_of(node).iter().filter_map(|(d, _)| decl_path(*d)).collect();

            match (decl_path(node), node.path_id_raw().and_then(crate::string_pool::StringId::from_raw)) {
                (Some(out), Some(id)) => {
                    let unit = parsed.get(id).unwrap();
                    let source = self.config.project_root.join(unit.unit_id.to_relative_path("cppl"));
                    mgr.add_task(move || {
                        if !mgr.wait_for_tasks(&dep_handles) {
                            return false;
                        }
                        toolchain.build_decl_ast(&source, &out, &dep_paths, &extra_args).is_ok()
                    })
                }
                _ => mgr.add_task(|| true),
            }
        });

        let mut objects = Vec::new();
        let mut object_handles = Vec::new();

        for unit in parsed.units() {
            if unit.manifest.package_file_path_id == main_path_id {
                continue;
            }
            let decl_node = NodeId::for_unit(unit.manifest.package_file_path_id, NodeKind::Declaration);
            let Some(&own_decl_task) = decl_handles.get(&decl_node) else { continue };

            let mut dep_tasks = vec![own_decl_task];
            let mut dep_paths = Vec::new();
            for &dep in unit.manifest.declaration_dependencies.iter().chain(&unit.manifest.definition_dependencies) {
                let dep_node = NodeId::for_unit(dep, NodeKind::Declaration);
                if let Some(&t) = decl_handles.get(&dep_node) {
                    dep_tasks.push(t);
                }
                if let Some(p) = decl_path(dep_node) {
                    dep_paths.push(p);
                }
            }

            let out = object_path(decl_node).unwrap();
            let decl_ast = decl_path(decl_node).unwrap();
            let source = self.config.project_root.join(unit.unit_id.to_relative_path("cppl"));
            let toolchain = Arc::clone(&self.toolchain);
            let mgr = Arc::clone(&manager);
            let extra_args = self.config.extra_codegen_args.clone();

            objects.push(out.clone());
            object_handles.push(mgr.add_task(move || {
                if !mgr.wait_for_tasks(&dep_tasks) {
                    return false;
                }
                toolchain.build_object(&source, &out, &decl_ast, &dep_paths, &extra_args).is_ok()
            }));
        }

        // Schedule the main object alongside every other unit's.
        let main_unit = parsed.get(main_path_id);
        if let Some(main_unit) = main_unit {
            let main_object = self.config.build_root.join(main_unit.unit_id.to_relative_path("o"));
            let source = self.config.project_root.join(main_unit.unit_id.to_relative_path("cppl"));
            let toolchain = Arc::clone(&self.toolchain);
            let mgr = Arc::clone(&manager);
            let extra_args = self.config.extra_codegen_args.clone();
            let decl_ast = main_unit.manifest.package_file_path_id;
            let decl_node = NodeId::for_unit(decl_ast, NodeKind::Declaration);
            let decl_ast_path = decl_path(decl_node).unwrap_or_else(|| main_object.with_extension("decl-ast"));
            let dep_tasks: Vec<_> = decl_handles.values().copied().collect();

            objects.push(main_object.clone());
            object_handles.push(mgr.add_task(move || {
                if !mgr.wait_for_tasks(&dep_tasks) {
                    return false;
                }
                toolchain.build_object(&source, &main_object, &decl_ast_path, &[], &extra_args).is_ok()
            }));
        }

        if !manager.wait_for_tasks(&object_handles) {
            return Err(BuildError::Internal("one or more declaration/object tasks failed".to_string()));
        }

        Ok(objects)
    }

    /// With linking disabled (`-c`), `self.config.output` names a
    /// directory rather than an executable (spec §6): place each built
    /// object into it instead of feeding the linker.
    fn run_place_objects_phase(&self, objects: &[PathBuf]) -> Result<(), BuildError> {
        log::info!("place phase: {} object(s) into {}", objects.len(), self.config.output.display());
        if self.config.dry_run {
            log::info!("(dry run) would place {} object(s) into {}", objects.len(), self.config.output.display());
            return Ok(());
        }

        fs::create_dir_all(&self.config.output)
            .map_err(|e| BuildError::Io { path: self.config.output.clone(), source: e })?;

        for object in objects {
            let Some(name) = object.file_name() else { continue };
            let dest = self.config.output.join(name);
            fs::copy(object, &dest).map_err(|e| BuildError::Io { path: dest, source: e })?;
        }

        Ok(())
    }

    fn run_link_phase(&self, objects: &[PathBuf]) -> Result<(), BuildError> {
        log::info!("link phase: {} object(s)", objects.len());
        if self.config.dry_run {
            log::info!("(dry run) would link {} object(s) into {}", objects.len(), self.config.output.display());
            return Ok(());
        }
        self.toolchain.link(objects, &self.config.output, &self.config.extra_link_args)
    }

    fn run_header_phase(&self, header_out: &Path) -> Result<(), BuildError> {
        log::info!("header phase: {}", header_out.display());
        if self.config.dry_run {
            log::info!("(dry run) would synthesize header {}", header_out.display());
            return Ok(());
        }

        let source = std::fs::read_to_string(&self.config.main_source)
            .map_err(|e| BuildError::Io { path: self.config.main_source.clone(), source: e })?;
        let meta_path = self.config.build_root.join("main.lmet");
        let fragments = if meta_path.exists() {
            let bytes =
                std::fs::read(&meta_path).map_err(|e| BuildError::Io { path: meta_path.clone(), source: e })?;
            crate::codec::read_decl_ast_meta(&bytes)
                .map_err(|e| BuildError::Codec { path: meta_path.clone(), source: e })?
                .fragments_to_skip
        } else {
            Vec::new()
        };

        let preamble_include = self.config.preamble_source.as_ref().map(|_| "preamble.h".to_string());
        header::synthesize(header_out, preamble_include.as_deref(), &[], &source, &fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeToolchain {
        calls: Mutex<Vec<String>>,
    }

    impl FakeToolchain {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    impl Toolchain for FakeToolchain {
        fn build_preamble(&self, _: &Path, _: &[String]) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push("preamble".to_string());
            Ok(())
        }
        fn build_ast(&self, source: &Path, ast_out: &Path, ldeps_out: &Path, _: &[String]) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push(format!("ast:{}", source.display()));
            std::fs::write(ast_out, b"").ok();
            std::fs::create_dir_all(ldeps_out.parent().unwrap()).ok();
            std::fs::write(ldeps_out, b"").ok();
            Ok(())
        }
        fn import_only(&self, source: &Path, ldeps_out: &Path, _: &[String]) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push(format!("import:{}", source.display()));
            std::fs::create_dir_all(ldeps_out.parent().unwrap()).ok();
            std::fs::write(ldeps_out, b"").ok();
            Ok(())
        }
        fn build_decl_ast(&self, source: &Path, _: &Path, _: &[PathBuf], _: &[String]) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push(format!("decl:{}", source.display()));
            Ok(())
        }
        fn build_object(
            &self,
            source: &Path,
            object_out: &Path,
            _: &Path,
            _: &[PathBuf],
            _: &[String],
        ) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push(format!("obj:{}", source.display()));
            std::fs::create_dir_all(object_out.parent().unwrap()).ok();
            std::fs::write(object_out, b"").ok();
            Ok(())
        }
        fn link(&self, _: &[PathBuf], _: &Path, _: &[String]) -> Result<(), BuildError> {
            self.calls.lock().unwrap().push("link".to_string());
            Ok(())
        }
    }

    #[test]
    fn dry_run_performs_no_subprocess_calls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.cppl"), b"int main() {}\n").unwrap();

        let toolchain = Arc::new(FakeToolchain::new());
        let config = DriverConfig {
            project_root: dir.path().to_path_buf(),
            build_root: dir.path().join(".build"),
            main_source: dir.path().join("main.cppl"),
            preamble_source: None,
            header_out: None,
            num_workers: 1,
            link: true,
            output: dir.path().join("out"),
            dry_run: true,
            extra_preamble_args: vec![],
            extra_parse_args: vec![],
            extra_codegen_args: vec![],
            extra_link_args: vec![],
        };
        let driver = Driver::new(config, toolchain.clone());
        driver.run().unwrap();
        assert!(toolchain.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn compile_only_build_places_objects_into_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.cppl"), b"int main() {}\n").unwrap();

        let toolchain = Arc::new(FakeToolchain::new());
        let output_dir = dir.path().join("objs");
        let config = DriverConfig {
            project_root: dir.path().to_path_buf(),
            build_root: dir.path().join(".build"),
            main_source: dir.path().join("main.cppl"),
            preamble_source: None,
            header_out: None,
            num_workers: 1,
            link: false,
            output: output_dir.clone(),
            dry_run: false,
            extra_preamble_args: vec![],
            extra_parse_args: vec![],
            extra_codegen_args: vec![],
            extra_link_args: vec![],
        };
        let driver = Driver::new(config, toolchain.clone());
        driver.run().unwrap();

        assert!(!toolchain.calls.lock().unwrap().iter().any(|c| c == "link"));
        let placed: Vec<_> = std::fs::read_dir(&output_dir).unwrap().collect();
        assert_eq!(placed.len(), 1); // just the main unit's object
    }
}
