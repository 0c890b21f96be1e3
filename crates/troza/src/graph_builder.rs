//! Module graph construction
//!
//! A breadth-first walk from the program entry (and any extra roots) that reads, parses and
//! scans each module once, resolving its imports to files on disk.

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};

use log::{debug, info, trace, warn};
use ruff_python_parser::parse_module;
use rustc_hash::FxHashSet;

use crate::{
    config::Config,
    error::{BuildError, BuildResult, UnresolvedImport},
    fs::{FileSystem, OsFileSystem},
    module_graph::{ModuleGraph, ModuleId},
    resolver::ModuleResolver,
    visitors::{DiscoveredImport, ImportDiscoveryVisitor},
};

/// Name given to the program entry module
pub const ENTRY_MODULE_NAME: &str = "__main__";

/// Build the dependency graph of `entry` using the real file system
pub fn build_graph(entry: &Path, config: &Config) -> BuildResult<ModuleGraph> {
    GraphBuilder::new(config, &OsFileSystem).build_graph(entry)
}

pub struct GraphBuilder<'a, F: FileSystem> {
    config: &'a Config,
    fs: &'a F,
    resolver: ModuleResolver,
}

impl<F: FileSystem> std::fmt::Debug for GraphBuilder<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Files an import refers to, in the order Python would execute them
struct ResolvedImport {
    targets: Vec<PathBuf>,
    resolved: bool,
}

impl<'a, F: FileSystem> GraphBuilder<'a, F> {
    pub fn new(config: &'a Config, fs: &'a F) -> Self {
        Self::with_resolver(config, fs, ModuleResolver::new(config))
    }

    pub fn with_resolver(config: &'a Config, fs: &'a F, resolver: ModuleResolver) -> Self {
        Self {
            config,
            fs,
            resolver,
        }
    }

    pub fn build_graph(&mut self, entry: &Path) -> BuildResult<ModuleGraph> {
        self.build_graph_with_roots(entry, &[])
    }

    /// Build the graph from `entry` plus `extra_roots`, modules that belong in the build even
    /// if nothing imports them statically
    pub fn build_graph_with_roots(
        &mut self,
        entry: &Path,
        extra_roots: &[PathBuf],
    ) -> BuildResult<ModuleGraph> {
        let entry_path = canonical_file(entry).ok_or_else(|| BuildError::EntryNotFound {
            path: entry.to_path_buf(),
        })?;
        self.resolver.set_entry_file(&entry_path);

        info!("Building module graph from {}", entry_path.display());

        let mut queue = VecDeque::from([entry_path.clone()]);
        let mut seen = FxHashSet::from_iter([entry_path.clone()]);
        for root in extra_roots {
            let root_path = canonical_file(root).ok_or_else(|| BuildError::EntryNotFound {
                path: root.clone(),
            })?;
            if seen.insert(root_path.clone()) {
                queue.push_back(root_path);
            }
        }

        let mut graph = ModuleGraph::new();
        let mut pending_edges: Vec<(ModuleId, PathBuf)> = Vec::new();
        let mut unresolved: Vec<UnresolvedImport> = Vec::new();

        while let Some(path) = queue.pop_front() {
            let source = self.fs.read_source(&path)?;
            let parsed = parse_module(&source).map_err(|err| BuildError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;

            let mut visitor = ImportDiscoveryVisitor::new(&source, &self.config.loader_function);
            visitor.visit_body(&parsed.syntax().body);
            let (imports, dynamic_loads) = visitor.finish();

            let mut targets = Vec::new();
            for import in &imports {
                let specifier = import.specifier();
                trace!("{}: import '{specifier}'", path.display());

                let resolved = self.resolve_discovered(import, &path);
                if !resolved.resolved {
                    if self.is_ignorable(import) {
                        debug!("Skipping external import '{specifier}'");
                    } else {
                        let reported = unresolved.iter().any(|missing| {
                            missing.module == path && missing.specifier == specifier
                        });
                        if !reported {
                            unresolved.push(UnresolvedImport {
                                module: path.clone(),
                                specifier,
                                line: import.line,
                            });
                        }
                    }
                }
                targets.extend(resolved.targets);
            }

            let name = if path == entry_path {
                ENTRY_MODULE_NAME.to_string()
            } else {
                self.module_name(&path)
            };
            debug!("Discovered module '{name}' at {}", path.display());

            for target in &targets {
                if seen.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
            }

            let id = graph.add_module(name, path, source, imports, dynamic_loads);
            pending_edges.extend(targets.into_iter().map(|target| (id, target)));
        }

        for (from, target) in pending_edges {
            if let Some(to) = graph.module_id_for_path(&target)
                && from != to
            {
                graph.add_dependency(from, to);
            }
        }

        if !unresolved.is_empty() {
            if !self.config.allow_unresolved {
                return Err(BuildError::UnresolvedImports(unresolved));
            }
            for missing in &unresolved {
                warn!("{missing}");
            }
        }

        info!(
            "Discovered {} modules with {} dependencies",
            graph.len(),
            graph.edges().len()
        );

        Ok(graph)
    }

    /// Resolve one import to the module files it executes
    fn resolve_discovered(&mut self, import: &DiscoveredImport, importing_file: &Path) -> ResolvedImport {
        let specifier = import.specifier();
        let mut targets = Vec::new();

        // `import a.b.c` also runs `a/__init__.py` and `a/b/__init__.py`
        if import.level == 0
            && let Some(module_name) = &import.module_name
        {
            let parts: Vec<&str> = module_name.split('.').collect();
            for end in 1..parts.len() {
                let parent = parts[..end].join(".");
                if let Some(path) = self.resolver.resolve_import(&parent, importing_file)
                    && path.is_file()
                {
                    targets.push(path);
                }
            }
        }

        let base = self.resolver.resolve_import(&specifier, importing_file);
        if let Some(path) = &base {
            debug!("Resolved '{specifier}' to {}", path.display());
            // Namespace package directories are not modules
            if path.is_file() {
                targets.push(path.clone());
            }
        }

        let mut any_submodule = false;
        for submodule in import.submodule_specifiers() {
            if let Some(path) = self.resolver.resolve_import(&submodule, importing_file)
                && path.is_file()
            {
                debug!("Resolved '{submodule}' to {}", path.display());
                targets.push(path);
                any_submodule = true;
            }
        }

        ResolvedImport {
            targets,
            resolved: base.is_some() || any_submodule,
        }
    }

    /// Unresolved imports that come from outside the project
    fn is_ignorable(&mut self, import: &DiscoveredImport) -> bool {
        if import.is_type_checking_only {
            return true;
        }
        if import.level > 0 {
            return false;
        }
        import
            .module_name
            .as_deref()
            .is_some_and(|name| self.resolver.classify_import(name).is_external())
    }

    fn module_name(&self, path: &Path) -> String {
        self.resolver.module_name_for_path(path).unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

fn canonical_file(path: &Path) -> Option<PathBuf> {
    path.canonicalize().ok().filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn build(root: &Path, config: &Config) -> BuildResult<ModuleGraph> {
        let resolver = ModuleResolver::new_with_overrides(config, Some(""), Some("/nonexistent"));
        GraphBuilder::with_resolver(config, &OsFileSystem, resolver).build_graph(&root.join("app.py"))
    }

    fn names(graph: &ModuleGraph) -> Vec<String> {
        graph.modules().map(|module| module.name.clone()).collect()
    }

    #[test]
    fn test_missing_entry() {
        let temp_dir = TempDir::new().unwrap();
        let err = build(temp_dir.path(), &Config::default()).unwrap_err();
        assert!(matches!(err, BuildError::EntryNotFound { .. }));
    }

    #[test]
    fn test_discovery_order_and_names() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "import os\nfrom models import user\nimport services.api\n");
        write(root, "models/__init__.py", "");
        write(root, "models/user.py", "from . import base\n");
        write(root, "models/base.py", "");
        write(root, "services/__init__.py", "");
        write(root, "services/api.py", "from models.user import User\n");

        let graph = build(root, &Config::default())?;
        assert_eq!(
            names(&graph),
            vec![
                "__main__",
                "models",
                "models.user",
                "services",
                "services.api",
                "models.base",
            ]
        );
        // services.api -> models, models.user
        let api = graph
            .module_id_for_path(&root.join("services/api.py").canonicalize().unwrap())
            .unwrap();
        let deps: Vec<String> = graph
            .dependencies(api)
            .into_iter()
            .map(|id| graph.module(id).name.clone())
            .collect();
        assert_eq!(deps, vec!["models", "models.user"]);
        Ok(())
    }

    #[test]
    fn test_import_cycle_terminates() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "import a\n");
        write(root, "a.py", "import b\n");
        write(root, "b.py", "import a\nimport a\n");

        let graph = build(root, &Config::default())?;
        assert_eq!(graph.len(), 3);
        let a = graph.module_id_for_path(&root.join("a.py").canonicalize().unwrap()).unwrap();
        let b = graph.module_id_for_path(&root.join("b.py").canonicalize().unwrap()).unwrap();
        let edges = graph.edges();
        assert_eq!(edges.iter().filter(|edge| **edge == (a, b)).count(), 1);
        assert_eq!(edges.iter().filter(|edge| **edge == (b, a)).count(), 1);
        assert_eq!(graph.cycles(), vec![vec![a, b]]);
        Ok(())
    }

    #[test]
    fn test_unresolved_imports_are_batched() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "import missing_one\nimport json\nimport helper\n");
        write(
            root,
            "helper.py",
            "from .gone import thing\nimport missing_two\n\ndef later():\n    import missing_two\n",
        );

        let missing = match build(root, &Config::default()) {
            Err(BuildError::UnresolvedImports(missing)) => missing,
            other => panic!("expected UnresolvedImports, got {other:?}"),
        };
        let reported: Vec<(&str, usize)> = missing
            .iter()
            .map(|m| (m.specifier.as_str(), m.line))
            .collect();
        assert_eq!(
            reported,
            vec![("missing_one", 1), (".gone", 1), ("missing_two", 2)]
        );
    }

    #[test]
    fn test_lenient_mode_and_known_third_party() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "import requests\nimport missing\n");

        let strict_known = Config {
            known_third_party: ["requests".to_string(), "missing".to_string()]
                .into_iter()
                .collect(),
            ..Config::default()
        };
        assert_eq!(build(root, &strict_known)?.len(), 1);

        let lenient = Config {
            allow_unresolved: true,
            ..Config::default()
        };
        assert_eq!(build(root, &lenient)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_type_checking_only_imports_may_be_missing() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(
            root,
            "app.py",
            "from typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    import stubs_only\n",
        );
        assert_eq!(build(root, &Config::default())?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_parse_error_names_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "import broken\n");
        write(root, "broken.py", "def oops(:\n");

        let err = build(root, &Config::default()).unwrap_err();
        assert!(matches!(err, BuildError::Parse { ref path, .. } if path.ends_with("broken.py")));
    }

    #[test]
    fn test_extra_roots_are_discovered() -> BuildResult<()> {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "app.py", "load_chunk('plugins')\n");
        write(root, "plugins/csv_plugin.py", "from plugins import shared\n");
        write(root, "plugins/shared.py", "");

        let config = Config::default();
        let resolver = ModuleResolver::new_with_overrides(&config, Some(""), Some("/nonexistent"));
        let graph = GraphBuilder::with_resolver(&config, &OsFileSystem, resolver)
            .build_graph_with_roots(
                &root.join("app.py"),
                &[root.join("plugins/csv_plugin.py")],
            )?;
        assert_eq!(
            names(&graph),
            vec!["__main__", "plugins.csv_plugin", "plugins.shared"]
        );
        Ok(())
    }
}
