#![allow(clippy::disallowed_methods)]

use std::{fs, path::PathBuf};

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use troza::{
    config::{ChunkRule, Config, DuplicatePolicy},
    error::BuildError,
    fs::OsFileSystem,
    manifest::Manifest,
    orchestrator::{BuildOrchestrator, BuildPlan},
};

/// A throwaway Python project
struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    fn file(&self, relative: &str, content: &str) -> &Self {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    fn entry(&self) -> PathBuf {
        self.dir.path().join("app.py")
    }

    fn plan(&self, config: Config) -> anyhow::Result<BuildPlan> {
        orchestrator(config).plan(&self.entry(), &OsFileSystem)
    }
}

fn orchestrator(config: Config) -> BuildOrchestrator {
    BuildOrchestrator::new(config)
        .with_pythonpath("")
        .with_virtualenv("/nonexistent")
}

fn build_error(result: anyhow::Result<BuildPlan>) -> BuildError {
    let err = result.expect_err("build should fail");
    match err.downcast::<BuildError>() {
        Ok(build_error) => build_error,
        Err(other) => panic!("expected a BuildError, got {other:#}"),
    }
}

/// An app that statically imports models and services and lazily loads two feature modules
fn feature_project() -> Project {
    let project = Project::new();
    project
        .file(
            "app.py",
            "import models.user\nfrom services import store\n\n\ndef open_features():\n    \
             return load_chunk(\"features\")\n",
        )
        .file("models/__init__.py", "")
        .file("models/user.py", "from models import base\n")
        .file("models/base.py", "")
        .file("services/__init__.py", "")
        .file("services/store.py", "import models.user\n")
        .file("features/feature1.py", "from features import charts\n")
        .file("features/feature2.py", "from features import charts\nfrom . import export\n")
        .file("features/charts.py", "import math\n")
        .file("features/export.py", "");
    project
}

fn features_rule() -> ChunkRule {
    ChunkRule::new("features")
        .with_entry_point("features/feature1.py")
        .with_entry_point("features/feature2.py")
        .with_include(r".*features.*\.py")
}

fn chunk_modules(manifest: &Manifest, chunk: &str) -> Vec<String> {
    manifest.chunks[chunk].modules.clone()
}

#[test]
fn test_feature_modules_leave_main_chunk() {
    let project = feature_project();
    let config = Config {
        chunks: vec![features_rule()],
        ..Config::default()
    };
    let plan = project.plan(config).unwrap();

    assert_eq!(
        chunk_modules(&plan.manifest, "features"),
        vec![
            "features/charts.py",
            "features/feature1.py",
            "features/export.py",
            "features/feature2.py",
        ]
    );
    assert_eq!(
        chunk_modules(&plan.manifest, "main"),
        vec![
            "models/__init__.py",
            "services/__init__.py",
            "models/base.py",
            "models/user.py",
            "services/store.py",
            "app.py",
        ]
    );

    // Every module lives in exactly one chunk
    for (module, chunks) in &plan.manifest.module_to_chunk {
        assert_eq!(chunks.len(), 1, "{module} is in {chunks:?}");
    }
    assert_eq!(plan.manifest.module_to_chunk.len(), plan.graph.len());

    insta::assert_snapshot!(plan.manifest_json, @r#"
    {
      "version": 1,
      "entry_chunk": "main",
      "chunks": {
        "features": {
          "file": "features.py",
          "modules": [
            "features/charts.py",
            "features/feature1.py",
            "features/export.py",
            "features/feature2.py"
          ],
          "depends_on": [],
          "imports": []
        },
        "main": {
          "file": "main.py",
          "modules": [
            "models/__init__.py",
            "services/__init__.py",
            "models/base.py",
            "models/user.py",
            "services/store.py",
            "app.py"
          ],
          "depends_on": [
            "features"
          ],
          "imports": []
        }
      },
      "module_to_chunk": {
        "app.py": [
          "main"
        ],
        "features/charts.py": [
          "features"
        ],
        "features/export.py": [
          "features"
        ],
        "features/feature1.py": [
          "features"
        ],
        "features/feature2.py": [
          "features"
        ],
        "models/__init__.py": [
          "main"
        ],
        "models/base.py": [
          "main"
        ],
        "models/user.py": [
          "main"
        ],
        "services/__init__.py": [
          "main"
        ],
        "services/store.py": [
          "main"
        ]
      },
      "files": {
        "features.py": "features.py",
        "main.py": "main.py"
      }
    }
    "#);
}

#[test]
fn test_repeated_builds_are_identical() {
    let project = feature_project();
    let config = Config {
        chunks: vec![features_rule()],
        content_hash: true,
        ..Config::default()
    };

    let first = project.plan(config.clone()).unwrap();
    let second = project.plan(config).unwrap();

    assert_eq!(first.graph.edges(), second.graph.edges());
    assert_eq!(first.manifest_json, second.manifest_json);
    assert_eq!(
        first.chunks.iter().map(|c| &c.content).collect::<Vec<_>>(),
        second.chunks.iter().map(|c| &c.content).collect::<Vec<_>>()
    );
    assert_ne!(first.manifest.files["main.py"], "main.py");
}

#[test]
fn test_build_writes_artifacts() {
    let project = feature_project();
    let output = project.root().join("dist");
    let config = Config {
        chunks: vec![features_rule()],
        ..Config::default()
    };

    let plan = orchestrator(config)
        .build(&project.entry(), &output)
        .unwrap();

    let manifest_text = fs::read_to_string(output.join("manifest.json")).unwrap();
    assert_eq!(manifest_text, plan.manifest_json);

    let main_chunk = fs::read_to_string(output.join("main.py")).unwrap();
    assert!(main_chunk.starts_with("# Chunk: main\n"));
    assert!(main_chunk.contains("# Module: services/store.py\nimport models.user\n"));
    assert!(main_chunk.contains("def load_chunk(name):"));
    assert!(output.join("features.py").is_file());
}

#[test]
fn test_entry_chunk_loads_its_static_imports() {
    let project = Project::new();
    project
        .file("app.py", "from models import user\n")
        .file("models/__init__.py", "")
        .file("models/user.py", "");
    let output = project.root().join("dist");
    let config = Config {
        chunks: vec![ChunkRule::new("models").with_include("/models/")],
        ..Config::default()
    };

    let plan = orchestrator(config).build(&project.entry(), &output).unwrap();
    assert_eq!(plan.manifest.chunks["main"].imports, vec!["models"]);

    let main_chunk = fs::read_to_string(output.join("main.py")).unwrap();
    let preload = main_chunk
        .find("for _troza_required in [\"models\"]:\n    load_chunk(_troza_required)\n")
        .expect("entry chunk preloads models");
    let body = main_chunk.find("# Module: app.py\n").unwrap();
    assert!(preload < body);

    let models_chunk = fs::read_to_string(output.join("models.py")).unwrap();
    assert!(!models_chunk.contains("_troza_required"));
}

#[test]
fn test_chunk_name_cannot_escape_output_dir() {
    let project = Project::new();
    project.file("app.py", "");
    let output = project.root().join("dist");
    let config = Config {
        chunks: vec![ChunkRule::new("../../escaped").with_include("app")],
        ..Config::default()
    };

    let err = orchestrator(config)
        .build(&project.entry(), &output)
        .expect_err("name is rejected");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidChunkName { name }) if name == "../../escaped"
    ));
    assert!(!output.exists());
    assert!(!project.root().join("../escaped.py").exists());
}

#[test]
fn test_unknown_chunk_reference() {
    let project = Project::new();
    project.file("app.py", "load_chunk(\"ghost\")\n");

    let err = build_error(project.plan(Config::default()));
    assert!(matches!(err, BuildError::UnknownChunkReference { ref chunk, .. } if chunk == "ghost"));
}

#[test]
fn test_computed_chunk_name_is_rejected() {
    let project = Project::new();
    project.file("app.py", "import os\n\nname = os.environ['CHUNK']\nload_chunk(name)\n");

    let err = build_error(project.plan(Config::default()));
    assert!(matches!(err, BuildError::DynamicLoadTargetNotStatic { line: 4, .. }));
}

#[test]
fn test_first_declared_rule_wins() {
    let project = Project::new();
    project
        .file("app.py", "from models import user\n")
        .file("models/user.py", "");

    let config = Config {
        chunks: vec![
            ChunkRule::new("models").with_include("/models/"),
            ChunkRule::new("users").with_include("user"),
        ],
        ..Config::default()
    };
    let plan = project.plan(config.clone()).unwrap();

    assert_eq!(chunk_modules(&plan.manifest, "models"), vec!["models/user.py"]);
    assert!(chunk_modules(&plan.manifest, "users").is_empty());
    assert_eq!(chunk_modules(&plan.manifest, "main"), vec!["app.py"]);
    assert_eq!(plan.manifest.chunks["main"].imports, vec!["models"]);

    let duplicated = project
        .plan(Config {
            duplicate_policy: DuplicatePolicy::Duplicate,
            ..config
        })
        .unwrap();
    assert_eq!(
        duplicated.manifest.module_to_chunk["models/user.py"],
        vec!["models", "users"]
    );
}

#[test]
fn test_empty_rule_keeps_manifest_entry() {
    let project = Project::new();
    project.file("app.py", "");

    let config = Config {
        chunks: vec![ChunkRule::new("reports").with_include("no_such_module")],
        ..Config::default()
    };
    let plan = project.plan(config).unwrap();

    let reports = &plan.manifest.chunks["reports"];
    assert!(reports.modules.is_empty());
    assert_eq!(reports.file, "reports.py");
    assert_eq!(plan.chunks.len(), 2);
}

#[test]
fn test_import_cycle() {
    let project = Project::new();
    project
        .file("app.py", "import partner\n")
        .file("partner.py", "import app\nimport app\n");

    let plan = project.plan(Config::default()).unwrap();
    assert_eq!(plan.graph.len(), 2);

    let edges = plan.graph.edges();
    assert_eq!(edges.len(), 2);
    let (a, b) = edges[0];
    assert_eq!(edges[1], (b, a));
    assert_eq!(
        chunk_modules(&plan.manifest, "main"),
        vec!["app.py", "partner.py"]
    );
}

#[test]
fn test_unresolved_imports_fail_together() {
    let project = Project::new();
    project
        .file("app.py", "import json\nimport first_missing\nimport helper\n")
        .file("helper.py", "from .second_missing import thing\n");

    let BuildError::UnresolvedImports(missing) = build_error(project.plan(Config::default()))
    else {
        panic!("expected UnresolvedImports");
    };
    let reported: Vec<(&str, usize)> = missing
        .iter()
        .map(|m| (m.specifier.as_str(), m.line))
        .collect();
    assert_eq!(reported, vec![("first_missing", 2), (".second_missing", 1)]);

    let lenient = project
        .plan(Config {
            allow_unresolved: true,
            ..Config::default()
        })
        .unwrap();
    assert_eq!(
        chunk_modules(&lenient.manifest, "main"),
        vec!["helper.py", "app.py"]
    );
}

#[test]
fn test_missing_rule_entry_point() {
    let project = Project::new();
    project.file("app.py", "");

    let config = Config {
        chunks: vec![ChunkRule::new("admin").with_entry_point("admin/panel.py")],
        ..Config::default()
    };
    let err = build_error(project.plan(config));
    assert!(matches!(err, BuildError::ChunkEntryNotFound { ref rule, .. } if rule == "admin"));
}

#[test]
fn test_missing_program_entry() {
    let project = Project::new();
    let err = build_error(project.plan(Config::default()));
    assert!(matches!(err, BuildError::EntryNotFound { .. }));
}
