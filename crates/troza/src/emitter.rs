//! Chunk rendering
//!
//! A chunk is its member modules concatenated verbatim, each behind a `# Module:` marker,
//! together with a small loader that can pull in other chunks listed in the manifest.
//! The loader is emitted ahead of the module bodies so top-level calls to it resolve, and
//! the chunks named in the chunk's `imports` are loaded right after it, so a chunk run as a
//! script has its static imports available too.

use std::path::Path;

use crate::{
    manifest::ChunkEntry,
    module_graph::{ModuleGraph, ModuleId},
    util::relative_path,
};

/// `sys.modules` key prefix for loaded chunks
pub const CHUNK_MODULE_PREFIX: &str = "__troza_chunk__.";

/// A rendered chunk ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedChunk {
    pub name: String,
    /// Output file name from the manifest
    pub file: String,
    pub content: String,
}

#[derive(Debug)]
pub struct ChunkEmitter<'a> {
    graph: &'a ModuleGraph,
    base_dir: &'a Path,
    loader_function: &'a str,
    manifest_name: &'a str,
}

impl<'a> ChunkEmitter<'a> {
    pub fn new(
        graph: &'a ModuleGraph,
        base_dir: &'a Path,
        loader_function: &'a str,
        manifest_name: &'a str,
    ) -> Self {
        Self {
            graph,
            base_dir,
            loader_function,
            manifest_name,
        }
    }

    pub fn render(&self, name: &str, members: &[ModuleId], entry: &ChunkEntry) -> EmittedChunk {
        let mut content = format!("# Chunk: {name}\n");
        content.push_str(&self.loader_shim(name, &entry.imports));

        for id in members {
            let module = self.graph.module(*id);
            content.push('\n');
            content.push_str("# Module: ");
            content.push_str(&relative_path(&module.path, self.base_dir));
            content.push('\n');
            content.push_str(&module.source);
            if !module.source.is_empty() && !module.source.ends_with('\n') {
                content.push('\n');
            }
        }

        EmittedChunk {
            name: name.to_string(),
            file: entry.file.clone(),
            content,
        }
    }

    fn loader_shim(&self, chunk: &str, imports: &[String]) -> String {
        let mut shim = format!(
            r#"

def {loader}(name):
    import importlib.util
    import json
    import os
    import sys

    key = {prefix} + name
    if key in sys.modules:
        return sys.modules[key]
    base = os.path.dirname(os.path.abspath(__file__))
    with open(os.path.join(base, {manifest}), encoding="utf-8") as handle:
        entry = json.load(handle)["chunks"][name]
    spec = importlib.util.spec_from_file_location(key, os.path.join(base, entry["file"]))
    module = importlib.util.module_from_spec(spec)
    sys.modules[key] = module
    for required in entry["imports"]:
        {loader}(required)
    spec.loader.exec_module(module)
    return module


import sys as _troza_sys

_troza_sys.modules.setdefault({key}, _troza_sys.modules[__name__])
del _troza_sys
"#,
            loader = self.loader_function,
            prefix = python_str(CHUNK_MODULE_PREFIX),
            manifest = python_str(self.manifest_name),
            key = python_str(&format!("{CHUNK_MODULE_PREFIX}{chunk}")),
        );

        if !imports.is_empty() {
            let names: Vec<String> = imports.iter().map(|name| python_str(name)).collect();
            shim.push_str(&format!(
                "\nfor _troza_required in [{}]:\n    {}(_troza_required)\ndel _troza_required\n",
                names.join(", "),
                self.loader_function
            ));
        }

        shim
    }
}

/// A Python string literal for `value`
fn python_str(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('"');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            _ => literal.push(c),
        }
    }
    literal.push('"');
    literal
}
