//! Import discovery visitor that finds all imports in a Python module,
//! including those nested within functions, classes and conditional blocks.
//! Also records calls to the chunk loader so the manifest can link chunks together.

use ruff_python_ast::{
    Expr, ExprCall, Stmt, StmtImport, StmtImportFrom,
    visitor::{Visitor, walk_expr, walk_stmt},
};
use ruff_text_size::{Ranged, TextRange};

/// How an import was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b`
    Import,
    /// `from a import b` or `from . import b`
    FromImport,
    /// `importlib.import_module("a")` or `__import__("a")` with a literal argument
    Dynamic,
}

/// An import discovered during AST traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImport {
    /// The module being imported (`None` for `from . import x`)
    pub module_name: Option<String>,
    /// Names being imported (for from imports)
    pub names: Vec<(String, Option<String>)>, // (name, alias)
    pub kind: ImportKind,
    /// 1-based line of the import
    pub line: usize,
    /// Import level for relative imports
    pub level: u32,
    /// Whether this import only appears inside an `if TYPE_CHECKING:` block
    pub is_type_checking_only: bool,
}

impl DiscoveredImport {
    /// The module specifier as written, with one leading dot per relative level
    pub fn specifier(&self) -> String {
        let dots = ".".repeat(self.level as usize);
        match &self.module_name {
            Some(module) => format!("{dots}{module}"),
            None => dots,
        }
    }

    /// Specifiers for the submodules a `from` import may name, e.g. `pkg.sub` for
    /// `from pkg import sub`
    pub fn submodule_specifiers(&self) -> Vec<String> {
        if self.kind != ImportKind::FromImport {
            return Vec::new();
        }

        let base = self.specifier();
        self.names
            .iter()
            .filter(|(name, _)| name != "*")
            .map(|(name, _)| {
                if base.ends_with('.') {
                    format!("{base}{name}")
                } else {
                    format!("{base}.{name}")
                }
            })
            .collect()
    }
}

/// The argument of a chunk loader call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicLoadTarget {
    /// `load_chunk("name")`
    Literal(String),
    /// Anything not known until runtime
    Computed,
}

/// A call to the chunk loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLoad {
    pub target: DynamicLoadTarget,
    /// 1-based line of the call
    pub line: usize,
}

/// Visitor that discovers all imports and chunk loads in a Python module
#[derive(Debug)]
pub struct ImportDiscoveryVisitor<'a> {
    source: &'a str,
    /// Name of the runtime chunk loader (`load_chunk` by default)
    loader_function: &'a str,
    imports: Vec<DiscoveredImport>,
    dynamic_loads: Vec<DynamicLoad>,
    /// Whether we're in a type checking block
    in_type_checking: bool,
}

impl<'a> ImportDiscoveryVisitor<'a> {
    pub fn new(source: &'a str, loader_function: &'a str) -> Self {
        Self {
            source,
            loader_function,
            imports: Vec::new(),
            dynamic_loads: Vec::new(),
            in_type_checking: false,
        }
    }

    /// Visit every statement of a module body
    pub fn visit_body(&mut self, body: &'a [Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    /// Consume the visitor, returning imports and loader calls in source order
    pub fn finish(self) -> (Vec<DiscoveredImport>, Vec<DynamicLoad>) {
        (self.imports, self.dynamic_loads)
    }

    fn line_of(&self, range: TextRange) -> usize {
        let offset = usize::from(range.start()).min(self.source.len());
        self.source.as_bytes()[..offset]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }

    /// Check if a condition is a TYPE_CHECKING check
    fn is_type_checking_condition(expr: &Expr) -> bool {
        match expr {
            Expr::Name(name) => name.id.as_str() == "TYPE_CHECKING",
            Expr::Attribute(attr) => {
                attr.attr.as_str() == "TYPE_CHECKING"
                    && matches!(&*attr.value, Expr::Name(name) if name.id.as_str() == "typing")
            }
            _ => false,
        }
    }

    fn record_import(&mut self, stmt: &StmtImport) {
        for alias in &stmt.names {
            self.imports.push(DiscoveredImport {
                module_name: Some(alias.name.to_string()),
                names: vec![(
                    alias.name.to_string(),
                    alias.asname.as_ref().map(ToString::to_string),
                )],
                kind: ImportKind::Import,
                line: self.line_of(stmt.range),
                level: 0,
                is_type_checking_only: self.in_type_checking,
            });
        }
    }

    fn record_import_from(&mut self, stmt: &StmtImportFrom) {
        let names = stmt
            .names
            .iter()
            .map(|alias| {
                (
                    alias.name.to_string(),
                    alias.asname.as_ref().map(ToString::to_string),
                )
            })
            .collect();

        self.imports.push(DiscoveredImport {
            module_name: stmt.module.as_ref().map(ToString::to_string),
            names,
            kind: ImportKind::FromImport,
            line: self.line_of(stmt.range),
            level: stmt.level,
            is_type_checking_only: self.in_type_checking,
        });
    }

    /// `importlib.import_module("x")`, `import_module("x")` or `__import__("x")`
    fn is_import_call(func: &Expr) -> bool {
        match func {
            Expr::Name(name) => matches!(name.id.as_str(), "__import__" | "import_module"),
            Expr::Attribute(attr) => {
                attr.attr.as_str() == "import_module"
                    && matches!(&*attr.value, Expr::Name(name) if name.id.as_str() == "importlib")
            }
            _ => false,
        }
    }

    /// `load_chunk(...)` or `anything.load_chunk(...)`
    fn is_loader_call(&self, func: &Expr) -> bool {
        match func {
            Expr::Name(name) => name.id.as_str() == self.loader_function,
            Expr::Attribute(attr) => attr.attr.as_str() == self.loader_function,
            _ => false,
        }
    }

    fn first_string_argument(call: &ExprCall) -> Option<String> {
        match call.arguments.args.first() {
            Some(Expr::StringLiteral(literal)) => Some(literal.value.to_str().to_string()),
            _ => None,
        }
    }

    fn record_call(&mut self, call: &ExprCall) {
        if self.is_loader_call(&call.func) {
            let target = match Self::first_string_argument(call) {
                Some(name) => DynamicLoadTarget::Literal(name),
                None => DynamicLoadTarget::Computed,
            };
            self.dynamic_loads.push(DynamicLoad {
                target,
                line: self.line_of(call.range()),
            });
        } else if Self::is_import_call(&call.func)
            && let Some(specifier) = Self::first_string_argument(call)
        {
            let level = specifier.chars().take_while(|c| *c == '.').count();
            let module = &specifier[level..];
            self.imports.push(DiscoveredImport {
                module_name: (!module.is_empty()).then(|| module.to_string()),
                names: Vec::new(),
                kind: ImportKind::Dynamic,
                line: self.line_of(call.range()),
                level: u32::try_from(level).unwrap_or(u32::MAX),
                is_type_checking_only: self.in_type_checking,
            });
        }
    }
}

impl<'a> Visitor<'a> for ImportDiscoveryVisitor<'a> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import_stmt) => self.record_import(import_stmt),
            Stmt::ImportFrom(import_from) => self.record_import_from(import_from),
            // Only the `if TYPE_CHECKING:` body is type-checking only, not its `else`
            Stmt::If(if_stmt) if Self::is_type_checking_condition(&if_stmt.test) => {
                self.visit_expr(&if_stmt.test);

                let was_type_checking = self.in_type_checking;
                self.in_type_checking = true;
                for stmt in &if_stmt.body {
                    self.visit_stmt(stmt);
                }
                self.in_type_checking = was_type_checking;

                for clause in &if_stmt.elif_else_clauses {
                    if let Some(test) = &clause.test {
                        self.visit_expr(test);
                    }
                    for stmt in &clause.body {
                        self.visit_stmt(stmt);
                    }
                }
                return;
            }
            _ => {}
        }

        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Call(call) = expr {
            self.record_call(call);
        }

        walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use ruff_python_parser::parse_module;

    use super::*;

    fn discover(source: &str) -> (Vec<DiscoveredImport>, Vec<DynamicLoad>) {
        let parsed = parse_module(source).expect("Failed to parse test module");
        let mut visitor = ImportDiscoveryVisitor::new(source, "load_chunk");
        visitor.visit_body(&parsed.syntax().body);
        visitor.finish()
    }

    #[test]
    fn test_module_level_import() {
        let (imports, _) = discover(
            r#"
import os
from sys import path
"#,
        );

        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].module_name, Some("os".to_string()));
        assert_eq!(imports[0].line, 2);
        assert_eq!(imports[1].module_name, Some("sys".to_string()));
        assert_eq!(imports[1].names, vec![("path".to_string(), None)]);
        assert_eq!(imports[1].submodule_specifiers(), vec!["sys.path".to_string()]);
    }

    #[test]
    fn test_function_scoped_import() {
        let (imports, _) = discover(
            r#"
def my_function():
    import json
    return json.dumps({})
"#,
        );

        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].module_name, Some("json".to_string()));
        assert_eq!(imports[0].line, 3);
    }

    #[test]
    fn test_class_method_import() {
        let (imports, _) = discover(
            r#"
class MyClass:
    def method(self):
        from collections import defaultdict
        return defaultdict(list)
"#,
        );

        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::FromImport);
        assert_eq!(imports[0].line, 4);
    }

    #[test]
    fn test_relative_specifiers() {
        let (imports, _) = discover(
            r#"
from . import sibling
from ..pkg import thing, other as alias
from .mod import *
"#,
        );

        assert_eq!(imports[0].specifier(), ".");
        assert_eq!(imports[0].submodule_specifiers(), vec![".sibling".to_string()]);
        assert_eq!(imports[1].specifier(), "..pkg");
        assert_eq!(
            imports[1].submodule_specifiers(),
            vec!["..pkg.thing".to_string(), "..pkg.other".to_string()]
        );
        assert!(imports[2].submodule_specifiers().is_empty());
    }

    #[test]
    fn test_type_checking_imports_are_flagged() {
        let (imports, _) = discover(
            r#"
from typing import TYPE_CHECKING
if TYPE_CHECKING:
    from models import User
import services
"#,
        );

        assert!(!imports[0].is_type_checking_only);
        assert!(imports[1].is_type_checking_only);
        assert!(!imports[2].is_type_checking_only);
    }

    #[test]
    fn test_type_checking_else_branch_is_runtime() {
        let (imports, _) = discover(
            r#"
import typing
if typing.TYPE_CHECKING:
    import models
elif False:
    import legacy
else:
    import services
"#,
        );

        let flags: Vec<_> = imports
            .iter()
            .map(|import| (import.specifier(), import.is_type_checking_only))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("typing".to_string(), false),
                ("models".to_string(), true),
                ("legacy".to_string(), false),
                ("services".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_static_importlib_calls() {
        let (imports, _) = discover(
            r#"
import importlib
plugin = importlib.import_module("plugins.csv")
legacy = __import__("legacy")
name = "computed"
ignored = importlib.import_module(name)
"#,
        );

        let dynamic: Vec<_> = imports
            .iter()
            .filter(|import| import.kind == ImportKind::Dynamic)
            .map(DiscoveredImport::specifier)
            .collect();
        assert_eq!(dynamic, vec!["plugins.csv".to_string(), "legacy".to_string()]);
    }

    #[test]
    fn test_loader_calls_with_lines() {
        let (_, loads) = discover(
            r#"import runtime

def open_reports():
    runtime.load_chunk("reports")
    load_chunk(f"feature_{1}")
"#,
        );

        assert_eq!(
            loads,
            vec![
                DynamicLoad {
                    target: DynamicLoadTarget::Literal("reports".to_string()),
                    line: 4,
                },
                DynamicLoad {
                    target: DynamicLoadTarget::Computed,
                    line: 5,
                },
            ]
        );
    }

    #[test]
    fn test_custom_loader_name() {
        let source = "fetch_bundle('admin')\nload_chunk('ignored')\n";
        let parsed = parse_module(source).expect("Failed to parse test module");
        let mut visitor = ImportDiscoveryVisitor::new(source, "fetch_bundle");
        visitor.visit_body(&parsed.syntax().body);
        let (_, loads) = visitor.finish();

        assert_eq!(
            loads,
            vec![DynamicLoad {
                target: DynamicLoadTarget::Literal("admin".to_string()),
                line: 1,
            }]
        );
    }
}
