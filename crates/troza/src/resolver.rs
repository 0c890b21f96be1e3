use std::{
    cell::RefCell,
    ffi::OsStr,
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use ruff_python_stdlib::sys;

use crate::config::Config;

/// Python minor version used for stdlib classification (3.12)
const PYTHON_VERSION: u8 = 12;

/// Check if a module is part of the Python standard library using ruff_python_stdlib
fn is_stdlib_module(module_name: &str) -> bool {
    if module_name == "__future__" {
        return true;
    }

    if sys::is_known_standard_library(PYTHON_VERSION, module_name) {
        return true;
    }

    // Submodules of stdlib packages (os.path, xml.etree.ElementTree)
    module_name
        .split('.')
        .next()
        .is_some_and(|top_level| sys::is_known_standard_library(PYTHON_VERSION, top_level))
}

/// A scoped guard for safely setting and cleaning up the PYTHONPATH environment variable.
///
/// The original value is restored when the guard is dropped, even if the holder panics.
#[must_use = "PythonPathGuard must be held in scope to ensure cleanup"]
#[derive(Debug)]
pub struct PythonPathGuard {
    original_value: Option<String>,
}

impl PythonPathGuard {
    pub fn new(new_value: &str) -> Self {
        let original_value = std::env::var("PYTHONPATH").ok();

        // SAFETY: callers hold the guard in serialized tests and the value is restored on drop
        unsafe {
            std::env::set_var("PYTHONPATH", new_value);
        }

        Self { original_value }
    }
}

impl Drop for PythonPathGuard {
    fn drop(&mut self) {
        // SAFETY: restores the environment captured in `new`
        unsafe {
            match self.original_value.take() {
                Some(original) => std::env::set_var("PYTHONPATH", original),
                None => std::env::remove_var("PYTHONPATH"),
            }
        }
    }
}

/// Classification of an import that did not resolve to a project file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportType {
    StandardLibrary,
    ThirdParty,
    /// Found under a search root
    FirstParty,
    /// Neither bundled nor known to come from somewhere else
    Unknown,
}

impl ImportType {
    /// Whether a failure to resolve this import may be ignored
    pub fn is_external(self) -> bool {
        matches!(self, Self::StandardLibrary | Self::ThirdParty)
    }
}

/// Module descriptor for import resolution
#[derive(Debug)]
struct ImportModuleDescriptor {
    /// Number of leading dots for relative imports
    leading_dots: usize,
    /// Module name parts (e.g., ["foo", "bar"] for "foo.bar")
    name_parts: Vec<String>,
}

impl ImportModuleDescriptor {
    fn from_module_name(name: &str) -> Self {
        let leading_dots = name.chars().take_while(|c| *c == '.').count();
        let name_parts = name[leading_dots..]
            .split('.')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Self {
            leading_dots,
            name_parts,
        }
    }
}

#[derive(Debug)]
pub struct ModuleResolver {
    src: Vec<PathBuf>,
    known_third_party: IndexSet<String>,
    /// Cache of search-root lookups keyed by absolute module name
    module_cache: IndexMap<String, Option<PathBuf>>,
    classification_cache: IndexMap<String, ImportType>,
    /// Cache of virtual environment packages to avoid repeated filesystem scans
    virtualenv_packages_cache: RefCell<Option<IndexSet<String>>>,
    /// Entry file's directory (first in search path)
    entry_dir: Option<PathBuf>,
    pythonpath_override: Option<String>,
    virtualenv_override: Option<String>,
}

impl ModuleResolver {
    /// Canonicalize a path, handling errors gracefully
    fn canonicalize_path(path: PathBuf) -> PathBuf {
        match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("Failed to canonicalize path {}: {}", path.display(), e);
                path
            }
        }
    }

    pub fn new(config: &Config) -> Self {
        Self::new_with_overrides(config, None, None)
    }

    /// Create a resolver with PYTHONPATH and VIRTUAL_ENV overrides instead of the process
    /// environment
    pub fn new_with_overrides(
        config: &Config,
        pythonpath_override: Option<&str>,
        virtualenv_override: Option<&str>,
    ) -> Self {
        Self {
            src: config.src.clone(),
            known_third_party: config.known_third_party.clone(),
            module_cache: IndexMap::new(),
            classification_cache: IndexMap::new(),
            virtualenv_packages_cache: RefCell::new(None),
            entry_dir: None,
            pythonpath_override: pythonpath_override.map(ToString::to_string),
            virtualenv_override: virtualenv_override.map(ToString::to_string),
        }
    }

    /// Set the entry file for the resolver
    /// This establishes the first search path directory
    pub fn set_entry_file(&mut self, entry_path: &Path) {
        if let Some(parent) = entry_path.parent() {
            self.entry_dir = Some(parent.to_path_buf());
            debug!("Set entry directory to: {:?}", self.entry_dir);
        }
    }

    /// Get all directories to search for modules, deduplicated and canonicalized.
    /// The entry file's directory always comes first, then PYTHONPATH, then configured `src`.
    pub fn get_search_directories(&self) -> Vec<PathBuf> {
        let mut unique_dirs = IndexSet::new();

        if let Some(entry_dir) = &self.entry_dir {
            unique_dirs.insert(
                entry_dir
                    .canonicalize()
                    .unwrap_or_else(|_| entry_dir.clone()),
            );
        }

        let pythonpath = self
            .pythonpath_override
            .clone()
            .or_else(|| std::env::var("PYTHONPATH").ok());

        if let Some(pythonpath) = pythonpath {
            let separator = if cfg!(windows) { ';' } else { ':' };
            for path_str in pythonpath.split(separator) {
                Self::add_pythonpath_directory(&mut unique_dirs, path_str);
            }
        }

        for dir in &self.src {
            unique_dirs.insert(dir.canonicalize().unwrap_or_else(|_| dir.clone()));
        }

        unique_dirs.into_iter().collect()
    }

    fn add_pythonpath_directory(unique_dirs: &mut IndexSet<PathBuf>, path_str: &str) {
        if path_str.is_empty() {
            return;
        }

        let path = PathBuf::from(path_str);
        if !path.is_dir() {
            return;
        }

        unique_dirs.insert(path.canonicalize().unwrap_or(path));
    }

    /// Resolve an import written in `importing_file`.
    ///
    /// Relative specifiers resolve against the importing file's package. Absolute specifiers
    /// are looked up next to the importing file first, then in the search directories.
    /// The result may be a namespace package directory rather than a file.
    pub fn resolve_import(&mut self, specifier: &str, importing_file: &Path) -> Option<PathBuf> {
        let descriptor = ImportModuleDescriptor::from_module_name(specifier);

        if descriptor.leading_dots > 0 {
            return self.resolve_relative_import(&descriptor, importing_file);
        }

        if let Some(dir) = importing_file.parent()
            && let Some(found) = Self::resolve_in_directory(dir, &descriptor)
        {
            debug!(
                "Resolved '{specifier}' next to {}: {}",
                importing_file.display(),
                found.display()
            );
            return Some(found);
        }

        self.resolve_module_path(specifier)
    }

    /// Resolve an absolute module name in the search directories
    pub fn resolve_module_path(&mut self, module_name: &str) -> Option<PathBuf> {
        if module_name.starts_with('.') {
            warn!("Cannot resolve relative import '{module_name}' without module context");
            return None;
        }

        if let Some(cached_path) = self.module_cache.get(module_name) {
            return cached_path.clone();
        }

        let descriptor = ImportModuleDescriptor::from_module_name(module_name);
        let resolved = self
            .get_search_directories()
            .iter()
            .find_map(|search_dir| Self::resolve_in_directory(search_dir, &descriptor));

        self.module_cache
            .insert(module_name.to_string(), resolved.clone());
        resolved
    }

    /// Resolve a relative import given the current module's path
    fn resolve_relative_import(
        &self,
        descriptor: &ImportModuleDescriptor,
        current_module_path: &Path,
    ) -> Option<PathBuf> {
        let mut base_dir = if current_module_path.is_file() {
            current_module_path.parent()?
        } else {
            current_module_path
        };

        // One dot = current package, two dots = parent package, etc.
        for _ in 1..descriptor.leading_dots {
            let Some(parent) = base_dir.parent() else {
                warn!(
                    "Relative import in {} goes above the filesystem root",
                    current_module_path.display()
                );
                return None;
            };
            base_dir = parent;
        }

        // `from . import x` names the package itself
        if descriptor.name_parts.is_empty() {
            let init_path = base_dir.join("__init__.py");
            if init_path.is_file() {
                return Some(Self::canonicalize_path(init_path));
            }
            if base_dir.is_dir() {
                return Some(Self::canonicalize_path(base_dir.to_path_buf()));
            }
            return None;
        }

        Self::resolve_in_directory(base_dir, descriptor)
    }

    /// Resolve a module within a specific directory.
    ///
    /// For the last name part: package (`foo/__init__.py`), then module file (`foo.py`),
    /// then namespace package (`foo/` without `__init__.py`).
    fn resolve_in_directory(root: &Path, descriptor: &ImportModuleDescriptor) -> Option<PathBuf> {
        let (last, intermediate) = descriptor.name_parts.split_last()?;

        let mut current_path = root.to_path_buf();
        for part in intermediate {
            let package_dir = current_path.join(part);
            if !package_dir.is_dir() {
                return None;
            }
            current_path = package_dir;
        }

        let package_init = current_path.join(last).join("__init__.py");
        if package_init.is_file() {
            debug!("Found package at: {package_init:?}");
            return Some(Self::canonicalize_path(package_init));
        }

        let module_file = current_path.join(format!("{last}.py"));
        if module_file.is_file() {
            debug!("Found module file at: {module_file:?}");
            return Some(Self::canonicalize_path(module_file));
        }

        let namespace_dir = current_path.join(last);
        if namespace_dir.is_dir() {
            debug!("Found namespace package at: {namespace_dir:?}");
            return Some(Self::canonicalize_path(namespace_dir));
        }

        None
    }

    /// Dotted module name of a file relative to the first search directory containing it
    pub fn module_name_for_path(&self, path: &Path) -> Option<String> {
        self.get_search_directories().iter().find_map(|root| {
            let relative = path.strip_prefix(root).ok()?;
            let mut parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();

            let last = parts.pop()?;
            let stem = last.strip_suffix(".py").unwrap_or(&last);
            if stem != "__init__" {
                parts.push(stem.to_string());
            }

            (!parts.is_empty()).then(|| parts.join("."))
        })
    }

    /// Classify an import that has no file in the project
    pub fn classify_import(&mut self, module_name: &str) -> ImportType {
        if let Some(cached_type) = self.classification_cache.get(module_name) {
            return *cached_type;
        }

        let import_type = self.compute_classification(module_name);
        self.classification_cache
            .insert(module_name.to_string(), import_type);
        import_type
    }

    fn compute_classification(&mut self, module_name: &str) -> ImportType {
        if module_name.starts_with('.') {
            return ImportType::FirstParty;
        }

        let root_module = module_name.split('.').next().unwrap_or(module_name);
        if self.known_third_party.contains(module_name)
            || self.known_third_party.contains(root_module)
        {
            return ImportType::ThirdParty;
        }

        if is_stdlib_module(module_name) {
            return ImportType::StandardLibrary;
        }

        if self.resolve_module_path(module_name).is_some() {
            return ImportType::FirstParty;
        }

        if self.is_virtualenv_package(module_name) {
            return ImportType::ThirdParty;
        }

        ImportType::Unknown
    }

    /// Get the set of third-party packages installed in the virtual environment
    fn get_virtualenv_packages(&self) -> IndexSet<String> {
        if let Ok(cache_ref) = self.virtualenv_packages_cache.try_borrow()
            && let Some(cached_packages) = cache_ref.as_ref()
        {
            return cached_packages.clone();
        }

        let packages = self.compute_virtualenv_packages();

        if let Ok(mut cache_ref) = self.virtualenv_packages_cache.try_borrow_mut() {
            *cache_ref = Some(packages.clone());
        }

        packages
    }

    /// Compute virtualenv packages by scanning the filesystem
    fn compute_virtualenv_packages(&self) -> IndexSet<String> {
        let mut packages = IndexSet::new();

        let explicit_virtualenv = self
            .virtualenv_override
            .clone()
            .or_else(|| std::env::var("VIRTUAL_ENV").ok());

        let virtualenv_paths = if let Some(virtualenv_path) = explicit_virtualenv {
            vec![PathBuf::from(virtualenv_path)]
        } else {
            Self::detect_fallback_virtualenv_paths()
        };

        for venv_path in virtualenv_paths {
            for site_packages_dir in Self::get_virtualenv_site_packages_directories(&venv_path) {
                Self::scan_site_packages_directory(&site_packages_dir, &mut packages);
            }
        }

        packages
    }

    /// Detect common virtual environment directory names in the working directory
    fn detect_fallback_virtualenv_paths() -> Vec<PathBuf> {
        let Ok(current_dir) = std::env::current_dir() else {
            return Vec::new();
        };

        [".venv", "venv", "env", ".virtualenv", "virtualenv"]
            .iter()
            .map(|name| current_dir.join(name))
            .filter(|venv_path| {
                venv_path.is_dir()
                    && (venv_path.join("bin").is_dir()
                        || venv_path.join("Scripts").is_dir()
                        || venv_path.join("lib").is_dir())
            })
            .collect()
    }

    /// Get site-packages directories for a virtual environment
    fn get_virtualenv_site_packages_directories(venv_path: &Path) -> Vec<PathBuf> {
        let mut site_packages_dirs = Vec::new();

        // Unix-style: lib/pythonX.Y/site-packages
        let lib_dir = venv_path.join("lib");
        if lib_dir.is_dir()
            && let Ok(entries) = std::fs::read_dir(&lib_dir)
        {
            for entry in entries.flatten() {
                let site_packages = entry.path().join("site-packages");
                if site_packages.is_dir() {
                    site_packages_dirs.push(site_packages);
                }
            }
        }

        // Windows-style: Lib/site-packages
        let lib_site_packages = venv_path.join("Lib").join("site-packages");
        if lib_site_packages.is_dir() {
            site_packages_dirs.push(lib_site_packages);
        }

        site_packages_dirs
    }

    fn scan_site_packages_directory(site_packages_dir: &Path, packages: &mut IndexSet<String>) {
        let Ok(entries) = std::fs::read_dir(site_packages_dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(OsStr::to_str) else {
                continue;
            };

            if name.starts_with('_') || name.contains("-info") {
                continue;
            }

            if path.is_dir() {
                packages.insert(name.to_owned());
            } else if let Some(package_name) = name.strip_suffix(".py") {
                packages.insert(package_name.to_owned());
            }
        }
    }

    fn is_virtualenv_package(&self, module_name: &str) -> bool {
        let virtualenv_packages = self.get_virtualenv_packages();
        virtualenv_packages.contains(module_name)
            || module_name
                .split('.')
                .next()
                .is_some_and(|root| virtualenv_packages.contains(root))
    }
}
