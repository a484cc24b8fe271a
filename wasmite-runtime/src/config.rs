//! Runtime and module configuration.
//!
//! Both configurations are plain data with `with_*` methods that consume the
//! value and return the updated snapshot; clone first to keep the original.
//! Validation happens where the values are consumed: the memory sizing at
//! compile time, the system-context fields at instantiation.

use {
    crate::{
        engine::{interpreter::InterpreterEngine, Engine},
        features::{self, Features},
        instance::MEMORY_LIMIT_PAGES,
        module::{Import, Module},
        sys::{FileEntry, FsHandle, SharedReader, SharedWriter, SysContext, SysError},
    },
    std::{
        collections::{BTreeMap, HashMap},
        sync::Arc,
    },
};

/// Determines how many pages to reserve for a memory, given the module's
/// declared min and optional max. The default returns the min.
pub type MemoryCapacityFn = Arc<dyn Fn(u32, Option<u32>) -> u32 + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// The tree-walk interpreter over the stack IR.
    Interpreter,
}

/// Controls runtime-wide behavior: the feature set, memory sizing, and the
/// engine back-end.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub features:              Features,
    pub memory_limit_pages:    u32,
    pub memory_capacity_pages: MemoryCapacityFn,
    pub engine:                EngineKind,
}

impl RuntimeConfig {
    /// An interpreter-backed configuration with WebAssembly Core 1.0
    /// features.
    pub fn interpreter() -> RuntimeConfig {
        RuntimeConfig {
            features:              features::FEATURES_CORE_1,
            memory_limit_pages:    MEMORY_LIMIT_PAGES,
            memory_capacity_pages: Arc::new(|min, _max| min),
            engine:                EngineKind::Interpreter,
        }
    }

    /// Reset the feature set to WebAssembly Core 1.0 (20191205).
    pub fn wasm_core_1(mut self) -> RuntimeConfig {
        self.features = features::FEATURES_CORE_1;
        self
    }

    /// Reset the feature set to the WebAssembly Core 2.0 draft (20220419).
    pub fn wasm_core_2(mut self) -> RuntimeConfig {
        self.features = features::FEATURES_CORE_2;
        self
    }

    /// Enable or disable bulk memory instructions. The proposal is mutually
    /// dependent with reference types, so both toggle together.
    pub fn with_bulk_memory_operations(mut self, enabled: bool) -> RuntimeConfig {
        self.features = self
            .features
            .set(features::BULK_MEMORY_OPERATIONS, enabled)
            .set(features::REFERENCE_TYPES, enabled);
        self
    }

    /// Enable or disable reference types; toggles bulk memory with it.
    pub fn with_reference_types(self, enabled: bool) -> RuntimeConfig {
        self.with_bulk_memory_operations(enabled)
    }

    pub fn with_multi_value(mut self, enabled: bool) -> RuntimeConfig {
        self.features = self.features.set(features::MULTI_VALUE, enabled);
        self
    }

    pub fn with_mutable_global(mut self, enabled: bool) -> RuntimeConfig {
        self.features = self.features.set(features::MUTABLE_GLOBAL, enabled);
        self
    }

    pub fn with_non_trapping_float_to_int_conversion(mut self, enabled: bool) -> RuntimeConfig {
        self.features = self
            .features
            .set(features::NON_TRAPPING_FLOAT_TO_INT, enabled);
        self
    }

    pub fn with_sign_extension_ops(mut self, enabled: bool) -> RuntimeConfig {
        self.features = self.features.set(features::SIGN_EXTENSION_OPS, enabled);
        self
    }

    /// Cap the number of pages any memory may reach, at most 65536 (4 GiB).
    pub fn with_memory_limit_pages(mut self, limit: u32) -> RuntimeConfig {
        self.memory_limit_pages = limit.min(MEMORY_LIMIT_PAGES);
        self
    }

    /// Supply the allocation-time sizing function. A result below the
    /// module's min is a hard error at compile time; results above the
    /// limit are clamped.
    pub fn with_memory_capacity_pages(
        mut self,
        f: impl Fn(u32, Option<u32>) -> u32 + Send + Sync + 'static,
    ) -> RuntimeConfig {
        self.memory_capacity_pages = Arc::new(f);
        self
    }

    pub(crate) fn build_engine(&self) -> Arc<dyn Engine> {
        match self.engine {
            EngineKind::Interpreter => Arc::new(InterpreterEngine::new()),
        }
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("features", &self.features)
            .field("memory_limit_pages", &self.memory_limit_pages)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Per-instantiation configuration: the instance name, the argv/envp and
/// stdio conduits, preopened file systems, start functions, and import
/// rewrites.
#[derive(Clone, Default)]
pub struct ModuleConfig {
    pub name:        Option<String>,
    start_functions: Option<Vec<String>>,
    args:            Vec<String>,
    environ:         Vec<(String, String)>,
    stdin:           Option<SharedReader>,
    stdout:          Option<SharedWriter>,
    stderr:          Option<SharedWriter>,
    preopens:        Vec<FileEntry>,
    replaced_imports: HashMap<(String, String), (String, String)>,
    replaced_import_modules: HashMap<String, String>,
}

impl ModuleConfig {
    pub fn new() -> ModuleConfig {
        ModuleConfig::default()
    }

    /// Override the name decoded from the module's name section.
    pub fn with_name(mut self, name: impl Into<String>) -> ModuleConfig {
        self.name = Some(name.into());
        self
    }

    /// The exported functions to call after instantiation, in order.
    /// Defaults to `_start`; functions that are not exported are skipped.
    pub fn with_start_functions(
        mut self,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> ModuleConfig {
        self.start_functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_args(
        mut self,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> ModuleConfig {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set one environment variable, replacing an existing key in place.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> ModuleConfig {
        let key = key.into();
        let value = value.into();
        match self.environ.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.environ.push((key, value)),
        }
        self
    }

    pub fn with_stdin(mut self, stdin: SharedReader) -> ModuleConfig {
        self.stdin = Some(stdin);
        self
    }

    pub fn with_stdout(mut self, stdout: SharedWriter) -> ModuleConfig {
        self.stdout = Some(stdout);
        self
    }

    pub fn with_stderr(mut self, stderr: SharedWriter) -> ModuleConfig {
        self.stderr = Some(stderr);
        self
    }

    /// Mount `fs` at the root path. Also serves the working directory when
    /// no [ModuleConfig::with_workdir_fs] is set.
    pub fn with_fs(mut self, fs: FsHandle) -> ModuleConfig {
        self.set_fs("/", fs);
        self
    }

    /// Mount `fs` at the working directory path.
    pub fn with_workdir_fs(mut self, fs: FsHandle) -> ModuleConfig {
        self.set_fs(".", fs);
        self
    }

    fn set_fs(&mut self, path: &str, fs: FsHandle) {
        match self.preopens.iter_mut().find(|e| e.path == path) {
            Some(entry) => entry.fs = fs,
            None => self.preopens.push(FileEntry {
                path: path.to_string(),
                fs,
            }),
        }
    }

    /// Replace one import's module and name. Applied after any
    /// [ModuleConfig::with_import_module] renames.
    pub fn with_import(
        mut self,
        old_module: impl Into<String>,
        old_name: impl Into<String>,
        new_module: impl Into<String>,
        new_name: impl Into<String>,
    ) -> ModuleConfig {
        self.replaced_imports.insert(
            (old_module.into(), old_name.into()),
            (new_module.into(), new_name.into()),
        );
        self
    }

    /// Replace every import of `old_module` with `new_module`. Applied
    /// before any [ModuleConfig::with_import] replacements.
    pub fn with_import_module(
        mut self,
        old_module: impl Into<String>,
        new_module: impl Into<String>,
    ) -> ModuleConfig {
        self.replaced_import_modules
            .insert(old_module.into(), new_module.into());
        self
    }

    /// The start functions to run, defaulting to `_start`.
    pub(crate) fn start_functions(&self) -> Vec<String> {
        self.start_functions
            .clone()
            .unwrap_or_else(|| vec!["_start".to_string()])
    }

    /// The module's import list with the configured rewrites applied:
    /// module renames first, then per-import replacements. Returns None
    /// when nothing changes.
    pub(crate) fn replace_imports(&self, module: &Module) -> Option<Vec<Import>> {
        if self.replaced_import_modules.is_empty() && self.replaced_imports.is_empty() {
            return None;
        }
        let mut changed = false;
        let mut imports = module.imports.clone();
        for import in imports.iter_mut() {
            if let Some(new_module) = self.replaced_import_modules.get(&import.module) {
                import.module = new_module.clone();
                changed = true;
            }
        }
        for import in imports.iter_mut() {
            let key = (import.module.clone(), import.name.clone());
            if let Some((new_module, new_name)) = self.replaced_imports.get(&key) {
                import.module = new_module.clone();
                import.name = new_name.clone();
                changed = true;
            }
        }
        changed.then_some(imports)
    }

    /// Materialize the validated system context. Preopens are assigned file
    /// descriptors from 3 up, in mount order; when only a root file system
    /// is mounted it also serves `"."`.
    pub(crate) fn to_sys_context(&self) -> Result<SysContext, SysError> {
        let mut preopens = BTreeMap::new();
        let mut next_fd = 3u32;
        let mut root: Option<FsHandle> = None;
        let mut has_workdir = false;
        for entry in &self.preopens {
            if entry.path == "/" {
                root = Some(entry.fs.clone());
            } else if entry.path == "." {
                has_workdir = true;
            }
            preopens.insert(next_fd, entry.clone());
            next_fd += 1;
        }
        if let (Some(root), false) = (root, has_workdir) {
            preopens.insert(
                next_fd,
                FileEntry {
                    path: ".".to_string(),
                    fs:   root,
                },
            );
        }
        SysContext::new(
            self.args.clone(),
            self.environ.clone(),
            self.stdin.clone(),
            self.stdout.clone(),
            self.stderr.clone(),
            preopens,
        )
    }
}

impl std::fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("environ", &self.environ)
            .finish()
    }
}
