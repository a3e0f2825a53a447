//! Module loading and caching.
//!
//! Modules are looked up by name across the `QBPATH` search roots,
//! parsed once, linked against their imports and cached for the life
//! of the registry. Concurrent loads of the same name serialize on the
//! registry lock; import cycles are rejected rather than deadlocked.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::errors::{Fault, FaultKind};
use crate::modules::Module;

/// File extension of compiled modules.
pub const MODULE_EXTENSION: &str = "qb";

/// Environment variable holding colon-separated search roots.
pub const PATH_ENV: &str = "QBPATH";

pub struct ModuleRegistry {
    roots: Vec<PathBuf>,
    state: Mutex<RegistryState>,
    parses: AtomicUsize,
}

#[derive(Default)]
struct RegistryState {
    cache: HashMap<String, Arc<Module>, RandomState>,
    /// Names currently being linked, for import-cycle detection.
    loading: Vec<String>,
}

impl ModuleRegistry {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        ModuleRegistry {
            roots,
            state: Mutex::new(RegistryState::default()),
            parses: AtomicUsize::new(0),
        }
    }

    /// Builds a registry from `QBPATH`, defaulting to the current
    /// directory when the variable is unset or empty.
    pub fn from_env() -> Self {
        let roots = match std::env::var(PATH_ENV) {
            Ok(path) if !path.is_empty() => {
                path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect()
            }
            _ => vec![PathBuf::from(".")],
        };
        ModuleRegistry::new(roots)
    }

    /// Returns the named module, loading and linking it on first use.
    pub fn load(&self, name: &str) -> Result<Arc<Module>, Fault> {
        let mut state = self.state.lock();
        self.load_locked(&mut state, name)
    }

    /// Number of modules parsed from disk so far. Cache hits do not
    /// count.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    fn load_locked(
        &self,
        state: &mut RegistryState,
        name: &str,
    ) -> Result<Arc<Module>, Fault> {
        if let Some(module) = state.cache.get(name) {
            return Ok(module.clone());
        }
        if state.loading.iter().any(|n| n == name) {
            let mut chain = state.loading.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(name);
            return Err(Fault::new(
                FaultKind::UnresolvedImport,
                format!("import cycle: {chain}"),
            ));
        }

        let path = self.find_file(name).ok_or_else(|| {
            Fault::new(
                FaultKind::ModuleNotFound,
                format!("module '{name}' not found on {PATH_ENV}"),
            )
        })?;
        let def = parse_file(name, &path)?;
        self.parses.fetch_add(1, Ordering::Relaxed);
        if def.name != name {
            return Err(Fault::new(
                FaultKind::ModuleFormatError,
                format!("{}: file declares module '{}'", path.display(), def.name),
            ));
        }

        state.loading.push(name.to_string());
        let mut imports = Vec::with_capacity(def.imports.len());
        let mut result = Ok(());
        for import in &def.imports {
            match self.load_locked(state, import) {
                Ok(module) => imports.push(module),
                Err(fault) => {
                    result = Err(Fault::new(
                        FaultKind::UnresolvedImport,
                        format!("{name}: import '{import}' failed: {fault}"),
                    ));
                    break;
                }
            }
        }
        state.loading.pop();
        result?;

        let module = Module::link(def, imports)?;
        state.cache.insert(name.to_string(), module.clone());
        Ok(module)
    }

    fn find_file(&self, name: &str) -> Option<PathBuf> {
        for root in &self.roots {
            let candidate = root.join(name).with_extension(MODULE_EXTENSION);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

fn parse_file(name: &str, path: &Path) -> Result<qb_bytecode::ModuleDef, Fault> {
    let bytes = std::fs::read(path).map_err(|e| {
        Fault::new(
            FaultKind::ModuleNotFound,
            format!("module '{name}': cannot read {}: {e}", path.display()),
        )
    })?;
    qb_bytecode::read_module(&bytes).map_err(|e| {
        Fault::new(
            FaultKind::ModuleFormatError,
            format!("{}: {e}", path.display()),
        )
    })
}
