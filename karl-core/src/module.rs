//! Module loader (C7): resolve, cache, and evaluate imported source
//! files. Grounded on the teacher's content-addressed program cache
//! (`programs: HashMap<[u8; 32], CompiledProgram>` in
//! `store_memory.rs`) and the `loading` in-progress tracking a
//! straightforward cycle check needs — `petgraph` is not pulled in
//! here since a `HashSet` membership check is all cycle detection
//! over an import chain requires (dropped teacher dependency, see
//! DESIGN.md).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::ast::{Parser, Program};
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::value::{ModuleBuilder, Value};

pub struct ModuleLoader {
    parser: Arc<dyn Parser>,
    project_root: PathBuf,
    cache: Mutex<std::collections::HashMap<PathBuf, Arc<Program>>>,
    loading: Mutex<HashSet<PathBuf>>,
}

impl ModuleLoader {
    pub fn new(parser: Arc<dyn Parser>, project_root: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            parser,
            project_root,
            cache: Mutex::new(std::collections::HashMap::new()),
            loading: Mutex::new(HashSet::new()),
        })
    }

    fn canonicalize(&self, path: &str) -> PathBuf {
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.project_root.join(raw)
        };
        // Best-effort normalization; the path need not exist on disk in
        // tests that supply an in-memory parser.
        joined
            .canonicalize()
            .unwrap_or_else(|_| normalize_lexically(&joined))
    }

    /// `evaluate_import(path)` resolution half of spec §4.7: parses (or
    /// fetches from cache) the module, detects cycles, and returns a
    /// `ModuleBuilder` deferring activation to call-site. A trailing
    /// `.shape` path is the shape subsystem's concern, handled by the
    /// caller before this is reached.
    pub fn resolve(&self, path: &str, base_env: &Arc<Environment>) -> Result<Value, RuntimeError> {
        let canonical = self.canonicalize(path);

        {
            let loading = self.loading.lock().unwrap();
            if loading.contains(&canonical) {
                return Err(RuntimeError::new(format!(
                    "circular import: {}",
                    canonical.display()
                )));
            }
        }

        if let Some(program) = self.cache.lock().unwrap().get(&canonical).cloned() {
            return Ok(Value::ModuleBuilder(Arc::new(ModuleBuilder {
                canonical_path: canonical,
                base_env: Arc::clone(base_env),
                program,
            })));
        }

        self.loading.lock().unwrap().insert(canonical.clone());
        let source = std::fs::read_to_string(&canonical).map_err(|e| {
            self.loading.lock().unwrap().remove(&canonical);
            RuntimeError::new(format!("cannot read module {}: {e}", canonical.display()))
        })?;

        let filename = canonical.to_string_lossy().to_string();
        let parsed = self.parser.parse(&source, &filename);
        self.loading.lock().unwrap().remove(&canonical);

        let program = parsed.map_err(|e| RuntimeError::new(e.to_string()))?;
        self.cache.lock().unwrap().insert(canonical.clone(), Arc::clone(&program));

        Ok(Value::ModuleBuilder(Arc::new(ModuleBuilder {
            canonical_path: canonical,
            base_env: Arc::clone(base_env),
            program,
        })))
    }
}

/// Lexical `.`/`..` normalization fallback for paths that don't exist
/// yet on disk (e.g. in unit tests using an in-memory `Parser`).
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParseError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubParser {
        calls: AtomicUsize,
    }

    impl Parser for StubParser {
        fn parse(&self, _source: &str, _filename: &str) -> Result<Arc<Program>, ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(vec![]))
        }
    }

    #[test]
    fn circular_import_is_rejected() {
        let parser = Arc::new(StubParser { calls: AtomicUsize::new(0) });
        let loader = ModuleLoader::new(parser, PathBuf::from("/tmp"));
        let path = PathBuf::from("/tmp/a.kl");
        loader.loading.lock().unwrap().insert(path.clone());
        let env = Environment::root();
        let err = loader.resolve("a.kl", &env).unwrap_err();
        assert!(err.message.contains("circular import"));
    }
}
