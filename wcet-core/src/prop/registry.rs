use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Process-wide registry guaranteeing that two identifiers sharing a textual
/// name are the same identifier object (same type). Append-only, never
/// freed - mirrors the lifetime of the identifier registry described for the
/// concurrency model: created at startup, read-mostly thereafter.
pub struct Registry {
    names: Mutex<HashMap<&'static str, TypeId>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Register `name` for `type_id` on first sight; on subsequent calls,
    /// assert the type still matches. A name reused at a different type is a
    /// hard configuration error.
    pub fn register_or_check(&self, name: &'static str, type_id: TypeId) {
        let mut names = self.names.lock().expect("identifier registry poisoned");
        match names.get(name) {
            Some(existing) if *existing != type_id => {
                panic!(
                    "identifier `{name}` re-declared with a different type; \
                     two identifiers with the same name must share a type"
                );
            }
            Some(_) => {}
            None => {
                names.insert(name, type_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.names.lock().expect("identifier registry poisoned").len()
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The single process-wide identifier registry.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}
