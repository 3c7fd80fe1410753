use super::registry;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

/// A process-wide, name-keyed, typed identifier.
///
/// Identifiers are declared as `static` constants (stable ABI, no runtime
/// allocation) rather than constructed and registered like the name-based
/// singleton pattern of the original implementation. Two `Identifier<T>`
/// values built from the same name string are considered the same identifier:
/// the first access of either registers `(name, TypeId::of::<T>())` in the
/// global [`registry`]; any later access under a different `T` is a
/// configuration error and panics, since identifier/type mismatches are a
/// programmer mistake, not a recoverable runtime state.
pub struct Identifier<T: 'static> {
    name: &'static str,
    default: T,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + fmt::Debug> Identifier<T> {
    /// Declare a new identifier with a default value.
    ///
    /// This is a `const fn` so identifiers can be declared as `static`s;
    /// registration with the global registry is deferred to first use.
    pub const fn new(name: &'static str, default: T) -> Self {
        Identifier {
            name,
            default,
            _marker: PhantomData,
        }
    }

    /// The identifier's textual name, as checked against the global registry.
    pub fn name(&self) -> &'static str {
        registry().register_or_check(self.name, TypeId::of::<T>());
        self.name
    }

    pub fn default(&self) -> &T {
        &self.default
    }
}

impl<T: fmt::Debug> fmt::Debug for Identifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identifier").field("name", &self.name).finish()
    }
}
