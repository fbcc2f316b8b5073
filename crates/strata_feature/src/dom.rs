//! Collaborator interfaces of the DOM layer.
//!
//! The engine never touches a document. It defines components through an
//! [`ElementRegistry`] and reads globals through an [`Environment`], both
//! provided in the bootstrap registry under
//! [`ELEMENT_REGISTRY`](crate::keys::ELEMENT_REGISTRY) and
//! [`ENVIRONMENT`](crate::keys::ENVIRONMENT). In-memory implementations are
//! the defaults.

use crate::component::ComponentId;
use crate::context::{ComponentContext, DefinitionContext};
use core::fmt;
use futures::FutureExt;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_values::Signal;

// ─────────────────────────────────────────────────────────────────────────────
// ElementRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from an [`ElementRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementRegistryError {
    /// An element with this name exists already.
    #[error("element `{name}` is already defined")]
    AlreadyDefined {
        /// The element name.
        name: String,
    },
    /// The name is not a valid custom element name.
    #[error("`{name}` is not a valid element name")]
    InvalidName {
        /// The rejected name.
        name: String,
    },
}

/// A registry of named component classes.
pub trait ElementRegistry: Send + Sync + 'static {
    /// Defines `name` as `class`.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or invalid.
    fn define(&self, name: &str, class: ComponentClass) -> Result<(), ElementRegistryError>;

    /// Returns the class defined under `name`.
    fn get(&self, name: &str) -> Option<ComponentClass>;

    /// Resolves once `name` is defined.
    fn when_defined(&self, name: &str) -> BoxFuture<'static, ()>;
}

/// Returns `true` for names starting with a lowercase ASCII letter and
/// containing a hyphen.
#[must_use]
pub fn is_valid_element_name(name: &str) -> bool {
    name.starts_with(|ch: char| ch.is_ascii_lowercase())
        && name.contains('-')
        && !name.chars().any(|ch| ch.is_ascii_uppercase() || ch.is_whitespace())
}

struct MemoryInner {
    classes: Mutex<HashMap<String, ComponentClass>>,
    version: Signal<u64>,
}

/// In-memory [`ElementRegistry`].
#[derive(Clone)]
pub struct MemoryElementRegistry {
    inner: Arc<MemoryInner>,
}

impl MemoryElementRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                classes: Mutex::new(HashMap::new()),
                version: Signal::new(0),
            }),
        }
    }

    /// Returns the defined names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.classes.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl Default for MemoryElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementRegistry for MemoryElementRegistry {
    fn define(&self, name: &str, class: ComponentClass) -> Result<(), ElementRegistryError> {
        if !is_valid_element_name(name) {
            return Err(ElementRegistryError::InvalidName {
                name: name.to_owned(),
            });
        }
        {
            let mut classes = self.inner.classes.lock();
            if classes.contains_key(name) {
                return Err(ElementRegistryError::AlreadyDefined {
                    name: name.to_owned(),
                });
            }
            classes.insert(name.to_owned(), class);
        }
        self.inner.version.set(self.inner.version.get() + 1);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<ComponentClass> {
        self.inner.classes.lock().get(name).cloned()
    }

    fn when_defined(&self, name: &str) -> BoxFuture<'static, ()> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_owned();
        async move {
            let mut version = inner.version.subscribe();
            loop {
                version.borrow_and_update();
                if inner.classes.lock().contains_key(&name) {
                    return;
                }
                if version.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
        .boxed()
    }
}

impl fmt::Debug for MemoryElementRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryElementRegistry")
            .field("names", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ComponentClass
// ─────────────────────────────────────────────────────────────────────────────

/// What an [`ElementRegistry`] stores for a defined component.
#[derive(Clone, Debug)]
pub struct ComponentClass {
    definition: DefinitionContext,
}

impl ComponentClass {
    pub(crate) fn new(definition: DefinitionContext) -> Self {
        Self { definition }
    }

    /// Returns the element name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Returns the component type.
    #[must_use]
    pub fn component(&self) -> ComponentId {
        self.definition.component()
    }

    /// Returns the definition context.
    #[must_use]
    pub fn definition(&self) -> &DefinitionContext {
        &self.definition
    }

    /// Creates a component instance context.
    #[must_use]
    pub fn instantiate(&self) -> ComponentContext {
        self.definition.create_component()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Source of environment globals.
pub trait Environment: Send + Sync + 'static {
    /// Returns the variable `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_names_need_a_hyphen() {
        assert!(is_valid_element_name("my-button"));
        assert!(is_valid_element_name("x-1"));
        assert!(!is_valid_element_name("button"));
        assert!(!is_valid_element_name("My-button"));
        assert!(!is_valid_element_name("-button"));
        assert!(!is_valid_element_name("my button-x"));
    }

    #[test]
    fn map_environment_reads_vars() {
        let environment: MapEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(environment.var("A").as_deref(), Some("1"));
        assert_eq!(environment.var("C"), None);
    }

    #[test]
    fn process_environment_misses_unset_var() {
        assert_eq!(ProcessEnvironment.var("STRATA_SURELY_UNSET_VARIABLE"), None);
    }

    #[tokio::test]
    async fn when_defined_on_unknown_name_stays_pending() {
        let registry = MemoryElementRegistry::new();
        let mut waiter = registry.when_defined("x-later");
        let polled = futures::poll!(&mut waiter);
        assert!(polled.is_pending());
    }
}
