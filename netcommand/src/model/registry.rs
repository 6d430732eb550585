//! Registry of device models keyed by name.

use std::fmt;

use indexmap::IndexMap;

use super::vendors;
use super::{BoxedSession, Model, ModelOptions};
use crate::error::{ConfigError, Result};

/// Builds a model around a connected (or lazily connecting) session.
pub type ModelFactory = fn(BoxedSession, ModelOptions) -> Box<dyn Model>;

/// A registered model.
#[derive(Clone)]
pub struct ModelDefinition {
    /// Model name (e.g., "routeros", "delln").
    pub name: String,

    /// Prompt the device shows after login. Sessions for this model must be
    /// configured with it.
    pub prompt: String,

    pub factory: ModelFactory,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>, factory: ModelFactory) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            factory,
        }
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// Registry for model definitions.
///
/// # Example
///
/// ```rust,no_run
/// use netcommand::model::{ModelOptions, ModelRegistry};
/// use netcommand::transport::SessionBuilder;
///
/// # async fn example() -> Result<(), netcommand::Error> {
/// let registry = ModelRegistry::with_builtin();
/// let session = SessionBuilder::new("192.168.88.1")
///     .username("admin")
///     .password("secret")
///     .prompt(registry.prompt("routeros")?)
///     .connect()
///     .await?;
/// let mut model = registry.create("routeros", session, ModelOptions::new("core-router"))?;
/// println!("{}", model.software_version().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDefinition>,
}

impl ModelRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in models.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for definition in [vendors::routeros::definition(), vendors::dell_n::definition()] {
            registry.models.insert(definition.name.clone(), definition);
        }
        registry
    }

    /// Register a model definition.
    pub fn register(&mut self, definition: ModelDefinition) -> Result<()> {
        if self.models.contains_key(&definition.name) {
            return Err(ConfigError::AlreadyRegistered {
                name: definition.name.clone(),
            }
            .into());
        }
        self.models.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Get a model definition by name.
    pub fn get(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    /// Check if a model is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    fn definition(&self, name: &str) -> Result<&ModelDefinition> {
        self.get(name).ok_or_else(|| {
            ConfigError::UnknownModel {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Prompt the named model's devices show.
    pub fn prompt(&self, name: &str) -> Result<&str> {
        Ok(&self.definition(name)?.prompt)
    }

    /// Build the named model around `session`.
    pub fn create(
        &self,
        name: &str,
        session: BoxedSession,
        options: ModelOptions,
    ) -> Result<Box<dyn Model>> {
        let definition = self.definition(name)?;
        Ok((definition.factory)(session, options))
    }
}
