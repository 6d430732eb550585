//! Device models: vendor command dialects behind one capability trait.
//!
//! A model wraps a [`Session`] and knows how to query versions, save the
//! configuration and install an image on one device family. Models are
//! looked up by name in a [`ModelRegistry`].

pub mod parsers;
mod registry;
pub mod vendors;

#[cfg(test)]
pub(crate) mod fake;

pub use registry::{ModelDefinition, ModelFactory, ModelRegistry};

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use secrecy::SecretString;

use crate::error::Result;
use crate::image::Image;
use crate::transport::{DEFAULT_RECONNECT_TIMEOUT, Session};

/// Default timeout for a single device command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Capabilities the upgrade orchestrator needs from a device.
///
/// `dry_run` means no device-mutating I/O: [`execute`](Model::execute) logs the
/// command and returns an empty string, and [`save_config`](Model::save_config)
/// and [`upgrade`](Model::upgrade) only run read-only queries.
#[async_trait]
pub trait Model: Send {
    /// Registry name of the model.
    fn name(&self) -> &'static str;

    /// Device platform, e.g. CPU architecture or switch family.
    async fn platform(&mut self) -> Result<String>;

    async fn software_version(&mut self) -> Result<String>;

    async fn firmware_version(&mut self) -> Result<String>;

    /// Image provider kinds this model can install from.
    fn supported_image_provider_types(&self) -> &'static [&'static str];

    /// Persist the running configuration. Fails with a command error if the
    /// device does not confirm.
    async fn save_config(&mut self, dry_run: bool) -> Result<()>;

    /// Install `image` (and `extra_images`) and bring the device back up.
    ///
    /// Returns `false` when the procedure ran but did not take effect.
    async fn upgrade(&mut self, image: &Image, extra_images: &[Image], dry_run: bool)
    -> Result<bool>;

    /// Run one command in the model's dialect.
    async fn execute(&mut self, command: &str, dry_run: bool) -> Result<String>;

    /// Run commands in order, stopping at the first failure.
    async fn execute_block(&mut self, commands: &[String], dry_run: bool) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(commands.len());
        for command in commands {
            out.push(self.execute(command, dry_run).await?);
        }
        Ok(out)
    }

    /// File name of the main upgrade package for `version`.
    async fn upgrade_package_name(&mut self, version: &str) -> Result<String>;

    /// File names of additional packages that must be upgraded with the main one.
    async fn extra_package_names(&mut self, _version: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Per-host settings handed to a model.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Name used in log messages.
    pub hostname: String,

    /// Password for privileged mode, where the dialect has one.
    pub enable_password: Option<SecretString>,

    /// How long a rebooting device may take to come back.
    pub reboot_timeout: Duration,

    /// Pause after a reload before reconnecting.
    pub reload_delay: Duration,
}

impl ModelOptions {
    /// Options with default timeouts and no enable password.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            enable_password: None,
            reboot_timeout: DEFAULT_RECONNECT_TIMEOUT,
            reload_delay: Duration::from_secs(60),
        }
    }

    /// Set the password used to enter privileged mode.
    pub fn with_enable_password(mut self, password: impl Into<String>) -> Self {
        self.enable_password = Some(SecretString::from(password.into()));
        self
    }
}

/// Log a device command the same way for every model.
pub(crate) fn log_command(hostname: &str, command: &str, dry_run: bool) {
    let marker = if dry_run { " (DRY RUN)" } else { "" };
    debug!("{}: Executing command{}: {}", hostname, marker, command);
}

/// Boxed session, as produced by [`SessionBuilder`](crate::transport::SessionBuilder).
pub type BoxedSession = Box<dyn Session>;
