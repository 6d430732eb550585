//! # netcommand
//!
//! Async automation of interactive network device shells over SSH and
//! Telnet, with a firmware upgrade orchestrator on top.
//!
//! ## Features
//!
//! - SSH sessions via russh, directly or tunnelled through a jump host
//! - Telnet sessions with an in-band login dialog
//! - Prompt detection with programmable answers to intermediate prompts
//! - Reconnect after reboot with a bounded reachability wait
//! - Vendor models behind one capability trait, looked up by name
//! - Upgrade orchestration that never downgrades and verifies the result
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netcommand::model::{ModelOptions, ModelRegistry};
//! use netcommand::transport::SessionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netcommand::Error> {
//!     let registry = ModelRegistry::with_builtin();
//!     let session = SessionBuilder::new("192.168.1.1")
//!         .username("admin")
//!         .password("secret")
//!         .prompt(registry.prompt("delln")?)
//!         .connect()
//!         .await?;
//!
//!     let mut model = registry.create("delln", session, ModelOptions::new("sw1"))?;
//!     println!("{}", model.software_version().await?);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod image;
pub mod model;
pub mod transport;
pub mod upgrade;
pub mod version;

pub use error::{Error, Result};
pub use image::{Image, ImageProvider, LocalImageProvider, NetworkImage};
pub use model::{Model, ModelOptions, ModelRegistry};
pub use transport::{Session, SessionBuilder, TransportKind};
pub use upgrade::{UpgradeResult, UpgradeStatus, Verdict, update_host, upgrade};
pub use version::{Version, compare};
