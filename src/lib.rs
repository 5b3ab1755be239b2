//! kapsel - declarative project requirements.
//!
//! A project lists what it needs in `kapsel.yml`: environment variables,
//! encrypted secrets, a package environment, a Redis server, downloaded
//! files. kapsel checks each requirement and, unless asked only to check,
//! puts it in place before running one of the project's commands.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Manifest loading and validation
//! - [`envmgr`] - Package environment managers (conda)
//! - [`error`] - Error types and result aliases
//! - [`frontend`] - Output sinks for providers
//! - [`net`] - Socket probing
//! - [`prepare`] - The prepare and unprepare passes
//! - [`providers`] - One provider per requirement kind
//! - [`requirements`] - Requirements, statuses and the provider registry
//! - [`secrets`] - Secret encryption and the OS keychain
//! - [`shell`] - Subprocess execution
//! - [`state`] - The per-project local state file
//! - [`ui`] - Interactive prompts and terminal output
//!
//! # Example
//!
//! ```
//! use kapsel::config::load_project;
//! use kapsel::frontend::CollectingFrontend;
//! use kapsel::prepare::{prepare_without_interaction, PrepareOptions};
//! use kapsel::requirements::{Environ, ProvideMode, RequirementsRegistry};
//! use kapsel::secrets::InMemoryStore;
//! use std::sync::Arc;
//!
//! let temp = tempfile::TempDir::new().unwrap();
//! std::fs::write(temp.path().join("kapsel.yml"), "variables: [FOO]").unwrap();
//! let project = load_project(temp.path()).unwrap();
//! let registry = RequirementsRegistry::builder()
//!     .secrets(Arc::new(InMemoryStore::new()))
//!     .build();
//!
//! let result = prepare_without_interaction(
//!     &project,
//!     &registry,
//!     &Environ::new(),
//!     &PrepareOptions::with_mode(ProvideMode::Check),
//!     &mut CollectingFrontend::new(),
//! );
//! assert!(result.errors[0].contains("FOO is not set"));
//! ```

pub mod cli;
pub mod config;
pub mod envmgr;
pub mod error;
pub mod frontend;
pub mod net;
pub mod prepare;
pub mod providers;
pub mod requirements;
pub mod secrets;
pub mod shell;
pub mod state;
pub mod ui;

pub use error::{KapselError, Result};
