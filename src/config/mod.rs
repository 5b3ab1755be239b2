//! Project manifest loading.
//!
//! - Schema definitions in [`schema`]
//! - File discovery, parsing and validation in [`loader`]
//! - The resulting [`Project`] in [`project`]
//!
//! # Example
//!
//! ```
//! use kapsel::config::load_project;
//! use tempfile::TempDir;
//! use std::fs;
//!
//! let temp = TempDir::new().unwrap();
//! fs::write(temp.path().join("kapsel.yml"), "variables: [FOO]").unwrap();
//!
//! let project = load_project(temp.path()).unwrap();
//! assert_eq!(project.requirements[0].env_var, "FOO");
//! ```

pub mod loader;
pub mod project;
pub mod schema;

pub use loader::{
    build_project, find_project_root, load_project, manifest_path, parse_manifest,
    MANIFEST_FILENAME,
};
pub use project::{Project, ProjectCommand};
pub use schema::{CommandConfig, EnvSpecConfig, ManifestFile, VariableConfig};
