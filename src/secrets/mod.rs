//! Secret handling.
//!
//! - [`codec`] - passphrase-based encryption of single string values
//! - [`keychain`] - OS keychain with an in-memory fallback
//!
//! # Example
//!
//! ```
//! use kapsel::secrets::{decrypt, encrypt};
//!
//! let package = encrypt("s3cret", "master password").unwrap();
//! assert_eq!(decrypt(&package, "master password").unwrap(), "s3cret");
//! assert!(decrypt(&package, "guess").unwrap_err().is_key_error());
//! ```

pub mod codec;
pub mod keychain;

pub use codec::{decrypt, encrypt, CryptoError};
pub use keychain::{InMemoryStore, PlatformKeychain, SecretStore};
