//! Chanhost Test - Shared test utilities for the extension registry.
//!
//! This crate provides package fixtures, an in-memory package environment,
//! mock extension modules, and a registry harness that can be used across
//! chanhost crates as a dev-dependency.
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! chanhost-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use chanhost_test::{MockModule, PackageBuilder, RegistryHarness};
//!
//! #[tokio::test]
//! async fn test_install() {
//!     let harness = RegistryHarness::new().start().await;
//!     let package = PackageBuilder::content("org.example.foochan", "foochan").build();
//!     harness.trust(&package);
//!     let module = MockModule::new("org.example.foochan");
//!     harness.install(package, Some(&module)).await;
//!
//!     assert!(!harness.registry().get("foochan").is_fallback());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
