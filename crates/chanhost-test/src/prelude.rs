//! Prelude module - commonly used test utilities.
//!
//! Use `use chanhost_test::prelude::*;` to import all essential helpers.

pub use crate::{
    MemoryEnvironment, MockModule, PackageBuilder, RecordingSubscriber, RegistryHarness,
    RunningHarness, fingerprint_of, init_test_logging,
};
