//! Subcommand implementations.

pub(crate) mod archives;
pub(crate) mod list;
pub(crate) mod order;
pub(crate) mod trust;
pub(crate) mod watch;
