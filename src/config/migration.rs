//! Config schema migration.

use anyhow::Result;

/// Versioned config files implement this to upgrade old schemas in place.
pub trait Migrate {
    /// Version currently stored in the file.
    fn current_version(&self) -> u32;

    /// Version this build writes.
    fn target_version() -> u32;

    /// Upgrade `self` to the target version.
    fn migrate(&mut self) -> Result<()>;
}
