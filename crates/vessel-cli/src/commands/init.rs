//! `vessel init`: second stage of container start, run inside the new
//! namespaces.

/// Replaces this process with the container command.
///
/// Only returns on failure; the parent sees the early exit and rolls back.
///
/// # Errors
///
/// Returns an error if the payload is missing or any setup step fails.
pub fn execute() -> anyhow::Result<()> {
    match vessel_core::init::run_init() {
        Ok(never) => match never {},
        Err(e) => Err(anyhow::anyhow!("container init failed: {e}")),
    }
}
