use anyhow::Result;
use async_trait::async_trait;

/// Lifecycle of a pairing collaborator started by `main` and stopped on shutdown.
#[async_trait]
pub trait Startable: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Start background work. Starting twice is a no-op.
    async fn start(&self) -> Result<()>;

    /// Cancel background work.
    async fn stop(&self);

    /// False when configuration disables the collaborator.
    async fn can_start(&self) -> bool;
}
