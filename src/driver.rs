pub mod in_memory;
pub mod kafka;

use async_trait::async_trait;

use crate::error::PipelineError;

/// Something that executes a [`crate::topology::Topology`] until told
/// to stop. Stopping is graceful: the transform is flushed and its
/// remaining output published before the driver returns.
#[async_trait]
pub trait Driver {
    async fn stop(self) -> Result<(), PipelineError>;
}
