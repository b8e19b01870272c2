use crate::engine::MixtapeEngine;
use mixtape_core::Result;
use mixtape_export::{ExportOutcome, ExportPipeline, ExportRequest, ExportTarget};
use std::sync::Arc;

impl MixtapeEngine {
    /// Export a group, or one of its playlists, to `target`
    pub async fn export(
        &self,
        target: Arc<dyn ExportTarget>,
        request: ExportRequest,
    ) -> Result<ExportOutcome> {
        let mut pipeline = ExportPipeline::new(
            Arc::clone(&self.inner.store),
            target,
            &self.inner.config.export,
        );
        if let Some(resolver) = &self.inner.resolver {
            pipeline = pipeline.with_resolver(Arc::clone(resolver));
        }
        pipeline.run(request).await
    }
}
