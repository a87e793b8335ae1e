use std::sync::Arc;

use crate::ScreenPipeline;
use crate::settings::{DEFAULT_MAX_BODY_MB, PipelineSettings};

/// Shared by every request. The pipeline holds only immutable collaborators.
#[derive(Clone)]
pub struct ServerState {
    pub(crate) pipeline: Arc<ScreenPipeline>,
    pub(crate) defaults: PipelineSettings,
    pub(crate) body_limit: usize,
}

impl ServerState {
    pub fn new(pipeline: ScreenPipeline, defaults: PipelineSettings) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            defaults,
            body_limit: DEFAULT_MAX_BODY_MB * 1024 * 1024,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }
}
