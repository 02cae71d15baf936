use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, BatchConfig};
use crate::encoder::TaskEncoder;
use crate::error::Result;
use crate::service::{BatchService, RetryPolicy, RetryingService, build_service};
use crate::taxonomy::Taxonomy;
use crate::workspace::RunWorkspace;

/// Everything one labeling run needs, passed explicitly to every stage.
///
/// The service handed to `new` is always wrapped in the retry decorator.
pub struct LabelingContext {
    service: Arc<dyn BatchService>,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
    encoder: TaskEncoder,
    taxonomy: Taxonomy,
    workspace: RunWorkspace,
}

impl LabelingContext {
    pub fn new<S>(
        service: S,
        clock: Arc<dyn Clock>,
        config: BatchConfig,
        model: impl Into<String>,
        taxonomy: Taxonomy,
        root: impl Into<PathBuf>,
    ) -> Result<Self>
    where
        S: BatchService + 'static,
    {
        config.validate()?;
        let policy = RetryPolicy::from_config(&config);
        let workspace = RunWorkspace::new(root, config.batch_filename.clone());
        Ok(Self {
            service: Arc::new(RetryingService::new(service, policy, Arc::clone(&clock))),
            clock,
            config,
            encoder: TaskEncoder::new(model),
            taxonomy,
            workspace,
        })
    }

    /// Real backend, wall clock, taxonomy from configuration.
    pub fn from_app_config(app: &AppConfig, root: impl Into<PathBuf>) -> Result<Self> {
        let service = build_service(&app.service)?;
        let taxonomy = app.load_taxonomy()?;
        Self::new(
            service,
            Arc::new(SystemClock),
            app.batch.clone(),
            app.service.model.clone(),
            taxonomy,
            root,
        )
    }

    #[must_use]
    pub fn service(&self) -> &dyn BatchService {
        self.service.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    #[must_use]
    pub fn encoder(&self) -> &TaskEncoder {
        &self.encoder
    }

    #[must_use]
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    #[must_use]
    pub fn workspace(&self) -> &RunWorkspace {
        &self.workspace
    }
}
