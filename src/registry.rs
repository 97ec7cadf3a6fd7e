//! Name to constructor table handed to the hosting framework at startup.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{ConfigError, PipelineConfig, TsdbConfig};
use crate::{Error, PipelineOutput, Point, TsdbOutput};
use crate::{PIPELINE_SAMPLE_CONFIG, TSDB_SAMPLE_CONFIG};

/// An output as driven by the hosting framework.
///
/// The framework connects once, calls [`Output::write`] serially with bounded
/// batches and closes on shutdown.
#[async_trait]
pub trait Output: Send {
    fn description(&self) -> &'static str;

    fn sample_config(&self) -> &'static str;

    fn connect(&mut self) -> Result<(), Error>;

    async fn write(&mut self, points: &[Point]) -> Result<(), Error>;

    fn close(&mut self) -> Result<(), Error>;
}

/// Builds an unconnected output from its TOML section.
pub type Factory = fn(toml::Table) -> Result<Box<dyn Output>, ConfigError>;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    factories: BTreeMap<&'static str, Factory>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `pandora` (TSDB) and `pipeline` outputs.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("pandora", |table| {
            let output: TsdbOutput = TsdbOutput::new(TsdbConfig::from_toml(table)?);

            Ok(Box::new(output))
        });
        registry.register("pipeline", |table| {
            let output: PipelineOutput = PipelineOutput::new(PipelineConfig::from_toml(table)?);

            Ok(Box::new(output))
        });

        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &'static str, factory: Factory) {
        self.factories.insert(name, factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// # Errors
    ///
    /// Errors if `name` is not registered or its configuration is invalid.
    pub fn build(&self, name: &str, table: toml::Table) -> Result<Box<dyn Output>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownOutput(name.to_string()))?;

        factory(table)
    }
}

#[async_trait]
impl Output for TsdbOutput {
    fn description(&self) -> &'static str {
        "Configuration for Pandora TSDB server to send metrics to"
    }

    fn sample_config(&self) -> &'static str {
        TSDB_SAMPLE_CONFIG
    }

    fn connect(&mut self) -> Result<(), Error> {
        TsdbOutput::connect(self)
    }

    async fn write(&mut self, points: &[Point]) -> Result<(), Error> {
        TsdbOutput::write(self, points).await
    }

    fn close(&mut self) -> Result<(), Error> {
        TsdbOutput::close(self)
    }
}

#[async_trait]
impl Output for PipelineOutput {
    fn description(&self) -> &'static str {
        "Configuration for Pandora Pipeline server to send metrics to"
    }

    fn sample_config(&self) -> &'static str {
        PIPELINE_SAMPLE_CONFIG
    }

    fn connect(&mut self) -> Result<(), Error> {
        PipelineOutput::connect(self)
    }

    async fn write(&mut self, points: &[Point]) -> Result<(), Error> {
        PipelineOutput::write(self, points).await
    }

    fn close(&mut self) -> Result<(), Error> {
        PipelineOutput::close(self)
    }
}
