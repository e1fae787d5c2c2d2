//! Test doubles for capabilities

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Arguments, Capability, CapabilityOutput, ParameterKind, ParameterSpec, Provenance};
use crate::error::AdvisorError;

/// Capability returning a fixed text, optionally after a delay or with a failure
pub(crate) struct StaticCapability {
    name: String,
    output: String,
    parameters: Vec<ParameterSpec>,
    provenance: Provenance,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl StaticCapability {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            parameters: vec![ParameterSpec::optional(
                "input",
                ParameterKind::String,
                "Free-form input",
            )],
            provenance: Provenance::ExternalTool,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Capability for StaticCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.output
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    fn provenance(&self) -> Provenance {
        self.provenance
    }

    async fn invoke(
        &self,
        _arguments: &Arguments,
        _cancel: &CancellationToken,
    ) -> Result<CapabilityOutput, AdvisorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(AdvisorError::capability(&self.name, message)),
            None => Ok(CapabilityOutput::Text(self.output.clone())),
        }
    }
}
