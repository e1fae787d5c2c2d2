//! Catalog tools exposed as capabilities

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Arguments, Capability, CapabilityOutput, ParameterSpec, Provenance};
use crate::catalog::{RemoteToolSpec, ToolCatalog};
use crate::error::AdvisorError;

/// Capability backed by a remote catalog tool
pub struct ExternalToolCapability {
    spec: RemoteToolSpec,
    catalog: Arc<dyn ToolCatalog>,
}

impl ExternalToolCapability {
    pub fn new(spec: RemoteToolSpec, catalog: Arc<dyn ToolCatalog>) -> Self {
        Self { spec, catalog }
    }
}

#[async_trait]
impl Capability for ExternalToolCapability {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.spec.parameters
    }

    fn provenance(&self) -> Provenance {
        Provenance::ExternalTool
    }

    fn input_schema(&self) -> Value {
        self.spec.input_schema.clone()
    }

    async fn invoke(
        &self,
        arguments: &Arguments,
        cancel: &CancellationToken,
    ) -> Result<CapabilityOutput, AdvisorError> {
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdvisorError::Cancelled),
            output = self.catalog.call_tool(&self.spec.name, arguments) => output,
        };
        match output {
            Ok(text) => Ok(CapabilityOutput::Text(text)),
            Err(e @ AdvisorError::CapabilityInvocation { .. }) => Err(e),
            Err(e) => Err(AdvisorError::capability(&self.spec.name, e)),
        }
    }
}
