//! Function-call interception
//!
//! Every capability invocation made by the agent loop passes through
//! `CallInterceptor::wrap`, which records what was called, with which
//! arguments and what came back. The call log is created by the caller for a
//! single `converse` call and handed to the interceptor at construction.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::capability::{Arguments, CapabilityOutput};
use crate::error::AdvisorError;

/// One rendered argument of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub key: String,
    pub value: String,
}

/// Audit entry for one capability invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub function_name: String,
    pub group_name: String,
    pub parameters: Vec<ToolParameter>,
    pub response: Option<String>,
}

impl ToolCallRecord {
    fn from_invocation(ctx: &InvocationContext<'_>, output: &CapabilityOutput) -> Self {
        Self {
            function_name: ctx.function_name.to_string(),
            group_name: ctx.group_name.to_string(),
            parameters: ctx
                .arguments
                .iter()
                .map(|(key, value)| ToolParameter {
                    key: key.clone(),
                    value: render_argument(value),
                })
                .collect(),
            response: output.response_text(),
        }
    }
}

/// Null renders as empty, strings render without quotes, anything else as JSON
fn render_argument(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The invocation being intercepted
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext<'a> {
    pub function_name: &'a str,
    pub group_name: &'a str,
    pub arguments: &'a Arguments,
}

/// Append-only list of call records shared between a caller and its interceptor
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<ToolCallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: ToolCallRecord) {
        self.records.lock().push(record);
    }

    /// Copy of the records so far
    pub fn snapshot(&self) -> Vec<ToolCallRecord> {
        self.records.lock().clone()
    }

    /// Move the records out, leaving the log empty
    pub fn take(&self) -> Vec<ToolCallRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Records every capability invocation into its call log
pub struct CallInterceptor {
    log: CallLog,
}

impl CallInterceptor {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Run `next` exactly once and record its result
    ///
    /// A failed invocation propagates its error and leaves no record.
    pub async fn wrap<F>(
        &self,
        ctx: InvocationContext<'_>,
        next: F,
    ) -> Result<CapabilityOutput, AdvisorError>
    where
        F: Future<Output = Result<CapabilityOutput, AdvisorError>>,
    {
        let output = next.await?;
        let record = ToolCallRecord::from_invocation(&ctx, &output);
        debug!(
            function = %record.function_name,
            group = %record.group_name,
            params = record.parameters.len(),
            has_response = record.response.is_some(),
            "Recorded capability call"
        );
        self.log.push(record);
        Ok(output)
    }
}
