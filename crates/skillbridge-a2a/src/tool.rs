//! `delegate_to_specialist` tool: hands a request to a discovered specialist
//!
//! Registered by a host for its model's tool loop; `skillbridge tools` prints
//! the resulting definitions.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use skillbridge_core::ToolHandler;

use crate::host::{DelegationOutcome, HostAgent};

pub struct DelegateToSpecialistTool {
    host: Arc<HostAgent>,
}

impl DelegateToSpecialistTool {
    pub fn new(host: Arc<HostAgent>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl ToolHandler for DelegateToSpecialistTool {
    fn name(&self) -> &str {
        "delegate_to_specialist"
    }

    fn description(&self) -> &str {
        "Delegate a request to a specialist agent that offers the given skill. \
         Returns the specialist's structured result."
    }

    fn input_schema(&self) -> Value {
        let skills: Vec<String> = self.host.skills().into_iter().map(|s| s.id).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "skill_id": {
                    "type": "string",
                    "description": "Skill to use",
                    "enum": skills
                },
                "request": {
                    "type": "string",
                    "description": "What to ask the specialist, e.g. 'price of MSFT'"
                }
            },
            "required": ["skill_id", "request"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let skill_id = input
            .get("skill_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'skill_id' parameter"))?;
        let request = input
            .get("request")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'request' parameter"))?;

        debug!("delegate_to_specialist: {} <- {}", skill_id, request);
        match self.host.delegate(skill_id, request).await {
            DelegationOutcome::Success { artifact, data } => Ok(serde_json::json!({
                "artifact": artifact,
                "data": data,
            })),
            DelegationOutcome::Error { message } => Err(anyhow!(message)),
        }
    }
}
