//! Control-plane REST client

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MachineError;

/// Poll interval while waiting for a machine to exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MachineSize {
    pub cpu_kind: &'static str,
    pub cpus: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Destroyed,
    Failed,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MachineState::Stopped | MachineState::Destroyed | MachineState::Failed
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Machine {
    pub id: String,
    pub state: MachineState,
}

/// What to boot.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionRequest {
    pub name: String,
    pub image: String,
    pub size: MachineSize,
    /// Environment handed to the runner process inside the VM.
    pub env: HashMap<String, String>,
}

/// Provision/wait/destroy against the machine control plane.
#[derive(Clone)]
pub struct ControlPlaneClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(endpoint: String, token: String) -> Result<Self, MachineError> {
        if endpoint.is_empty() {
            return Err(MachineError::Configuration(
                "machine.api_endpoint is not set".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MachineError::Configuration(e.to_string()))?;
        Ok(Self {
            endpoint,
            token,
            client,
        })
    }

    pub async fn provision(&self, request: &ProvisionRequest) -> Result<Machine, MachineError> {
        let response = self
            .client
            .post(format!("{}/machines", self.endpoint))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MachineError::Api(format!(
                "provision HTTP {}: {}",
                status, body
            )));
        }

        let machine: Machine = response
            .json()
            .await
            .map_err(|e| MachineError::Api(e.to_string()))?;
        tracing::info!(machine_id = %machine.id, image = %request.image, "machine provisioned");
        Ok(machine)
    }

    pub async fn get(&self, machine_id: &str) -> Result<Machine, MachineError> {
        let response = self
            .client
            .get(format!("{}/machines/{}", self.endpoint, machine_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MachineError::Api(format!("get HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| MachineError::Api(e.to_string()))
    }

    /// Poll until the machine reaches a terminal state or the deadline
    /// passes. The caller destroys on timeout.
    pub async fn wait_for_exit(
        &self,
        machine_id: &str,
        timeout: Duration,
    ) -> Result<MachineState, MachineError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let machine = self.get(machine_id).await?;
            if machine.state.is_terminal() {
                tracing::info!(machine_id, state = ?machine.state, "machine exited");
                return Ok(machine.state);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MachineError::WaitTimeout(timeout.as_secs()));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn destroy(&self, machine_id: &str) -> Result<(), MachineError> {
        let response = self
            .client
            .delete(format!("{}/machines/{}", self.endpoint, machine_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        // Destroying an already-gone machine is fine.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MachineError::Api(format!(
                "destroy HTTP {}: {}",
                status, body
            )));
        }
        tracing::info!(machine_id, "machine destroyed");
        Ok(())
    }
}
