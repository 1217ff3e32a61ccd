//! Docker Compose backend.
//!
//! Inspection talks to the Docker Engine API over its unix socket; roles are
//! compose services, found through the labels compose puts on every
//! container. Actuation shells out to `docker compose up --scale`, which is
//! how compose itself resizes a service.
//!
//! Neither path applies its own deadline. Callers bound every call with a
//! timeout, and the compose child process is killed when its future is
//! dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use qscale_core::OrchestratorConfig;

use crate::error::OrchestrationError;
use crate::traits::{ReplicaHealth, ReplicaId, ReplicaInspector, ReplicaScaler};

const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

/// A compose project managed through the local Docker Engine.
#[derive(Debug, Clone)]
pub struct DockerComposeOrchestrator {
    socket: PathBuf,
    project: String,
    compose_files: Vec<PathBuf>,
    docker_binary: String,
}

#[derive(Debug, Deserialize)]
struct ContainerSummary {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "Health")]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
struct ContainerHealth {
    #[serde(rename = "Status")]
    status: String,
}

impl DockerComposeOrchestrator {
    pub fn new(
        socket: impl Into<PathBuf>,
        project: impl Into<String>,
        compose_files: Vec<PathBuf>,
        docker_binary: impl Into<String>,
    ) -> Self {
        Self {
            socket: socket.into(),
            project: project.into(),
            compose_files,
            docker_binary: docker_binary.into(),
        }
    }

    /// Build from a `docker-compose` orchestrator config; `None` for other kinds.
    pub fn from_config(config: &OrchestratorConfig) -> Option<Self> {
        match config {
            OrchestratorConfig::DockerCompose {
                socket,
                project,
                compose_files,
                docker_binary,
            } => Some(Self::new(
                socket.clone(),
                project.clone(),
                compose_files.clone(),
                docker_binary.clone(),
            )),
            OrchestratorConfig::Static { .. } => None,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Engine API path listing running containers of one compose service.
    fn running_containers_path(&self, role: &str) -> String {
        let filters = serde_json::json!({
            "label": [
                format!("{PROJECT_LABEL}={}", self.project),
                format!("{SERVICE_LABEL}={role}"),
            ],
            "status": ["running"],
        });
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filters", &filters.to_string())
            .finish();
        format!("/containers/json?{query}")
    }

    /// Arguments for `docker compose up` resizing one service.
    fn scale_args(&self, role: &str, replicas: u32) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "--project-name".to_string(),
            self.project.clone(),
        ];
        for file in &self.compose_files {
            args.push("--file".to_string());
            args.push(file.display().to_string());
        }
        args.extend([
            "up".to_string(),
            "--detach".to_string(),
            "--no-deps".to_string(),
            "--no-recreate".to_string(),
            "--scale".to_string(),
            format!("{role}={replicas}"),
            role.to_string(),
        ]);
        args
    }

    /// GET a JSON document from the Engine API.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestrationError> {
        let stream = tokio::net::UnixStream::connect(&self.socket)
            .await
            .map_err(|e| {
                OrchestrationError::Connection(format!("{}: {e}", self.socket.display()))
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| OrchestrationError::Connection(format!("handshake failed: {e}")))?;

        // Drive the connection in the background; it ends when `sender` drops.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker api connection closed");
            }
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", "docker")
            .header("user-agent", "qscale/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| OrchestrationError::Connection(format!("invalid request {path}: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| OrchestrationError::Connection(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| OrchestrationError::Connection(format!("reading body failed: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(OrchestrationError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| OrchestrationError::Malformed(e.to_string()))
    }
}

fn health_from_state(state: &ContainerState) -> ReplicaHealth {
    if !state.running {
        return match state.status.as_str() {
            "created" | "restarting" => ReplicaHealth::Starting,
            _ => ReplicaHealth::Unhealthy,
        };
    }
    match state.health.as_ref().map(|h| h.status.as_str()) {
        None | Some("none") | Some("healthy") => ReplicaHealth::Ready,
        Some("starting") => ReplicaHealth::Starting,
        Some(_) => ReplicaHealth::Unhealthy,
    }
}

#[async_trait]
impl ReplicaInspector for DockerComposeOrchestrator {
    async fn running_replicas(&self, role: &str) -> Result<Vec<ReplicaId>, OrchestrationError> {
        let containers: Vec<ContainerSummary> =
            self.get_json(&self.running_containers_path(role)).await?;
        Ok(containers.into_iter().map(|c| c.id).collect())
    }

    async fn replica_health(&self, replica: &str) -> Result<ReplicaHealth, OrchestrationError> {
        let path = format!("/containers/{replica}/json");
        match self.get_json::<ContainerInspect>(&path).await {
            Ok(inspect) => Ok(health_from_state(&inspect.state)),
            Err(OrchestrationError::Api { status: 404, .. }) => {
                Err(OrchestrationError::UnknownReplica(replica.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReplicaScaler for DockerComposeOrchestrator {
    async fn scale_role(&self, role: &str, replicas: u32) -> Result<(), OrchestrationError> {
        let args = self.scale_args(role, replicas);
        debug!(binary = %self.docker_binary, ?args, "running compose scale");

        let output = tokio::process::Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OrchestrationError::Connection(format!("failed to run {}: {e}", self.docker_binary))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(OrchestrationError::Rejected {
                role: role.to_string(),
                reason: if stderr.is_empty() {
                    format!("compose exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        info!(project = %self.project, %role, replicas, "compose service scaled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> DockerComposeOrchestrator {
        DockerComposeOrchestrator::new(
            "/var/run/docker.sock",
            "n8n",
            vec![PathBuf::from("docker-compose.yml")],
            "docker",
        )
    }

    fn state(json: &str) -> ContainerState {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn running_containers_path_encodes_filters() {
        let path = orchestrator().running_containers_path("n8n-worker");
        assert!(path.starts_with("/containers/json?filters="));

        let query = path.split_once('?').unwrap().1;
        let (key, value) = url::form_urlencoded::parse(query.as_bytes()).next().unwrap();
        assert_eq!(key, "filters");

        let filters: serde_json::Value = serde_json::from_str(&value).unwrap();
        assert_eq!(filters["status"][0], "running");
        assert_eq!(filters["label"][0], "com.docker.compose.project=n8n");
        assert_eq!(filters["label"][1], "com.docker.compose.service=n8n-worker");
    }

    #[test]
    fn scale_args_target_one_service() {
        let args = orchestrator().scale_args("n8n-worker", 3);
        assert_eq!(
            args,
            [
                "compose",
                "--project-name",
                "n8n",
                "--file",
                "docker-compose.yml",
                "up",
                "--detach",
                "--no-deps",
                "--no-recreate",
                "--scale",
                "n8n-worker=3",
                "n8n-worker",
            ]
        );
    }

    #[test]
    fn health_without_healthcheck_follows_running_flag() {
        assert_eq!(
            health_from_state(&state(r#"{"Status":"running","Running":true}"#)),
            ReplicaHealth::Ready
        );
        assert_eq!(
            health_from_state(&state(r#"{"Status":"created","Running":false}"#)),
            ReplicaHealth::Starting
        );
        assert_eq!(
            health_from_state(&state(r#"{"Status":"exited","Running":false}"#)),
            ReplicaHealth::Unhealthy
        );
    }

    #[test]
    fn health_uses_healthcheck_when_declared() {
        assert_eq!(
            health_from_state(&state(
                r#"{"Status":"running","Running":true,"Health":{"Status":"starting"}}"#
            )),
            ReplicaHealth::Starting
        );
        assert_eq!(
            health_from_state(&state(
                r#"{"Status":"running","Running":true,"Health":{"Status":"healthy"}}"#
            )),
            ReplicaHealth::Ready
        );
        assert_eq!(
            health_from_state(&state(
                r#"{"Status":"running","Running":true,"Health":{"Status":"unhealthy"}}"#
            )),
            ReplicaHealth::Unhealthy
        );
    }

    #[test]
    fn from_config_only_for_docker_compose() {
        let config = OrchestratorConfig::Static {
            replicas: Default::default(),
        };
        assert!(DockerComposeOrchestrator::from_config(&config).is_none());

        let config = OrchestratorConfig::DockerCompose {
            socket: PathBuf::from("/tmp/docker.sock"),
            project: "n8n".to_string(),
            compose_files: vec![],
            docker_binary: "docker".to_string(),
        };
        let orchestrator = DockerComposeOrchestrator::from_config(&config).unwrap();
        assert_eq!(orchestrator.socket(), Path::new("/tmp/docker.sock"));
    }
}
