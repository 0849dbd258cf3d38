use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use uuid::Uuid;

use super::{ContainerHandle, ContainerInspection, ContainerRuntime, ContainerSpec, LogsRequest};
use crate::error::{KernelError, KernelResult};

pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn connect() -> KernelResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(KernelError::transient)?;
        Ok(Self { docker })
    }

    /// Tolerates "no such container" as benign per §6; any other error is
    /// surfaced transient.
    fn is_not_found(err: &BollardError) -> bool {
        matches!(err, BollardError::DockerResponseServerError { status_code, .. } if *status_code == 404)
    }
}

pub struct BollardHandle {
    docker: Docker,
    id: String,
}

#[async_trait]
impl ContainerHandle for BollardHandle {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn start(&self) -> KernelResult<()> {
        self.docker
            .start_container::<String>(&self.id, None)
            .await
            .map_err(KernelError::transient)
    }

    async fn stop(&self, grace_seconds: u32) -> KernelResult<()> {
        let opts = StopContainerOptions { t: grace_seconds as i64 };
        match self.docker.stop_container(&self.id, Some(opts)).await {
            Ok(()) => Ok(()),
            Err(e) if BollardRuntime::is_not_found(&e) => Ok(()),
            Err(e) => Err(KernelError::transient(e)),
        }
    }

    async fn logs(&self, req: LogsRequest) -> KernelResult<Vec<u8>> {
        let opts = LogsOptions::<String> {
            stdout: req.stdout,
            stderr: req.stderr,
            tail: req.tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(&self.id, Some(opts));
        let mut out = Vec::new();
        loop {
            match stream.next().await {
                Some(Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message })) => {
                    out.extend_from_slice(&message);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if BollardRuntime::is_not_found(&e) => break,
                Some(Err(e)) => return Err(KernelError::transient(e)),
                None => break,
            }
        }
        Ok(out)
    }

    async fn inspect(&self) -> KernelResult<ContainerInspection> {
        match self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => {
                let state = info.state.unwrap_or_default();
                Ok(ContainerInspection {
                    running: state.running.unwrap_or(false),
                    exit_code: state.exit_code,
                })
            }
            Err(e) if BollardRuntime::is_not_found(&e) => Ok(ContainerInspection::default()),
            Err(e) => Err(KernelError::transient(e)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn create_container(&self, spec: ContainerSpec) -> KernelResult<Box<dyn ContainerHandle>> {
        let name = format!("kiln-worker-{}", Uuid::new_v4());
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let host_config = HostConfig {
            memory: Some((spec.memory_limit_mib * 1024 * 1024) as i64),
            nano_cpus: Some((spec.cpu_cores * 1_000_000_000.0) as i64),
            pids_limit: Some(spec.pid_limit as i64),
            network_mode: Some(spec.network.clone()),
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions { name: name.clone(), platform: None };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(KernelError::transient)?;

        Ok(Box::new(BollardHandle {
            docker: self.docker.clone(),
            id: created.id,
        }))
    }

    async fn get_container(&self, id: &str) -> KernelResult<Box<dyn ContainerHandle>> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if Self::is_not_found(&e) {
                    KernelError::not_found(format!("container {id} not found"))
                } else {
                    KernelError::transient(e)
                }
            })?;

        Ok(Box::new(BollardHandle {
            docker: self.docker.clone(),
            id: id.to_string(),
        }))
    }
}
