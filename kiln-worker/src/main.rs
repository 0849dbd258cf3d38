//! Container-side callback harness: reads the work item and its own
//! identity from the environment the Worker Supervisor's `spawn` assembled
//! (`KILN_WORK_ITEM`, `KILN_WORKER_ID`, `KILN_ORCHESTRATOR_URL`,
//! `KILN_MODE`), then reports register/heartbeat/complete/fail back over
//! HTTP. The actual agent loop that edits code is out of scope (§1); this
//! binary only owns the lifecycle contract a real agent harness would sit
//! behind.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

const ENV_WORK_ITEM: &str = "KILN_WORK_ITEM";
const ENV_WORKER_ID: &str = "KILN_WORKER_ID";
const ENV_ORCHESTRATOR_URL: &str = "KILN_ORCHESTRATOR_URL";
const ENV_MODE: &str = "KILN_MODE";

struct WorkerEnv {
    work_item: Value,
    work_item_id: String,
    worker_id: String,
    orchestrator_url: String,
    mode: String,
}

impl WorkerEnv {
    fn load() -> Result<Self> {
        let work_item_raw = env::var(ENV_WORK_ITEM).context("KILN_WORK_ITEM not set")?;
        let work_item: Value =
            serde_json::from_str(&work_item_raw).context("KILN_WORK_ITEM is not valid JSON")?;
        let work_item_id = work_item
            .get("id")
            .and_then(Value::as_str)
            .context("work item JSON missing id")?
            .to_string();
        let worker_id = env::var(ENV_WORKER_ID).context("KILN_WORKER_ID not set")?;
        let orchestrator_url =
            env::var(ENV_ORCHESTRATOR_URL).context("KILN_ORCHESTRATOR_URL not set")?;
        let mode = env::var(ENV_MODE).unwrap_or_else(|_| "execution".to_string());

        Ok(Self { work_item, work_item_id, worker_id, orchestrator_url, mode })
    }
}

struct OrchestratorClient {
    http: reqwest::Client,
    base_url: String,
}

impl OrchestratorClient {
    fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, base_url }
    }

    async fn register(&self, work_item_id: &str) -> Result<Value> {
        self.post("/workers/register", &json!({ "workItemId": work_item_id }))
            .await
    }

    async fn heartbeat(&self, worker_id: &str, iteration: u32) -> Result<()> {
        self.post(
            &format!("/workers/{worker_id}/heartbeat"),
            &json!({ "iteration": iteration }),
        )
        .await?;
        Ok(())
    }

    async fn complete(&self, worker_id: &str, payload: &impl Serialize) -> Result<()> {
        self.post(&format!("/workers/{worker_id}/complete"), payload)
            .await?;
        Ok(())
    }

    async fn fail(&self, worker_id: &str, error: &str, iteration: u32) -> Result<()> {
        self.post(
            &format!("/workers/{worker_id}/fail"),
            &json!({ "error": error, "iteration": iteration }),
        )
        .await?;
        Ok(())
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Value> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{url} returned {status}: {text}");
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let env = WorkerEnv::load().context("failed to read worker environment")?;
    let client = OrchestratorClient::new(env.orchestrator_url.clone());

    info!(
        worker_id = %env.worker_id,
        work_item_id = %env.work_item_id,
        mode = %env.mode,
        "worker harness starting"
    );

    // A pre-created Worker row usually already exists (the Supervisor's
    // `spawn` inserted it); `register` advances it to `running` if so, or
    // creates one if this container started from an out-of-band launch.
    // Either way the harness treats the response's `workerId` as
    // authoritative over the one it was handed in the environment.
    let registration = client.register(&env.work_item_id).await;
    let worker_id = match registration {
        Ok(body) => body
            .get("workerId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| env.worker_id.clone()),
        Err(e) => {
            warn!(error = %e, "register failed, continuing with env worker id");
            env.worker_id.clone()
        }
    };

    match run(&client, &worker_id, &env).await {
        Ok(()) => {
            info!(worker_id = %worker_id, "worker harness finished");
            Ok(())
        }
        Err(e) => {
            error!(worker_id = %worker_id, error = %e, "worker harness failed");
            if let Err(report_err) = client.fail(&worker_id, &e.to_string(), 0).await {
                warn!(error = %report_err, "failed to report failure to orchestrator");
            }
            Err(e)
        }
    }
}

/// Placeholder agent loop: out of scope (§1, "the per-worker agent harness
/// that actually edits code" is an external collaborator). This stands in
/// the shape a real harness would take — heartbeat, do work, complete —
/// so the contract the Worker Supervisor depends on has a real caller.
async fn run(client: &OrchestratorClient, worker_id: &str, env: &WorkerEnv) -> Result<()> {
    client.heartbeat(worker_id, 1).await?;

    let spec = env
        .work_item
        .get("spec")
        .and_then(Value::as_str)
        .or_else(|| env.work_item.get("description").and_then(Value::as_str))
        .unwrap_or("(no spec provided)");
    info!(spec, "running agent loop (stub)");

    if env.mode == "verification" {
        client
            .complete(
                worker_id,
                &json!({ "verificationPassed": true }),
            )
            .await?;
    } else {
        client
            .complete(
                worker_id,
                &json!({ "verificationEnabled": true }),
            )
            .await?;
    }

    Ok(())
}
