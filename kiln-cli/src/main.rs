//! Thin operator CLI: every subcommand is exactly one HTTP call against a
//! running `kiln-server`, with the response printed as pretty JSON. No
//! business logic lives here — that's the kernel's job.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let (method, path, body) = match &cli.command {
        Commands::Submit { repo, spec, description, priority } => {
            if spec.is_none() && description.is_none() {
                bail!("one of --spec or --description is required");
            }
            let mut payload = json!({ "repo": repo });
            if let Some(spec) = spec {
                payload["spec"] = json!(spec);
            }
            if let Some(description) = description {
                payload["description"] = json!(description);
            }
            if let Some(priority) = priority {
                payload["priority"] = json!(priority);
            }
            (Method::Post, "/work-items".to_string(), Some(payload))
        }
        Commands::Get { id } => (Method::Get, format!("/work-items/{id}"), None),
        Commands::List { item_type } => {
            let path = match item_type {
                Some(t) => format!("/work-items?type={t}"),
                None => "/work-items".to_string(),
            };
            (Method::Get, path, None)
        }
        Commands::Cancel { id } => (Method::Post, format!("/work-items/{id}/cancel"), None),
        Commands::Requeue { id } => (Method::Post, format!("/work-items/{id}/requeue"), None),
        Commands::Workers => (Method::Get, "/workers".to_string(), None),
        Commands::Kill { worker_id, reason } => (
            Method::Post,
            format!("/workers/{worker_id}/kill"),
            Some(json!({ "reason": reason })),
        ),
        Commands::Status => (Method::Get, "/status".to_string(), None),
        Commands::Metrics => (Method::Get, "/metrics".to_string(), None),
    };

    let url = format!("{}{path}", cli.server.trim_end_matches('/'));
    let mut request = match method {
        Method::Get => client.get(&url),
        Method::Post => client.post(&url),
    };
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.with_context(|| format!("request to {url} failed"))?;
    let status = response.status();
    let text = response.text().await.context("failed to read response body")?;
    let pretty: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    println!("{}", serde_json::to_string_pretty(&pretty)?);

    if !status.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

enum Method {
    Get,
    Post,
}
