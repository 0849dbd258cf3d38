//! Runtime configuration for the orchestration kernel.
//!
//! Resolution order: **env var > config file (default `~/.kiln/config`,
//! override the directory with `KILN_DIR`) > hardcoded default**, the same
//! order the original worker-side config has always used.
//!
//! ```text
//! Field                    Env Var                        Config Key               Default
//! ──────────────────────── ────────────────────────────── ──────────────────────── ───────────────────────
//! max_workers              KILN_MAX_WORKERS               max_workers              2
//! daily_budget             KILN_DAILY_BUDGET               daily_budget             200
//! cooldown_seconds         KILN_COOLDOWN_SECONDS           cooldown_seconds         60
//! stale_threshold_seconds  KILN_STALE_THRESHOLD_SECONDS    stale_threshold_seconds  300
//! worker_image             KILN_WORKER_IMAGE               worker_image             ghcr.io/kiln/worker:latest
//! orchestrator_url         KILN_ORCHESTRATOR_URL           orchestrator_url         http://localhost:8080
//! verification_max_retries KILN_VERIFICATION_MAX_RETRIES   verification_max_retries 3
//! scheduler_tick_seconds   KILN_SCHEDULER_TICK_SECONDS     scheduler_tick_seconds   5
//! http_bind_addr           KILN_HTTP_BIND_ADDR             http_bind_addr           127.0.0.1:8080
//! database_url             KILN_DATABASE_URL               database_url             (required, no default)
//! redis_url                KILN_REDIS_URL                  redis_url                redis://127.0.0.1:6379
//! log_level                KILN_LOG_LEVEL                  log_level                info
//! container_memory_mib     KILN_CONTAINER_MEMORY_MIB       container_memory_mib     4096
//! container_cpu_cores      KILN_CONTAINER_CPU_CORES        container_cpu_cores      2
//! container_pid_limit      KILN_CONTAINER_PID_LIMIT        container_pid_limit      256
//! ```

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};

/// Execution-item retry backoff, in seconds, saturating at the last entry.
/// §4.5/§8: the n-th failure's delay for n in {1, 2, >=3}.
pub const EXECUTION_RETRY_BACKOFF_SECONDS: [i64; 3] = [60, 300, 1800];

/// Fixed retry cap for execution items (not independently configurable;
/// the spec names it as a constant, unlike `verification_max_retries`).
pub const EXECUTION_MAX_RETRIES: u32 = 3;

fn default_config_dir() -> PathBuf {
    env::var("KILN_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".kiln")
        })
}

/// Kernel-wide settings, resolved once at process startup.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub max_workers: u32,
    pub daily_budget: u32,
    pub cooldown_seconds: u32,
    pub stale_threshold_seconds: i64,
    pub worker_image: String,
    pub orchestrator_url: String,
    pub verification_max_retries: u32,
    pub scheduler_tick_seconds: u64,
    pub http_bind_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub log_level: String,
    pub container_memory_mib: u64,
    pub container_cpu_cores: f64,
    pub container_pid_limit: u64,
}

impl KernelConfig {
    /// Load from the environment and an optional config file, falling back
    /// to built-in defaults. `database_url` has no default and must resolve
    /// from either source or this returns an error.
    pub fn load() -> Result<Self> {
        Self::load_with_env(&default_config_dir(), |k| env::var(k).ok())
    }

    fn load_with_env(kiln_dir: &Path, get_env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::defaults();

        let config_file = kiln_dir.join("config");
        if config_file.exists() {
            let content = fs::read_to_string(&config_file)
                .with_context(|| format!("failed to read {}", config_file.display()))?;
            for (key, value) in parse_config_file(&content) {
                cfg.apply_entry(&key, &value);
            }
        }

        for (env_key, config_key) in ENV_KEYS {
            if let Some(v) = get_env(env_key) {
                cfg.apply_entry(config_key, &v);
            }
        }

        if cfg.database_url.is_empty() {
            anyhow::bail!(
                "database_url is required (set KILN_DATABASE_URL or database_url in {})",
                config_file.display()
            );
        }

        Ok(cfg)
    }

    fn defaults() -> Self {
        Self {
            max_workers: 2,
            daily_budget: 200,
            cooldown_seconds: 60,
            stale_threshold_seconds: 300,
            worker_image: "ghcr.io/kiln/worker:latest".to_string(),
            orchestrator_url: "http://localhost:8080".to_string(),
            verification_max_retries: 3,
            scheduler_tick_seconds: 5,
            http_bind_addr: "127.0.0.1:8080".to_string(),
            database_url: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_level: "info".to_string(),
            container_memory_mib: 4096,
            container_cpu_cores: 2.0,
            container_pid_limit: 256,
        }
    }

    fn apply_entry(&mut self, key: &str, value: &str) {
        match key {
            "max_workers" => {
                if let Ok(n) = value.parse::<u32>() {
                    // A non-positive cap would make canSpawnWorker() never
                    // true; clamp to at least 1 rather than trusting the
                    // environment verbatim.
                    self.max_workers = n.max(1);
                }
            }
            "daily_budget" => {
                if let Ok(n) = value.parse::<u32>() {
                    self.daily_budget = n;
                }
            }
            "cooldown_seconds" => {
                if let Ok(n) = value.parse::<u32>() {
                    self.cooldown_seconds = n;
                }
            }
            "stale_threshold_seconds" => {
                if let Ok(n) = value.parse::<i64>() {
                    self.stale_threshold_seconds = n.max(1);
                }
            }
            "worker_image" => self.worker_image = value.to_string(),
            "orchestrator_url" => self.orchestrator_url = value.to_string(),
            "verification_max_retries" => {
                if let Ok(n) = value.parse::<u32>() {
                    self.verification_max_retries = n;
                }
            }
            "scheduler_tick_seconds" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.scheduler_tick_seconds = n.max(1);
                }
            }
            "http_bind_addr" => self.http_bind_addr = value.to_string(),
            "database_url" => self.database_url = value.to_string(),
            "redis_url" => self.redis_url = value.to_string(),
            "log_level" => self.log_level = value.to_string(),
            "container_memory_mib" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.container_memory_mib = n;
                }
            }
            "container_cpu_cores" => {
                if let Ok(n) = value.parse::<f64>() {
                    self.container_cpu_cores = n;
                }
            }
            "container_pid_limit" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.container_pid_limit = n;
                }
            }
            _ => {}
        }
    }
}

const ENV_KEYS: &[(&str, &str)] = &[
    ("KILN_MAX_WORKERS", "max_workers"),
    ("KILN_DAILY_BUDGET", "daily_budget"),
    ("KILN_COOLDOWN_SECONDS", "cooldown_seconds"),
    ("KILN_STALE_THRESHOLD_SECONDS", "stale_threshold_seconds"),
    ("KILN_WORKER_IMAGE", "worker_image"),
    ("KILN_ORCHESTRATOR_URL", "orchestrator_url"),
    ("KILN_VERIFICATION_MAX_RETRIES", "verification_max_retries"),
    ("KILN_SCHEDULER_TICK_SECONDS", "scheduler_tick_seconds"),
    ("KILN_HTTP_BIND_ADDR", "http_bind_addr"),
    ("KILN_DATABASE_URL", "database_url"),
    ("KILN_REDIS_URL", "redis_url"),
    ("KILN_LOG_LEVEL", "log_level"),
    ("KILN_CONTAINER_MEMORY_MIB", "container_memory_mib"),
    ("KILN_CONTAINER_CPU_CORES", "container_cpu_cores"),
    ("KILN_CONTAINER_PID_LIMIT", "container_pid_limit"),
];

/// Parse a `key=value` config file. Lines starting with `#` and blank lines
/// are skipped.
fn parse_config_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            entries.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_fail_without_database_url() {
        let dir = TempDir::new().unwrap();
        let err = KernelConfig::load_with_env(dir.path(), no_env).unwrap_err();
        assert!(err.to_string().contains("database_url"));
    }

    #[test]
    fn defaults_otherwise_match_spec() {
        let dir = TempDir::new().unwrap();
        let cfg = KernelConfig::load_with_env(dir.path(), |k| {
            (k == "KILN_DATABASE_URL").then(|| "postgres://x".to_string())
        })
        .unwrap();
        assert_eq!(cfg.max_workers, 2);
        assert_eq!(cfg.daily_budget, 200);
        assert_eq!(cfg.cooldown_seconds, 60);
        assert_eq!(cfg.stale_threshold_seconds, 300);
        assert_eq!(cfg.verification_max_retries, 3);
        assert_eq!(cfg.scheduler_tick_seconds, 5);
    }

    #[test]
    fn file_override() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config"),
            "max_workers=5\ndatabase_url=postgres://file\ncooldown_seconds=10\n",
        )
        .unwrap();
        let cfg = KernelConfig::load_with_env(dir.path(), no_env).unwrap();
        assert_eq!(cfg.max_workers, 5);
        assert_eq!(cfg.database_url, "postgres://file");
        assert_eq!(cfg.cooldown_seconds, 10);
    }

    #[test]
    fn env_overrides_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config"),
            "max_workers=5\ndatabase_url=postgres://file\n",
        )
        .unwrap();
        let cfg = KernelConfig::load_with_env(dir.path(), |k| match k {
            "KILN_MAX_WORKERS" => Some("9".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.max_workers, 9);
        assert_eq!(cfg.database_url, "postgres://file");
    }

    #[test]
    fn max_workers_clamped_to_at_least_one() {
        let dir = TempDir::new().unwrap();
        let cfg = KernelConfig::load_with_env(dir.path(), |k| match k {
            "KILN_DATABASE_URL" => Some("postgres://x".to_string()),
            "KILN_MAX_WORKERS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.max_workers, 1);
    }
}
