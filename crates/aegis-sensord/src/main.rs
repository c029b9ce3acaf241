//! Sensor entry point. Grounded on the teacher's `opensase-edge` binary:
//! `tracing_subscriber` env-filter init, then load-config -> build-engine ->
//! run, with no CLI parsing crate since §6 scopes CLI parsing out.
//!
//! Rule loading is one-shot (§1 Non-goals: "no dynamic rule reloading");
//! the signature graph is built once and frozen behind a plain `Arc` for
//! the lifetime of the process, matching §5's "built once under
//! single-threaded init, then frozen" contract.

mod config;
mod decode;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use aegis_alert::FastLogOutput;
use aegis_detect::loader::{load_classification_file, load_rule_file, ClassEntry};
use aegis_detect::{DetectionEngine, Signature};
use config::SensorConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worker::{cpu_count, SensorEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "aegis.toml".to_string());
    let config = SensorConfig::load(std::path::Path::new(&config_path))?;

    std::fs::create_dir_all(&config.log_dir)?;
    let alert_out = Arc::new(FastLogOutput::open(&config.fast_log_path())?);

    let signatures = load_signatures(&config)?;
    let engine = Arc::new(DetectionEngine::build(signatures));

    let worker_count = config.worker_threads.unwrap_or_else(cpu_count);
    let mut sensor = SensorEngine::start(engine, alert_out, worker_count);

    tracing::info!("aegis-sensord running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    sensor.stop();

    Ok(())
}

/// Load every configured rule file, then resolve `classtype` against the
/// classification file.
fn load_signatures(config: &SensorConfig) -> anyhow::Result<Vec<Signature>> {
    let mut signatures = Vec::new();
    for path in &config.rule_files {
        let (sigs, summary) = load_rule_file(path, config.failure_fatal)?;
        tracing::info!(
            path = %path.display(),
            loaded = summary.loaded,
            failed = summary.failed,
            "rule file loaded"
        );
        signatures.extend(sigs);
    }

    if let Some(class_path) = &config.classification_file {
        let content = std::fs::read_to_string(class_path)?;
        let table = load_classification_file(&content);
        resolve_classifications(&mut signatures, &table);
    }

    Ok(signatures)
}

/// Fill in `class_msg` (and a still-default `prio`) from the classification
/// table for rules that named a `classtype` but left the fields the parser
/// can't resolve on its own (the table isn't available until the whole rule
/// set and classification file are both loaded).
fn resolve_classifications(signatures: &mut [Signature], table: &HashMap<String, ClassEntry>) {
    const DEFAULT_PRIO: u8 = 3;
    for sig in signatures.iter_mut() {
        let Some(classtype) = &sig.class else { continue };
        let Some(entry) = table.get(classtype) else { continue };
        sig.class_msg = Some(entry.short_desc.clone());
        if sig.prio == DEFAULT_PRIO {
            sig.prio = entry.priority;
        }
    }
}

