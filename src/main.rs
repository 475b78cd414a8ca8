use std::env;
use std::fs;

use anyhow::{bail, Context};
use log::{error, info, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::Config;
use tokio::sync::{mpsc, watch};

use prometheus_service_discovery::aggregate::Aggregator;
use prometheus_service_discovery::config;
use prometheus_service_discovery::discover::cattle::Cattle;
use prometheus_service_discovery::discover::puppetdb::PuppetDb;
use prometheus_service_discovery::discover::static_targets::StaticTargets;
use prometheus_service_discovery::discover::{Backend, Discovery};
use prometheus_service_discovery::poll::PollLoop;
use prometheus_service_discovery::write;

const DEFAULT_CONFIG_FILE: &str = "prometheus-service-discovery.yml";

fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let level = match level {
        Some(level) => level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid log level `{}`", level))?,
        None => LevelFilter::Debug,
    };
    let stdout = ConsoleAppender::builder().build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?;
    log4rs::init_config(config)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file `{}`", path))?;
    let settings = config::load(&raw).context("failed to load config")?;

    init_logging(settings.config.log_level.as_deref())?;

    if settings.backends.is_empty() {
        bail!("no backend provided");
    }

    let sink = write::from_config(&settings.config.output)
        .context("failed to configure output")?;

    // An instance that fails validation is skipped; the others still start.
    let mut backends = Vec::new();
    for cfg in settings.backends.cattle {
        let name = cfg.name.clone();
        match Cattle::new(cfg) {
            Ok(backend) => backends.push(Discovery::Cattle(backend)),
            Err(err) => error!("[cattle/{}] failed to initialize backend: {}", name, err),
        }
    }
    for cfg in settings.backends.puppetdb {
        let name = cfg.name.clone();
        match PuppetDb::new(cfg) {
            Ok(backend) => backends.push(Discovery::PuppetDb(backend)),
            Err(err) => error!("[puppetdb/{}] failed to initialize backend: {}", name, err),
        }
    }
    for job in settings.backends.static_jobs {
        let name = job.job_name.clone();
        match StaticTargets::new(job) {
            Ok(backend) => backends.push(Discovery::Static(backend)),
            Err(err) => error!("[static/{}] failed to initialize backend: {}", name, err),
        }
    }

    let (tx, rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    for backend in backends {
        info!("[{}/{}] starting backend", backend.name(), backend.id());
        tokio::spawn(PollLoop::new(backend, tx.clone(), shutdown_rx.clone()).run());
    }
    drop(tx);

    let aggregator = Aggregator::new(rx, sink);
    let aggregator = tokio::spawn(aggregator.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let _ = aggregator.await;
    Ok(())
}
