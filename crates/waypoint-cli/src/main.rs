use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use uuid::Uuid;

use waypoint_core::WaypointError;
use waypoint_core::app::{
    DrainOutcome, Publisher, Service, ServiceSettings, TaskProcessor, TaskTracker, UrlResolver,
    wait_for_shutdown_signal,
};
use waypoint_core::config::AppConfig;
use waypoint_core::domain::JobEnvelope;
use waypoint_core::impls::{AmqpConnector, HttpScanApi, NoopExecutor, S3ObjectStore};
use waypoint_core::observability::init_tracing;
use waypoint_core::ports::TransportConnector;

#[derive(Debug, Parser)]
#[command(name = "waypoint", version, about = "Scan-job intake and dispatch service")]
struct Cli {
    /// YAML config file (default: $WAYPOINT_CONFIG or config/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume jobs until SIGINT/SIGTERM, then wait for in-flight tasks.
    Serve,
    /// Publish one job to the queue.
    Publish(PublishArgs),
}

#[derive(Debug, Args)]
struct PublishArgs {
    #[arg(long)]
    scan_id: String,
    #[arg(long)]
    customer_id: String,
    #[arg(long)]
    api_key: String,
    #[arg(long)]
    target: String,
    /// Comma separated; entries that are not UUIDs are dropped.
    #[arg(long, default_value = "")]
    template_ids: String,
    #[arg(long)]
    target_id: Option<Uuid>,
    #[arg(long)]
    vulnerability_scan_id: Option<Uuid>,
    #[arg(long)]
    subdomain_scan_id: Option<Uuid>,
    #[arg(long)]
    spider_scan_id: Option<Uuid>,
    #[arg(long)]
    chunk_id: Option<u64>,
    #[arg(long)]
    template_tags: Option<String>,
    #[arg(long)]
    delay: Option<u64>,
    #[arg(long)]
    timeout: Option<u64>,
}

impl PublishArgs {
    fn into_envelope(self) -> Result<JobEnvelope, WaypointError> {
        let mut builder =
            JobEnvelope::builder(self.scan_id, self.customer_id, self.api_key, self.target)
                .template_ids(self.template_ids.split(','));

        if let Some(id) = self.target_id {
            builder = builder.target_id(id);
        }
        if let Some(id) = self.vulnerability_scan_id {
            builder = builder.vulnerability_scan_id(id);
        }
        if let Some(id) = self.subdomain_scan_id {
            builder = builder.subdomain_scan_id(id);
        }
        if let Some(id) = self.spider_scan_id {
            builder = builder.spider_scan_id(id);
        }
        if let Some(chunk) = self.chunk_id {
            builder = builder.chunk_id(chunk);
        }
        if let Some(tags) = self.template_tags {
            builder = builder.template_tags(tags);
        }
        if let Some(delay) = self.delay {
            builder = builder.delay(delay);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "waypoint exited with an error");
            eprintln!("waypoint: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), WaypointError> {
    let config = AppConfig::load(AppConfig::resolve_path(cli.config))?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Publish(args) => publish(config, args).await,
    }
}

async fn serve(config: AppConfig) -> Result<(), WaypointError> {
    let tracker = Arc::new(TaskTracker::new());
    let api = Arc::new(HttpScanApi::from_config(&config.api));
    let store = Arc::new(S3ObjectStore::from_config(&config.storage));
    let resolver = Arc::new(UrlResolver::new(store, api.clone()));

    let mut processor = TaskProcessor::new(tracker, resolver, Arc::new(NoopExecutor));
    if config.processing.initialize_scans {
        processor = processor.with_initializer(api);
    }

    let settings = ServiceSettings {
        consumer: config.consumer_settings(),
        drain: config.drain_config(),
        reconnect: config.reconnect_policy(),
    };
    let connector = Arc::new(AmqpConnector::from_config(&config.rabbitmq));
    let mut service = Service::new(settings, connector, Arc::new(processor));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    tracing::info!(queue = %config.rabbitmq.queue_name, "waypoint started");
    match service.run(shutdown_rx).await? {
        DrainOutcome::Drained => tracing::info!("shutdown complete"),
        DrainOutcome::TimedOut { remaining } => {
            tracing::warn!(remaining, "shutdown with tasks still in flight")
        }
    }
    Ok(())
}

async fn publish(config: AppConfig, args: PublishArgs) -> Result<(), WaypointError> {
    let job = args.into_envelope()?;
    let connector = AmqpConnector::from_config(&config.rabbitmq);
    let publisher = Publisher::new(connector.connect().await?);
    let result = publisher.publish(&job).await;
    publisher.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_args_parse_and_drop_bad_template_ids() {
        let cli = Cli::try_parse_from([
            "waypoint",
            "--config",
            "/tmp/waypoint.yaml",
            "publish",
            "--scan-id",
            "d457aca4-c14c-4e3f-aa2a-9b767eadd438",
            "--customer-id",
            "db53e4db-b173-4565-905c-7a976afc08dc",
            "--api-key",
            "k",
            "--target",
            "https://example.com",
            "--template-ids",
            "8a5d0b0e-6c1e-4a57-9a53-7a1b2c3d4e5f,nope",
            "--chunk-id",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/waypoint.yaml")));
        let Command::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        let job = args.into_envelope().unwrap();
        assert_eq!(job.template_ids().len(), 1);
        assert_eq!(job.chunk_id(), Some(2));
        assert_eq!(job.target_id(), None);
    }

    #[test]
    fn nil_scan_id_is_rejected() {
        let cli = Cli::try_parse_from([
            "waypoint",
            "publish",
            "--scan-id",
            "00000000-0000-0000-0000-000000000000",
            "--customer-id",
            "db53e4db-b173-4565-905c-7a976afc08dc",
            "--api-key",
            "k",
            "--target",
            "https://example.com",
        ])
        .unwrap();
        let Command::Publish(args) = cli.command else {
            panic!("expected publish");
        };
        assert!(matches!(
            args.into_envelope(),
            Err(WaypointError::Envelope(_))
        ));
    }
}
