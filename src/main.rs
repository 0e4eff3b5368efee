use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use surge::balancer::LoadBalancer;
use surge::compute::OllamaCompute;
use surge::config::SourceConfig;
use surge::protocol::Endpoint;
use surge::service::{Service, DEFAULT_CAPACITY};
use surge::source::Source;

#[derive(Parser)]
#[command(name = "surge", about = "Distributed load-testing harness")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the traffic source: feeding stage, then measured validation cycles
    Source {
        /// JSON run configuration; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a load balancer in front of a set of services
    Balancer {
        /// Port to listen on
        listen_port: u16,
        /// Comma-separated service endpoints, e.g. "svc1:4001,svc2:4002"
        services: String,
    },
    /// Run a service worker backed by a compute model
    Service {
        /// Port to listen on
        listen_port: u16,
        /// Backend model identifier, e.g. "llama3"
        model: String,
        /// Admission queue capacity; 0 means unbounded
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
        /// Base URL of the compute backend
        #[arg(long, default_value = "http://ollama:11434")]
        backend_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().role {
        Role::Source { config } => {
            let config = match config {
                Some(path) => SourceConfig::load(&path)?,
                None => SourceConfig::default(),
            };
            let reports = Source::new(config).run().await?;
            for report in &reports {
                println!("{}", serde_json::to_string(report)?);
            }
        }
        Role::Balancer {
            listen_port,
            services,
        } => {
            let services =
                Endpoint::parse_list(&services).context("parsing service endpoint list")?;
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port));
            LoadBalancer::bind(addr, services).await?.run().await?;
        }
        Role::Service {
            listen_port,
            model,
            capacity,
            backend_url,
        } => {
            let compute = Arc::new(OllamaCompute::new(&model, backend_url));
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port));
            Service::bind(addr, capacity, compute).await?.run().await?;
        }
    }

    Ok(())
}
