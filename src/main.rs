use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod aggregate;
mod chart;
mod client;
mod controller;
mod error;
mod format;
mod history;
mod server;
mod session;
mod settings;

use client::HttpSource;
use controller::{Controller, ControllerOptions, Phase};
use settings::{resolve_effective_settings, DashboardSettings, PricingOverrides};

#[derive(Debug, Parser)]
#[command(name = "session_dashboard")]
#[command(about = "Admin dashboard over chat-session records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Base address of the sessions backend.
    #[arg(long)]
    api_base: Option<String>,
    /// Also fetch users and report the most active ones.
    #[arg(long)]
    with_users: bool,
    #[arg(long)]
    topic_limit: Option<usize>,
    #[arg(long)]
    top_users_limit: Option<usize>,
    #[arg(long)]
    user_price: Option<f64>,
    #[arg(long)]
    assistant_price: Option<f64>,
}

impl SourceArgs {
    fn to_settings(&self) -> DashboardSettings {
        let pricing = (self.user_price.is_some() || self.assistant_price.is_some()).then_some(PricingOverrides {
            user_per_million: self.user_price,
            assistant_per_million: self.assistant_price,
        });
        DashboardSettings {
            api_base_url: self.api_base.clone(),
            include_users: self.with_users.then_some(true),
            topic_limit: self.topic_limit,
            top_users_limit: self.top_users_limit,
            pricing,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the dashboard API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Fetch once and print the dashboard as JSON.
    Snapshot {
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { listen, source } => {
            let addr: SocketAddr = listen.parse()?;
            let effective = resolve_effective_settings(&DashboardSettings::from_env(), &source.to_settings())?;
            let metrics = PrometheusBuilder::new().install_recorder()?;
            let http = HttpSource::new(effective.api_base_url.clone());
            let state = server::AppState::new(Controller::new(ControllerOptions::from(&effective)), Arc::new(http))
                .with_metrics(metrics);
            server::serve(addr, state).await?;
        }
        Commands::Snapshot { source } => {
            let effective = resolve_effective_settings(&DashboardSettings::from_env(), &source.to_settings())?;
            let http = HttpSource::new(effective.api_base_url.clone());
            let mut dashboard = Controller::new(ControllerOptions::from(&effective));
            let ticket = dashboard.begin_refresh();
            let result = controller::fetch_snapshot(&http, ticket.include_users).await;
            dashboard.apply(ticket, result);
            if let Phase::Error { message } = dashboard.phase() {
                anyhow::bail!("{message}");
            }
            println!("{}", serde_json::to_string_pretty(&dashboard.view())?);
        }
    }
    Ok(())
}
