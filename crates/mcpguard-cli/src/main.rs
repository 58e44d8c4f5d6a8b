// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `mcpguard`: run the duplex proxy, or evaluate a single decision offline
//! against a policy file without standing up a server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcpguard_guard::Guard;
use mcpguard_policy::Policy;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Exit code used when the policy document fails to load or validate.
const EXIT_POLICY_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "mcpguard", version, about = "mcpguard policy proxy and CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the duplex proxy in front of a backend tool server.
    Proxy {
        /// Path to the policy document (YAML).
        #[arg(long)]
        policy: PathBuf,

        /// Upstream tool server to forward admitted traffic to.
        #[arg(long)]
        target: Url,

        /// Address to bind the proxy's own listener to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to bind the proxy's own listener to.
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },

    /// Evaluate one tool call against a policy document and print the
    /// decision, without starting a server.
    Check {
        /// Path to the policy document (YAML).
        #[arg(long)]
        policy: PathBuf,

        /// Tool name to evaluate.
        #[arg(long)]
        tool: String,

        /// Prompt text to run through the length check and heuristics.
        #[arg(long)]
        prompt: Option<String>,

        /// Caller identity to evaluate as.
        #[arg(long, default_value = "anonymous")]
        identity: String,

        /// Resource URI to check against the ACL, if any.
        #[arg(long)]
        resource: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("mcpguard=debug")
    } else {
        EnvFilter::new("mcpguard=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Proxy { policy, target, host, port } => run_proxy(&policy, target, &host, port).await,
        Commands::Check {
            policy,
            tool,
            prompt,
            identity,
            resource,
        } => run_check(&policy, &tool, prompt.as_deref(), &identity, resource.as_deref()).await,
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_POLICY_ERROR);
    }
}

fn load_guard(policy_path: &PathBuf) -> Result<Arc<Guard>> {
    let policy = Policy::load(policy_path).with_context(|| format!("load policy from {}", policy_path.display()))?;
    let guard = Guard::from_policy(Arc::new(policy)).context("build guard from policy")?;
    Ok(Arc::new(guard))
}

async fn run_proxy(policy_path: &PathBuf, target: Url, host: &str, port: u16) -> Result<()> {
    let guard = load_guard(policy_path)?;
    let server = Arc::new(mcpguard_proxy::ProxyServer::new(guard, target));
    let router = server.router();

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "mcpguard proxy listening");
    axum::serve(listener, router).await.context("proxy server exited")?;
    Ok(())
}

async fn run_check(
    policy_path: &PathBuf,
    tool: &str,
    prompt: Option<&str>,
    identity: &str,
    resource: Option<&str>,
) -> Result<()> {
    let guard = load_guard(policy_path)?;
    let resources: Vec<String> = resource.map(str::to_string).into_iter().collect();

    match guard.check_tool(identity, tool, prompt, &resources).await {
        Ok(decision) => {
            println!(
                "ALLOW {}",
                decision.quota_remaining.map_or_else(|| "-".to_string(), |q| q.to_string())
            );
        }
        Err(err) => {
            println!("DENY: {err}");
        }
    }
    Ok(())
}
