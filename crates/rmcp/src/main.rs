//! RMCP unified launcher.
//!
//! Subcommands:
//! - `start`: serve MCP over line-delimited stdio (one session per process)
//! - `serve-http`: serve MCP over HTTP with an SSE notification channel
//! - `list-capabilities`: dump the registered catalog
//!
//! Exit codes: 0 clean shutdown, 1 configuration/startup error, 2 fatal
//! runtime error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::catalog;
use rmcp_config::Config;
use rmcp_logging::{init_logging, LogConfig};
use rmcp_server::{serve_http, McpServer, StdioTransport};
use rmcp_vfs::VfsPolicy;
use rmcp_worker::{WorkerBridge, WorkerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rmcp", about = "MCP server for statistical analysis", version)]
struct Cli {
    /// Extra configuration file merged over the system and user configs
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose stderr logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP over stdio
    Start,

    /// Serve MCP over HTTP+SSE
    ServeHttp {
        /// Bind host (overrides configuration)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print registered tools, resources and prompts
    ListCapabilities,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let app_name = match &cli.command {
        Commands::Start => "rmcp-stdio",
        Commands::ServeHttp { .. } => "rmcp-http",
        Commands::ListCapabilities => "rmcp-cli",
    };
    // The guard flushes the rolling file writer on drop; keep it alive for
    // the whole process.
    let _log_guard = match init_logging(LogConfig {
        app_name,
        debug: cli.debug,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", anyhow::Error::from(e));
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Commands::ListCapabilities => match list_capabilities(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to list capabilities: {:#}", e);
                ExitCode::from(1)
            }
        },
        Commands::Start => run_server(config, Mode::Stdio),
        Commands::ServeHttp { host, port } => {
            if let Some(host) = host {
                config.http.host = host;
            }
            if let Some(port) = port {
                config.http.port = port;
            }
            run_server(config, Mode::Http)
        }
    }
}

enum Mode {
    Stdio,
    Http,
}

fn run_server(config: Config, mode: Mode) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build async runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let server = match build_server(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("Startup error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(async {
        match mode {
            Mode::Stdio => StdioTransport::new(server, &config).run().await,
            Mode::Http => serve_http(server, &config).await,
        }
    });

    match result {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal runtime error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Materialize scripts, build the bridge/VFS/catalog, assemble the server.
fn build_server(config: &Config) -> Result<Arc<McpServer>> {
    let scripts_dir = config.worker.scripts_dir.clone().unwrap_or_else(|| {
        rmcp_config::rmcp_home()
            .join("scripts")
            .join(env!("CARGO_PKG_VERSION"))
    });
    catalog::materialize_scripts(&scripts_dir).context("Failed to materialize scripts")?;

    let bridge = Arc::new(WorkerBridge::new(WorkerConfig {
        program: config.worker.program.clone(),
        leading_args: config.worker.args.clone(),
        scripts_dir,
        max_concurrent: config.worker.max_concurrent,
        exec_timeout: Duration::from_secs(config.worker.exec_timeout_secs),
        queue_timeout: Duration::from_secs(config.worker.queue_timeout_secs),
        grace_period: Duration::from_secs(config.worker.grace_secs),
        stderr_tail_bytes: config.worker.stderr_tail_bytes,
        work_root: None,
    }));
    let vfs = Arc::new(VfsPolicy::new(config.vfs.clone()));

    let catalog = catalog::build_catalog(config, bridge, vfs)
        .context("Failed to build the tool catalog")?;
    let server = McpServer::new(config, catalog.tools, catalog.resources, catalog.prompts)
        .context("Failed to assemble the MCP server")?;
    Ok(Arc::new(server))
}

/// Dump the registered catalog to stdout.
fn list_capabilities(config: &Config) -> Result<()> {
    let server = build_server(config)?;

    println!("Tools:");
    for tool in server.tools().iter() {
        println!("  {:<22} {}", tool.name, tool.description);
    }

    println!("\nResources:");
    for descriptor in server
        .resources()
        .page(None, usize::MAX)
        .map_err(|e| anyhow::anyhow!(e.message.clone()))?
        .items
    {
        println!(
            "  {:<28} {}",
            descriptor.uri,
            descriptor.description.unwrap_or_default()
        );
    }
    for template in server.resources().template_descriptors() {
        println!(
            "  {:<28} {}",
            template.uri_template,
            template.description.unwrap_or_default()
        );
    }

    println!("\nPrompts:");
    for descriptor in server
        .prompts()
        .page(None, usize::MAX)
        .map_err(|e| anyhow::anyhow!(e.message.clone()))?
        .items
    {
        println!(
            "  {:<22} {}",
            descriptor.name,
            descriptor.description.unwrap_or_default()
        );
    }

    Ok(())
}
