//! Wirecall - Minimal RPC over raw TCP
//!
//! Serves and calls the demo `user-service`.

mod demo;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wirecall::config::{self, Config};
use wirecall::protocol;
use wirecall::{CallContext, Client, CodecRegistry, Reply, Server};

use demo::{UserRequest, UserResponse};

/// Wirecall - Minimal RPC over raw TCP
#[derive(Parser)]
#[command(name = "wirecall")]
#[command(author = "Wirecall Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Serve and call RPC services over a framed TCP protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo user-service
    Serve {
        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Call the demo user-service
    Call {
        /// Server address (host:port)
        #[arg(short, long)]
        server: Option<String>,

        /// User id to look up
        #[arg(long, default_value_t = 123)]
        id: i64,

        /// Send a oneway Notify instead of GetById
        #[arg(long)]
        oneway: bool,

        /// Deadline for the call in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Serializer code
        #[arg(long)]
        serializer: Option<u8>,

        /// Compressor code
        #[arg(long)]
        compressor: Option<u8>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol constants and built-in codecs
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { bind, port } => {
            run_server(config, bind, port).await?;
        }
        Commands::Call {
            server,
            id,
            oneway,
            timeout_ms,
            serializer,
            compressor,
        } => {
            let mut client_config = config.client;
            if let Some(server) = server {
                client_config.address = server;
            }
            if let Some(code) = serializer {
                client_config.serializer = code;
            }
            if let Some(code) = compressor {
                client_config.compressor = code;
            }
            // One call needs one connection
            client_config.pool.initial_connections = 1;

            run_call(client_config, id, oneway, timeout_ms).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

/// Serve the demo service until Ctrl+C
async fn run_server(config: Config, bind: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut server_config = config.server;
    if let Some(bind) = bind {
        server_config.bind_address = bind;
    }
    if let Some(port) = port {
        server_config.port = port;
    }
    let listen_address = server_config.listen_address();

    let mut server = Server::new(server_config);
    server.register_service(demo::service_table())?;
    let local_addr = server.start(&listen_address).await?;

    println!("\n========================================");
    println!("  Wirecall Server Running");
    println!("========================================");
    println!("  Address: {}", local_addr);
    println!("  Service: {}", demo::SERVICE_NAME);
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    server.stop().await?;
    Ok(())
}

/// Make one call against the demo service
async fn run_call(
    client_config: config::ClientConfig,
    id: i64,
    oneway: bool,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let proxy = Client::connect_and_bind(&client_config, demo::description()).await?;

    let mut ctx = CallContext::background();
    if let Some(ms) = timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ms));
    }

    let request = UserRequest { id };
    if oneway {
        let stub = proxy.stub::<UserRequest, ()>(demo::NOTIFY)?;
        stub.call(&ctx.oneway(), &request).await?;
        println!("Sent {} for user {} (oneway)", demo::NOTIFY, id);
        return Ok(());
    }

    let stub = proxy.stub::<UserRequest, UserResponse>(demo::GET_BY_ID)?;
    match stub.call(&ctx, &request).await? {
        Reply::Response(response) => println!("{}", response.msg),
        Reply::Oneway => println!("No response requested"),
    }

    Ok(())
}

/// Print protocol information
fn print_info() {
    let codecs = CodecRegistry::default();

    println!("Wirecall Protocol Information");
    println!("=============================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Fixed Header: {} bytes", protocol::FIXED_HEADER_SIZE);
    println!(
        "Max Frame Size: {} bytes (default)",
        protocol::DEFAULT_MAX_FRAME_SIZE
    );

    println!("\nSerializers:");
    for (code, name) in codecs.serializer_names() {
        println!("  {:>3}  {}", code, name);
    }

    println!("\nCompressors:");
    for (code, name) in codecs.compressor_names() {
        println!("  {:>3}  {}", code, name);
    }
}
