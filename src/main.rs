mod cli;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

use wc_av::ToolRegistry;
use wc_core::config::Config;

/// Load the config file (explicit or default location), then apply
/// environment overrides.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::load(path)?;
    config.apply_env()?;
    Ok(config)
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    // CLI flags win over config and environment
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting webconv {}", env!("CARGO_PKG_VERSION"));
    wc_server::start(config).await?;
    Ok(())
}

fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "webconv=trace,wc_server=trace,wc_pipeline=trace,wc_av=trace,wc_core=debug,tower_http=debug"
                .to_string()
        } else {
            "webconv=info,wc_server=info,wc_pipeline=info,wc_av=info,wc_core=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Version => {
            println!("webconv {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::GenerateApiKey => {
            println!("{}", generate_api_key());
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = load_config(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("ffmpeg is missing; install it or set FFMPEG_PATH")
    }
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let warnings = config.validate()?;

    println!("✓ Configuration is valid");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Max upload: {} bytes",
        config.conversion.max_upload_bytes
    );
    println!(
        "  Concurrency: {} running, {} queued",
        config.conversion.max_concurrent,
        config.conversion.max_queue_len()
    );
    println!("  Timeout: {}s", config.conversion.timeout_secs);
    println!(
        "  Scratch dir: {}",
        config.conversion.scratch_dir.display()
    );
    println!(
        "  Rate limit: {}/min per client",
        config.server.rate_limit_per_minute
    );
    for warning in warnings {
        println!("  ! {warning}");
    }

    Ok(())
}

/// 32 random bytes, URL-safe base64 without padding.
fn generate_api_key() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
