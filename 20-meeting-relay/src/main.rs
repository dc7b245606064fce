use std::{io::IsTerminal, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use meeting_relay::{
    auth::{Authenticator, MemoryAuthenticator},
    cli::{Cli, Command},
    client,
    server::RelayServer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let config = args.into_config();
            let auth: Arc<dyn Authenticator> = match &config.users_file {
                Some(path) => Arc::new(
                    MemoryAuthenticator::open(path)
                        .with_context(|| format!("failed to open {}", path.display()))?,
                ),
                None => Arc::new(MemoryAuthenticator::new()),
            };

            let server = RelayServer::bind(config, auth).await?;
            let addr = server.local_addr()?;
            info!("relay listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
