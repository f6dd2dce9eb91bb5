//! shrike - IRC bot that runs shell commands.
//!
//! Connects to one server, registers, joins the configured channels, and
//! turns prefixed channel messages into supervised shell invocations.

use std::time::Duration;

use shrike::client::{Client, ClientConfig};
use shrike::config::Config;
use shrike::error::ClientError;
use shrike::exec::{CommandRunner, Supervisor};
use shrike::sched::FloodPolicy;
use shrike::{bot, bot::BotOptions};
use shrike_proto::transport::TlsOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "shrike.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    // Privilege validation happens before anything touches the network: a
    // privilege drop needs root, and running commands as root is never OK.
    let is_root = nix::unistd::Uid::effective().is_root();
    if config.exec.user.is_some() && !is_root {
        anyhow::bail!("exec.user is set; start as root so privileges can be dropped");
    }
    if config.exec.user.is_none() && is_root {
        anyhow::bail!("refusing to run commands as root; set exec.user to drop privileges");
    }

    let supervisor = Supervisor::new(&config.exec)?;
    let runner = CommandRunner::spawn(supervisor);

    info!(
        host = %config.server.host,
        port = config.server.port,
        nickname = %config.bot.nickname,
        "Starting shrike"
    );

    loop {
        match run_session(&config, runner.clone()).await {
            Ok(()) => info!("disconnected from server"),
            Err(e @ ClientError::NicknameInUse(_)) => return Err(e.into()),
            Err(e) => error!(error = %e, "session ended"),
        }

        // Anything still queued belongs to the dead connection.
        runner.reset();

        info!(seconds = RECONNECT_DELAY.as_secs(), "reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn run_session(config: &Config, runner: CommandRunner) -> Result<(), ClientError> {
    let client_config = ClientConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        tls: config.server.tls,
        tls_options: TlsOptions {
            ca_file: config.server.ca_file.clone(),
        },
        flood: config.flood.enabled.then(|| FloodPolicy {
            unit_delay: config.flood.unit_delay(),
            max_delay: config.flood.max_delay(),
            idle_reset: config.flood.idle_reset(),
        }),
    };

    let mut client = Client::connect(&client_config).await?;
    bot::attach(
        &mut client,
        runner,
        BotOptions {
            prefix: config.bot.prefix.clone(),
            allow_queries: config.bot.allow_queries,
            max_lines: config.bot.max_lines,
        },
    );

    if let Some(password) = &config.server.password {
        client.password(password)?;
    }
    client
        .register(&config.bot.nickname, config.bot.realname.as_deref())
        .await?;

    let handle = client.handle();
    for channel in &config.bot.channels {
        handle.join(channel)?;
    }

    client.listen().await
}
