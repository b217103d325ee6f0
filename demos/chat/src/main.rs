//! Load chat demo.
//!
//! A terminal client for one load conversation, plus a local server that
//! speaks the same socket protocol.
//!
//! Run a server and two clients in the same conversation:
//!   cargo run -p loadchat-demo-chat -- serve --port 8001
//!   cargo run -p loadchat-demo-chat -- client 3/42
//!   cargo run -p loadchat-demo-chat -- client 5/42

mod client;
mod protocol;
mod server;

use clap::{Parser, Subcommand};
use loadchat_client::{ChannelConfig, ChannelIdentity};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loadchat-chat", about = "Load conversation chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a conversation as `<user>/<conversation>`.
    Client {
        identity: ChannelIdentity,

        /// TOML channel config.
        #[arg(long, env = "LOADCHAT_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, env = "LOADCHAT_WS_BASE")]
        ws_base: Option<String>,

        #[arg(long, env = "LOADCHAT_API_BASE")]
        api_base: Option<String>,

        #[arg(long, env = "LOADCHAT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Run a local chat server.
    Serve {
        #[arg(long, default_value_t = 8001)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("loadchat=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Client {
            identity,
            config,
            ws_base,
            api_base,
            token,
        } => {
            let mut config = match config {
                Some(path) => ChannelConfig::load(&path)?,
                None => ChannelConfig::default(),
            };
            if let Some(ws_base) = ws_base {
                config.ws_base = ws_base;
            }
            if let Some(api_base) = api_base {
                config.api_base = api_base;
            }
            if token.is_some() {
                config.auth_token = token;
            }
            config.validate()?;
            client::run(config, identity).await
        }
        Command::Serve { port } => {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            server::run(addr).await
        }
    }
}
