use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the watching agent
#[derive(Parser, Debug)]
#[clap(name = "courier-agent")]
#[clap(about = "Watch a directory tree and push settled file changes to a receiver", long_about = None)]
pub struct AgentArgs {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: PathBuf,

    /// Override the receiver base URL from the config file
    #[clap(short, long, env = "COURIER_SERVER")]
    pub server: Option<String>,

    /// Override the watched directory from the config file
    #[clap(short, long)]
    pub watch: Option<PathBuf>,
}

/// CLI arguments for the receiving service
#[derive(Parser, Debug)]
#[clap(name = "courier-server")]
#[clap(about = "Receive delivered files and persist them atomically", long_about = None)]
pub struct ServerArgs {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "courier.toml", env = "COURIER_CONFIG")]
    pub config: PathBuf,

    /// Override the bind host from the config file
    #[clap(long)]
    pub host: Option<String>,

    /// Override the bind port from the config file
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Override the destination root from the config file
    #[clap(short, long)]
    pub destination: Option<PathBuf>,
}
