//! Configuration sourced from the CLI

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "asena", version, about = "Asena reverse proxy")]
pub struct Cli {
    /// Path to the static configuration file in YAML format
    #[arg(long, default_value = "asena.yaml")]
    pub config_file: PathBuf,

    /// Path to the dynamic (hot-reloadable) configuration file in YAML format
    #[arg(long, default_value = "dynamic.yaml")]
    pub dynamic_file: PathBuf,

    /// HTTP port for Asena, e.g. ":8080"
    #[arg(long)]
    pub http_port: Option<String>,

    /// HTTPS port for Asena, e.g. ":8443"
    #[arg(long)]
    pub https_port: Option<String>,

    /// Path to SSL/TLS certificate file
    #[arg(long)]
    pub cert_file: Option<PathBuf>,

    /// Path to SSL/TLS private key file
    #[arg(long)]
    pub key_file: Option<PathBuf>,
}
