use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "propusk")]
#[command(author, version, about = "Telegram login provider for ORY-Hydra-style OAuth2/OIDC servers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations and start the HTTP server
    Serve,

    /// Run database migrations and exit
    Migrate,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
