use clap::{Parser, Subcommand};

/// ESI gateway: authenticated ESI access for registered applications
#[derive(Parser)]
#[command(name = "esi-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind, overrides ESI_GATEWAY_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage registered applications
    App {
        #[command(subcommand)]
        command: AppCommands,
    },

    /// Manage characters and their delegated tokens
    Character {
        #[command(subcommand)]
        command: CharacterCommands,
    },
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// Register an application, prints its id
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        secret: String,
        /// Roles to grant, e.g. app,app-esi
        #[arg(long, value_delimiter = ',', default_values_t = vec!["app".to_string(), "app-esi".to_string()])]
        role: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum CharacterCommands {
    /// Insert or replace a character and its token
    Add {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        /// Access token expiry as a unix timestamp
        #[arg(long, default_value_t = 0)]
        expires: i64,
    },
    /// Show a character and its token state
    Show {
        #[arg(long)]
        id: i64,
    },
}
