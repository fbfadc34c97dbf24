use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use esi_gateway::auth::app_auth::hash_secret;
use esi_gateway::config::{self, Config};
use esi_gateway::models::{Character, DelegatedToken};
use esi_gateway::store::postgres::{NewApp, PgStore};
use esi_gateway::store::{CharacterRepository, TokenStore};
use esi_gateway::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured.
    let telemetry_layer = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(_) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().tonic())
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "esi-gateway"),
                ])))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .context("failed to install OpenTelemetry tracer")?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        Err(_) => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "esi_gateway=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::App { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_app_command(&db, command).await
        }
        Some(cli::Commands::Character { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_character_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let db = Arc::new(db);
    let state = Arc::new(AppState::new(cfg, db.clone(), db.clone(), db)?);
    tracing::info!(
        esi_host = %state.config.esi_host,
        datasource = %state.config.esi_datasource,
        threshold = state.config.error_limit_threshold,
        "ESI upstream configured"
    );

    let app = esi_gateway::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("ESI gateway listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn handle_app_command(db: &PgStore, cmd: cli::AppCommands) -> anyhow::Result<()> {
    match cmd {
        cli::AppCommands::Add { name, secret, role } => {
            if secret.trim().is_empty() {
                anyhow::bail!("Secret cannot be empty");
            }
            let id = db
                .insert_app(&NewApp {
                    name: name.clone(),
                    secret_hash: hash_secret(&secret),
                    roles: role,
                })
                .await?;
            println!("✅ Registered application {} \"{}\"", id, name);
        }
    }
    Ok(())
}

async fn handle_character_command(
    db: &PgStore,
    cmd: cli::CharacterCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::CharacterCommands::Add {
            id,
            name,
            access_token,
            refresh_token,
            expires,
        } => {
            let expires_at = Utc
                .timestamp_opt(expires, 0)
                .single()
                .with_context(|| format!("Invalid expiry timestamp: {}", expires))?;
            let character = Character {
                id,
                name,
                valid_token: Some(true),
            };
            let token = DelegatedToken {
                character_id: id,
                access_token,
                refresh_token,
                expires_at,
            };
            db.upsert_character(&character, &token).await?;
            println!("✅ Stored character {} \"{}\"", character.id, character.name);
        }
        cli::CharacterCommands::Show { id } => {
            let Some(character) = db.find_character(id).await? else {
                println!("Character {} not found.", id);
                return Ok(());
            };
            println!("{:<12} {}", "ID:", character.id);
            println!("{:<12} {}", "Name:", character.name);
            println!(
                "{:<12} {}",
                "Valid:",
                character.valid_token.map_or("-".to_string(), |v| v.to_string())
            );
            match db.get(id).await? {
                Some(token) => {
                    let state = if token.is_expired_at(Utc::now()) {
                        "expired"
                    } else {
                        "valid"
                    };
                    println!("{:<12} {} ({})", "Expires:", token.expires_at, state);
                }
                None => println!("{:<12} none", "Token:"),
            }
        }
    }
    Ok(())
}
