//! Community Sense - maintenance binary
//!
//! Creates indexes, loads demo data, and tails the event stream.

use clap::{CommandFactory, Parser};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use community_sense::{
    config::{Args, Command},
    db::MongoClient,
    events::{BroadcastSink, EventSink, NatsEventSink},
    geo::GeoPoint,
    nats::NatsClient,
    seed,
    store::{EntityStore, MemoryStore, MongoStore},
    CivicCore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("community_sense={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Community Sense");
    info!("======================================");
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db: {})", args.mongodb_uri, args.mongodb_db);
    info!("NATS: {} (prefix: {})", args.nats.nats_url, args.nats.subject_prefix);
    info!("======================================");

    match args.command.clone() {
        None => {
            Args::command().print_help()?;
            println!();
        }
        Some(Command::Indexes) => {
            let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            // Opening each collection applies its schema indexes
            MongoStore::new(&mongo).await?;
            info!("Indexes applied to database '{}'", mongo.db_name());
        }
        Some(Command::Seed {
            lat,
            lng,
            spread_km,
            rng_seed,
        }) => {
            let center = GeoPoint::from_lat_lng(lat, lng)?;
            let store = open_store(&args).await;
            let sink = open_sink(&args).await;
            let core = CivicCore::new(store, sink, args.query.clone());

            let summary = seed::seed(&core, center, spread_km, rng_seed).await?;
            core.notifier.flush().await;
            info!(
                "Seeded {} issues ({} transitions, {} comments) and {} notices around {}",
                summary.issues, summary.transitions, summary.comments, summary.notices, center
            );
        }
        Some(Command::Watch) => {
            let nats = NatsClient::new(&args.nats, "community-sense-watch").await?;
            let subject = format!("{}.>", args.nats.subject_prefix);
            let mut messages = nats.subscribe(&subject).await?;
            info!("Watching {} (Ctrl-C to stop)", subject);

            loop {
                tokio::select! {
                    message = messages.next() => match message {
                        Some(message) => info!(
                            subject = %message.subject,
                            payload = %String::from_utf8_lossy(&message.payload),
                            "Event"
                        ),
                        None => {
                            warn!("Subscription closed");
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping watch");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// MongoDB store, or an in-memory one in dev mode when Mongo is unreachable
async fn open_store(args: &Args) -> Arc<dyn EntityStore> {
    let opened = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => MongoStore::new(&client).await,
        Err(e) => Err(e),
    };

    match opened {
        Ok(store) => {
            info!("MongoDB store ready");
            Arc::new(store.with_toggle_attempts(args.toggle_retries))
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB unavailable (dev mode, using in-memory store): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// NATS event sink, or an in-process broadcast in dev mode when NATS is unreachable
async fn open_sink(args: &Args) -> Arc<dyn EventSink> {
    match NatsClient::new(&args.nats, "community-sense").await {
        Ok(client) => {
            info!("NATS connected, publishing as {}", client.name());
            Arc::new(NatsEventSink::new(client, args.nats.subject_prefix.clone()))
        }
        Err(e) => {
            if args.dev_mode {
                warn!("NATS unavailable (dev mode, events stay in-process): {}", e);
                Arc::new(BroadcastSink::new(256))
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
