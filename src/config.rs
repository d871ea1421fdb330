//! Configuration for Community Sense
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};

/// Community Sense - civic issue reporting core
#[derive(Parser, Debug, Clone)]
#[command(name = "community-sense")]
#[command(about = "Civic issue lifecycle and geospatial retrieval core")]
pub struct Args {
    /// Enable development mode (in-memory store and in-process events when
    /// MongoDB or NATS are unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Query defaults
    #[command(flatten)]
    pub query: QueryArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "community_sense")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Attempts for an atomic toggle before giving up with a conflict
    #[arg(long, env = "TOGGLE_RETRIES", default_value = "5")]
    pub toggle_retries: u32,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Maintenance commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create collection indexes (2dsphere + compound) and exit
    Indexes,
    /// Load demo issues and notices around a center point
    Seed {
        /// Center latitude
        #[arg(long, default_value = "40.7128", allow_negative_numbers = true)]
        lat: f64,
        /// Center longitude
        #[arg(long, default_value = "-74.0060", allow_negative_numbers = true)]
        lng: f64,
        /// Scatter radius in kilometers
        #[arg(long, default_value = "3.0")]
        spread_km: f64,
        /// Fixed RNG seed for a reproducible layout
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Tail published domain events from NATS
    Watch,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Subject prefix for published domain events
    #[arg(long, env = "EVENT_SUBJECT_PREFIX", default_value = "civic")]
    pub subject_prefix: String,
}

/// Defaults applied by the query service
#[derive(Parser, Debug, Clone)]
pub struct QueryArgs {
    /// Page size when the caller gives none
    #[arg(long, env = "DEFAULT_PER_PAGE", default_value = "20")]
    pub default_per_page: u32,

    /// Upper bound on page size
    #[arg(long, env = "MAX_PER_PAGE", default_value = "100")]
    pub max_per_page: u32,

    /// Notice search radius when a point is given without one
    #[arg(long, env = "NOTICE_RADIUS_KM", default_value = "25")]
    pub notice_radius_km: f64,

    /// Nearby reports radius when the caller gives none
    #[arg(long, env = "NEARBY_RADIUS_KM", default_value = "5")]
    pub nearby_radius_km: f64,

    /// Transparent retries for failed geo reads
    #[arg(long, env = "READ_RETRIES", default_value = "2")]
    pub read_retries: u32,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            max_per_page: 100,
            notice_radius_km: 25.0,
            nearby_radius_km: 5.0,
            read_retries: 2,
        }
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let q = &self.query;
        if q.default_per_page == 0 || q.max_per_page == 0 {
            return Err("DEFAULT_PER_PAGE and MAX_PER_PAGE must be positive".to_string());
        }
        if q.default_per_page > q.max_per_page {
            return Err("DEFAULT_PER_PAGE must be less than or equal to MAX_PER_PAGE".to_string());
        }
        if !(q.notice_radius_km > 0.0) || !(q.nearby_radius_km > 0.0) {
            return Err("Default radii must be positive".to_string());
        }
        if self.toggle_retries == 0 {
            return Err("TOGGLE_RETRIES must be at least 1".to_string());
        }
        if self.nats.subject_prefix.is_empty() || self.nats.subject_prefix.contains(' ') {
            return Err("EVENT_SUBJECT_PREFIX must be a non-empty subject token".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let args = Args::parse_from(["community-sense"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.query.default_per_page, 20);
        assert_eq!(args.nats.subject_prefix, "civic");
        assert!(args.command.is_none());
    }

    #[test]
    fn test_rejects_page_size_above_cap() {
        let args = Args::parse_from([
            "community-sense",
            "--default-per-page",
            "200",
            "--max-per-page",
            "100",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_seed_subcommand() {
        let args = Args::parse_from(["community-sense", "seed", "--lat", "51.5", "--lng", "-0.12"]);
        match args.command {
            Some(Command::Seed {
                lat,
                lng,
                spread_km,
                rng_seed,
            }) => {
                assert_eq!(lat, 51.5);
                assert_eq!(lng, -0.12);
                assert_eq!(spread_km, 3.0);
                assert_eq!(rng_seed, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
