use crate::services::{
    cache_service::{
        CacheOptions, DEFAULT_MAX_ENTRIES, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, FetchMode,
    },
    path_organizer::{DEFAULT_MAX_PATH_LEN, DEFAULT_TEMPLATE, PathOrganizer, PathTemplate},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "BLACKRENT_MEDIA_";
const DEFAULT_WARM_MANIFESTS: u32 = 100;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub path_template: String,
    pub max_path_len: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub cache_max_memory_bytes: Option<usize>,
    pub cache_sweep_interval: Duration,
    pub cache_coalesce: bool,
    /// How many recent manifests to preload at startup. Zero disables warming.
    pub warm_manifests: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "BlackRent protocol media service")]
pub struct Args {
    /// Host to bind to (overrides BLACKRENT_MEDIA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLACKRENT_MEDIA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides BLACKRENT_MEDIA_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BLACKRENT_MEDIA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage key template (overrides BLACKRENT_MEDIA_PATH_TEMPLATE)
    #[arg(long)]
    pub path_template: Option<String>,

    /// Default cache TTL in seconds (overrides BLACKRENT_MEDIA_CACHE_TTL_SECS)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Share one fetch between concurrent cache misses
    #[arg(long)]
    pub cache_coalesce: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(format!("{ENV_PREFIX}{name}")))?;
        Ok((cfg, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let string = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {ENV_PREFIX}{name}")),
            }
        };
        let parsed = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {ENV_PREFIX}{name}")),
            }
        };

        let port = match args.port {
            Some(port) => port,
            None => parse_env(parsed("PORT")?, "PORT")?.unwrap_or(3000),
        };
        let cache_ttl_secs = match args.cache_ttl_secs {
            Some(secs) => secs,
            None => parse_env(parsed("CACHE_TTL_SECS")?, "CACHE_TTL_SECS")?
                .unwrap_or(DEFAULT_TTL.as_secs()),
        };
        let cache_coalesce = args.cache_coalesce
            || parse_env::<bool>(parsed("CACHE_COALESCE")?, "CACHE_COALESCE")?.unwrap_or(false);

        let cfg = Self {
            host: match args.host {
                Some(host) => host,
                None => string("HOST", "0.0.0.0")?,
            },
            port,
            storage_dir: match args.storage_dir {
                Some(dir) => dir,
                None => string("STORAGE_DIR", "./data/media")?,
            },
            database_url: match args.database_url {
                Some(url) => url,
                None => string("DATABASE_URL", "sqlite://./data/meta/media.db")?,
            },
            path_template: match args.path_template {
                Some(template) => template,
                None => string("PATH_TEMPLATE", DEFAULT_TEMPLATE)?,
            },
            max_path_len: parse_env(parsed("MAX_PATH_LEN")?, "MAX_PATH_LEN")?
                .unwrap_or(DEFAULT_MAX_PATH_LEN),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_max_entries: parse_env(parsed("CACHE_MAX_ENTRIES")?, "CACHE_MAX_ENTRIES")?
                .unwrap_or(DEFAULT_MAX_ENTRIES),
            cache_max_memory_bytes: parse_env(
                parsed("CACHE_MAX_MEMORY_BYTES")?,
                "CACHE_MAX_MEMORY_BYTES",
            )?,
            cache_sweep_interval: parse_env(parsed("CACHE_SWEEP_SECS")?, "CACHE_SWEEP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            cache_coalesce,
            warm_manifests: parse_env(parsed("WARM_MANIFESTS")?, "WARM_MANIFESTS")?
                .unwrap_or(DEFAULT_WARM_MANIFESTS),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_path_len == 0 {
            bail!("{ENV_PREFIX}MAX_PATH_LEN must be greater than zero");
        }
        if self.cache_max_entries == 0 {
            bail!("{ENV_PREFIX}CACHE_MAX_ENTRIES must be greater than zero");
        }
        if self.cache_sweep_interval.is_zero() {
            bail!("{ENV_PREFIX}CACHE_SWEEP_SECS must be greater than zero");
        }
        self.path_organizer()?;
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn path_organizer(&self) -> Result<PathOrganizer> {
        let template = PathTemplate::parse(&self.path_template)
            .with_context(|| format!("parsing path template `{}`", self.path_template))?;
        Ok(PathOrganizer::new(template, self.max_path_len))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.cache_ttl,
            max_entries: self.cache_max_entries,
            max_memory_bytes: self.cache_max_memory_bytes,
            fetch_mode: if self.cache_coalesce {
                FetchMode::Coalesced
            } else {
                FetchMode::Independent
            },
            ..CacheOptions::default()
        }
    }
}

fn parse_env<T>(value: Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{}`", raw))
        })
        .transpose()
}
