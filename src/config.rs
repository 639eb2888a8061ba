use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::{env, path::PathBuf};
use uuid::Uuid;

const ENV_PREFIX: &str = "UPLOAD_BROKER_";

/// Centralized server configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL clients use to reach the storage endpoints.
    pub public_url: String,
    pub signing_secret: String,
    pub upload_ttl_secs: u64,
    pub read_ttl_secs: u64,
    /// Orphan sweep period; `None` leaves abandoned sessions in place.
    pub orphan_sweep_secs: Option<u64>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_url", &self.public_url)
            .field("signing_secret", &"<redacted>")
            .field("upload_ttl_secs", &self.upload_ttl_secs)
            .field("read_ttl_secs", &self.read_ttl_secs)
            .field("orphan_sweep_secs", &self.orphan_sweep_secs)
            .finish()
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Direct-to-storage upload session broker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve(ServerArgs),
    /// Run migrations and exit
    Migrate(ServerArgs),
    /// Create an API token for a user and print it
    IssueToken {
        /// User the token authenticates as
        user_id: Uuid,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Upload files, one upload session each
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        client: ClientArgs,
    },
    /// List your uploaded objects, newest first
    List {
        #[command(flatten)]
        client: ClientArgs,
    },
}

/// Server flags. Each overrides the matching `UPLOAD_BROKER_*` variable.
#[derive(Args, Debug, Default, Clone)]
pub struct ServerArgs {
    /// Host to bind to (overrides UPLOAD_BROKER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides UPLOAD_BROKER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides UPLOAD_BROKER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides UPLOAD_BROKER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL of this server (overrides UPLOAD_BROKER_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Upload credential lifetime in seconds (overrides UPLOAD_BROKER_UPLOAD_TTL_SECS)
    #[arg(long)]
    pub upload_ttl_secs: Option<u64>,

    /// Preview credential lifetime in seconds (overrides UPLOAD_BROKER_READ_TTL_SECS)
    #[arg(long)]
    pub read_ttl_secs: Option<u64>,

    /// Enable the orphan sweep with this period (overrides UPLOAD_BROKER_ORPHAN_SWEEP_SECS)
    #[arg(long)]
    pub orphan_sweep_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the upload broker
    #[arg(long, env = "UPLOAD_BROKER_SERVER", default_value = "http://127.0.0.1:3000")]
    pub server: String,

    /// API token from `issue-token`
    #[arg(long, env = "UPLOAD_BROKER_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl AppConfig {
    /// Merge CLI args over the process environment.
    pub fn from_env_and_args(args: &ServerArgs) -> Result<Self> {
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge CLI args over variables from `lookup`, then defaults.
    pub fn resolve(args: &ServerArgs, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let host = args
            .host
            .clone()
            .or_else(|| var("HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT")?.unwrap_or(3000),
        };
        let storage_dir = args
            .storage_dir
            .clone()
            .or_else(|| var("STORAGE_DIR"))
            .unwrap_or_else(|| "./data/objects".into());
        let database_url = args
            .database_url
            .clone()
            .or_else(|| var("DATABASE_URL"))
            .unwrap_or_else(|| "sqlite://./data/meta/upload_broker.db".into());
        let public_url = args
            .public_url
            .clone()
            .or_else(|| var("PUBLIC_URL"))
            .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));
        let signing_secret = match var("SIGNING_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "UPLOAD_BROKER_SIGNING_SECRET not set; storage URLs will not survive a restart"
                );
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
            }
        };
        let upload_ttl_secs = match args.upload_ttl_secs {
            Some(secs) => secs,
            None => parse_var(&var, "UPLOAD_TTL_SECS")?.unwrap_or(900),
        };
        let read_ttl_secs = match args.read_ttl_secs {
            Some(secs) => secs,
            None => parse_var(&var, "READ_TTL_SECS")?.unwrap_or(3600),
        };
        let orphan_sweep_secs = match args.orphan_sweep_secs {
            Some(secs) => Some(secs),
            None => parse_var(&var, "ORPHAN_SWEEP_SECS")?,
        };

        if upload_ttl_secs == 0 || read_ttl_secs == 0 {
            anyhow::bail!("credential lifetimes must be greater than zero");
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            database_url,
            public_url,
            signing_secret,
            upload_ttl_secs,
            read_ttl_secs,
            orphan_sweep_secs: orphan_sweep_secs.filter(|secs| *secs > 0),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
        None => Ok(None),
    }
}
