use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::errors::HarnessError;
use crate::utils::parse_duration_string;

/// Backend selector as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServerSelector {
    All,
    Flask,
    #[value(name = "flask_gunicorn")]
    FlaskGunicorn,
    Fastapi,
}

/// Data-source selector as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PathSelector {
    All,
    Db,
    Json,
}

/// One of the three interchangeable server implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Flask,
    FlaskGunicorn,
    FastApi,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Flask => "flask",
            Backend::FlaskGunicorn => "flask_gunicorn",
            Backend::FastApi => "fastapi",
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Backend::Flask => 5555,
            Backend::FlaskGunicorn => 6666,
            Backend::FastApi => 7777,
        }
    }

    pub fn script_name(&self) -> &'static str {
        match self {
            Backend::Flask => "flask_server.py",
            Backend::FlaskGunicorn => "flask_gunicorn_server.py",
            Backend::FastApi => "fast_server.py",
        }
    }
}

impl TryFrom<ServerSelector> for Backend {
    type Error = HarnessError;

    fn try_from(selector: ServerSelector) -> Result<Self, Self::Error> {
        match selector {
            ServerSelector::All => Err(HarnessError::NotImplemented("server")),
            ServerSelector::Flask => Ok(Backend::Flask),
            ServerSelector::FlaskGunicorn => Ok(Backend::FlaskGunicorn),
            ServerSelector::Fastapi => Ok(Backend::FastApi),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the backend reads item data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPath {
    Db,
    Json,
}

impl AccessPath {
    pub fn name(&self) -> &'static str {
        match self {
            AccessPath::Db => "db",
            AccessPath::Json => "json",
        }
    }
}

impl TryFrom<PathSelector> for AccessPath {
    type Error = HarnessError;

    fn try_from(selector: PathSelector) -> Result<Self, Self::Error> {
        match selector {
            PathSelector::All => Err(HarnessError::NotImplemented("path")),
            PathSelector::Db => Ok(AccessPath::Db),
            PathSelector::Json => Ok(AccessPath::Json),
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration_string(s)
}

/// Fetch N items from one backend with a fixed worker pool and log every step.
#[derive(Debug, Parser)]
#[command(name = "fetch_harness", version, about, long_about = None)]
pub struct Cli {
    /// Server implementation to benchmark
    #[arg(value_enum)]
    pub server: ServerSelector,

    /// Data source the server reads from
    #[arg(value_enum)]
    pub path: PathSelector,

    /// Call the /delay/<id> endpoints
    #[arg(long, env = "HARNESS_DELAY")]
    pub delay: bool,

    /// Number of concurrent workers
    #[arg(long, env = "HARNESS_WORKERS", default_value_t = 6,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Number of items to fetch (ids 1..=N)
    #[arg(long, env = "HARNESS_TASKS", default_value_t = 6)]
    pub tasks: u32,

    /// Host the backend listens on
    #[arg(long, env = "HARNESS_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Full endpoint base, replacing the one derived from server/path/delay
    #[arg(long, env = "HARNESS_BASE_URL")]
    pub base_url: Option<String>,

    /// Per-request timeout (e.g. 20s, 500ms)
    #[arg(long, env = "HARNESS_REQUEST_TIMEOUT", default_value = "20s", value_parser = parse_duration_arg)]
    pub request_timeout: Duration,

    /// Pause after launching the server before sending work
    #[arg(long, env = "HARNESS_SETTLE_DELAY", default_value = "1s", value_parser = parse_duration_arg)]
    pub settle_delay: Duration,

    /// Poll the endpoint until the server answers instead of trusting the settle delay alone
    #[arg(long, env = "HARNESS_READY_PROBE")]
    pub ready_probe: bool,

    /// Give up on the readiness probe after this long
    #[arg(long, env = "HARNESS_READY_TIMEOUT", default_value = "10s", value_parser = parse_duration_arg)]
    pub ready_timeout: Duration,

    /// Time the server gets to exit after SIGTERM before it is killed
    #[arg(long, env = "HARNESS_SHUTDOWN_GRACE", default_value = "5s", value_parser = parse_duration_arg)]
    pub shutdown_grace: Duration,

    /// Target an already running server instead of launching one
    #[arg(long, env = "HARNESS_NO_LAUNCH")]
    pub no_launch: bool,

    /// Directory holding the server scripts
    #[arg(long, env = "HARNESS_SERVER_DIR", default_value = "server")]
    pub server_dir: PathBuf,

    /// Interpreter used to run the server script
    #[arg(long, env = "HARNESS_PYTHON", default_value = "python3")]
    pub python: String,

    /// Directory receiving the .log and .html artifacts
    #[arg(long, env = "HARNESS_LOG_DIR", default_value = "log")]
    pub log_dir: PathBuf,

    /// JSON field extracted from every response
    #[arg(long, env = "HARNESS_FIELD", default_value = "ja")]
    pub field: String,

    /// Value recorded when the field is absent
    #[arg(long, env = "HARNESS_PLACEHOLDER", default_value = "(no ja)")]
    pub placeholder: String,

    /// Diagnostic log format (text, json)
    #[arg(long, env = "HARNESS_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Print the run report as JSON
    #[arg(long)]
    pub report_json: bool,
}

/// Main configuration for a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub path: AccessPath,
    pub delay: bool,
    pub num_workers: u32,
    pub num_tasks: u32,
    pub host: String,
    pub base_url_override: Option<String>,
    pub request_timeout: Duration,
    pub settle_delay: Duration,
    pub ready_probe: bool,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
    pub launch_server: bool,
    pub server_dir: PathBuf,
    pub python: String,
    pub log_dir: PathBuf,
    pub field: String,
    pub placeholder: String,
}

impl TryFrom<Cli> for Config {
    type Error = HarnessError;

    /// Rejects the "all" selectors before anything else happens.
    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let backend = Backend::try_from(cli.server)?;
        let path = AccessPath::try_from(cli.path)?;

        Ok(Config {
            backend,
            path,
            delay: cli.delay,
            num_workers: cli.workers,
            num_tasks: cli.tasks,
            host: cli.host,
            base_url_override: cli.base_url,
            request_timeout: cli.request_timeout,
            settle_delay: cli.settle_delay,
            ready_probe: cli.ready_probe,
            ready_timeout: cli.ready_timeout,
            shutdown_grace: cli.shutdown_grace,
            launch_server: !cli.no_launch,
            server_dir: cli.server_dir,
            python: cli.python,
            log_dir: cli.log_dir,
            field: cli.field,
            placeholder: cli.placeholder,
        })
    }
}

impl Config {
    /// Base URL that task ids are appended to.
    pub fn endpoint_base(&self) -> String {
        if let Some(ref base) = self.base_url_override {
            return base.trim_end_matches('/').to_string();
        }
        let mut base = format!("http://{}:{}/{}", self.host, self.backend.port(), self.path);
        if self.delay {
            base.push_str("/delay");
        }
        base
    }

    fn log_stem(&self) -> String {
        let delay_tag = if self.delay { "delay" } else { "not_delay" };
        format!("threads_{}_{}_{}", self.backend, self.path, delay_tag)
    }

    pub fn plain_log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.log_stem()))
    }

    pub fn markup_log_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.html", self.log_stem()))
    }

    pub fn server_script(&self) -> PathBuf {
        self.server_dir.join(self.backend.script_name())
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.request_timeout,
            ..ClientConfig::default()
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Starting fetch run:");
        println!("  Server: {} (port {})", self.backend, self.backend.port());
        println!("  Access path: {}", self.path);
        println!("  Delay endpoints: {}", self.delay);
        println!("  Endpoint base: {}", self.endpoint_base());
        println!("  Workers: {}", self.num_workers);
        println!("  Tasks: {}", self.num_tasks);
        println!("  Request timeout: {:?}", self.request_timeout);
        if self.launch_server {
            println!("  Server script: {}", self.server_script().display());
            println!("  Settle delay: {:?}", self.settle_delay);
            if self.ready_probe {
                println!("  Readiness probe: enabled (timeout {:?})", self.ready_timeout);
            } else {
                println!("  Readiness probe: disabled");
            }
        } else {
            println!("  Server launch: disabled (--no-launch)");
        }
        println!("  Event log: {}", self.plain_log_path().display());
        println!("  Markup log: {}", self.markup_log_path().display());
    }
}
