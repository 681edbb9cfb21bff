use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

/// Settings shared by every subcommand.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub namespace: String,
    pub public_base_url: String,
}

/// What to run, with every default filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Watch {
        watch_dir: PathBuf,
        debounce: Duration,
    },
    Push {
        watch_dir: PathBuf,
        paths: Vec<PathBuf>,
    },
    Serve {
        host: String,
        port: u16,
    },
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Keep a directory tree published to a CDN bucket")]
pub struct Args {
    /// Directory where object payloads are stored (overrides CDN_SYNC_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CDN_SYNC_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Bucket objects are published to (overrides CDN_SYNC_BUCKET)
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Prefix for every object name (overrides CDN_SYNC_NAMESPACE)
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Base of the URLs handed out for uploaded objects (overrides CDN_SYNC_PUBLIC_BASE_URL)
    #[arg(long, global = true)]
    pub public_base_url: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Watch a directory and mirror every change to the bucket
    Watch(WatchArgs),
    /// Upload the given files once and print their public URLs
    Push(PushArgs),
    /// Serve published objects over HTTP
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug)]
pub struct WatchArgs {
    /// Directory to watch (overrides CDN_SYNC_WATCH_DIR, defaults to the current directory)
    #[arg(long)]
    pub watch_dir: Option<PathBuf>,

    /// Quiet period before a burst of events is delivered (overrides CDN_SYNC_DEBOUNCE_MS)
    #[arg(long)]
    pub debounce_ms: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct PushArgs {
    /// Root the object names are derived from (overrides CDN_SYNC_WATCH_DIR)
    #[arg(long)]
    pub watch_dir: Option<PathBuf>,

    /// Files to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    /// Host to bind to (overrides CDN_SYNC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CDN_SYNC_PORT)
    #[arg(long)]
    pub port: Option<u16>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge parsed arguments with an environment lookup.
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<(Self, Command)> {
        let var = |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());

        let cfg = Self {
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| var("CDN_SYNC_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                var("CDN_SYNC_DATABASE_URL", "sqlite://./data/meta/cdn_sync.db")
            }),
            bucket: args.bucket.unwrap_or_else(|| var("CDN_SYNC_BUCKET", "cdn")),
            namespace: args
                .namespace
                .unwrap_or_else(|| var("CDN_SYNC_NAMESPACE", "")),
            public_base_url: args
                .public_base_url
                .unwrap_or_else(|| var("CDN_SYNC_PUBLIC_BASE_URL", "http://127.0.0.1:3000")),
        };

        let watch_dir = |flag: Option<PathBuf>| {
            flag.or_else(|| env("CDN_SYNC_WATCH_DIR").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."))
        };

        let command = match args.command {
            CliCommand::Watch(watch) => {
                let debounce_ms = match watch.debounce_ms {
                    Some(ms) => ms,
                    None => parse_env(&env, "CDN_SYNC_DEBOUNCE_MS")?.unwrap_or(200),
                };
                Command::Watch {
                    watch_dir: watch_dir(watch.watch_dir),
                    debounce: Duration::from_millis(debounce_ms),
                }
            }
            CliCommand::Push(push) => Command::Push {
                watch_dir: watch_dir(push.watch_dir),
                paths: push.paths,
            },
            CliCommand::Serve(serve) => Command::Serve {
                host: serve.host.unwrap_or_else(|| var("CDN_SYNC_HOST", "0.0.0.0")),
                port: match serve.port {
                    Some(port) => port,
                    None => parse_env(&env, "CDN_SYNC_PORT")?.unwrap_or(3000),
                },
            },
        };

        Ok((cfg, command))
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(std::iter::once("cdn-sync").chain(argv.iter().copied()))?;
        AppConfig::resolve(args, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_flags_or_environment() {
        let (cfg, command) = resolve(&["watch"], &[]).unwrap();
        assert_eq!(
            cfg,
            AppConfig {
                storage_dir: "./data/objects".into(),
                database_url: "sqlite://./data/meta/cdn_sync.db".into(),
                bucket: "cdn".into(),
                namespace: String::new(),
                public_base_url: "http://127.0.0.1:3000".into(),
            }
        );
        assert_eq!(
            command,
            Command::Watch {
                watch_dir: PathBuf::from("."),
                debounce: Duration::from_millis(200),
            }
        );
    }

    #[test]
    fn flags_override_environment() {
        let (cfg, command) = resolve(
            &["--namespace", "site", "serve", "--port", "8080"],
            &[
                ("CDN_SYNC_NAMESPACE", "other"),
                ("CDN_SYNC_PORT", "9090"),
                ("CDN_SYNC_HOST", "127.0.0.1"),
                ("CDN_SYNC_BUCKET", "assets"),
            ],
        )
        .unwrap();

        assert_eq!(cfg.namespace, "site");
        assert_eq!(cfg.bucket, "assets");
        assert_eq!(
            command,
            Command::Serve {
                host: "127.0.0.1".into(),
                port: 8080,
            }
        );
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let (cfg, command) = resolve(
            &["push", "--bucket", "media", "--watch-dir", "/srv/www", "/srv/www/a.txt"],
            &[],
        )
        .unwrap();
        assert_eq!(cfg.bucket, "media");
        assert_eq!(
            command,
            Command::Push {
                watch_dir: PathBuf::from("/srv/www"),
                paths: vec![PathBuf::from("/srv/www/a.txt")],
            }
        );
    }

    #[test]
    fn watch_settings_fall_back_to_environment() {
        let (_, command) = resolve(
            &["watch"],
            &[("CDN_SYNC_WATCH_DIR", "/srv/www"), ("CDN_SYNC_DEBOUNCE_MS", "500")],
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Watch {
                watch_dir: PathBuf::from("/srv/www"),
                debounce: Duration::from_millis(500),
            }
        );
    }

    #[test]
    fn malformed_numbers_in_environment_are_errors() {
        let err = resolve(&["serve"], &[("CDN_SYNC_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("CDN_SYNC_PORT"));

        let err = resolve(&["watch"], &[("CDN_SYNC_DEBOUNCE_MS", "-1")]).unwrap_err();
        assert!(err.to_string().contains("CDN_SYNC_DEBOUNCE_MS"));
    }

    #[test]
    fn push_requires_at_least_one_path() {
        assert!(resolve(&["push"], &[]).is_err());
    }
}
