//! CLI argument definitions for Nexus.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | HTTP request through the cache, retry and throttle layers |
//! | `key` | Derive the cache key for an operation call |
//! | `invalidate` | Drop cached entries by key, operation or pattern |
//! | `limit` | Check one request against the sliding-window quota |
//! | `operations` | List cached operations and their TTLs |
//! | `health` | Report which store backend is in use |
//!
//! # Examples
//!
//! ```bash
//! # Cached GET with a query parameter
//! nexus fetch https://restcountries.com/v3.1/name/brazil --query fields=name,capital
//!
//! # Forget every cached weather forecast
//! nexus invalidate --operation weather.forecast
//!
//! # Check a client against 100 requests per hour
//! nexus limit 203.0.113.7 --max 100 --window 3600
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Nexus - resilient cached access to third-party data providers
///
/// Configuration comes from the environment (REDIS_URL, CACHE_TTL,
/// MAX_RETRIES, RATE_LIMIT_REQUESTS, LOG_LEVEL, ...). When Redis cannot be
/// reached every command still runs, without caching or rate limiting.
#[derive(Debug, Parser)]
#[command(name = "nexus", author, version, about = "Resilient cached provider access")]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send an HTTP request through the access layer.
    Fetch(FetchArgs),
    /// Print the cache key an operation call maps to.
    Key(KeyArgs),
    /// Remove cached entries.
    Invalidate(InvalidateArgs),
    /// Check one request against a sliding-window quota.
    Limit(LimitArgs),
    /// List the cached operation catalog.
    Operations,
    /// Show store backend and health.
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Target URL.
    pub url: String,

    #[arg(long, value_enum, default_value_t = MethodArg::Get)]
    pub method: MethodArg,

    /// Query parameter as name=value. Repeatable.
    #[arg(long = "query", value_name = "NAME=VALUE")]
    pub query: Vec<String>,

    /// Request header as name=value. Repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// Request body for non-GET methods.
    #[arg(long)]
    pub body: Option<String>,

    /// Cache lifetime in seconds; defaults to CACHE_TTL.
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Skip the cache for this request.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Namespace, e.g. `weather`.
    pub namespace: String,

    /// Operation, e.g. `forecast`.
    pub operation: String,

    /// Positional argument. Repeatable; order matters.
    #[arg(long = "arg", value_name = "VALUE")]
    pub args: Vec<String>,

    /// Named parameter as name=value. Repeatable; order does not matter.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct InvalidateArgs {
    /// Exact cache key.
    #[arg(long)]
    pub key: Option<String>,

    /// Catalog operation as namespace.operation.
    #[arg(long)]
    pub operation: Option<String>,

    /// Every entry of a namespace.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Raw glob pattern (`*` and `?`).
    #[arg(long)]
    pub pattern: Option<String>,
}

#[derive(Debug, Args)]
pub struct LimitArgs {
    /// Caller identity, typically a client IP.
    pub identity: String,

    /// Requests allowed per window; defaults to RATE_LIMIT_REQUESTS.
    #[arg(long)]
    pub max: Option<u32>,

    /// Window length in seconds; defaults to RATE_LIMIT_WINDOW.
    #[arg(long)]
    pub window: Option<u64>,
}

/// Splits a `name=value` argument.
pub fn parse_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_collects_repeated_query_and_header_pairs() {
        let cli = Cli::parse_from([
            "nexus",
            "fetch",
            "https://example.test/books",
            "--query",
            "q=dune",
            "--query",
            "page=2",
            "--header",
            "X-Api-Key=abc",
            "--no-cache",
        ]);

        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch command");
        };
        assert_eq!(args.query, vec!["q=dune", "page=2"]);
        assert_eq!(args.headers, vec!["X-Api-Key=abc"]);
        assert!(args.no_cache);
        assert_eq!(args.method, MethodArg::Get);
    }

    #[test]
    fn invalidate_requires_exactly_one_target() {
        assert!(Cli::try_parse_from(["nexus", "invalidate"]).is_err());
        assert!(Cli::try_parse_from([
            "nexus",
            "invalidate",
            "--namespace",
            "news",
            "--pattern",
            "news:*"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["nexus", "invalidate", "--operation", "news.search"]).is_ok());
    }

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("q=a=b"),
            Some((String::from("q"), String::from("a=b")))
        );
        assert_eq!(parse_pair("novalue"), None);
        assert_eq!(parse_pair("=x"), None);
    }
}
