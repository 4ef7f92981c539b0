use clap::{Arg, ArgMatches, Command};

pub const ARG_RATE_LIMIT_WINDOW: &str = "rate-limit-window-seconds";
pub const ARG_RATE_LIMIT_CAPACITY: &str = "rate-limit-capacity";
pub const ARG_RATE_LIMITED_PREFIXES: &str = "rate-limited-prefixes";
pub const ARG_REDIS_URL: &str = "redis-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub window_seconds: u64,
    pub capacity: u32,
    pub prefixes: Vec<String>,
    pub redis_url: Option<String>,
}

impl Options {
    /// Parse rate-limit arguments from matches.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            window_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_WINDOW)
                .copied()
                .unwrap_or(10),
            capacity: matches
                .get_one::<u32>(ARG_RATE_LIMIT_CAPACITY)
                .copied()
                .unwrap_or(10),
            prefixes: matches
                .get_many::<String>(ARG_RATE_LIMITED_PREFIXES)
                .map(|values| {
                    values
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            redis_url: matches
                .get_one::<String>(ARG_REDIS_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_WINDOW)
                .long(ARG_RATE_LIMIT_WINDOW)
                .help("Sliding-window duration in seconds")
                .env("PORDISTO_RATE_LIMIT_WINDOW_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_CAPACITY)
                .long(ARG_RATE_LIMIT_CAPACITY)
                .help("Requests allowed per client within one window")
                .env("PORDISTO_RATE_LIMIT_CAPACITY")
                .default_value("10")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMITED_PREFIXES)
                .long(ARG_RATE_LIMITED_PREFIXES)
                .help("Comma-separated path prefixes subject to rate limiting")
                .env("PORDISTO_RATE_LIMITED_PREFIXES")
                .value_delimiter(',')
                .default_value("/v1/auth"),
        )
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for shared rate-limit counters (in-process counters when unset)")
                .env("PORDISTO_REDIS_URL"),
        )
}
