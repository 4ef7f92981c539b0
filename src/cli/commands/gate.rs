use clap::{Arg, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_PROTECTED_PREFIXES: &str = "protected-prefixes";
pub const ARG_AUTH_PREFIXES: &str = "auth-prefixes";
pub const ARG_ADMIN_PREFIXES: &str = "admin-prefixes";
pub const ARG_LOGIN_PATH: &str = "login-path";
pub const ARG_HOME_PATH: &str = "home-path";
pub const ARG_SESSION_COOKIE: &str = "session-cookie";
pub const ARG_RECHECK_COOKIE: &str = "recheck-cookie";
pub const ARG_SESSION_COOKIE_MAX_AGE: &str = "session-cookie-max-age-seconds";
pub const ARG_CHALLENGE_TTL: &str = "challenge-ttl-seconds";
pub const ARG_DEVICE_COOKIE_MAX_AGE: &str = "device-cookie-max-age-seconds";

#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub protected: Vec<String>,
    pub auth: Vec<String>,
    pub admin: Vec<String>,
    pub login_path: String,
    pub home_path: String,
}

#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub session: String,
    pub recheck: String,
    pub session_max_age_seconds: i64,
    pub challenge_ttl_seconds: u64,
    pub device_max_age_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub routes: RouteOptions,
    pub cookies: CookieOptions,
}

impl Options {
    /// Parse gate arguments from matches.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let prefixes = |id: &str| -> Vec<String> {
            matches
                .get_many::<String>(id)
                .map(|values| {
                    values
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };
        let string = |id: &str, fallback: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };

        Self {
            frontend_base_url: string(ARG_FRONTEND_BASE_URL, "https://pordisto.dev"),
            routes: RouteOptions {
                protected: prefixes(ARG_PROTECTED_PREFIXES),
                auth: prefixes(ARG_AUTH_PREFIXES),
                admin: prefixes(ARG_ADMIN_PREFIXES),
                login_path: string(ARG_LOGIN_PATH, "/login"),
                home_path: string(ARG_HOME_PATH, "/dashboard"),
            },
            cookies: CookieOptions {
                session: string(ARG_SESSION_COOKIE, "pordisto_session"),
                recheck: string(ARG_RECHECK_COOKIE, "pordisto_recheck"),
                session_max_age_seconds: matches
                    .get_one::<i64>(ARG_SESSION_COOKIE_MAX_AGE)
                    .copied()
                    .unwrap_or(1800),
                challenge_ttl_seconds: matches
                    .get_one::<u64>(ARG_CHALLENGE_TTL)
                    .copied()
                    .unwrap_or(300),
                device_max_age_seconds: matches
                    .get_one::<i64>(ARG_DEVICE_COOKIE_MAX_AGE)
                    .copied()
                    .unwrap_or(2_592_000),
            },
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_route_args(command);
    with_cookie_args(command)
}

fn with_route_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL; drives the CORS origin and the Secure cookie attribute")
                .env("PORDISTO_FRONTEND_BASE_URL")
                .default_value("https://pordisto.dev"),
        )
        .arg(
            Arg::new(ARG_PROTECTED_PREFIXES)
                .long(ARG_PROTECTED_PREFIXES)
                .help("Comma-separated path prefixes that require a session")
                .env("PORDISTO_PROTECTED_PREFIXES")
                .value_delimiter(',')
                .default_value("/dashboard,/admin"),
        )
        .arg(
            Arg::new(ARG_AUTH_PREFIXES)
                .long(ARG_AUTH_PREFIXES)
                .help("Comma-separated path prefixes of the sign-in pages")
                .env("PORDISTO_AUTH_PREFIXES")
                .value_delimiter(',')
                .default_value("/login,/signup"),
        )
        .arg(
            Arg::new(ARG_ADMIN_PREFIXES)
                .long(ARG_ADMIN_PREFIXES)
                .help("Comma-separated path prefixes that additionally require the admin role")
                .env("PORDISTO_ADMIN_PREFIXES")
                .value_delimiter(',')
                .default_value("/admin"),
        )
        .arg(
            Arg::new(ARG_LOGIN_PATH)
                .long(ARG_LOGIN_PATH)
                .help("Redirect target for unauthenticated protected requests")
                .env("PORDISTO_LOGIN_PATH")
                .default_value("/login"),
        )
        .arg(
            Arg::new(ARG_HOME_PATH)
                .long(ARG_HOME_PATH)
                .help("Redirect target for signed-in visits to the sign-in pages")
                .env("PORDISTO_HOME_PATH")
                .default_value("/dashboard"),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_COOKIE)
                .long(ARG_SESSION_COOKIE)
                .help("Session cookie name")
                .env("PORDISTO_SESSION_COOKIE")
                .default_value("pordisto_session"),
        )
        .arg(
            Arg::new(ARG_RECHECK_COOKIE)
                .long(ARG_RECHECK_COOKIE)
                .help("Short-lived marker cookie set after a failed deep validation")
                .env("PORDISTO_RECHECK_COOKIE")
                .default_value("pordisto_recheck"),
        )
        .arg(
            Arg::new(ARG_SESSION_COOKIE_MAX_AGE)
                .long(ARG_SESSION_COOKIE_MAX_AGE)
                .help("Session cookie Max-Age in seconds (client-side validity cache)")
                .env("PORDISTO_SESSION_COOKIE_MAX_AGE_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL)
                .long(ARG_CHALLENGE_TTL)
                .help("TTL for pending two-factor sign-in challenges")
                .env("PORDISTO_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_DEVICE_COOKIE_MAX_AGE)
                .long(ARG_DEVICE_COOKIE_MAX_AGE)
                .help("Trusted-device cookie Max-Age in seconds")
                .env("PORDISTO_DEVICE_COOKIE_MAX_AGE_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
}
