use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_PROVIDER_URL: &str = "provider-url";
pub const ARG_PROVIDER_TOKEN: &str = "provider-token";
pub const ARG_MEMORY_PROVIDER: &str = "memory-provider";

#[derive(Debug)]
pub struct Options {
    pub url: Option<String>,
    pub token: Option<SecretString>,
    pub memory: bool,
}

impl Options {
    /// Parse identity-provider arguments from matches.
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        // Filter empty strings which clap might pass through if env vars are set to ""
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            url: get_non_empty(ARG_PROVIDER_URL),
            token: get_non_empty(ARG_PROVIDER_TOKEN).map(SecretString::from),
            memory: matches.get_flag(ARG_MEMORY_PROVIDER),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PROVIDER_URL)
                .long(ARG_PROVIDER_URL)
                .help("Identity provider base URL")
                .long_help(
                    "Identity provider base URL. Credential checks, session issuance, and two-factor state live behind this endpoint; only its scheme, host, and port are used.",
                )
                .env("PORDISTO_PROVIDER_URL")
                .required_unless_present(ARG_MEMORY_PROVIDER)
                .conflicts_with(ARG_MEMORY_PROVIDER),
        )
        .arg(
            Arg::new(ARG_PROVIDER_TOKEN)
                .long(ARG_PROVIDER_TOKEN)
                .help("Bearer token the gateway presents to the identity provider")
                .env("PORDISTO_PROVIDER_TOKEN"),
        )
        .arg(
            Arg::new(ARG_MEMORY_PROVIDER)
                .long(ARG_MEMORY_PROVIDER)
                .help("Use the built-in in-memory identity provider (development only)")
                .env("PORDISTO_MEMORY_PROVIDER")
                .action(ArgAction::SetTrue),
        )
}
