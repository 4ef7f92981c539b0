//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary will execute, in
//! practice the server with its assembled configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{gate, limits, provider};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let provider = provider::Options::parse(matches);
    if provider.url.is_none() && !provider.memory {
        // Empty env values slip past clap's required_unless_present check
        anyhow::bail!(
            "missing required argument: --{} (or --{})",
            provider::ARG_PROVIDER_URL,
            provider::ARG_MEMORY_PROVIDER
        );
    }

    Ok(Action::Server(Args {
        port,
        provider,
        gate: gate::Options::parse(matches),
        limits: limits::Options::parse(matches),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_provider_url_env_is_rejected() {
        temp_env::with_vars(
            [
                ("PORDISTO_PROVIDER_URL", Some("")),
                ("PORDISTO_MEMORY_PROVIDER", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["pordisto"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err
                        .to_string()
                        .contains("missing required argument: --provider-url"));
                }
            },
        );
    }

    #[test]
    fn memory_provider_builds_a_server_action() {
        temp_env::with_vars(
            [
                ("PORDISTO_PROVIDER_URL", None::<&str>),
                ("PORDISTO_MEMORY_PROVIDER", None::<&str>),
                ("PORDISTO_PORT", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["pordisto", "--memory-provider"]);
                let action = handler(&matches);
                assert!(action.is_ok());
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert!(args.provider.memory);
                    assert_eq!(args.limits.capacity, 10);
                    assert_eq!(args.gate.routes.login_path, "/login");
                }
            },
        );
    }
}
