use crate::{
    api,
    api::handlers::auth::AuthConfig,
    cli::commands::{
        gate::Options as GateOptions, limits::Options as LimitOptions,
        provider::Options as ProviderOptions,
    },
    gate::{
        CounterStore, Gate, GateConfig, MemoryCounterStore, RateLimiter, RedisCounterStore,
        RouteTable,
    },
    provider::{HttpIdentityProvider, IdentityProvider, MemoryIdentityProvider},
};
use anyhow::{anyhow, Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub provider: ProviderOptions,
    pub gate: GateOptions,
    pub limits: LimitOptions,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the provider client, the counter store, or the server
/// itself fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let provider: Arc<dyn IdentityProvider> = if args.provider.memory {
        info!("Using the in-memory identity provider; state resets on restart");
        Arc::new(MemoryIdentityProvider::new())
    } else {
        let url = args
            .provider
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("Identity provider URL is required"))?;
        Arc::new(
            HttpIdentityProvider::new(url, args.provider.token.clone())
                .context("Failed to build the identity provider client")?,
        )
    };

    let store: Arc<dyn CounterStore> = if let Some(redis_url) = &args.limits.redis_url {
        Arc::new(
            RedisCounterStore::connect(redis_url)
                .await
                .context("Failed to connect to redis")?,
        )
    } else {
        Arc::new(MemoryCounterStore::new())
    };
    let limiter = RateLimiter::new(
        store,
        args.limits.capacity,
        Duration::from_secs(args.limits.window_seconds),
    );

    let routes = RouteTable::new(
        args.gate.routes.protected,
        args.gate.routes.auth,
        args.gate.routes.admin,
    );
    let gate_config = GateConfig::new()
        .with_session_cookie(args.gate.cookies.session.clone())
        .with_recheck_cookie(args.gate.cookies.recheck.clone())
        .with_login_path(args.gate.routes.login_path)
        .with_home_path(args.gate.routes.home_path)
        .with_limited_prefixes(args.limits.prefixes);
    let gate = Arc::new(Gate::new(gate_config, routes, limiter));

    let auth_config = AuthConfig::new(args.gate.frontend_base_url)
        .with_session_cookie(args.gate.cookies.session)
        .with_recheck_cookie(args.gate.cookies.recheck)
        .with_session_cookie_max_age_seconds(args.gate.cookies.session_max_age_seconds)
        .with_device_cookie_max_age_seconds(args.gate.cookies.device_max_age_seconds)
        .with_challenge_ttl_seconds(args.gate.cookies.challenge_ttl_seconds);

    api::new(args.port, auth_config, provider, gate).await
}

fn log_startup_args(args: &Args) {
    let provider = args.provider.url.as_deref().unwrap_or("memory");
    let counter_store = if args.limits.redis_url.is_some() {
        "redis"
    } else {
        "memory"
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("provider", provider.to_string()),
        (
            "provider_token_set",
            args.provider.token.is_some().to_string(),
        ),
        ("frontend_base_url", args.gate.frontend_base_url.clone()),
        ("protected_prefixes", args.gate.routes.protected.join(",")),
        ("auth_prefixes", args.gate.routes.auth.join(",")),
        ("admin_prefixes", args.gate.routes.admin.join(",")),
        (
            "rate_limit",
            format!("{}/{}s", args.limits.capacity, args.limits.window_seconds),
        ),
        ("rate_limited_prefixes", args.limits.prefixes.join(",")),
        ("counter_store", counter_store.to_string()),
    ];

    let width = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = String::from("Startup configuration:");
    for (key, value) in &entries {
        message.push_str(&format!("\n  {key:<width$}  {value}"));
    }
    info!("{message}");
}
