use crate::{
    api,
    credentials::Argon2Hasher,
    engine::{Engine, EngineConfig},
    lifetime::format_lifetime,
    secret::SecretResolver,
    store::{Deadline, MemoryStore, PostgresStore, Store},
    token::{SigningAlgorithm, SigningProfile, TokenCodec},
};
use anyhow::{bail, Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;
use url::Url;

const MEMORY_DSN_SCHEME: &str = "memory";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub issuer: String,
    pub store_timeout: Duration,
    pub root_jwt_algorithm: SigningAlgorithm,
    pub root_jwt_signing_key: String,
    pub root_jwt_verifying_key: Option<String>,
    pub root_jwt_lifetime: chrono::Duration,
    pub root_refresh_token_lifetime: chrono::Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the root keys cannot be resolved, the store is unreachable,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let resolver = SecretResolver::with_defaults();
    let root_jwt = root_profile(&args, &resolver)?;

    let store = open_store(&args.dsn).await?;

    let config = EngineConfig::new(root_jwt)
        .with_issuer(args.issuer)
        .with_root_refresh_token_lifetime(args.root_refresh_token_lifetime)
        .with_deadline(Deadline::new(args.store_timeout));

    let engine = Engine::new(
        store,
        TokenCodec::new(resolver),
        Arc::new(Argon2Hasher::default()),
        config,
    );

    api::new(args.port, engine).await
}

/// Build the root signing profile, resolving its keys once so a bad reference
/// fails at startup instead of on the first login.
fn root_profile(args: &Args, resolver: &SecretResolver) -> Result<SigningProfile> {
    let signing_ref = resolver
        .check(&args.root_jwt_signing_key)
        .context("invalid root signing key reference")?;
    let verifying_ref = args
        .root_jwt_verifying_key
        .as_deref()
        .map(|raw| resolver.check(raw))
        .transpose()
        .context("invalid root verifying key reference")?;

    let profile = SigningProfile {
        algorithm: args.root_jwt_algorithm,
        signing_ref,
        verifying_ref,
        lifetime: args.root_jwt_lifetime,
    };

    resolver
        .resolve(&profile.signing_ref)
        .context("failed to resolve root signing key")?;
    resolver
        .resolve(profile.verification_ref())
        .context("failed to resolve root verifying key")?;

    Ok(profile)
}

async fn open_store(dsn: &str) -> Result<Arc<dyn Store>> {
    let url = Url::parse(dsn).context("invalid --dsn")?;
    match url.scheme() {
        MEMORY_DSN_SCHEME => {
            info!("using in-memory store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" | "postgresql" => {
            let store = PostgresStore::connect(dsn).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        other => bail!("unsupported dsn scheme: {other}"),
    }
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("issuer", args.issuer.clone()),
        ("store_timeout_ms", args.store_timeout.as_millis().to_string()),
        ("root_jwt_algorithm", args.root_jwt_algorithm.to_string()),
        ("root_jwt_signing_key", redact_reference(&args.root_jwt_signing_key)),
        (
            "root_jwt_verifying_key",
            args.root_jwt_verifying_key
                .as_deref()
                .map_or_else(|| "none".to_string(), redact_reference),
        ),
        ("root_jwt_lifetime", format_lifetime(args.root_jwt_lifetime)),
        (
            "root_refresh_token_lifetime",
            format_lifetime(args.root_refresh_token_lifetime),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

// literal:// references carry the secret itself
fn redact_reference(reference: &str) -> String {
    match reference.split_once("://") {
        Some(("literal", _)) => "literal://REDACTED".to_string(),
        Some(_) => reference.to_string(),
        None => "invalid-reference".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = api::handlers::health::short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

const BANNER: &str = r"
  +---+---+---+
  |   |   |   |
  +---+---+---+
  |   | T |   |   T E S S E R A {VERSION}
  +---+---+---+
  |   |   |   |
  +---+---+---+";
