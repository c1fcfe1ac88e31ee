use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{self, auth},
    },
    lifetime::parse_lifetime,
    token::SigningAlgorithm,
};
use anyhow::{Context, Result};
use std::time::Duration;

fn required(matches: &clap::ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

fn lifetime(matches: &clap::ArgMatches, id: &str) -> Result<chrono::Duration> {
    let raw = required(matches, id)?;
    parse_lifetime(&raw).with_context(|| format!("invalid --{id}: {raw}"))
}

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = required(matches, commands::ARG_DSN)?;
    let store_timeout = Duration::from_millis(
        matches
            .get_one::<u64>(commands::ARG_STORE_TIMEOUT_MS)
            .copied()
            .unwrap_or(5000),
    );
    let issuer = required(matches, auth::ARG_ISSUER)?;

    let algorithm = required(matches, auth::ARG_ROOT_JWT_ALGORITHM)?;
    let root_jwt_algorithm: SigningAlgorithm = algorithm
        .parse()
        .with_context(|| format!("invalid --{}", auth::ARG_ROOT_JWT_ALGORITHM))?;

    Ok(Action::Server(Args {
        port,
        dsn,
        issuer,
        store_timeout,
        root_jwt_algorithm,
        root_jwt_signing_key: required(matches, auth::ARG_ROOT_JWT_SIGNING_KEY)?,
        root_jwt_verifying_key: matches
            .get_one::<String>(auth::ARG_ROOT_JWT_VERIFYING_KEY)
            .cloned(),
        root_jwt_lifetime: lifetime(matches, auth::ARG_ROOT_JWT_LIFETIME)?,
        root_refresh_token_lifetime: lifetime(matches, auth::ARG_ROOT_REFRESH_TOKEN_LIFETIME)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(extra: &[&str]) -> clap::ArgMatches {
        let mut args = vec![
            "tessera",
            "--dsn",
            "memory://",
            "--root-jwt-signing-key",
            "env://TESSERA_ROOT_SECRET",
        ];
        args.extend_from_slice(extra);
        commands::new().get_matches_from(args)
    }

    #[test]
    fn builds_server_action() -> Result<()> {
        let Action::Server(args) = handler(&matches(&[
            "--root-jwt-lifetime",
            "1h30m",
            "--root-refresh-token-lifetime",
            "30d",
        ]))?;
        assert_eq!(args.dsn, "memory://");
        assert_eq!(args.root_jwt_algorithm, SigningAlgorithm::HS256);
        assert_eq!(args.root_jwt_lifetime, chrono::Duration::minutes(90));
        assert_eq!(args.root_refresh_token_lifetime, chrono::Duration::days(30));
        assert_eq!(args.store_timeout, Duration::from_millis(5000));
        Ok(())
    }

    #[test]
    fn rejects_unknown_algorithm() {
        assert!(handler(&matches(&["--root-jwt-algorithm", "none"])).is_err());
    }

    #[test]
    fn rejects_zero_lifetime() {
        assert!(handler(&matches(&["--root-refresh-token-lifetime", "0s"])).is_err());
    }
}
