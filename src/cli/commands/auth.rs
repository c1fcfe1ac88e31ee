use clap::{Arg, Command};

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ROOT_JWT_ALGORITHM: &str = "root-jwt-algorithm";
pub const ARG_ROOT_JWT_SIGNING_KEY: &str = "root-jwt-signing-key";
pub const ARG_ROOT_JWT_VERIFYING_KEY: &str = "root-jwt-verifying-key";
pub const ARG_ROOT_JWT_LIFETIME: &str = "root-jwt-lifetime";
pub const ARG_ROOT_REFRESH_TOKEN_LIFETIME: &str = "root-refresh-token-lifetime";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = command.arg(
        Arg::new(ARG_ISSUER)
            .long(ARG_ISSUER)
            .help("Issuer written into tokens minted by the code exchange")
            .env("TESSERA_ISSUER")
            .default_value(crate::engine::DEFAULT_ISSUER),
    );
    with_root_jwt_args(command)
}

fn with_root_jwt_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ROOT_JWT_ALGORITHM)
                .long(ARG_ROOT_JWT_ALGORITHM)
                .help("Root application signing algorithm: HS256, HS384, HS512, RS256, RS384, RS512")
                .env("TESSERA_ROOT_JWT_ALGORITHM")
                .default_value("HS256"),
        )
        .arg(
            Arg::new(ARG_ROOT_JWT_SIGNING_KEY)
                .long(ARG_ROOT_JWT_SIGNING_KEY)
                .help("Secret reference of the root signing key, example: env://TESSERA_ROOT_SECRET")
                .env("TESSERA_ROOT_JWT_SIGNING_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ROOT_JWT_VERIFYING_KEY)
                .long(ARG_ROOT_JWT_VERIFYING_KEY)
                .help("Secret reference of the root public key (RS* only)")
                .env("TESSERA_ROOT_JWT_VERIFYING_KEY"),
        )
        .arg(
            Arg::new(ARG_ROOT_JWT_LIFETIME)
                .long(ARG_ROOT_JWT_LIFETIME)
                .help("Root access token lifetime, example: 15m")
                .env("TESSERA_ROOT_JWT_LIFETIME")
                .default_value("15m"),
        )
        .arg(
            Arg::new(ARG_ROOT_REFRESH_TOKEN_LIFETIME)
                .long(ARG_ROOT_REFRESH_TOKEN_LIFETIME)
                .help("Root refresh token lifetime, example: 30d")
                .env("TESSERA_ROOT_REFRESH_TOKEN_LIFETIME")
                .default_value("30d"),
        )
}
