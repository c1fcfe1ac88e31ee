use crate::api::{error::ErrorBody, handlers};
use crate::engine::{
    accounts::{LoginUserPayload, RegisterUserPayload},
    apps::{AppDetails, AppView, CreateAppPayload, CreatedApp},
    authorization::TokenRequest,
    provisioning::{ConfigurePayload, ProvisionedSystem},
    TokenPair, UserView,
};
use utoipa::{
    openapi::{
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
        Contact, InfoBuilder, License,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::oauth2::authorize,
        handlers::token::token,
        handlers::apps::create,
        handlers::configure::configure,
    ),
    components(schemas(
        ErrorBody,
        RegisterUserPayload,
        LoginUserPayload,
        handlers::auth::LogoutPayload,
        TokenPair,
        UserView,
        TokenRequest,
        AppDetails,
        CreateAppPayload,
        AppView,
        CreatedApp,
        ConfigurePayload,
        ProvisionedSystem,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Service status"),
        (name = "auth", description = "Registration, login and logout"),
        (name = "oauth2", description = "Authorization code grant"),
        (name = "apps", description = "Client application registry"),
        (name = "config", description = "One-time system provisioning"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// The API document with package metadata from Cargo.toml.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;

    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_carries_package_metadata() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.contact.and_then(|contact| contact.email).as_deref(),
            Some("team@tessera.dev")
        );
    }

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/api/v1/auth/register",
            "/api/v1/auth/login",
            "/api/v1/auth/logout",
            "/api/v1/auth/oauth2",
            "/api/v1/auth/token",
            "/api/v1/apps",
            "/api/v1/config/configure",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.map(|c| c.security_schemes).unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            parse_author("Team Tessera <team@tessera.dev>"),
            (Some("Team Tessera"), Some("team@tessera.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<a@b.c>"), (None, Some("a@b.c")));
    }
}
