pub mod apps;
pub mod auth;
pub mod configure;
pub mod health;
pub mod oauth2;
pub mod token;
