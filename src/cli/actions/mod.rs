//! What `tessera` does once its arguments are parsed.

pub mod server;

/// A parsed command line, ready to run.
#[derive(Debug)]
pub enum Action {
    /// Serve the identity provider API until interrupted.
    Server(server::Args),
}

impl Action {
    /// # Errors
    /// See [`server::execute`].
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}
