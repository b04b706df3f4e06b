//! Lightning wallet integration: protocol client, credential cipher, and
//! credential storage.

pub mod cipher;
pub mod client;
pub mod store;

pub use cipher::WalletCipher;
pub use client::{HttpWalletClient, WalletError, WalletService};

use earshot_common::config::WalletConfig;

/// Builds wallet clients from connection strings
///
/// A seam for tests and alternative transports: the orchestrator resolves
/// credentials and asks the factory for a client, never constructing one
/// directly.
pub trait WalletFactory: Send + Sync {
    fn connect(&self, connection: &str) -> Result<Box<dyn WalletService>, WalletError>;
}

/// Production factory producing [`HttpWalletClient`]s
pub struct HttpWalletFactory {
    cfg: WalletConfig,
}

impl HttpWalletFactory {
    pub fn new(cfg: WalletConfig) -> Self {
        Self { cfg }
    }
}

impl WalletFactory for HttpWalletFactory {
    fn connect(&self, connection: &str) -> Result<Box<dyn WalletService>, WalletError> {
        Ok(Box::new(HttpWalletClient::new(connection, &self.cfg)?))
    }
}
