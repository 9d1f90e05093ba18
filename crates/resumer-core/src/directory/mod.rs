//! Ownership directory backends.

mod memory;
mod noop;
mod remote;
mod server;

pub use memory::InMemoryDirectory;
pub use noop::NoopDirectory;
pub use remote::{DirectoryRequest, DirectoryResponse, RemoteDirectory};
pub use server::DirectoryServer;

use anyhow::{Result, bail};
use resumer_traits::OwnershipDirectory;
use tracing::warn;
use std::sync::Arc;

use crate::config::{DirectoryConfig, DirectoryKind};

/// Build the directory a replica should use.
pub fn from_config(config: &DirectoryConfig) -> Result<Arc<dyn OwnershipDirectory>> {
    Ok(match config.kind {
        DirectoryKind::None => Arc::new(NoopDirectory),
        DirectoryKind::Memory => {
            warn!(
                "Using the in-process ownership directory; replicas will not share \
                 ownership or redirect to each other"
            );
            Arc::new(InMemoryDirectory::new())
        }
        DirectoryKind::Remote => {
            let Some(address) = config.address.as_deref().filter(|a| !a.trim().is_empty())
            else {
                bail!("directory.kind = \"remote\" requires directory.address");
            };
            Arc::new(RemoteDirectory::new(address.trim()))
        }
    })
}
