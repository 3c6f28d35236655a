//! Providers selected by the stack file's `[provider]` section

mod command;
mod local;

pub use command::CommandProvider;
pub use local::LocalProvider;

use anyhow::Result;
use topology::{NodeRequest, Outputs, Provider};

use crate::config::ProviderConfig;

/// The provider a stack is applied through
pub enum StackProvider {
    Local(LocalProvider),
    Command(CommandProvider),
}

impl StackProvider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Local => StackProvider::Local(LocalProvider::new()),
            ProviderConfig::Command { command, args } => {
                StackProvider::Command(CommandProvider::new(command, args.clone()))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StackProvider::Local(_) => "local",
            StackProvider::Command(p) => p.command(),
        }
    }

    fn inner(&self) -> &dyn Provider {
        match self {
            StackProvider::Local(p) => p,
            StackProvider::Command(p) => p,
        }
    }
}

impl Provider for StackProvider {
    fn create(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.inner().create(request)
    }

    fn update(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.inner().update(request)
    }

    fn replace(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.inner().replace(request)
    }

    fn delete(&self, request: &NodeRequest<'_>) -> Result<()> {
        self.inner().delete(request)
    }
}
