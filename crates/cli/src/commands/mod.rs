mod prime;
mod resolve;
mod status;

use std::path::Path;
use std::sync::Arc;

use tdns_core::cache::RrsetCache;
use tdns_core::config::CoreConfig;
use tdns_core::registry::ServerRegistry;
use tdns_core::resolver::IterativeResolver;
use tdns_core::validator::TrustAnchorStore;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Resolve a single name iteratively and print the answer.
    Resolve(resolve::Resolve),
    /// Force root priming and report whether it succeeded.
    Prime(prime::Prime),
    /// Show the current registry/cache state.
    Status(status::Status),
}

impl Command {
    pub async fn execute(self, config_path: Option<&Path>) -> Result<(), String> {
        let runtime = Runtime::build(config_path)?;
        match self {
            Command::Resolve(cmd) => cmd.execute(runtime).await,
            Command::Prime(cmd) => cmd.execute(runtime).await,
            Command::Status(cmd) => cmd.execute(runtime).await,
        }
    }
}

/// The shared core state every subcommand operates on: one process, one
/// cache, one registry, one trust-anchor store, the same way the server
/// binary would assemble them at startup.
pub struct Runtime {
    pub resolver: IterativeResolver,
    pub registry: Arc<ServerRegistry>,
    pub cache: Arc<RrsetCache>,
}

impl Runtime {
    fn build(config_path: Option<&Path>) -> Result<Self, String> {
        let config = match config_path {
            Some(path) => tdns_cfg::load(path).map_err(|err| err.to_string())?.core,
            None => CoreConfig::default(),
        };

        let cache = Arc::new(RrsetCache::new());
        let registry = Arc::new(ServerRegistry::new());
        let anchors = Arc::new(TrustAnchorStore::new());
        if let Some(path) = &config.trust_anchor_file {
            let blob = std::fs::read_to_string(path).map_err(|err| format!("reading trust anchor file '{}': {err}", path.display()))?;
            anchors.load_anchor_file(&blob).map_err(|err| err.to_string())?;
        }
        let resolver = IterativeResolver::new(cache.clone(), registry.clone(), anchors, config);

        Ok(Self { resolver, registry, cache })
    }
}
