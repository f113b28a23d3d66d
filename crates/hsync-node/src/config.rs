//! Node configuration.

use crate::Args;
use anyhow::{anyhow, Context, Result};
use hsync_chain::{BlockHash, Header};
use hsync_network::{NetworkConfig, DEFAULT_NETWORK_ID, DEFAULT_PORT, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use hsync_sync::{DownloaderConfig, SyncMode, SyncerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkSection,
    /// Synchronization configuration.
    #[serde(default)]
    pub sync: SyncSection,
    /// Chain anchor.
    #[serde(default)]
    pub chain: ChainSection,
}

fn default_node_name() -> String {
    "hsync-node".to_string()
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// P2P listen address; empty disables inbound connections.
    pub listen_address: String,
    /// Peers dialed at startup.
    pub bootnodes: Vec<String>,
    /// Network identifier.
    pub network_id: u64,
    /// Maximum registered peers.
    pub max_peers: usize,
    /// Status exchange timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Maximum frame payload in bytes.
    pub max_message_size: usize,
    /// Block number every peer must serve before registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_number: Option<u64>,
    /// Expected hash of the checkpoint block, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_hash: Option<String>,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            bootnodes: Vec::new(),
            network_id: DEFAULT_NETWORK_ID,
            max_peers: 50,
            handshake_timeout_secs: 5,
            max_message_size: MAX_MESSAGE_SIZE,
            checkpoint_number: None,
            checkpoint_hash: None,
        }
    }
}

/// Synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Sync mode (full, fast, light).
    pub mode: String,
    /// Headers per request.
    pub max_header_fetch: u64,
    /// Skeleton headers per request.
    pub max_skeleton_size: u64,
    /// Headers imported per batch.
    pub max_headers_process: usize,
    /// Distance of the fast-sync pivot below the remote head.
    pub min_full_blocks: u64,
    /// Lowest block accepted as common ancestor.
    pub ancestor_floor: u64,
    /// Block accepted as ancestor even at the floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<u64>,
    /// Seconds between checks when no peer is ahead.
    pub idle_interval_secs: u64,
    /// Seconds between sessions.
    pub retry_interval_secs: u64,
    /// Seconds to wait after losing all peers.
    pub backoff_interval_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        let downloader = DownloaderConfig::default();
        let syncer = SyncerConfig::default();
        Self {
            mode: syncer.mode.to_string(),
            max_header_fetch: downloader.max_header_fetch,
            max_skeleton_size: downloader.max_skeleton_size,
            max_headers_process: downloader.max_headers_process,
            min_full_blocks: downloader.min_full_blocks,
            // A genesis-anchored node must accept its anchor as ancestor
            ancestor_floor: 0,
            checkpoint: Some(0),
            idle_interval_secs: syncer.idle_interval.as_secs(),
            retry_interval_secs: syncer.retry_interval.as_secs(),
            backoff_interval_secs: syncer.backoff_interval.as_secs(),
        }
    }
}

/// Trusted anchor the chain store starts from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    /// Anchor timestamp.
    pub anchor_timestamp: u64,
    /// Anchor difficulty.
    pub anchor_difficulty: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            anchor_timestamp: 0,
            anchor_difficulty: 1,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            network: NetworkSection::default(),
            sync: SyncSection::default(),
            chain: ChainSection::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = Self::from_file(config_path)?;

        // Only override if explicitly provided via CLI
        if let Some(ref listen) = args.listen {
            config.network.listen_address = listen.clone();
        }
        if !args.bootnode.is_empty() {
            config.network.bootnodes = args.bootnode.clone();
        }
        if let Some(ref mode) = args.mode {
            config.sync.mode = mode.clone();
        }

        config.sync_mode()?;
        Ok(config)
    }

    /// Read a config file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Anchor header of the chain store.
    pub fn anchor(&self) -> Header {
        Header::new(
            BlockHash::ZERO,
            0,
            self.chain.anchor_timestamp,
            self.chain.anchor_difficulty,
        )
    }

    pub fn sync_mode(&self) -> Result<SyncMode> {
        self.sync.mode.parse().map_err(|e: String| anyhow!(e))
    }

    /// Network service configuration.
    pub fn network_config(&self) -> Result<NetworkConfig> {
        let network = &self.network;
        let listen_addr = if network.listen_address.is_empty() {
            None
        } else {
            Some(
                network
                    .listen_address
                    .parse::<SocketAddr>()
                    .context("Invalid listen address")?,
            )
        };
        let bootnodes = network
            .bootnodes
            .iter()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("Invalid bootnode address: {}", addr))
            })
            .collect::<Result<Vec<_>>>()?;
        let checkpoint = match (network.checkpoint_number, &network.checkpoint_hash) {
            (Some(number), Some(hash)) => Some((
                number,
                BlockHash::from_hex(hash).map_err(|e| anyhow!("Invalid checkpoint hash: {}", e))?,
            )),
            (None, None) => None,
            _ => return Err(anyhow!("Checkpoint needs both a number and a hash")),
        };

        Ok(NetworkConfig {
            listen_addr,
            bootnodes,
            network_id: network.network_id,
            genesis: self.anchor().hash(),
            protocol_version: PROTOCOL_VERSION,
            handshake_timeout: Duration::from_secs(network.handshake_timeout_secs),
            max_message_size: network.max_message_size,
            max_peers: network.max_peers,
            checkpoint,
            ..Default::default()
        })
    }

    /// Downloader configuration.
    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            max_header_fetch: self.sync.max_header_fetch,
            max_skeleton_size: self.sync.max_skeleton_size,
            max_headers_process: self.sync.max_headers_process,
            min_full_blocks: self.sync.min_full_blocks,
            ancestor_floor: self.sync.ancestor_floor,
            checkpoint: self.sync.checkpoint,
            ..Default::default()
        }
    }

    /// Sync driver configuration.
    pub fn syncer_config(&self) -> Result<SyncerConfig> {
        Ok(SyncerConfig {
            mode: self.sync_mode()?,
            idle_interval: Duration::from_secs(self.sync.idle_interval_secs),
            retry_interval: Duration::from_secs(self.sync.retry_interval_secs),
            backoff_interval: Duration::from_secs(self.sync.backoff_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Fast);
        let network = config.network_config().unwrap();
        assert_eq!(network.listen_addr.unwrap().port(), DEFAULT_PORT);
        assert_eq!(network.genesis, config.anchor().hash());
        assert!(network.checkpoint.is_none());
        assert_eq!(config.downloader_config().ancestor_floor, 0);
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.max_peers, 50);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = NodeConfig::default();
        config.sync.mode = "light".to_string();
        config.network.bootnodes = vec!["127.0.0.1:30313".to_string()];
        config.save(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.sync_mode().unwrap(), SyncMode::Light);
        assert_eq!(loaded.network_config().unwrap().bootnodes.len(), 1);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[sync]\nmode = \"full\"\n").unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Full);
        assert_eq!(config.sync.max_header_fetch, 192);
        assert_eq!(config.chain.anchor_difficulty, 1);
    }

    #[test]
    fn test_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        let args = Args::parse_from([
            "hsync-node",
            "--listen",
            "127.0.0.1:4000",
            "--bootnode",
            "10.0.0.1:30313",
            "--bootnode",
            "10.0.0.2:30313",
            "--mode",
            "full",
        ]);
        let config = NodeConfig::load(&path, &args).unwrap();
        let network = config.network_config().unwrap();
        assert_eq!(network.listen_addr.unwrap().port(), 4000);
        assert_eq!(network.bootnodes.len(), 2);
        assert_eq!(config.sync_mode().unwrap(), SyncMode::Full);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = NodeConfig::default();
        config.sync.mode = "warp".to_string();
        assert!(config.syncer_config().is_err());

        let mut config = NodeConfig::default();
        config.network.checkpoint_number = Some(10);
        assert!(config.network_config().is_err());

        let mut config = NodeConfig::default();
        config.network.bootnodes = vec!["not-an-address".to_string()];
        assert!(config.network_config().is_err());
    }
}
