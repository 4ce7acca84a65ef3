use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no chains configured")]
    NoChains,

    #[error("duplicate chain id {0}")]
    DuplicateChainId(u64),

    #[error("chain '{chain}': {message}")]
    InvalidChain { chain: String, message: String },
}
