use std::time::Duration;

/// Numeric chain identifier as reported by the chain itself.
pub type ChainId = u64;

/// Identity and tuning of a single indexed chain. Immutable for the lifetime
/// of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub id: ChainId,
    pub name: String,
    /// Depth at which blocks are considered immutable.
    pub finality_block_count: u64,
    /// Delay between tip polls in realtime sync.
    pub polling_interval: Duration,
    /// Skip interval bookkeeping in the sync store (testing only).
    pub disable_cache: bool,
}

impl Chain {
    pub fn new(id: ChainId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            finality_block_count: 64,
            polling_interval: Duration::from_millis(1000),
            disable_cache: false,
        }
    }

    pub fn with_finality_block_count(mut self, count: u64) -> Self {
        self.finality_block_count = count;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }
}
