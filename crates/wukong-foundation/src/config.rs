//! Core runtime configuration.
//!
//! Every "default N" figure named in the specification collects here,
//! mirroring the teacher's `LimitsConfig`/`SessionLimits` pattern of a plain
//! struct with a `Default` impl plus a couple of named presets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the session manager (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum concurrent sessions per user before the oldest is evicted.
    pub max_sessions_per_user: usize,
    /// Sessions idle longer than this are dropped by `restore_sessions`.
    pub restore_timeout_secs: u64,
    /// Interval between background staleness sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 5,
            restore_timeout_secs: 30 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

/// Tunables for the agent-fork subsystem (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    pub max_depth: u32,
    pub max_steps: u32,
    pub timeout_secs: u64,
    /// Context/result summaries longer than this get compressed (spec §4.7).
    pub compression_threshold_chars: usize,
    /// Maximum concurrent in-process sub-agents before new forks queue.
    pub max_concurrent: usize,
    pub queue_timeout_secs: u64,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_steps: 20,
            timeout_secs: 300,
            compression_threshold_chars: 500,
            max_concurrent: 4,
            queue_timeout_secs: 300,
        }
    }
}

/// Tunables for the async tool executor (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncToolConfig {
    pub pending_ttl_secs: u64,
    pub completed_ttl_secs: u64,
    pub failed_ttl_secs: u64,
    pub max_retries: u32,
    pub poll_interval_secs: u64,
}

impl Default for AsyncToolConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 3600,
            completed_ttl_secs: 24 * 3600,
            failed_ttl_secs: 3600,
            max_retries: 3,
            poll_interval_secs: 5,
        }
    }
}

/// Tunables for the parallel tool executor (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelToolConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub default_timeout_secs: u64,
}

impl Default for ParallelToolConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            default_timeout_secs: 120,
        }
    }
}

impl ParallelToolConfig {
    /// Exponential backoff delay for the given retry attempt (spec §4.6:
    /// `2^retryCount * 1000ms`).
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let millis = self.backoff_base_ms.saturating_mul(1u64 << retry_count.min(20));
        Duration::from_millis(millis)
    }
}

/// Tunables for the tool executor (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecConfig {
    pub default_timeout_secs: u64,
    pub max_error_len: usize,
    pub max_summary_len: usize,
}

impl Default for ToolExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_error_len: 500,
            max_summary_len: 500,
        }
    }
}

/// Tunables for the agent loop (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub task_timeout_secs: u64,
    pub knowledge_top_k: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            task_timeout_secs: 30 * 60,
            knowledge_top_k: 5,
        }
    }
}

/// Aggregate configuration for the whole runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub session: SessionConfig,
    pub fork: ForkConfig,
    pub async_tool: AsyncToolConfig,
    pub parallel_tool: ParallelToolConfig,
    pub tool_exec: ToolExecConfig,
    pub agent_loop: LoopConfig,
}

impl CoreConfig {
    /// A configuration with every limit widened, useful for test fixtures
    /// and for long, unattended autonomous runs.
    pub fn long_session() -> Self {
        Self {
            agent_loop: LoopConfig {
                max_steps: 200,
                task_timeout_secs: 2 * 3600,
                ..LoopConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_doubles_per_retry() {
        let cfg = ParallelToolConfig::default();
        assert_eq!(cfg.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(cfg.backoff_delay(3), Duration::from_millis(8000));
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.session.max_sessions_per_user, 5);
        assert_eq!(cfg.fork.max_depth, 3);
        assert_eq!(cfg.async_tool.completed_ttl_secs, 24 * 3600);
    }
}
