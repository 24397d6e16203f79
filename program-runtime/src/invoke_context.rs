//! Program invocation context
//!
//! One [`InvokeContext`] backs exactly one top-level call, including every
//! nested frame it opens. It owns the compute meter, the call stack, the log
//! buffer and the staging overlay through which all storage access flows.

use sandlot_store::{StagingArea, StateDelta, Store};
use sandlot_types::{StorageKey, Value};
use serde::{Deserialize, Serialize};

use crate::config::{Config, VALUE_BYTES_PER_UNIT};
use crate::error::{ExecResult, ExecutionError};

/// Default `ctx.signer`
pub const DEFAULT_SIGNER: &str = "demo";

/// Default `now`
pub const DEFAULT_NOW: &str = "2024-02-01T12:30:00";

/// Default `block_num`
pub const DEFAULT_BLOCK_NUM: i128 = 100;

/// Default `block_hash`
pub const DEFAULT_BLOCK_HASH: &str = "0xabc...";

/// Environment values visible to contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContext {
    /// Account signing the outermost call
    pub signer: String,
    /// Execution timestamp, ISO-8601
    pub now: String,
    /// Synthetic block height
    pub block_num: i128,
    /// Synthetic block hash
    pub block_hash: String,
}

impl Default for ChainContext {
    fn default() -> Self {
        Self {
            signer: DEFAULT_SIGNER.to_string(),
            now: DEFAULT_NOW.to_string(),
            block_num: DEFAULT_BLOCK_NUM,
            block_hash: DEFAULT_BLOCK_HASH.to_string(),
        }
    }
}

/// One entry of the call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Contract whose code runs in this frame
    pub contract: String,
    /// `ctx.caller` seen by that code
    pub caller: String,
}

/// Everything a finished call leaves behind
#[derive(Debug)]
pub struct CallOutput {
    /// Staged writes
    pub delta: StateDelta,
    /// Log lines in emission order
    pub logs: Vec<String>,
    /// Compute units consumed
    pub compute_units: u64,
}

/// Execution context of one top-level call
pub struct InvokeContext<'a> {
    /// Compute units granted to the call
    compute_budget: u64,

    /// Compute units left
    remaining: u64,

    /// Read-your-writes overlay on the session store
    staging: StagingArea<'a>,

    /// Active frames, outermost first
    frames: Vec<Frame>,
    max_call_depth: usize,

    chain: ChainContext,

    logs: Vec<String>,
    max_log_length: usize,

    /// Forward log lines to the `log` facade
    pub debug_mode: bool,
}

impl<'a> InvokeContext<'a> {
    /// Fresh context over `store` with `compute_budget` units
    pub fn new(config: &Config, compute_budget: u64, store: &'a Store, chain: ChainContext) -> Self {
        Self {
            compute_budget,
            remaining: compute_budget,
            staging: StagingArea::new(store),
            frames: Vec::new(),
            max_call_depth: config.max_call_depth,
            chain,
            logs: Vec::new(),
            max_log_length: config.max_log_length,
            debug_mode: config.debug_mode,
        }
    }

    /// Enable debug mode (log lines also go to the `log` facade)
    pub fn enable_debug(&mut self) {
        self.debug_mode = true;
    }

    /// Get the initial compute budget
    pub fn get_compute_budget(&self) -> u64 {
        self.compute_budget
    }

    /// Get the compute units left
    pub fn get_remaining(&self) -> u64 {
        self.remaining
    }

    /// Get compute units consumed so far
    pub fn get_compute_units_consumed(&self) -> u64 {
        self.compute_budget.saturating_sub(self.remaining)
    }

    /// Consume compute units with checked arithmetic
    ///
    /// Fails without charging anything if not enough units remain.
    pub fn consume_checked(&mut self, amount: u64) -> ExecResult<()> {
        match self.remaining.checked_sub(amount) {
            Some(left) => {
                self.remaining = left;
                Ok(())
            }
            None => Err(ExecutionError::ResourceExhausted {
                budget: self.compute_budget,
                consumed: self.get_compute_units_consumed(),
                requested: amount,
            }),
        }
    }

    /// Charge for materializing `value` (copies, concatenations, results)
    pub fn charge_value(&mut self, value: &Value) -> ExecResult<()> {
        let units = value.footprint() / VALUE_BYTES_PER_UNIT;
        self.consume_checked(u64::try_from(units).unwrap_or(u64::MAX))
    }

    /// Open a frame, enforcing the call depth limit
    pub fn push_frame(&mut self, contract: impl Into<String>, caller: impl Into<String>) -> ExecResult<()> {
        let depth = self.frames.len().saturating_add(1);
        if depth > self.max_call_depth {
            return Err(ExecutionError::RecursionLimit {
                depth,
                max: self.max_call_depth,
            });
        }
        self.frames.push(Frame {
            contract: contract.into(),
            caller: caller.into(),
        });
        Ok(())
    }

    /// Close the innermost frame
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost frame
    pub fn current_frame(&self) -> ExecResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| ExecutionError::fault("no active call frame"))
    }

    /// Environment values
    pub fn chain(&self) -> &ChainContext {
        &self.chain
    }

    /// Current value of `key` as seen by this call
    pub fn storage_get(&self, key: &StorageKey) -> Option<Value> {
        self.staging.get(key)
    }

    /// Stage a write (or a deletion with `None`)
    pub fn storage_set(&mut self, key: StorageKey, value: Option<Value>) {
        self.staging.stage(key, value);
    }

    /// Writes staged so far
    pub fn delta(&self) -> &StateDelta {
        self.staging.delta()
    }

    /// Longest accepted log line
    pub fn max_log_length(&self) -> usize {
        self.max_log_length
    }

    /// Record a log line
    pub fn push_log(&mut self, line: String) {
        self.logs.push(line);
    }

    /// Log lines so far
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Consume the context, keeping what the call produced
    pub fn finish(self) -> CallOutput {
        let compute_units = self.get_compute_units_consumed();
        CallOutput {
            delta: self.staging.into_delta(),
            logs: self.logs,
            compute_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(store: &Store, budget: u64) -> InvokeContext<'_> {
        InvokeContext::new(&Config::default(), budget, store, ChainContext::default())
    }

    #[test]
    fn test_invoke_context_creation() {
        let store = Store::in_memory();
        let context = context(&store, 100_000);
        assert_eq!(context.get_compute_budget(), 100_000);
        assert_eq!(context.get_remaining(), 100_000);
        assert_eq!(context.get_compute_units_consumed(), 0);
        assert_eq!(context.chain().signer, DEFAULT_SIGNER);
        assert_eq!(context.depth(), 0);
    }

    #[test]
    fn test_consume_checked() {
        let store = Store::in_memory();
        let mut context = context(&store, 100);

        // Should succeed
        assert!(context.consume_checked(50).is_ok());
        assert_eq!(context.get_remaining(), 50);

        // Should fail - not enough units
        let err = context.consume_checked(100).unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ResourceExhausted { budget: 100, consumed: 50, requested: 100 }
        ));
        assert_eq!(context.get_remaining(), 50); // Unchanged

        // Should succeed with exact remaining amount
        assert!(context.consume_checked(50).is_ok());
        assert_eq!(context.get_remaining(), 0);
    }

    #[test]
    fn test_charge_value_scales_with_size() {
        let store = Store::in_memory();
        let mut context = context(&store, 1_000_000);
        context.charge_value(&Value::Int(7)).unwrap();
        assert_eq!(context.get_compute_units_consumed(), 0);

        context.charge_value(&Value::Str("x".repeat(64 * 100))).unwrap();
        let consumed = context.get_compute_units_consumed();
        assert!(consumed >= 100);

        let mut small = InvokeContext::new(&Config::default(), 10, &store, ChainContext::default());
        assert!(matches!(
            small.charge_value(&Value::Str("x".repeat(64 * 100))),
            Err(ExecutionError::ResourceExhausted { .. })
        ));
        assert_eq!(small.get_remaining(), 10);
    }

    #[test]
    fn test_call_depth_limit() {
        let store = Store::in_memory();
        let config = Config {
            max_call_depth: 2,
            ..Config::default()
        };
        let mut context = InvokeContext::new(&config, 1_000, &store, ChainContext::default());
        context.push_frame("con_a", "demo").unwrap();
        context.push_frame("con_b", "con_a").unwrap();
        assert!(matches!(
            context.push_frame("con_c", "con_b"),
            Err(ExecutionError::RecursionLimit { depth: 3, max: 2 })
        ));
        assert_eq!(context.current_frame().unwrap().contract, "con_b");
        context.pop_frame();
        assert_eq!(context.current_frame().unwrap().caller, "demo");
    }

    #[test]
    fn test_debug_mode() {
        let store = Store::in_memory();
        let mut context = context(&store, 100_000);
        assert!(!context.debug_mode);

        context.enable_debug();
        assert!(context.debug_mode);
    }

    #[test]
    fn test_finish_returns_staged_writes() {
        let store = Store::in_memory();
        let mut context = context(&store, 1_000);
        let key = StorageKey::new("con_a", "owner");
        context.storage_set(key.clone(), Some(Value::from("alice")));
        assert_eq!(context.storage_get(&key), Some(Value::from("alice")));
        context.consume_checked(10).unwrap();
        context.push_log("hello".to_string());

        let output = context.finish();
        assert_eq!(output.delta.len(), 1);
        assert_eq!(output.logs, vec!["hello".to_string()]);
        assert_eq!(output.compute_units, 10);
        assert!(store.is_empty());
    }
}
