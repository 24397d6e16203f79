//! Logging host call
//!
//! `print(...)` in contract code ends up here.

use sandlot_program_runtime::{ExecResult, InvokeContext};

use crate::{len_u64, SyscallError};

/// Compute units charged for every log line
pub const LOG_BASE_COST: u64 = 100;

/// Compute units charged per byte of log message
pub const LOG_COST_PER_BYTE: u64 = 1;

/// Record a log line from the executing contract
///
/// Messages longer than the context's limit are rejected. The line is always
/// kept in the call's log buffer and additionally written to the `log`
/// facade when the context is in debug mode.
///
/// # Compute Cost
/// `LOG_BASE_COST` + message bytes * `LOG_COST_PER_BYTE`
pub fn log(invoke_context: &mut InvokeContext, message: String) -> ExecResult<()> {
    let msg_len = len_u64(message.len());
    let max = len_u64(invoke_context.max_log_length());
    if msg_len > max {
        return Err(SyscallError::MessageTooLong(msg_len, max).into());
    }

    let total_cost = LOG_BASE_COST.saturating_add(msg_len.saturating_mul(LOG_COST_PER_BYTE));
    invoke_context.consume_checked(total_cost)?;

    if invoke_context.debug_mode {
        let contract = invoke_context
            .current_frame()
            .map(|frame| frame.contract.as_str())
            .unwrap_or("-");
        log::info!("[Contract {contract}]: {message}");
    }
    invoke_context.push_log(message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use sandlot_program_runtime::{ChainContext, Config, ExecutionError};
    use sandlot_store::Store;

    use super::*;

    fn context(store: &Store, budget: u64) -> InvokeContext<'_> {
        let mut context = InvokeContext::new(&Config::default(), budget, store, ChainContext::default());
        context.push_frame("con_log", "demo").unwrap();
        context
    }

    #[test]
    fn test_log_success() {
        let store = Store::in_memory();
        let mut context = context(&store, 10_000);
        context.enable_debug();

        log(&mut context, "Hello, sandlot!".to_string()).unwrap();

        // Check compute units were consumed
        let expected_cost = LOG_BASE_COST.saturating_add(15);
        assert_eq!(context.get_compute_units_consumed(), expected_cost);
        assert_eq!(context.logs(), ["Hello, sandlot!".to_string()]);
    }

    #[test]
    fn test_log_too_long() {
        let store = Store::in_memory();
        let mut context = context(&store, 100_000);
        let message = "x".repeat(context.max_log_length().saturating_add(1));

        let err = log(&mut context, message).unwrap_err();
        assert!(err.to_string().contains("Message too long"));
        assert_eq!(context.get_compute_units_consumed(), 0);
    }

    #[test]
    fn test_log_insufficient_compute() {
        let store = Store::in_memory();
        let mut context = context(&store, 50); // Very low budget

        let err = log(&mut context, "Hello".to_string()).unwrap_err();
        assert!(matches!(err, ExecutionError::ResourceExhausted { requested: 105, .. }));
        assert!(context.logs().is_empty());
    }

    #[test]
    fn test_log_empty_message() {
        let store = Store::in_memory();
        let mut context = context(&store, 10_000);

        log(&mut context, String::new()).unwrap();
        // Base cost only
        assert_eq!(context.get_compute_units_consumed(), LOG_BASE_COST);
    }
}
