//! Context host calls
//!
//! Read-only access to the call frame and the session environment:
//! `ctx.caller`, `ctx.signer`, `ctx.this`, `now`, `block_num`, `block_hash`.

use sandlot_compiler::ir::ContextField;
use sandlot_program_runtime::{ExecResult, InvokeContext};
use sandlot_types::Value;

/// Compute units for a context query
pub const CONTEXT_QUERY_COST: u64 = 10;

/// Current value of a context field
pub fn context_value(invoke_context: &mut InvokeContext, field: ContextField) -> ExecResult<Value> {
    invoke_context.consume_checked(CONTEXT_QUERY_COST)?;

    let value = match field {
        ContextField::Caller => Value::Str(invoke_context.current_frame()?.caller.clone()),
        ContextField::This => Value::Str(invoke_context.current_frame()?.contract.clone()),
        ContextField::Signer => Value::Str(invoke_context.chain().signer.clone()),
        ContextField::Now => Value::Str(invoke_context.chain().now.clone()),
        ContextField::BlockNum => Value::Int(invoke_context.chain().block_num),
        ContextField::BlockHash => Value::Str(invoke_context.chain().block_hash.clone()),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use sandlot_program_runtime::{ChainContext, Config};
    use sandlot_store::Store;

    use super::*;

    #[test]
    fn test_context_fields() {
        let store = Store::in_memory();
        let chain = ChainContext {
            signer: "alice".to_string(),
            block_num: 7,
            ..ChainContext::default()
        };
        let mut context = InvokeContext::new(&Config::default(), 1_000, &store, chain);
        context.push_frame("con_a", "alice").unwrap();
        context.push_frame("con_b", "con_a").unwrap();

        assert_eq!(context_value(&mut context, ContextField::Caller).unwrap(), Value::from("con_a"));
        assert_eq!(context_value(&mut context, ContextField::This).unwrap(), Value::from("con_b"));
        assert_eq!(context_value(&mut context, ContextField::Signer).unwrap(), Value::from("alice"));
        assert_eq!(context_value(&mut context, ContextField::BlockNum).unwrap(), Value::Int(7));
        assert_eq!(
            context.get_compute_units_consumed(),
            CONTEXT_QUERY_COST.saturating_mul(4)
        );
    }
}
