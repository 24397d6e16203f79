//! Storage host calls
//!
//! Contract code never names a storage key directly: the compiler turns every
//! storage access into a manifest slot id plus sub-key values, and these host
//! calls build the key, authorize it against the manifest and charge for it.
//! Reads may touch any contract the manifest declares; writes only the
//! executing contract's own keys.

use sandlot_compiler::{Manifest, Slot, SlotId, SlotKind};
use sandlot_program_runtime::{ExecResult, ExecutionError, InvokeContext};
use sandlot_types::{StorageKey, Value};

use crate::{len_u64, SyscallError};

/// Maximum rendered sub-key size (256 bytes)
pub const MAX_KEY_SIZE: u64 = 256;

/// Maximum encoded value size (64 KB)
pub const MAX_VALUE_SIZE: u64 = 65_536;

/// Base compute cost for storage operations
pub const STORAGE_READ_BASE_COST: u64 = 200;
/// Base compute cost of a write
pub const STORAGE_WRITE_BASE_COST: u64 = 500;
/// Compute cost of a deletion
pub const STORAGE_DELETE_COST: u64 = 300;

/// Per-byte cost for storage reads
pub const STORAGE_READ_BYTE_COST: u64 = 1;
/// Per-byte cost for storage writes
pub const STORAGE_WRITE_BYTE_COST: u64 = 2;

/// Build the storage key for `slot` and `subkey`
pub fn resolve_key<'m>(manifest: &'m Manifest, slot: SlotId, subkey: &[Value]) -> ExecResult<(&'m Slot, StorageKey)> {
    let entry = manifest.slot(slot).ok_or(SyscallError::UnknownSlot(slot))?;
    let key = match (entry.kind, subkey.is_empty()) {
        (SlotKind::Variable, true) => StorageKey::new(&entry.contract, &entry.variable),
        (SlotKind::Hash, false) => {
            let parts = subkey
                .iter()
                .map(Value::key_fragment)
                .collect::<Result<Vec<_>, _>>()?;
            let key = StorageKey::with_subkey(&entry.contract, &entry.variable, parts);
            let size = len_u64(key.subkey.as_ref().map_or(0, String::len));
            if size > MAX_KEY_SIZE {
                return Err(SyscallError::KeyTooLarge(size, MAX_KEY_SIZE).into());
            }
            key
        }
        _ => return Err(SyscallError::KeyShape(entry.name.clone()).into()),
    };
    Ok((entry, key))
}

fn encoded_len(value: &Value) -> ExecResult<u64> {
    bincode::serialized_size(value).map_err(ExecutionError::fault)
}

fn violation(invoke_context: &InvokeContext, key: StorageKey) -> ExecResult<ExecutionError> {
    Ok(ExecutionError::AuthorizationViolation {
        contract: invoke_context.current_frame()?.contract.clone(),
        key,
    })
}

/// Read a slot through the call's staging overlay
///
/// Missing keys read as the slot's declared default.
///
/// # Compute Cost
/// `STORAGE_READ_BASE_COST` + encoded bytes * `STORAGE_READ_BYTE_COST`
pub fn storage_read(
    invoke_context: &mut InvokeContext,
    manifest: &Manifest,
    slot: SlotId,
    subkey: &[Value],
) -> ExecResult<Value> {
    let (entry, key) = resolve_key(manifest, slot, subkey)?;
    if !manifest.declares_contract(&key.contract) {
        return Err(violation(invoke_context, key)?);
    }

    match invoke_context.storage_get(&key) {
        Some(value) => {
            let cost = STORAGE_READ_BASE_COST
                .saturating_add(encoded_len(&value)?.saturating_mul(STORAGE_READ_BYTE_COST));
            invoke_context.consume_checked(cost)?;
            Ok(value)
        }
        None => {
            // Key not found - charge minimal cost
            invoke_context.consume_checked(STORAGE_READ_BASE_COST)?;
            Ok(entry.default.clone())
        }
    }
}

/// Stage a write to a slot owned by the executing contract
///
/// Writing `None` deletes the key.
///
/// # Compute Cost
/// `STORAGE_WRITE_BASE_COST` + encoded bytes * `STORAGE_WRITE_BYTE_COST`,
/// or `STORAGE_DELETE_COST` for a deletion
pub fn storage_write(
    invoke_context: &mut InvokeContext,
    manifest: &Manifest,
    slot: SlotId,
    subkey: &[Value],
    value: Value,
) -> ExecResult<()> {
    let (_, key) = resolve_key(manifest, slot, subkey)?;
    if key.contract != invoke_context.current_frame()?.contract {
        log::debug!("rejected write to {key}");
        return Err(violation(invoke_context, key)?);
    }

    if matches!(value, Value::None) {
        invoke_context.consume_checked(STORAGE_DELETE_COST)?;
        invoke_context.storage_set(key, None);
        return Ok(());
    }

    let value_len = encoded_len(&value)?;
    if value_len > MAX_VALUE_SIZE {
        return Err(SyscallError::ValueTooLarge(value_len, MAX_VALUE_SIZE).into());
    }
    let cost = STORAGE_WRITE_BASE_COST.saturating_add(value_len.saturating_mul(STORAGE_WRITE_BYTE_COST));
    invoke_context.consume_checked(cost)?;
    invoke_context.storage_set(key, Some(value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use sandlot_compiler::{compile, NoContracts};
    use sandlot_program_runtime::{ChainContext, Config};
    use sandlot_store::Store;

    use super::*;

    const SOURCE: &str = "\
balances = Hash(default_value=0)
owner = Variable()
theirs = ForeignHash(foreign_contract='con_other', foreign_name='balances')

@export
def f():
    pass
";

    fn manifest() -> Manifest {
        compile("con_mine", SOURCE, &NoContracts).unwrap().manifest
    }

    fn context(store: &Store, budget: u64) -> InvokeContext<'_> {
        let mut context = InvokeContext::new(&Config::default(), budget, store, ChainContext::default());
        context.push_frame("con_mine", "demo").unwrap();
        context
    }

    #[test]
    fn test_storage_read_not_found() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        let value = storage_read(&mut context, &manifest, 0, &[Value::from("alice")]).unwrap();
        assert_eq!(value, Value::Int(0)); // Declared default
        assert_eq!(context.get_compute_units_consumed(), STORAGE_READ_BASE_COST);
    }

    #[test]
    fn test_storage_write_then_read() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        storage_write(&mut context, &manifest, 1, &[], Value::from("alice")).unwrap();
        let written = context.get_compute_units_consumed();
        let expected_cost = STORAGE_WRITE_BASE_COST
            .saturating_add(encoded_len(&Value::from("alice")).unwrap().saturating_mul(STORAGE_WRITE_BYTE_COST));
        assert_eq!(written, expected_cost);

        assert_eq!(storage_read(&mut context, &manifest, 1, &[]).unwrap(), Value::from("alice"));
        assert_eq!(
            context.delta().entries()[0].key,
            StorageKey::new("con_mine", "owner")
        );
    }

    #[test]
    fn test_multi_part_subkey() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        storage_write(&mut context, &manifest, 0, &[Value::from("a"), Value::Int(2)], Value::Int(5)).unwrap();
        assert_eq!(
            context.delta().entries()[0].key,
            StorageKey::with_subkey("con_mine", "balances", ["a", "2"])
        );
    }

    #[test]
    fn test_storage_delete() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        storage_write(&mut context, &manifest, 0, &[Value::from("a")], Value::None).unwrap();
        assert_eq!(context.get_compute_units_consumed(), STORAGE_DELETE_COST);
        assert_eq!(context.delta().entries()[0].new, None);
    }

    #[test]
    fn test_foreign_write_is_rejected() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        // Reading the foreign slot is fine
        storage_read(&mut context, &manifest, 2, &[Value::from("bob")]).unwrap();

        let err = storage_write(&mut context, &manifest, 2, &[Value::from("bob")], Value::Int(1)).unwrap_err();
        match err {
            ExecutionError::AuthorizationViolation { contract, key } => {
                assert_eq!(contract, "con_mine");
                assert_eq!(key, StorageKey::with_subkey("con_other", "balances", ["bob"]));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(context.delta().is_empty());
    }

    #[test]
    fn test_write_from_another_frame_is_rejected() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);
        context.push_frame("con_other", "con_mine").unwrap();

        let err = storage_write(&mut context, &manifest, 1, &[], Value::Int(1)).unwrap_err();
        assert!(matches!(err, ExecutionError::AuthorizationViolation { .. }));
    }

    #[test]
    fn test_storage_key_too_large() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);
        let long = "k".repeat(300);

        assert!(storage_read(&mut context, &manifest, 0, &[Value::from(long.as_str())]).is_err());
    }

    #[test]
    fn test_storage_key_shape() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 10_000);

        assert!(storage_read(&mut context, &manifest, 0, &[]).is_err());
        assert!(storage_read(&mut context, &manifest, 1, &[Value::Int(1)]).is_err());
        assert!(storage_read(&mut context, &manifest, 9, &[]).is_err());
        assert!(storage_read(&mut context, &manifest, 0, &[Value::List(Vec::new())]).is_err());
    }

    #[test]
    fn test_storage_insufficient_compute() {
        let store = Store::in_memory();
        let manifest = manifest();
        let mut context = context(&store, 100); // Low budget

        let err = storage_write(&mut context, &manifest, 1, &[], Value::Int(1)).unwrap_err();
        assert!(matches!(err, ExecutionError::ResourceExhausted { budget: 100, .. }));
        assert!(context.delta().is_empty());
    }
}
