use std::collections::BTreeMap;

use sandlot_compiler::{compile, Artifact};
use sandlot_environment::STDLIB_VERSION;
use sandlot_program_runtime::{ChainContext, Config, ExecResult, ExecutionError, MAX_COMPUTE_BUDGET};
use sandlot_store::Store;
use sandlot_types::{Decimal, StorageKey, Value};

use super::*;

const MATH: &str = "\
@export
def double(x: int):
    return x * 2

@export
def half(x: int):
    return x / 2

@export
def scale(x: float):
    return x

@export
def spin(n: int):
    total = 0
    for i in range(n):
        total += i
    return total

@export
def loops():
    total = 0
    for i in range(10):
        if i == 8:
            break
        if i % 2 == 1:
            continue
        total += i
    for ch in 'abc':
        total += len(ch)
    return total

@export
def shape():
    items = [1, 2, 3]
    items[-1] = 9
    book = {'a': 1}
    book['b'] = items[2]
    return book

@export
def check(n: int):
    assert n > 0, 'n must be positive'
    return n

@export
def shout(n: int):
    print('hello', n)

@export
def grow(n: int):
    s = 'ab'
    for i in range(n):
        s = s + s
    return len(s)

@export
def wrap(n: int):
    l = []
    for i in range(n):
        l = [l]
    return n

@export
def nest_in_place(n: int):
    l = [0]
    for i in range(n):
        l[0] = l
    return n

@export
def dive():
    return deeper(0)

def deeper(n):
    return deeper(n + 1)
";

const COUNTER: &str = "\
counts = Hash(default_value=0)

@export
def bump(who: str):
    counts[who] += 1
    return ctx.caller

@export
def bump_then_fail(who: str):
    counts[who] += 1
    assert False, 'rolled back'
";

const USER: &str = "\
import con_counter

@export
def relay():
    return con_counter.bump(who='x')
";

const THIEF: &str = "\
stolen = ForeignHash(foreign_contract='con_counter', foreign_name='counts')

@export
def steal():
    stolen['x'] = 100
";

const OWNED: &str = "\
owner = Variable()

@construct
def seed(name: str = 'founder'):
    owner.set(name)

@export
def who():
    return owner.get()
";

fn deploy(contracts: &mut BTreeMap<String, Artifact>, name: &str, source: &str) {
    let artifact = compile(name, source, &*contracts).unwrap();
    contracts.insert(name.to_string(), artifact);
}

fn registry() -> BTreeMap<String, Artifact> {
    let mut contracts = BTreeMap::new();
    deploy(&mut contracts, "con_math", MATH);
    deploy(&mut contracts, "con_counter", COUNTER);
    deploy(&mut contracts, "con_user", USER);
    deploy(&mut contracts, "con_thief", THIEF);
    deploy(&mut contracts, "con_owned", OWNED);
    contracts
}

fn args(pairs: &[(&str, Value)]) -> Arguments {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn run(
    store: &Store,
    contracts: &BTreeMap<String, Artifact>,
    contract: &str,
    function: &str,
    arguments: Arguments,
    budget: Option<u64>,
) -> ExecResult<ExecutionResult> {
    let executor = Executor::new(Config::default(), store, contracts, ChainContext::default());
    executor.execute(&contracts[contract], function, arguments, budget)
}

#[test]
fn test_simple_call() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "double", args(&[("x", Value::Int(21))]), None).unwrap();
    assert_eq!(result.value, Value::Int(42));
    assert!(result.compute_units > 0);
    assert!(result.compute_units <= result.budget);
    assert_eq!(result.budget, Config::default().default_budget);
    assert!(result.delta.is_empty());
}

#[test]
fn test_division_promotes_to_decimal() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "half", args(&[("x", Value::Int(3))]), None).unwrap();
    assert_eq!(result.value, Value::Decimal(Decimal::parse("1.5").unwrap()));

    let result = run(&store, &contracts, "con_math", "scale", args(&[("x", Value::Int(2))]), None).unwrap();
    assert_eq!(result.value, Value::Decimal(Decimal::from_int(2).unwrap()));
}

#[test]
fn test_budget_exhaustion() {
    let store = Store::in_memory();
    let contracts = registry();

    let err = run(
        &store,
        &contracts,
        "con_math",
        "spin",
        args(&[("n", Value::Int(1_000_000))]),
        Some(1_000),
    )
    .unwrap_err();
    match err {
        ExecutionError::ResourceExhausted { budget, consumed, .. } => {
            assert_eq!(budget, 1_000);
            assert!(consumed <= budget);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_invalid_budget() {
    let store = Store::in_memory();
    let contracts = registry();

    for budget in [0, MAX_COMPUTE_BUDGET.saturating_add(1)] {
        let err = run(&store, &contracts, "con_math", "double", args(&[("x", Value::Int(1))]), Some(budget)).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidBudget { .. }));
    }
}

#[test]
fn test_loops_with_break_and_continue() {
    let store = Store::in_memory();
    let contracts = registry();

    // 0 + 2 + 4 + 6, then one per character
    let result = run(&store, &contracts, "con_math", "loops", Arguments::new(), None).unwrap();
    assert_eq!(result.value, Value::Int(15));
}

#[test]
fn test_collection_assignment() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "shape", Arguments::new(), None).unwrap();
    let mut expected = BTreeMap::new();
    expected.insert("a".to_string(), Value::Int(1));
    expected.insert("b".to_string(), Value::Int(9));
    assert_eq!(result.value, Value::Map(expected));
}

#[test]
fn test_assertion_message() {
    let store = Store::in_memory();
    let contracts = registry();

    let err = run(&store, &contracts, "con_math", "check", args(&[("n", Value::Int(0))]), None).unwrap_err();
    assert!(matches!(&err, ExecutionError::AssertionFailed(msg) if msg == "n must be positive"));
}

#[test]
fn test_print_is_captured() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "shout", args(&[("n", Value::Int(1))]), None).unwrap();
    assert_eq!(result.logs, vec!["hello 1".to_string()]);
    assert_eq!(result.value, Value::None);
}

#[test]
fn test_recursion_limit() {
    let store = Store::in_memory();
    let contracts = registry();

    let err = run(&store, &contracts, "con_math", "dive", Arguments::new(), None).unwrap_err();
    assert!(matches!(err, ExecutionError::RecursionLimit { depth: 65, max: 64 }));
}

#[test]
fn test_string_growth_is_capped() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "grow", args(&[("n", Value::Int(4))]), None).unwrap();
    assert_eq!(result.value, Value::Int(32));

    let err = run(&store, &contracts, "con_math", "grow", args(&[("n", Value::Int(40))]), None).unwrap_err();
    assert!(
        matches!(&err, ExecutionError::RuntimeFault(msg) if msg.contains("maximum length"))
            || matches!(err, ExecutionError::ResourceExhausted { .. }),
        "unexpected error {err:?}"
    );
}

#[test]
fn test_copies_are_metered() {
    let store = Store::in_memory();
    let contracts = registry();

    let short = run(&store, &contracts, "con_math", "grow", args(&[("n", Value::Int(2))]), None).unwrap();
    let long = run(&store, &contracts, "con_math", "grow", args(&[("n", Value::Int(12))]), None).unwrap();
    // ten more loop iterations alone cost far less than copying 8 KiB strings
    assert!(long.compute_units > short.compute_units + 200);
}

#[test]
fn test_value_nesting_is_capped() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_math", "wrap", args(&[("n", Value::Int(10))]), None).unwrap();
    assert_eq!(result.value, Value::Int(10));

    for function in ["wrap", "nest_in_place"] {
        let err = run(&store, &contracts, "con_math", function, args(&[("n", Value::Int(1_000))]), None).unwrap_err();
        assert!(
            matches!(&err, ExecutionError::RuntimeFault(msg) if msg.contains("nested deeper")),
            "{function}: unexpected error {err:?}"
        );
    }
}

#[test]
fn test_recursion_limit_on_small_caller_stack() {
    let store = Store::in_memory();
    let contracts = registry();

    // the call gets its own stack, whatever thread asks for it
    let err = std::thread::Builder::new()
        .stack_size(64 * 1024)
        .spawn(move || run(&store, &contracts, "con_math", "dive", Arguments::new(), None).map(|r| r.value))
        .unwrap()
        .join()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ExecutionError::RecursionLimit { depth: 65, .. }));
}

#[test]
fn test_argument_checks() {
    let store = Store::in_memory();
    let contracts = registry();

    let err = run(&store, &contracts, "con_math", "double", args(&[("x", Value::from("a"))]), None).unwrap_err();
    assert!(matches!(&err, ExecutionError::RuntimeFault(msg) if msg.contains("must be int")));

    let err = run(&store, &contracts, "con_math", "double", Arguments::new(), None).unwrap_err();
    assert!(matches!(&err, ExecutionError::RuntimeFault(msg) if msg.contains("missing required argument 'x'")));

    let err = run(
        &store,
        &contracts,
        "con_math",
        "double",
        args(&[("x", Value::Int(1)), ("y", Value::Int(2))]),
        None,
    )
    .unwrap_err();
    assert!(matches!(&err, ExecutionError::RuntimeFault(msg) if msg.contains("unexpected keyword argument 'y'")));

    let err = run(&store, &contracts, "con_math", "deeper", args(&[("n", Value::Int(1))]), None).unwrap_err();
    assert!(matches!(err, ExecutionError::UnknownFunction { .. }));
}

#[test]
fn test_writes_are_staged() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_counter", "bump", args(&[("who", Value::from("x"))]), None).unwrap();
    assert_eq!(result.value, Value::from("demo"));

    let key = StorageKey::with_subkey("con_counter", "counts", ["x"]);
    let changes: Vec<_> = result.delta.changes().collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, key);
    assert_eq!(changes[0].new, Some(Value::Int(1)));
    assert!(store.is_empty());
}

#[test]
fn test_failed_call_discards_writes() {
    let mut store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_counter", "bump", args(&[("who", Value::from("x"))]), None).unwrap();
    store.commit(&result.delta).unwrap();
    let root = store.root();

    let err = run(
        &store,
        &contracts,
        "con_counter",
        "bump_then_fail",
        args(&[("who", Value::from("x"))]),
        None,
    )
    .unwrap_err();
    assert!(matches!(&err, ExecutionError::AssertionFailed(msg) if msg == "rolled back"));
    assert_eq!(store.root(), root);
    assert_eq!(
        store.get(&StorageKey::with_subkey("con_counter", "counts", ["x"])).unwrap(),
        &Value::Int(1)
    );
}

#[test]
fn test_cross_contract_call() {
    let store = Store::in_memory();
    let contracts = registry();

    let result = run(&store, &contracts, "con_user", "relay", Arguments::new(), None).unwrap();
    // The callee sees the calling contract as its caller
    assert_eq!(result.value, Value::from("con_user"));
    let changes: Vec<_> = result.delta.changes().collect();
    assert_eq!(changes[0].key, StorageKey::with_subkey("con_counter", "counts", ["x"]));
}

#[test]
fn test_foreign_write_is_rejected() {
    let store = Store::in_memory();
    let contracts = registry();

    let err = run(&store, &contracts, "con_thief", "steal", Arguments::new(), None).unwrap_err();
    match err {
        ExecutionError::AuthorizationViolation { contract, key } => {
            assert_eq!(contract, "con_thief");
            assert_eq!(key, StorageKey::with_subkey("con_counter", "counts", ["x"]));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_library_version_mismatch() {
    let store = Store::in_memory();
    let mut contracts = registry();
    if let Some(artifact) = contracts.get_mut("con_math") {
        artifact.stdlib_version = STDLIB_VERSION.saturating_add(1);
    }

    let err = run(&store, &contracts, "con_math", "double", args(&[("x", Value::Int(1))]), None).unwrap_err();
    assert!(matches!(err, ExecutionError::LibraryVersionMismatch { runtime, .. } if runtime == STDLIB_VERSION));
}

#[test]
fn test_constructor_defaults() {
    let mut store = Store::in_memory();
    let contracts = registry();

    let delta = {
        let executor = Executor::new(Config::default(), &store, &contracts, ChainContext::default());
        executor.construct(&contracts["con_owned"], Arguments::new(), None).unwrap().delta
    };
    store.commit(&delta).unwrap();

    let result = run(&store, &contracts, "con_owned", "who", Arguments::new(), None).unwrap();
    assert_eq!(result.value, Value::from("founder"));

    // No constructor: nothing to run
    let executor = Executor::new(Config::default(), &store, &contracts, ChainContext::default());
    let result = executor.construct(&contracts["con_math"], Arguments::new(), None).unwrap();
    assert_eq!(result.compute_units, 0);
    assert!(result.delta.is_empty());
}

#[test]
fn test_debug_mode_keeps_logs() {
    let store = Store::in_memory();
    let contracts = registry();

    let mut executor = Executor::new(Config::default(), &store, &contracts, ChainContext::default());
    executor.enable_debug();
    assert!(executor.config().debug_mode);
    let result = executor
        .execute(&contracts["con_math"], "shout", args(&[("n", Value::Int(2))]), None)
        .unwrap();
    assert_eq!(result.logs, vec!["hello 2".to_string()]);
}
