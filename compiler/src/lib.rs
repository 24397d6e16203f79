//! Contract compiler and linter
//!
//! [`compile`] turns contract source into an [`Artifact`]: the source is
//! parsed, linted against the approved language subset, resolved against the
//! standard library and previously deployed contracts, and lowered to a
//! metered IR whose storage accesses go through the artifact's manifest.
//!
//! Compilation is pure: it never touches storage, and the same source
//! compiled against the same resolver yields the same artifact.

#![warn(missing_docs)]

mod artifact;
mod error;
pub mod ir;
mod lint;
mod lower;

use std::collections::BTreeMap;

pub use artifact::{
    Annotation, Artifact, ContractInterface, FunctionId, ImportId, Manifest, Parameter, Signature, Slot, SlotId,
    SlotKind,
};
pub use error::{CompileError, Diagnostic};
pub use lint::{BANNED_BUILTINS, BANNED_MODULES};
pub use lower::{CALL_COST, ITERATION_COST, LOOP_SETUP_COST, STMT_COST};

use sandlot_environment::stdlib;

/// Lookup of already deployed contracts, used to resolve `import`
pub trait ContractResolver {
    /// Interface of a deployed contract
    fn resolve(&self, name: &str) -> Option<ContractInterface>;
}

/// Resolver for contracts that import nothing
pub struct NoContracts;

impl ContractResolver for NoContracts {
    fn resolve(&self, _name: &str) -> Option<ContractInterface> {
        None
    }
}

impl ContractResolver for BTreeMap<String, Artifact> {
    fn resolve(&self, name: &str) -> Option<ContractInterface> {
        self.get(name).map(Artifact::interface)
    }
}

/// Compile `source` as contract `name`
pub fn compile(name: &str, source: &str, resolver: &dyn ContractResolver) -> Result<Artifact, CompileError> {
    let module = sandlot_parser::parse(source)?;

    let env = stdlib();
    let mut diagnostics = lint::lint(&module);
    let (lowered, lowering_diagnostics) = lower::lower(name, &module, resolver, env);
    diagnostics.extend(lowering_diagnostics);

    if !diagnostics.is_empty() {
        log::debug!("contract {name} rejected with {} diagnostics", diagnostics.len());
        return Err(CompileError::new(diagnostics));
    }

    let artifact = Artifact {
        name: name.to_string(),
        stdlib_version: env.version(),
        source_hash: blake3::hash(source.as_bytes()).to_hex().to_string(),
        manifest: lowered.manifest,
        imports: lowered.imports,
        constants: lowered.constants,
        exports: lowered.exports,
        functions: lowered.functions,
        constructor: lowered.constructor,
    };
    log::debug!(
        "compiled contract {name}: {} functions, {} storage slots, {} imports",
        artifact.functions.len(),
        artifact.manifest.slots().len(),
        artifact.imports.len()
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use sandlot_ast::Span;
    use sandlot_types::Value;

    use super::*;
    use crate::ir::{ContextField, Expr, Stmt, Visibility};

    const TOKEN: &str = r#"
balances = Hash(default_value=0)
owner = Variable()
FEE = 2

@construct
def seed():
    balances['treasury'] = 1_000
    owner.set(ctx.caller)

@export
def transfer(to: str, amount: int):
    """Move funds between accounts."""
    assert amount > 0, 'Amount must be positive.'
    assert balances[ctx.caller] >= amount, 'Insufficient balance.'
    balances[ctx.caller] -= amount
    balances[to] += amount

@export
def balance_of(account: str):
    return balances[account]

def fee_for(amount):
    return amount * FEE
"#;

    #[test]
    fn test_compile_token_contract() {
        let artifact = compile("con_token", TOKEN, &NoContracts).unwrap();
        assert_eq!(artifact.stdlib_version, sandlot_environment::STDLIB_VERSION);
        assert_eq!(artifact.export_names(), vec!["balance_of", "transfer"]);
        assert_eq!(artifact.constants, vec![("FEE".to_string(), Value::Int(2))]);

        let transfer = artifact.signature("transfer").unwrap();
        assert_eq!(transfer.docstring.as_deref(), Some("Move funds between accounts."));
        assert_eq!(transfer.params[0].annotation, Some(Annotation::Str));

        let slots = artifact.manifest.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].contract, "con_token");
        assert_eq!(slots[0].default, Value::Int(0));
        assert_eq!(slots[1].kind, SlotKind::Variable);

        let seed = &artifact.functions[artifact.constructor.unwrap()];
        assert_eq!(seed.visibility, Visibility::Construct);
        assert!(matches!(seed.body[0], Stmt::Checkpoint(cost) if cost > 0));
        assert!(matches!(
            &seed.body[2],
            Stmt::StorageWrite { slot: 1, subkey, value: Expr::Context(ContextField::Caller), .. } if subkey.is_empty()
        ));

        assert!(artifact.export_id("fee_for").is_none());
        assert!(artifact.function_id("fee_for").is_some());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile("con_token", TOKEN, &NoContracts).unwrap();
        let b = compile("con_token", TOKEN, &NoContracts).unwrap();
        assert_eq!(a.exports, b.exports);
        assert_eq!(a.manifest, b.manifest);
        assert_eq!(a, b);
    }

    #[test]
    fn test_while_loop_is_rejected() {
        let source = "@export\ndef spin():\n    while True:\n        pass\n";
        let err = compile("con_spin", source, &NoContracts).unwrap_err();
        assert!(err.mentions("while"));
        assert_eq!(err.diagnostics[0].span, Span::new(3, 5));
        assert!(err.to_string().contains("while"));
    }

    #[test]
    fn test_unresolved_names_and_bad_calls() {
        let source = "@export\ndef f(a):\n    b = missing + 1\n    return g(a, 2)\n\ndef g(x):\n    return x\n";
        let err = compile("con_bad", source, &NoContracts).unwrap_err();
        let messages: Vec<String> = err.diagnostics.iter().map(|d| d.message.clone()).collect();
        assert!(messages.iter().any(|m| m.contains("name 'missing' is not defined")));
        assert!(messages.iter().any(|m| m.contains("g() takes 1 positional arguments but 2 were given")));
    }

    #[test]
    fn test_imports_resolve_against_deployed_contracts() {
        let mut deployed = BTreeMap::new();
        deployed.insert("con_token".to_string(), compile("con_token", TOKEN, &NoContracts).unwrap());

        let source = "import con_token\n\n@export\ndef pay(to: str):\n    con_token.transfer(to=to, amount=5)\n";
        let artifact = compile("con_pay", source, &deployed).unwrap();
        assert_eq!(artifact.imports, vec!["con_token".to_string()]);

        let bad = "import con_token\n\n@export\ndef pay(to: str):\n    con_token.mint(to=to)\n";
        let err = compile("con_pay", bad, &deployed).unwrap_err();
        assert!(err.diagnostics[0].message.contains("no exported function 'mint'"));

        let missing = "import con_nothing\n\n@export\ndef f():\n    pass\n";
        let err = compile("con_x", missing, &deployed).unwrap_err();
        assert!(err.diagnostics[0].message.contains("not deployed"));
    }

    #[test]
    fn test_foreign_storage_is_declared_in_manifest() {
        let source = "supply = ForeignHash(foreign_contract='con_token', foreign_name='balances')\n\n@export\ndef steal():\n    supply['treasury'] = 0\n";
        let artifact = compile("con_thief", source, &NoContracts).unwrap();
        let slot = &artifact.manifest.slots()[0];
        assert!(slot.foreign);
        assert_eq!(slot.contract, "con_token");
        assert!(artifact.manifest.declares_contract("con_token"));
        assert!(artifact.manifest.declares_contract("con_thief"));
        assert!(!artifact.manifest.declares_contract("con_other"));
    }

    #[test]
    fn test_loops_are_metered_per_iteration() {
        let source = "@export\ndef f(n: int):\n    total = 0\n    for i in range(n):\n        total += i\n    return total\n";
        let artifact = compile("con_loop", source, &NoContracts).unwrap();
        let body = &artifact.functions[0].body;
        assert!(matches!(body[2], Stmt::Checkpoint(cost) if cost >= LOOP_SETUP_COST));
        let Stmt::ForRange { body: loop_body, .. } = &body[3] else {
            panic!("expected a range loop, got {:?}", body[3]);
        };
        assert!(matches!(loop_body[0], Stmt::Checkpoint(cost) if cost > ITERATION_COST));
    }

    #[test]
    fn test_syntax_errors_become_diagnostics() {
        let err = compile("con_x", "@export\ndef f(:\n    pass\n", &NoContracts).unwrap_err();
        assert_eq!(err.diagnostics.len(), 1);
        assert_eq!(err.diagnostics[0].construct, "syntax");
        assert_eq!(err.diagnostics[0].span, Span::new(2, 7));
    }
}
