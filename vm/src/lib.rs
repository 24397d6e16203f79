//! Sandlot executor
//!
//! Runs compiled contract functions against a session store. Every call gets
//! a fresh [`InvokeContext`]; storage writes are staged and returned as a
//! [`StateDelta`] for the caller to commit, so a failed call never touches
//! the store.
//!
//! # Example
//!
//! ```no_run
//! use std::{collections::BTreeMap, thread};
//! use sandlot_compiler::{compile, NoContracts};
//! use sandlot_program_runtime::{ChainContext, Config};
//! use sandlot_store::Store;
//! use sandlot_types::Value;
//! use sandlot_vm::{Arguments, Executor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = "@export\ndef double(x: int):\n    return x * 2\n";
//! let artifact = compile("con_math", source, &NoContracts)?;
//!
//! let mut store = Store::in_memory();
//! let contracts = BTreeMap::<String, sandlot_compiler::Artifact>::new();
//! let executor = Executor::new(Config::default(), &store, &contracts, ChainContext::default());
//!
//! let mut args = Arguments::new();
//! args.insert("x".to_string(), Value::Int(21));
//! let result = executor.execute(&artifact, "double", args, None)?;
//! println!("Returned {} using {} CU", result.value, result.compute_units);
//! store.commit(&result.delta)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod interpreter;

use std::collections::BTreeMap;
use std::thread;

use sandlot_compiler::{Artifact, FunctionId, Parameter};
use sandlot_environment::{stdlib, Environment};
use sandlot_program_runtime::{ChainContext, Config, ExecResult, ExecutionError, InvokeContext};
use sandlot_store::{StateDelta, Store};
use sandlot_types::Value;

use crate::interpreter::Machine;

/// Keyword arguments of an external call
pub type Arguments = BTreeMap<String, Value>;

/// Lookup of deployed artifacts for cross-contract calls
///
/// Calls run on a dedicated thread, hence the `Sync` bound.
pub trait ContractRegistry: Sync {
    /// Artifact of a deployed contract
    fn artifact(&self, name: &str) -> Option<&Artifact>;
}

impl ContractRegistry for BTreeMap<String, Artifact> {
    fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.get(name)
    }
}

/// Outcome of a successful call
#[derive(Debug)]
pub struct ExecutionResult {
    /// Returned value
    pub value: Value,
    /// Staged writes, not yet committed
    pub delta: StateDelta,
    /// Compute units consumed
    pub compute_units: u64,
    /// Budget the call ran with
    pub budget: u64,
    /// `print` output in emission order
    pub logs: Vec<String>,
}

/// Executes contract functions against one session's state
pub struct Executor<'a> {
    config: Config,
    stdlib: &'static Environment,
    store: &'a Store,
    contracts: &'a dyn ContractRegistry,
    chain: ChainContext,
}

impl<'a> Executor<'a> {
    /// Executor using the shared standard library
    pub fn new(config: Config, store: &'a Store, contracts: &'a dyn ContractRegistry, chain: ChainContext) -> Self {
        Self {
            config,
            stdlib: stdlib(),
            store,
            contracts,
            chain,
        }
    }

    /// Use a different capability table
    pub fn with_stdlib(mut self, stdlib: &'static Environment) -> Self {
        self.stdlib = stdlib;
        self
    }

    /// Enable debug mode (contract `print` output goes to the `log` facade)
    pub fn enable_debug(&mut self) {
        self.config.debug_mode = true;
    }

    /// Limits in force
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Call exported `function` of `artifact` with keyword `arguments`
    ///
    /// `budget` defaults to the configured default and may not exceed the
    /// configured maximum.
    pub fn execute(
        &self,
        artifact: &Artifact,
        function: &str,
        arguments: Arguments,
        budget: Option<u64>,
    ) -> ExecResult<ExecutionResult> {
        let id = artifact.export_id(function).ok_or_else(|| ExecutionError::UnknownFunction {
            contract: artifact.name.clone(),
            function: function.to_string(),
        })?;
        self.invoke(artifact, id, arguments, budget)
    }

    /// Run the `@construct` function of a freshly compiled artifact
    ///
    /// Contracts without a constructor succeed with an empty delta.
    pub fn construct(&self, artifact: &Artifact, arguments: Arguments, budget: Option<u64>) -> ExecResult<ExecutionResult> {
        match artifact.constructor {
            Some(id) => self.invoke(artifact, id, arguments, budget),
            None => {
                let budget = self.config.budget(budget)?;
                Ok(ExecutionResult {
                    value: Value::None,
                    delta: StateDelta::new(),
                    compute_units: 0,
                    budget,
                    logs: Vec::new(),
                })
            }
        }
    }

    /// Run the call on a thread whose stack fits `max_call_depth` frames
    fn invoke(&self, artifact: &Artifact, id: FunctionId, arguments: Arguments, budget: Option<u64>) -> ExecResult<ExecutionResult> {
        let budget = self.config.budget(budget)?;
        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name("sandlot-exec".to_string())
                .stack_size(self.config.stack_size)
                .spawn_scoped(scope, || self.run(artifact, id, arguments, budget))
                .map_err(|err| ExecutionError::fault(format!("cannot start execution thread: {err}")))?;
            handle
                .join()
                .map_err(|_| ExecutionError::fault(format!("execution of {} panicked", artifact.name)))?
        })
    }

    fn run(&self, artifact: &Artifact, id: FunctionId, arguments: Arguments, budget: u64) -> ExecResult<ExecutionResult> {
        let function = artifact
            .functions
            .get(id)
            .ok_or_else(|| ExecutionError::fault(format!("invalid function id {id}")))?;
        let args = bind(&function.name, &function.params, arguments)?;

        let ctx = InvokeContext::new(&self.config, budget, self.store, self.chain.clone());
        let mut machine = Machine::new(ctx, self.stdlib, self.contracts);
        machine.check_version(artifact)?;

        let caller = self.chain.signer.clone();
        let value = match machine.call_function(artifact, id, args, caller) {
            Ok(value) => value,
            Err(err) => {
                log::debug!(
                    "{}.{} aborted after {} CU: {err}",
                    artifact.name,
                    function.name,
                    machine.ctx.get_compute_units_consumed()
                );
                return Err(err);
            }
        };

        let output = machine.ctx.finish();
        log::debug!(
            "{}.{} completed: {} CU of {budget}, {} staged writes",
            artifact.name,
            function.name,
            output.compute_units,
            output.delta.len()
        );
        Ok(ExecutionResult {
            value,
            delta: output.delta,
            compute_units: output.compute_units,
            budget,
            logs: output.logs,
        })
    }
}

/// Order keyword arguments by parameter, filling defaults
fn bind(function: &str, params: &[Parameter], mut arguments: Arguments) -> ExecResult<Vec<Value>> {
    let mut args = Vec::with_capacity(params.len());
    for param in params {
        match (arguments.remove(&param.name), &param.default) {
            (Some(value), _) => args.push(value),
            (None, Some(default)) => args.push(default.clone()),
            (None, None) => {
                return Err(ExecutionError::fault(format!(
                    "{function}() missing required argument '{}'",
                    param.name
                )))
            }
        }
    }
    if let Some(unexpected) = arguments.keys().next() {
        return Err(ExecutionError::fault(format!(
            "{function}() got an unexpected keyword argument '{unexpected}'"
        )));
    }
    Ok(args)
}

#[cfg(test)]
mod tests;
