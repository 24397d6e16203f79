//! `sandlot-run`: drive a sandlot session from the command line
//!
//! ```bash
//! sandlot-run --root .sessions new
//! sandlot-run --root .sessions --session <id> deploy con_token token.py
//! sandlot-run --root .sessions --session <id> call con_token transfer --args '{"to": "bob", "amount": 5}'
//! sandlot-run --root .sessions --session <id> prove con_token.balances:bob
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sandlot_session::{arguments_from_json, parse_key, SessionConfig, SessionManager, ENV_SESSION_ROOT};
use serde_json::{json, Value as Json};

#[derive(Parser, Debug)]
#[command(name = "sandlot-run")]
#[command(about = "Deploy, call and inspect contracts in a sandlot session")]
struct Cli {
    /// Directory holding session state
    #[arg(long, env = ENV_SESSION_ROOT)]
    root: Option<PathBuf>,

    /// Session id; a new session is created when omitted or unknown
    #[arg(long)]
    session: Option<String>,

    /// Compute budget for calls and constructors
    #[arg(long)]
    budget: Option<u64>,

    /// Show contract print output and engine debug logs
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a session and print its id
    New,
    /// List the sessions stored under the root
    Sessions,
    /// Compile and deploy a contract from a source file
    Deploy {
        name: String,
        file: PathBuf,
        /// Constructor arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Call an exported function
    Call {
        contract: String,
        function: String,
        /// Keyword arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Read a committed key (`contract.variable[:subkey]`)
    Read { key: String },
    /// Print a merkle proof for a key
    Prove { key: String },
    /// Print the session state as JSON
    Dump {
        /// Include `__`-prefixed bookkeeping keys
        #[arg(long)]
        internal: bool,
    },
    /// List deployed contracts
    Contracts,
    /// Show a contract's source and exports
    Inspect { contract: String },
    /// Show or change the runtime environment
    Env {
        #[command(subcommand)]
        action: Option<EnvAction>,
    },
    /// Write keys from a JSON state snapshot file
    Seed { file: PathBuf },
    /// Drop every contract and key
    Reset,
    /// Delete the session and its directory
    Delete,
}

#[derive(Subcommand, Debug)]
enum EnvAction {
    /// Set a value; an empty value restores the default
    Set { key: String, value: String },
    /// Restore the default of a value
    Unset { key: String },
}

fn parse_json(text: Option<&str>) -> Result<Json> {
    match text {
        Some(text) => serde_json::from_str(text).context("arguments are not valid JSON"),
        None => Ok(Json::Null),
    }
}

fn print_json(value: &Json) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = SessionConfig::from_env();
    config.root = cli.root.clone();
    config.debug |= cli.debug;
    if config.root.is_none() {
        log::warn!("no --root given: the session lives only for this invocation");
    }
    let manager = SessionManager::new(config);

    match cli.command {
        Command::New => {
            println!("{}", manager.create_session()?);
            return Ok(());
        }
        Command::Sessions => {
            for id in manager.list_sessions()? {
                println!("{id}");
            }
            return Ok(());
        }
        _ => {}
    }

    let (id, created) = manager.resolve_or_create(cli.session.as_deref())?;
    if created {
        eprintln!("session {id}");
    }

    match cli.command {
        Command::New | Command::Sessions => {}
        Command::Deploy { name, file, args } => {
            let source = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let arguments = arguments_from_json(&parse_json(args.as_deref())?)?;
            let artifact = manager.with_session(&id, |session| {
                session.deploy_with(&name, &source, arguments, cli.budget)
            })??;
            print_json(&json!({
                "contract": artifact.name,
                "exports": artifact.export_names(),
                "source_hash": artifact.source_hash,
            }))?;
        }
        Command::Call { contract, function, args } => {
            let arguments = arguments_from_json(&parse_json(args.as_deref())?)?;
            let result = manager.call(&id, &contract, &function, arguments, cli.budget)?;
            for line in &result.logs {
                eprintln!("{line}");
            }
            print_json(&json!({
                "value": result.value.to_json(),
                "compute_units": result.compute_units,
                "budget": result.budget,
            }))?;
        }
        Command::Read { key } => {
            let key = parse_key(&key)?;
            let value = manager.read_state(&id, &key)?;
            print_json(&value.to_json())?;
        }
        Command::Prove { key } => {
            let key = parse_key(&key)?;
            let (proof, root) = manager.with_session(&id, |session| {
                session.prove_state(&key).map(|proof| (proof, session.root()))
            })??;
            if !proof.verify(&root, &key, proof.value()) {
                bail!("proof for {key} does not verify against {root}");
            }
            print_json(&json!({
                "root": root.to_hex(),
                "proof": serde_json::to_value(&proof)?,
            }))?;
        }
        Command::Dump { internal } => {
            let dump = manager.with_session(&id, |session| session.dump_state(internal))?;
            print_json(&dump)?;
        }
        Command::Contracts => {
            for name in manager.with_session(&id, |session| session.list_contracts())? {
                println!("{name}");
            }
        }
        Command::Inspect { contract } => {
            let details = manager.with_session(&id, |session| session.contract_details(&contract))??;
            print_json(&serde_json::to_value(&details)?)?;
        }
        Command::Env { action } => {
            let environment = manager.with_session(&id, |session| {
                match action {
                    Some(EnvAction::Set { key, value }) => {
                        session.set_environment_var(&key, &value)?;
                    }
                    Some(EnvAction::Unset { key }) => session.remove_environment_var(&key)?,
                    None => {}
                }
                Ok::<_, sandlot_session::SessionError>(session.get_environment())
            })??;
            print_json(&serde_json::to_value(&environment)?)?;
        }
        Command::Seed { file } => {
            let text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let snapshot: Json = serde_json::from_str(&text).context("snapshot is not valid JSON")?;
            let root = manager.with_session(&id, |session| session.apply_state_snapshot(&snapshot))??;
            println!("{root}");
        }
        Command::Reset => {
            let root = manager.with_session(&id, |session| session.reset_state())??;
            println!("{root}");
        }
        Command::Delete => manager.delete_session(&id)?,
    }
    Ok(())
}
