use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolValue, Specifier},
    json_abi::Event,
    primitives::Address,
};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use contract_bind::{
    bind::{
        BoundContract, CallOpts, DynEvent, EventIterator, FilterOpts, InterfaceTable, TransactOpts,
        WatchOpts,
    },
    config::Config,
    error::BindError,
    ethereum::{json, provider::RpcBackend, utils, TransactionRecord},
};
use serde_json::Value;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = match matches.get_one::<String>("config") {
        Some(path) => Some(std::path::PathBuf::from(path)),
        None => Config::default_config_path().ok().filter(|p| p.exists()),
    };
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    info!("Default network: {}", config.default_network);

    match matches.subcommand() {
        Some(("call", args)) => run_call(&config, args).await,
        Some(("transact", args)) => run_transact(&config, args).await,
        Some(("events", args)) => run_events(&config, args).await,
        Some(("watch", args)) => run_watch(&config, args).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}

fn cli() -> Command {
    let contract_args = [
        Arg::new("abi")
            .long("abi")
            .value_name("FILE")
            .required(true)
            .help("Interface description (JSON ABI, build artifact, or one declaration per line)"),
        Arg::new("address")
            .short('a')
            .long("address")
            .value_name("ADDRESS")
            .required(true)
            .help("Contract address"),
    ];

    let method_args = [
        Arg::new("method")
            .short('m')
            .long("method")
            .value_name("NAME")
            .required(true)
            .help("Method name or full signature, e.g. transfer(address,uint256)"),
        Arg::new("args")
            .long("args")
            .value_name("JSON")
            .help("Arguments as a JSON array or object"),
        Arg::new("from")
            .long("from")
            .value_name("ADDRESS")
            .help("Sender address"),
    ];

    let event_args = [
        Arg::new("event")
            .short('e')
            .long("event")
            .value_name("NAME")
            .required(true)
            .help("Event name or full signature"),
        Arg::new("indexed")
            .long("indexed")
            .value_name("JSON")
            .help("Accepted values per indexed parameter, e.g. [[\"0x..\"], []]"),
        Arg::new("from-block")
            .long("from-block")
            .value_name("BLOCK")
            .help("First block to include"),
    ];

    Command::new("bindctl")
        .version("0.1.0")
        .about("Call, transact with and stream events from deployed contracts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, arbitrum, local)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .global(true)
                .help("Allow write operations (transactions)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("call")
                .about("Invoke a read-only method")
                .args(contract_args.clone())
                .args(method_args.clone())
                .arg(
                    Arg::new("block")
                        .long("block")
                        .value_name("BLOCK")
                        .help("Block to read at (number or 'latest')"),
                ),
        )
        .subcommand(
            Command::new("transact")
                .about("Submit a state-changing transaction (key from BINDCTL_PRIVATE_KEY)")
                .args(contract_args.clone())
                .args(method_args)
                .arg(
                    Arg::new("value")
                        .long("value")
                        .value_name("WEI")
                        .help("Value to attach, decimal or 0x hex"),
                )
                .arg(
                    Arg::new("gas-limit")
                        .long("gas-limit")
                        .value_name("GAS")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("nonce")
                        .long("nonce")
                        .value_name("NONCE")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("simulate")
                        .long("simulate")
                        .help("Run the call first and abort if it would revert")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("events")
                .about("Query past events")
                .args(contract_args.clone())
                .args(event_args.clone())
                .arg(
                    Arg::new("to-block")
                        .long("to-block")
                        .value_name("BLOCK")
                        .help("Last block to include (default latest)"),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Stream events as they are emitted; --from-block replays the backlog first")
                .args(contract_args)
                .args(event_args),
        )
}

async fn load_interface(path: &str) -> Result<Arc<InterfaceTable>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read ABI file '{}': {}", path, e))?;

    let trimmed = content.trim_start();
    let table = if trimmed.starts_with('{') {
        // Build artifacts carry the ABI under an "abi" key.
        let artifact: Value = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("Failed to parse ABI file '{}': {}", path, e))?;
        let abi = artifact
            .get("abi")
            .ok_or_else(|| anyhow!("ABI file '{}' has no 'abi' entry", path))?;
        InterfaceTable::parse(&abi.to_string())?
    } else if trimmed.starts_with('[') {
        InterfaceTable::parse(trimmed)?
    } else {
        InterfaceTable::from_signatures(
            trimmed
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with("//")),
        )?
    };

    Ok(Arc::new(table))
}

async fn bind(config: &Config, args: &ArgMatches) -> Result<(BoundContract, Arc<RpcBackend>)> {
    let address = required(args, "address")?;
    let address = utils::validate_address(address)
        .map_err(|e| anyhow!("Invalid contract address: {}", e))?;
    let abi = load_interface(required(args, "abi")?).await?;

    let mut backend = RpcBackend::for_network(config, None)?;
    if let Ok(key) = std::env::var("BINDCTL_PRIVATE_KEY") {
        backend = backend.with_signer(utils::parse_private_key(&key)?);
    }
    let backend = Arc::new(backend);

    let contract = BoundContract::with_backend(address, abi, backend.clone())
        .with_buffer(config.events.channel_capacity);
    Ok((contract, backend))
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing required argument --{}", name))
}

fn optional_address(args: &ArgMatches, name: &str) -> Result<Option<Address>> {
    args.get_one::<String>(name)
        .map(|s| utils::validate_address(s))
        .transpose()
        .map_err(|e| anyhow!("Invalid --{} address: {}", name, e))
}

fn json_arg(args: &ArgMatches, name: &str) -> Result<Value> {
    match args.get_one::<String>(name) {
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| anyhow!("--{} is not valid JSON: {}", name, e))
        }
        None => Ok(Value::Null),
    }
}

fn block_arg(args: &ArgMatches, name: &str) -> Result<Option<u64>> {
    args.get_one::<String>(name)
        .map(|s| utils::parse_block(s))
        .transpose()
        .map(Option::flatten)
}

/// Human-readable rendering of a binding error.
fn explain(err: BindError) -> anyhow::Error {
    let hint = match &err {
        BindError::RemoteCall(e) | BindError::Subscription(e) => {
            Some(utils::interpret_rpc_error(&e.to_string()))
        }
        _ => None,
    };

    match hint {
        Some(hint) => anyhow!("{} ({})", err, hint),
        None => anyhow::Error::new(err),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_call(config: &Config, args: &ArgMatches) -> Result<()> {
    let (contract, _) = bind(config, args).await?;
    let method = contract.abi().method(required(args, "method")?)?;
    let call_args = json::args_from_json(method, &json_arg(args, "args")?)?;

    let opts = CallOpts {
        from: optional_address(args, "from")?,
        block: block_arg(args, "block")?,
        ..Default::default()
    };

    let signature = method.signature();
    let output = contract
        .call(&opts, &signature, &call_args)
        .await
        .map_err(explain)?;
    print_json(&json::output_to_json(&output))
}

async fn run_transact(config: &Config, args: &ArgMatches) -> Result<()> {
    if !config.security.allow_write_operations {
        return Err(anyhow!(
            "Write operations are disabled. Pass --allow-writes or set security.allow_write_operations in the config file"
        ));
    }

    let (contract, backend) = bind(config, args).await?;
    let method = contract.abi().method(required(args, "method")?)?;
    let call_args = json::args_from_json(method, &json_arg(args, "args")?)?;

    let value = args
        .get_one::<String>("value")
        .map(|v| utils::validate_hex_value(v))
        .transpose()?;
    if let (Some(value), Some(cap)) = (value, &config.security.max_transaction_value) {
        let cap = utils::validate_hex_value(cap)
            .map_err(|e| anyhow!("Invalid security.max_transaction_value: {}", e))?;
        if value > cap {
            return Err(anyhow!(
                "Transaction value {} exceeds the configured maximum {}",
                value,
                cap
            ));
        }
    }

    let opts = TransactOpts {
        from: optional_address(args, "from")?.or(backend.signer_address()),
        value,
        gas_limit: args.get_one::<u64>("gas-limit").copied(),
        nonce: args.get_one::<u64>("nonce").copied(),
        simulate: args.get_flag("simulate"),
        ..Default::default()
    };

    let signature = method.signature();
    info!(method = %signature, contract = %contract.address(), "sending transaction");
    let hash = contract
        .transact(&opts, &signature, &call_args)
        .await
        .map_err(explain)?;

    print_json(&TransactionRecord {
        hash: format!("{:#x}", hash),
        network: backend.network().to_string(),
        from: opts.from.map(|a| a.to_checksum(None)),
        to: contract.address().to_checksum(None),
        value: value.unwrap_or_default().to_string(),
        simulated: opts.simulate,
    })
}

/// Coerce `--indexed` into one alternative set per indexed parameter.
fn indexed_filter(event: &Event, raw: &Value) -> Result<Vec<Vec<DynSolValue>>> {
    let sets = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(sets) => sets,
        _ => return Err(anyhow!("--indexed must be an array of arrays")),
    };

    let params: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
    if sets.len() > params.len() {
        return Err(anyhow!(
            "Event '{}' has {} indexed parameters, got {} filter sets",
            event.name,
            params.len(),
            sets.len()
        ));
    }

    params
        .iter()
        .zip(sets)
        .map(|(param, set)| {
            let ty = param.resolve()?;
            let values = match set {
                Value::Array(values) => values.iter().collect::<Vec<_>>(),
                Value::Null => Vec::new(),
                single => vec![single],
            };
            values
                .into_iter()
                .map(|v| json::value_from_json(v, &ty))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| anyhow!("Invalid filter for '{}': {}", param.name, e))
        })
        .collect()
}

async fn drain(mut iter: EventIterator<DynEvent>) -> Result<usize> {
    let mut count = 0;
    while iter.advance().await {
        if let Some(event) = iter.event() {
            print_json(&json::event_record(event))?;
            count += 1;
        }
    }

    match iter.take_error() {
        Some(e) => Err(explain(e)),
        None => Ok(count),
    }
}

async fn run_events(config: &Config, args: &ArgMatches) -> Result<()> {
    let (contract, _) = bind(config, args).await?;
    let event = contract.abi().event(required(args, "event")?)?.clone();
    let indexed = indexed_filter(&event, &json_arg(args, "indexed")?)?;

    let opts = FilterOpts {
        start: block_arg(args, "from-block")?.unwrap_or_default(),
        end: block_arg(args, "to-block")?,
    };
    let iter = contract
        .filter_logs(&opts, &event.signature(), indexed)
        .await
        .map_err(explain)?;

    let count = drain(iter).await?;
    info!(count, event = %event.name, "historical query finished");
    Ok(())
}

async fn run_watch(config: &Config, args: &ArgMatches) -> Result<()> {
    let (contract, backend) = bind(config, args).await?;
    let head = backend.check_connection().await?;
    let event = contract.abi().event(required(args, "event")?)?.clone();
    let indexed = indexed_filter(&event, &json_arg(args, "indexed")?)?;

    let opts = WatchOpts {
        start: block_arg(args, "from-block")?,
    };
    let iter = contract
        .watch_logs(&opts, &event.signature(), indexed)
        .await
        .map_err(explain)?;
    info!(event = %event.name, head, "watching, press Ctrl-C to stop");

    let subscription = iter.subscription();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            subscription.unsubscribe();
        }
    });

    let count = drain(iter).await?;
    info!(count, "watch stopped");
    Ok(())
}
