use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use monarchy::{
    identity::{Address, Wallet},
    kingdom::{Kingdom, KingdomError},
    ledger::{format_ether, parse_amount, Amount},
    monarchy::MonarchyConfig,
};

#[derive(Parser)]
#[command(name = "monarchy", version, about = "Claim, hold and administer a single escalating-price title")]
struct Cli {
    /// State file holding the monarchy and its ledger.
    #[arg(long, global = true, default_value = "monarchy.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a keypair: sk.hex, pk.hex and address.txt.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Create a fresh state file owned by the given key.
    Init {
        #[arg(long)]
        owner_sk: String,
        /// JSON file overriding floor price, fee divisor or escalation.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Credit an account from outside the ledger.
    Fund {
        #[arg(long)]
        to: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    /// Pay for the title. Defaults to paying exactly the current claim price.
    Claim {
        #[arg(long)]
        sk: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_amount)]
        value: Option<Amount>,
    },
    Renounce {
        #[arg(long)]
        sk: String,
    },
    Pause {
        #[arg(long)]
        sk: String,
    },
    Unpause {
        #[arg(long)]
        sk: String,
    },
    /// Move accumulated fees to the owner.
    Sweep {
        #[arg(long)]
        sk: String,
    },
    Status,
    NameOf {
        address: Address,
    },
    Balance {
        address: Address,
    },
    /// Print the monarchy event log, one JSON object per line.
    Events,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load(state: &Path) -> Result<Kingdom> {
    Kingdom::load(state).with_context(|| format!("loading state {}", state.display()))
}

/// Loads, applies `op` and saves while holding the state lock. Nothing is
/// written if `op` fails.
fn mutate<R>(state: &Path, op: impl FnOnce(&mut Kingdom) -> Result<R>) -> Result<R> {
    Kingdom::update(state, op).with_context(|| format!("updating state {}", state.display()))
}

fn caller(sk_hex: &str) -> Result<Address> {
    Ok(Wallet::from_hex(sk_hex).context("invalid secret key")?.address())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut f = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    f.write_all(bytes)?;
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).context("mkdir out-dir")?;
    let wallet = Wallet::generate();
    write_file(&out_dir.join("sk.hex"), wallet.secret_hex().as_bytes())?;
    write_file(&out_dir.join("pk.hex"), wallet.public_hex().as_bytes())?;
    write_file(&out_dir.join("address.txt"), wallet.address().to_string().as_bytes())?;
    println!("keypair for {} written → {}", wallet.address(), out_dir.display());
    Ok(())
}

fn init_cmd(state: &Path, owner_sk: &str, config: Option<&Path>, force: bool) -> Result<()> {
    let owner = caller(owner_sk)?;
    let config = match config {
        Some(path) => MonarchyConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonarchyConfig::default(),
    };
    let kingdom = Kingdom::new(owner, config)?;
    match kingdom.create(state, force) {
        Err(KingdomError::AlreadyExists(path)) => {
            bail!("{} already exists (use --force to overwrite)", path.display())
        }
        other => other?,
    }
    println!(
        "monarchy initialized → {} (owner {}, claim price {})",
        state.display(),
        owner,
        format_ether(kingdom.monarchy.claim_price())
    );
    Ok(())
}

fn status_cmd(state: &Path) -> Result<()> {
    let kingdom = load(state)?;
    let m = &kingdom.monarchy;
    let status = json!({
        "owner": m.owner(),
        "monarch": m.monarch(),
        "name": m.monarch_name(&m.monarch()).as_str(),
        "claim_price": m.claim_price().to_string(),
        "claim_price_ether": format_ether(m.claim_price()),
        "accumulated_fees": m.accumulated_fees().to_string(),
        "paused": m.paused(),
        "treasury": m.treasury(),
        "treasury_balance": kingdom.bank.balance_of(&m.treasury()).to_string(),
        "ledger_height": kingdom.bank.height,
        "state_root": hex::encode(kingdom.state_root()),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let state = cli.state.as_path();

    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Init {
            owner_sk,
            config,
            force,
        } => init_cmd(state, &owner_sk, config.as_deref(), force),
        Command::Fund { to, amount } => {
            mutate(state, |k| Ok(k.bank.deposit(&to, amount)?))?;
            println!("funded {to} with {}", format_ether(amount));
            Ok(())
        }
        Command::Claim { sk, name, value } => {
            let who = caller(&sk)?;
            let next_price = mutate(state, |k| {
                let payment = value.unwrap_or(k.monarchy.claim_price());
                k.monarchy
                    .become_monarch_str(&mut k.bank, who, &name, payment)?;
                Ok(k.monarchy.claim_price())
            })?;
            println!(
                "{who} is now monarch as {name:?}; next claim price {}",
                format_ether(next_price)
            );
            Ok(())
        }
        Command::Renounce { sk } => {
            let who = caller(&sk)?;
            mutate(state, |k| Ok(k.monarchy.renounce_monarchy(who)?))?;
            println!("{who} renounced; the throne is vacant");
            Ok(())
        }
        Command::Pause { sk } => {
            let who = caller(&sk)?;
            mutate(state, |k| Ok(k.monarchy.pause_contract(who)?))?;
            println!("paused");
            Ok(())
        }
        Command::Unpause { sk } => {
            let who = caller(&sk)?;
            mutate(state, |k| Ok(k.monarchy.unpause_contract(who)?))?;
            println!("unpaused");
            Ok(())
        }
        Command::Sweep { sk } => {
            let who = caller(&sk)?;
            let fees = mutate(state, |k| {
                let fees = k.monarchy.accumulated_fees();
                k.monarchy.sweep_fees(&mut k.bank, who)?;
                Ok(fees)
            })?;
            println!("swept {} to {who}", format_ether(fees));
            Ok(())
        }
        Command::Status => status_cmd(state),
        Command::NameOf { address } => {
            let kingdom = load(state)?;
            let name = kingdom.monarchy.monarch_name(&address);
            println!("{} {}", name.to_hex(), name);
            Ok(())
        }
        Command::Balance { address } => {
            let kingdom = load(state)?;
            let balance = kingdom.bank.balance_of(&address);
            let frozen = if kingdom.bank.is_frozen(&address) {
                " (frozen)"
            } else {
                ""
            };
            println!("{balance} ({}){frozen}", format_ether(balance));
            Ok(())
        }
        Command::Events => {
            let kingdom = load(state)?;
            for event in kingdom.monarchy.events() {
                println!("{}", serde_json::to_string(event)?);
            }
            Ok(())
        }
    }
}
