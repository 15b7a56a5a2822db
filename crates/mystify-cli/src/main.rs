use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mystify_sdk::{
    compression::{self, CompressParams, StateTreeInfo},
    programs::{compute_unit_limit, DEFAULT_COMPUTE_UNIT_LIMIT},
    transaction::{compile_v0, partially_sign},
    withdrawal::{format_sol, sol_to_lamports, DEFAULT_FEE_BPS, DEPOSIT_AMOUNTS_SOL},
    Note, PhotonIndexer, RelayerClient, WithdrawalPlan,
};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const DEFAULT_KEYPAIR_PATH: &str = "~/.config/solana/id.json";

#[derive(Parser, Debug)]
#[command(name = "mystify")]
#[command(about = "Deposit into and withdraw from the Mystify SOL mixer")]
struct Cli {
    #[arg(short, long, global = true, default_value = DEFAULT_RPC_URL)]
    rpc: String,

    /// Photon indexer endpoint, defaults to --rpc
    #[arg(long, global = true)]
    compression_rpc: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the public key and deposit transaction inside a note
    Note {
        #[arg(value_name = "NOTE")]
        note: String,
    },
    /// Shielded balance of a note
    Balance {
        #[arg(value_name = "NOTE")]
        note: String,
    },
    /// Shield SOL into a fresh note
    Deposit {
        /// One of 0.1, 1, 10 or 100 SOL
        #[arg(short, long)]
        amount: f64,

        #[arg(short, long, default_value = DEFAULT_KEYPAIR_PATH)]
        keypair: String,
    },
    /// Withdraw through a relayer that pays the network fee
    Withdraw {
        #[arg(value_name = "NOTE")]
        note: String,

        #[arg(value_name = "RECIPIENT")]
        recipient: String,

        #[arg(long)]
        relayer: String,
    },
    /// Let the relayer run the whole withdrawal (hands it the note secret)
    GaslessWithdraw {
        #[arg(value_name = "NOTE")]
        note: String,

        #[arg(value_name = "RECIPIENT")]
        recipient: String,

        #[arg(long)]
        relayer: String,
    },
}

impl Cli {
    fn compression_rpc(&self) -> &str {
        self.compression_rpc.as_deref().unwrap_or(&self.rpc)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mystify_cli=warn,mystify_sdk=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Note { note } => show_note(note),
        Command::Balance { note } => balance(&cli, note).await,
        Command::Deposit { amount, keypair } => deposit(&cli, *amount, keypair).await,
        Command::Withdraw {
            note,
            recipient,
            relayer,
        } => withdraw(&cli, note, recipient, relayer).await,
        Command::GaslessWithdraw {
            note,
            recipient,
            relayer,
        } => gasless_withdraw(note, recipient, relayer).await,
    }
}

fn show_note(note: &str) -> Result<()> {
    let note = Note::parse(note)?;
    println!();
    println!("  Note account:        {}", note.public_key());
    println!("  Deposit transaction: {}", note.deposit_signature());
    println!();
    Ok(())
}

async fn balance(cli: &Cli, note: &str) -> Result<()> {
    let note = Note::parse(note)?;
    let indexer = PhotonIndexer::new(cli.compression_rpc())?;
    let lamports = indexer.get_compressed_balance_by_owner(&note.public_key()).await?;
    println!("{} SOL", format_sol(lamports));
    Ok(())
}

async fn deposit(cli: &Cli, amount: f64, keypair_path: &str) -> Result<()> {
    let lamports = deposit_lamports(amount)?;
    let depositor = read_keypair(keypair_path)?;
    let note_keypair = Keypair::new();
    let note_key = note_keypair.pubkey();

    println!();
    println!("  Depositor: {}", depositor.pubkey());
    println!("  Amount:    {} SOL", format_sol(lamports));
    println!("  RPC:       {}", cli.rpc);
    println!();

    let instructions = vec![
        compute_unit_limit(DEFAULT_COMPUTE_UNIT_LIMIT),
        compression::compress(CompressParams {
            fee_payer: depositor.pubkey(),
            authority: depositor.pubkey(),
            owner: note_key,
            lamports,
            output_tree: StateTreeInfo::default(),
        })?,
    ];

    let rpc = RpcClient::new(cli.rpc.clone());
    let blockhash = rpc.get_latest_blockhash().await?;
    let mut tx = compile_v0(&depositor.pubkey(), &instructions, blockhash)?;
    partially_sign(&mut tx, &depositor)?;
    let signature = rpc.send_and_confirm_transaction(&tx).await?;

    let note = Note::new(note_keypair, &signature);
    println!("{} {}", "Deposited".green().bold(), signature);
    println!();
    println!("{}", "Save this note. It is the only way to withdraw:".yellow());
    println!("{}", note.encode());
    println!();
    Ok(())
}

async fn withdraw(cli: &Cli, note: &str, recipient: &str, relayer_url: &str) -> Result<()> {
    let note = Note::parse(note)?;
    let recipient = parse_recipient(recipient)?;
    let indexer = PhotonIndexer::new(cli.compression_rpc())?;
    let relayer = RelayerClient::new(relayer_url)?;

    let inputs = indexer
        .get_compressed_accounts_by_owner(&note.public_key())
        .await?;
    if inputs.is_empty() {
        bail!("No compressed accounts found for this note");
    }
    let hashes: Vec<[u8; 32]> = inputs.iter().map(|a| a.hash).collect();
    let proof = indexer.get_validity_proof(&hashes).await?;
    let fee_payer = relayer.fee_payer().await?;
    debug!("Relayer fee payer: {}", fee_payer);

    let plan = WithdrawalPlan {
        note: note.public_key(),
        fee_payer,
        recipient,
        inputs,
        proof,
        output_tree: indexer.default_tree(),
        fee_bps: DEFAULT_FEE_BPS,
    };
    let instructions = plan.instructions()?;

    println!();
    println!("  Balance:   {} SOL", format_sol(plan.total_lamports()));
    println!("  Fee:       {} SOL", format_sol(plan.fee_lamports()));
    println!("  Network:   {} SOL", format_sol(plan.network_fee_lamports()));
    println!("  Recipient: {} ({} SOL)", recipient, format_sol(plan.recipient_lamports()?));
    println!();

    let rpc = RpcClient::new(cli.rpc.clone());
    let blockhash = rpc.get_latest_blockhash().await?;
    let mut tx = relayer
        .request_fee_payer_signature(&instructions, &blockhash, &note.public_key())
        .await?;
    check_relayed_transaction(&tx, &fee_payer, instructions.len())?;
    partially_sign(&mut tx, note.keypair())?;

    let signature = rpc.send_and_confirm_transaction(&tx).await?;
    print_withdrawn(&signature, &format_sol(plan.total_lamports()), &recipient);
    Ok(())
}

async fn gasless_withdraw(note: &str, recipient: &str, relayer_url: &str) -> Result<()> {
    let note = Note::parse(note)?;
    let recipient = parse_recipient(recipient)?;
    let relayer = RelayerClient::new(relayer_url)?;

    println!(
        "{}",
        "Gasless withdrawal sends the note secret to the relayer.".yellow()
    );
    let response = relayer.gasless_withdraw(&note, &recipient).await?;
    let signature = Signature::from_str(&response.signature)
        .map_err(|e| anyhow!("Relayer returned an invalid signature: {}", e))?;
    print_withdrawn(&signature, &response.withdrawn_amount, &recipient);
    Ok(())
}

fn print_withdrawn(signature: &Signature, amount_sol: &str, recipient: &Pubkey) {
    println!(
        "{} {} SOL to {}",
        "Withdrew".green().bold(),
        amount_sol,
        recipient
    );
    println!("  Transaction: {}", signature);
}

/// The relayer must hand back our instructions, paid for by the key it
/// advertised.
fn check_relayed_transaction(
    tx: &VersionedTransaction,
    fee_payer: &Pubkey,
    instruction_count: usize,
) -> Result<()> {
    let keys = tx.message.static_account_keys();
    if keys.first() != Some(fee_payer) {
        bail!("Relayer changed the fee payer");
    }
    if tx.message.instructions().len() != instruction_count {
        bail!("Relayer changed the instructions");
    }
    Ok(())
}

fn parse_recipient(recipient: &str) -> Result<Pubkey> {
    Pubkey::from_str(recipient.trim()).map_err(|_| anyhow!("Invalid recipient address: {}", recipient))
}

fn deposit_lamports(amount: f64) -> Result<u64> {
    if !DEPOSIT_AMOUNTS_SOL.contains(&amount) {
        bail!(
            "Deposit amount must be one of {:?} SOL, got {}",
            DEPOSIT_AMOUNTS_SOL,
            amount
        );
    }
    Ok(sol_to_lamports(amount)?)
}

fn read_keypair(path: &str) -> Result<Keypair> {
    let path = shellexpand::tilde(path).to_string();
    let bytes = std::fs::read(&path)
        .map_err(|e| anyhow!("Failed to read keypair from {}: {}", path, e))?;
    let json: Vec<u8> = serde_json::from_slice(&bytes)?;
    Keypair::try_from(&json[..]).map_err(|e| anyhow!("Invalid keypair in {}: {}", path, e))
}
