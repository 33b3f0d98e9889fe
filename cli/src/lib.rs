mod args;

pub use args::{Args, Commands, GenerateTransactionsArgs, ListTransactionsArgs};
use clap::Parser;
use common::{Database, Transaction};

/// Runs the CLI command parser and executes the selected command.
/// Returns true if a CLI command was handled, false otherwise.
pub async fn run_cli() -> bool {
    let args = Args::parse();
    match &args.command {
        Some(Commands::GenerateTransactions(generate_args)) => {
            if !(0.0..=1.0).contains(&generate_args.anomaly_ratio) {
                eprintln!("Anomaly ratio must be between 0 and 1");
                return true;
            }
            match Transaction::generate_test_transactions_json(
                &generate_args.out,
                generate_args.count,
                generate_args.anomaly_ratio,
                generate_args.seed,
            )
            .await
            {
                Ok(_) => println!(
                    "Successfully generated {} transactions to: {}",
                    generate_args.count, generate_args.out
                ),
                Err(e) => eprintln!("Failed to generate transactions: {e:#}"),
            }
            true
        }
        Some(Commands::ListTransactions(list_args)) => {
            if let Err(e) = list_transactions(list_args.limit).await {
                eprintln!("Failed to list transactions: {e:#}");
            }
            true
        }
        None => false,
    }
}

/// Prints the latest stored transactions, one line each.
async fn list_transactions(limit: i64) -> anyhow::Result<()> {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://risk_desk.sqlite".to_string());
    let db = Database::new(&database_url).await?;

    let transactions = db.get_transactions(0, limit.max(0)).await?;
    if transactions.is_empty() {
        println!("No transactions stored yet.");
        return Ok(());
    }
    for tx in transactions {
        println!(
            "{:<14} {:>12.2} {:<3} {:>3} {:<6} [{}] {}",
            tx.transaction_id,
            tx.amount,
            tx.currency,
            tx.risk_score,
            tx.risk_level,
            tx.flags.join(", "),
            tx.ai_analysis
        );
    }
    Ok(())
}
