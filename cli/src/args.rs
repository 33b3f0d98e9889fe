use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Risk Desk - transaction risk scoring service and tooling"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate synthetic transactions and save them as a JSON array (for testing only)
    ///
    /// Most amounts are everyday payments; a configurable share are large
    /// outliers, and a few identifiers repeat so deduplication gets exercised.
    GenerateTransactions(GenerateTransactionsArgs),

    /// Print the most recently scored transactions from the database
    ListTransactions(ListTransactionsArgs),
}

#[derive(ClapArgs, Debug)]
pub struct GenerateTransactionsArgs {
    /// Number of transactions to generate
    #[arg(short, long, help = "Number of transactions to generate")]
    pub count: usize,

    /// Output JSON file path
    #[arg(short, long, help = "Output JSON file path")]
    pub out: String,

    /// Share of large outlier amounts, between 0 and 1
    #[arg(
        short,
        long,
        default_value_t = 0.05,
        help = "Share of large outlier amounts (0..=1)"
    )]
    pub anomaly_ratio: f64,

    /// Seed for reproducible output
    #[arg(short, long, help = "Seed for reproducible output")]
    pub seed: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct ListTransactionsArgs {
    #[arg(short, long, default_value_t = 20, help = "Number of transactions to show")]
    pub limit: i64,
}
