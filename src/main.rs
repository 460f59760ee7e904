use clap::Parser;
use dotenv::dotenv;
use orderflow::cli::{BacktestCliConfig, Cli, Commands};
use orderflow::commands::{list_strategies, run_backtest};
use orderflow::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from the .env file
    dotenv().ok();

    let cli = Cli::parse();
    logging::init(&cli.verbose);

    match cli.command {
        Commands::Backtest(args) => {
            let config = BacktestCliConfig::try_from(args)?;
            run_backtest(config).await?;
        }
        Commands::Strategies => {
            for name in list_strategies() {
                println!("{name}");
            }
        }
    }

    Ok(())
}
