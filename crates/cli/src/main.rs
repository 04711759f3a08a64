//! Cart sync CLI - drive the cart engine against a remote cart service.
//!
//! # Usage
//!
//! ```bash
//! # Print the cart
//! cart-sync show
//!
//! # Add one unit of product 42
//! cart-sync add 42
//!
//! # Set product 42 to three units (0 removes it)
//! cart-sync set 42 3
//!
//! # Remove product 42, or empty the cart
//! cart-sync remove 42
//! cart-sync clear
//! ```
//!
//! Connection settings come from the environment; see
//! `cart_sync_engine::config`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "cart-sync")]
#[command(author, version, about = "Cart sync engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current cart
    Show,
    /// Add one unit of a product
    Add {
        /// Product ID
        product_id: i64,
    },
    /// Set a product's quantity (zero or less removes it)
    Set {
        /// Product ID
        product_id: i64,

        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Remove a product from the cart
    Remove {
        /// Product ID
        product_id: i64,
    },
    /// Empty the cart
    Clear,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cart_sync=info,cart_sync_engine=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::cart::CliError> {
    match cli.command {
        Commands::Show => commands::cart::show().await,
        Commands::Add { product_id } => commands::cart::add(product_id.into()).await,
        Commands::Set {
            product_id,
            quantity,
        } => commands::cart::set(product_id.into(), quantity).await,
        Commands::Remove { product_id } => commands::cart::remove(product_id.into()).await,
        Commands::Clear => commands::cart::clear().await,
    }
}
