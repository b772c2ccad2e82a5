//! bestla - test data generator for the cosmos database.
//!
//! # Flow
//!
//! 1. `-F` inserts the known fetch types
//! 2. `-B` recreates the retailer with its stores, reward config and campaign
//! 3. Previously generated account holders are replaced with `-n` of each type
//!
//! With `-L BOTH` steps 2 and 3 run for two retailers, `{retailer}-accumulator`
//! and `{retailer}-stamps`, each with a campaign slug suffixed the same way.

mod fixtures;
mod generator;

use clap::{Parser, ValueEnum};
use cosmos::{config::LogFormatter, logging, models::campaign::LoyaltyType};
use generator::{Population, RetailerSetup};
use sqlx::{
    ConnectOptions,
    postgres::{PgConnectOptions, PgPoolOptions},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
enum LoyaltyTarget {
    Accumulator,
    Stamps,
    Both,
}

#[derive(Debug, Parser)]
#[command(name = "bestla", about = "Generate retailers, account holders and rewards for testing")]
struct Cli {
    /// Number of account holders of each type to create.
    #[arg(short = 'n', default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..1_000_000_000))]
    account_holders: u64,

    /// Retailer used for generated account holders.
    #[arg(short, long, default_value = "test-retailer")]
    retailer: String,

    /// Maximum balance in whole units, pennies are added at random.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(i64).range(1..))]
    max_val: i64,

    /// Campaign whose reward goal sizes the transaction history.
    #[arg(short, long, default_value = "test-campaign-1")]
    campaign: String,

    /// Reward slug of the created reward config.
    #[arg(long, default_value = "10percentoff")]
    reward_slug: String,

    #[arg(short = 'L', long, value_enum, ignore_case = true, default_value = "ACCUMULATOR")]
    loyalty_type: LoyaltyTarget,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 5432)]
    port: u16,

    #[arg(long, default_value = "postgres")]
    user: String,

    #[arg(long, default_value = "")]
    password: String,

    /// Database name.
    #[arg(long, default_value = "cosmos")]
    name: String,

    /// Unallocated rewards to create per active campaign.
    #[arg(long, default_value_t = 10)]
    unallocated_rewards: u64,

    /// Recreate the retailer, its campaign and reward config first.
    #[arg(short = 'B', long = "bootstrap-new-retailer")]
    bootstrap: bool,

    /// Allocation window in days. Pending rewards are only created when above 0.
    #[arg(long, default_value_t = 0)]
    refund_window: i32,

    #[arg(long, default_value = "PRE_LOADED")]
    fetch_type: String,

    /// Create a transaction history for every account holder.
    #[arg(short = 'T', long)]
    tx_history: bool,

    /// Insert the PRE_LOADED and JIGSAW_EGIFT fetch types.
    #[arg(short = 'F', long)]
    add_fetch_types: bool,

    /// Log every SQL statement at debug level.
    #[arg(short = 'D', long)]
    sql_debug: bool,
}

/// One retailer and campaign to generate data for.
struct Target {
    retailer_slug: String,
    campaign_slug: String,
    loyalty_type: LoyaltyType,
}

impl Cli {
    fn targets(&self) -> Vec<Target> {
        let single = |loyalty_type| Target {
            retailer_slug: self.retailer.clone(),
            campaign_slug: self.campaign.clone(),
            loyalty_type,
        };
        match self.loyalty_type {
            LoyaltyTarget::Accumulator => vec![single(LoyaltyType::Accumulator)],
            LoyaltyTarget::Stamps => vec![single(LoyaltyType::Stamps)],
            LoyaltyTarget::Both => [LoyaltyType::Accumulator, LoyaltyType::Stamps]
                .into_iter()
                .map(|loyalty_type| {
                    let suffix = loyalty_type.as_str().to_lowercase();
                    Target {
                        retailer_slug: format!("{}-{suffix}", self.retailer),
                        campaign_slug: format!("{}-{suffix}", self.campaign),
                        loyalty_type,
                    }
                })
                .collect(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(LogFormatter::Brief);

    let mut options = PgConnectOptions::new()
        .host(&cli.host)
        .port(cli.port)
        .username(&cli.user)
        .password(&cli.password)
        .database(&cli.name);
    if !cli.sql_debug {
        options = options.disable_statement_logging();
    }
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;
    tracing::info!(host = %cli.host, database = %cli.name, "Connected");

    if cli.add_fetch_types {
        generator::add_fetch_types(&pool).await?;
    }

    let targets = cli.targets();
    let multiple = targets.len() > 1;
    for target in &targets {
        if cli.bootstrap {
            let mid_prefix = if multiple {
                format!("mid-{}", target.loyalty_type.as_str().to_lowercase())
            } else {
                "mid".to_string()
            };
            generator::setup_retailer(
                &pool,
                &RetailerSetup {
                    retailer_slug: &target.retailer_slug,
                    campaign_slug: &target.campaign_slug,
                    reward_slug: &cli.reward_slug,
                    fetch_type: &cli.fetch_type,
                    loyalty_type: target.loyalty_type,
                    refund_window: cli.refund_window,
                    mid_prefix: &mid_prefix,
                },
            )
            .await?;
        }

        generator::populate(
            &pool,
            &Population {
                retailer_slug: &target.retailer_slug,
                campaign_slug: &target.campaign_slug,
                account_holders: cli.account_holders,
                max_val: cli.max_val,
                unallocated_rewards: cli.unallocated_rewards,
                tx_history: cli.tx_history,
            },
        )
        .await?;
    }

    tracing::info!("Account holders and rewards created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_options() {
        let cli = Cli::parse_from(["bestla"]);
        assert_eq!(cli.account_holders, 10);
        assert_eq!(cli.retailer, "test-retailer");
        assert_eq!(cli.campaign, "test-campaign-1");
        assert_eq!(cli.loyalty_type, LoyaltyTarget::Accumulator);
        assert_eq!(cli.port, 5432);
        assert!(!cli.bootstrap && !cli.tx_history && !cli.add_fetch_types);
    }

    #[test]
    fn both_splits_into_suffixed_retailers() {
        let cli = Cli::parse_from(["bestla", "-B", "-r", "shop", "-c", "promo", "-L", "BOTH"]);
        let slugs: Vec<(String, String)> = cli
            .targets()
            .into_iter()
            .map(|t| (t.retailer_slug, t.campaign_slug))
            .collect();
        assert_eq!(
            slugs,
            vec![
                ("shop-accumulator".to_string(), "promo-accumulator".to_string()),
                ("shop-stamps".to_string(), "promo-stamps".to_string()),
            ]
        );
    }

    #[test]
    fn account_holder_count_is_bounded() {
        assert!(Cli::try_parse_from(["bestla", "-n", "0"]).is_err());
        assert!(Cli::try_parse_from(["bestla", "-n", "1000000000"]).is_err());
        assert!(Cli::try_parse_from(["bestla", "-n", "999999999"]).is_ok());
        assert!(Cli::try_parse_from(["bestla", "-n", "1"]).is_ok());
        assert!(Cli::try_parse_from(["bestla", "-L", "stamps"]).is_ok());
    }
}
