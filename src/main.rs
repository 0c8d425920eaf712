use anyhow::{anyhow, bail, Context, Result};
use curve_bundler::{
    metrics::BundlerMetrics, observability::init_tracing, Bundler, BundlerConfig, JitoRelay,
    RpcLedger,
};
use prometheus::Registry;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair},
    signer::Signer,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn load_keypair(path: &str) -> Result<Keypair> {
    read_keypair_file(path).map_err(|e| anyhow!("failed to read keypair {path}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("curve_bundler=info");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = BundlerConfig::from_file(&config_path)
        .and_then(BundlerConfig::from_env_overrides)
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let payer = load_keypair(&config.payer_keypair_path)?;
    let wallets = config
        .wallet_keypair_paths
        .iter()
        .map(|p| load_keypair(p).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let registry = Registry::new();
    let metrics = Arc::new(BundlerMetrics::new(&registry)?);
    let ledger = Arc::new(RpcLedger::from_url(
        &config.rpc_url,
        config.commitment_config(),
        Duration::from_secs(config.tx_confirm_timeout_secs),
    ));
    let relay = Arc::new(JitoRelay::new(&config)?);
    let bundler = Bundler::new(config, ledger, relay, Some(metrics))?;

    let command = std::env::args().nth(1).unwrap_or_else(|| "collect".to_string());
    match command.as_str() {
        // Pull everything back to the payer and reclaim table rent.
        "collect" => {
            let gathered = bundler.collect(&payer, &wallets, &payer.pubkey()).await?;
            info!(txs = gathered.signatures.len(), skipped = gathered.skipped_groups, "wallets collected");
            let (deactivated, closed) = bundler.burn_lookup_tables(&payer).await?;
            info!(
                deactivated = deactivated.signatures.len(),
                closed = closed.signatures.len(),
                "lookup tables burned"
            );
        }
        "distribute" => {
            let lamports: u64 = std::env::args()
                .nth(2)
                .context("usage: distribute <lamports>")?
                .parse()
                .context("lamports must be an integer")?;
            let targets: Vec<Pubkey> = wallets.iter().map(|w| w.pubkey()).collect();
            match bundler.distribute(&payer, &targets, lamports).await? {
                Some(signature) => info!(%signature, "wallets funded"),
                None => info!("every wallet already funded"),
            }
        }
        other => bail!("unknown command {other}, expected collect or distribute"),
    }

    info!(metrics = %BundlerMetrics::scrape(&registry), "done");
    Ok(())
}
