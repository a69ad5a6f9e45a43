use ethers::types::Address;
use freelance_pay::provider::local::LocalSignerProvider;
use freelance_pay::{
    ChainProvider, ConfigManager, FileStore, HttpPriceFeed, MemoryStore, NetworkPolicy,
    PaymentOutcome, PaymentResolver, SessionStore, WalletSession,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PRICE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let manager = match std::env::var("FREELANCE_CONFIG") {
        Ok(path) => ConfigManager::from_file(&path)?,
        Err(_) => ConfigManager::new()?,
    };
    let config = manager.into_config();

    let rpc_url = std::env::var("RPC_URL").map_err(|_| "RPC_URL is required")?;
    let private_key =
        std::env::var("WALLET_PRIVATE_KEY").map_err(|_| "WALLET_PRIVATE_KEY is required")?;
    let usd_amount = Decimal::from_str(&std::env::var("PAY_USD").unwrap_or_else(|_| "10".into()))?;
    let symbol = std::env::var("PAY_TOKEN").unwrap_or_else(|_| "ETH".into());
    let recipient: Option<Address> = std::env::var("PAY_RECIPIENT")
        .ok()
        .map(|s| s.parse())
        .transpose()?;

    let provider = LocalSignerProvider::connect(&rpc_url, &private_key).await?;
    let chain_id = provider.get_chain_id().await?;
    let token = config
        .token(&symbol, chain_id)
        .cloned()
        .ok_or_else(|| format!("no {symbol} token configured for chain {chain_id}"))?;

    let store: Arc<dyn SessionStore> = match &config.session.store_path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let provider: Arc<dyn ChainProvider> = Arc::new(provider);
    let session = Arc::new(WalletSession::new(
        Some(provider),
        store,
        NetworkPolicy::from_config(&config.session),
    ));
    let _listener = session.listen()?;
    let account = match session.reconcile().await? {
        Some(account) => account,
        None => session.connect().await?,
    };
    println!("Wallet:  {account:?}");

    let resolver = PaymentResolver::new(
        Arc::clone(&session),
        Arc::new(HttpPriceFeed::with_client(
            reqwest::Client::builder()
                .timeout(PRICE_REQUEST_TIMEOUT)
                .build()?,
            &config.payment.price_feed_url,
        )),
        config.payment.clone(),
        config.tokens.clone(),
        usd_amount,
    )?;
    resolver.select_token(token.clone());
    resolver.refresh_prices(std::slice::from_ref(&token)).await?;
    let amount = resolver.derived_token_amount();
    println!("Quote:   {usd_amount} USD = {amount} {} ({:?})", token.symbol, resolver.quote());

    let Some(recipient) = recipient else {
        println!("PAY_RECIPIENT not set, not paying.");
        return Ok(());
    };
    match resolver
        .pay(recipient, |token, hash| {
            println!("Paid in {}: {hash:?}", token.symbol);
        })
        .await?
    {
        PaymentOutcome::Confirmed { hash } => match token.network().tx_link(&hash) {
            Some(link) => println!("Confirmed: {link}"),
            None => println!("Confirmed: {hash:?}"),
        },
        PaymentOutcome::Failed { hash, reason } => {
            return Err(format!("payment {hash:?} failed: {reason}").into());
        }
        PaymentOutcome::ConnectRequested { account } => {
            println!("Connected {account:?}, run again to pay.");
        }
    }
    Ok(())
}
