//! Local EVM wallet example.
//!
//! This example drives the wallet controller with a locally held key
//! instead of a browser extension: connect, read the balance, sign a
//! message and, optionally, send a transfer to yourself.
//!
//! Run with: `cargo run --example local_evm`
//!
//! Environment:
//! - `DEJAVU_RPC_URL` (default `https://ethereum-sepolia-rpc.publicnode.com`)
//! - `DEJAVU_MNEMONIC` (a fresh throwaway wallet is generated when unset)
//! - `DEJAVU_SEND=1` to submit a zero-value transfer and wait for it

use std::sync::Arc;

use dejavu_wallet::prelude::*;
use kobe::Wallet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dejavu_wallet=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Dejavu Wallet: local EVM signer ===\n");

    let rpc_url = std::env::var("DEJAVU_RPC_URL")
        .unwrap_or_else(|_| "https://ethereum-sepolia-rpc.publicnode.com".to_owned());
    let mnemonic = match std::env::var("DEJAVU_MNEMONIC") {
        Ok(phrase) => phrase,
        Err(_) => {
            let generated = Wallet::generate(12, None)?;
            println!("🔐 Generated throwaway wallet");
            generated.mnemonic().to_owned()
        }
    };

    // The chain is detected from the endpoint
    let provider = LocalEvmProvider::builder()
        .mnemonic(mnemonic)
        .rpc_url(rpc_url)
        .build()
        .await?;

    let adapter = EvmAdapter::builder().provider(Arc::new(provider)).build()?;
    let wallet = WalletController::new(
        AdapterRegistry::builder().register(Arc::new(adapter)).build(),
    );

    let mut updates = wallet.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            println!("   state → {:?}", state.status);
        }
    });

    let state = wallet.connect(ChainFamily::Evm, None).await?;
    let address = state.address.clone().unwrap_or_default();
    println!("   Address: {address}");
    println!("   Chain:   {:?}", state.chain_id);
    println!("   Balance: {:?} wei\n", state.balance);

    let signature = wallet.sign_message(b"hello from dejavu").await?;
    println!("✍️  personal_sign: {signature}\n");

    if std::env::var("DEJAVU_SEND").is_ok_and(|v| v == "1") {
        let hash = wallet
            .send_transaction(&TransactionRequest::new(address))
            .await?;
        println!("📤 Sent {hash}");
        let receipt = wallet.wait_for_transaction(&hash, 2).await?;
        println!(
            "   Confirmed in block {} ({} confirmations, fee {} wei)",
            receipt.block_number,
            receipt.confirmations,
            receipt.fee()
        );
    }

    wallet.disconnect().await?;
    println!("\n👋 Disconnected");
    Ok(())
}
