// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use passport_ledger::bridge::confirmer::ConfirmationWatcher;
use passport_ledger::bridge::oracle::{run_price_poller, PriceOracle};
use passport_ledger::bridge::{BridgeAddresses, BridgeListener};
use passport_ledger::chain::{
    AlloyHotWallet, Erc20Token, EvmClient, NetworkConfig, BUSD_TOKEN, SUPS_TOKEN, USDC_TOKEN,
};
use passport_ledger::config::Config;
use passport_ledger::events::{EventSink, NotificationHub};
use passport_ledger::ledger::store::LedgerStore;
use passport_ledger::ledger::Ledger;
use passport_ledger::withdrawal::signer::WithdrawSigner;
use passport_ledger::withdrawal::WithdrawalOrchestrator;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = Config::from_env();
    let (eth_network, bsc_network) = config.networks();
    tracing::info!(
        eth = %eth_network.name,
        bsc = %bsc_network.name,
        data_dir = %config.data_dir.display(),
        "passport ledger starting"
    );

    let store = Arc::new(LedgerStore::open(&config.db_path()).expect("failed to open ledger store"));
    let events = EventSink::new();
    let ledger = Ledger::new(store.clone(), events.clone());

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        NotificationHub::new(&events).run(shutdown.clone()),
    ));

    let oracle = PriceOracle::new(config.sups_usd_milli);
    tasks.push(tokio::spawn(run_price_poller(
        oracle.clone(),
        reqwest::Client::new(),
        Duration::from_secs(config.price_poll_secs),
        shutdown.clone(),
    )));

    let eth_client = Arc::new(
        EvmClient::new(eth_network.clone(), &config.eth_rpc_url)
            .expect("failed to build Ethereum client"),
    );
    let bsc_client = Arc::new(
        EvmClient::new(bsc_network.clone(), &config.bsc_rpc_url)
            .expect("failed to build BSC client"),
    );

    let addresses = BridgeAddresses {
        purchase: parse_addr(&config.purchase_address, "purchase address"),
        redemption: parse_addr(&config.redemption_address, "redemption address"),
        hot_wallet: parse_addr(&config.hot_wallet_address, "hot wallet address"),
    };

    let sups_contract = config
        .sups_contract
        .clone()
        .or_else(|| SUPS_TOKEN.address_on(bsc_network.chain_id).map(String::from));

    // One listener per (chain, asset): SUPS and BUSD on BSC, USDC on Ethereum
    let watched: [(&Arc<EvmClient>, &NetworkConfig, Erc20Token, Option<String>); 3] = [
        (&bsc_client, &bsc_network, SUPS_TOKEN, sups_contract.clone()),
        (
            &bsc_client,
            &bsc_network,
            BUSD_TOKEN,
            BUSD_TOKEN.address_on(bsc_network.chain_id).map(String::from),
        ),
        (
            &eth_client,
            &eth_network,
            USDC_TOKEN,
            USDC_TOKEN.address_on(eth_network.chain_id).map(String::from),
        ),
    ];

    for (client, network, token, contract) in watched {
        let Some(contract) = contract else {
            tracing::warn!(
                chain = %network.name,
                token = %token.symbol,
                "no contract address configured, listener not started"
            );
            continue;
        };
        let listener = BridgeListener::new(
            client.clone(),
            ledger.clone(),
            oracle.clone(),
            token,
            parse_addr(&contract, "token contract"),
            addresses.clone(),
            Duration::from_secs(config.bridge_poll_secs),
        );
        tasks.push(tokio::spawn(listener.run(shutdown.clone())));
    }

    for client in [&eth_client, &bsc_client] {
        let watcher = ConfirmationWatcher::new(
            client.clone(),
            store.clone(),
            Duration::from_secs(config.confirm_poll_secs),
        );
        tasks.push(tokio::spawn(watcher.run(shutdown.clone())));
    }

    // The connection layer drives withdrawals through this handle
    let _withdrawals = build_withdrawals(&config, &bsc_network, sups_contract.as_deref(), &ledger);

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("passport ledger stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_addr(raw: &str, what: &str) -> Address {
    raw.parse()
        .unwrap_or_else(|_| panic!("invalid {what}: {raw}"))
}

fn build_withdrawals(
    config: &Config,
    bsc_network: &NetworkConfig,
    sups_contract: Option<&str>,
    ledger: &Ledger,
) -> Option<WithdrawalOrchestrator<AlloyHotWallet>> {
    let Some(key) = config.hot_wallet_private_key.as_deref() else {
        tracing::warn!("no hot wallet key configured, withdrawals disabled");
        return None;
    };
    let Some(contract) = sups_contract else {
        tracing::warn!("no SUPS contract configured, withdrawals disabled");
        return None;
    };

    let gateway = AlloyHotWallet::new(
        bsc_network.clone(),
        &config.bsc_rpc_url,
        parse_addr(contract, "SUPS contract"),
        key,
    )
    .expect("failed to build hot wallet gateway");
    let signer =
        WithdrawSigner::new(&config.signer_private_key).expect("invalid withdrawal signer key");

    tracing::info!(hot_wallet = %gateway.address(), "withdrawal orchestrator ready");
    Some(WithdrawalOrchestrator::new(
        ledger.clone(),
        gateway,
        signer,
    ))
}
