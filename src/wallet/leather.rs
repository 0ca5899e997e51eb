//! Leather browser wallet

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use serde_json::json;
use tracing::info;

use super::{
    map_rpc_error, parse_txid, ProviderBridge, SendRequest, WalletError, WalletProvider,
    WalletSigner, RPC_USER_REJECTED,
};

pub struct LeatherSigner {
    bridge: Arc<dyn ProviderBridge>,
}

impl LeatherSigner {
    pub fn new(bridge: Arc<dyn ProviderBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl WalletSigner for LeatherSigner {
    fn provider(&self) -> WalletProvider {
        WalletProvider::Leather
    }

    async fn send(&self, request: &SendRequest) -> Result<Txid, WalletError> {
        // Leather takes amounts as decimal strings of sats
        let params = json!({
            "recipients": [{
                "address": request.recipient.to_string(),
                "amount": request.amount_sats.to_string(),
            }],
            "network": request.network.wallet_name(),
        });

        let result = self
            .bridge
            .request("sendTransfer", params)
            .await
            .map_err(|e| map_rpc_error(e, &[RPC_USER_REJECTED]))?;

        let txid = parse_txid(&result)?;
        info!(%txid, amount_sats = request.amount_sats, "leather transfer broadcast");
        Ok(txid)
    }
}
