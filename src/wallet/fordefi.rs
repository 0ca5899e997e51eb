//! Fordefi institutional wallet

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use serde_json::json;
use tracing::info;

use super::{
    map_rpc_error, parse_txid, ProviderBridge, SendRequest, WalletError, WalletProvider,
    WalletSigner, RPC_USER_REJECTED,
};

pub struct FordefiSigner {
    bridge: Arc<dyn ProviderBridge>,
}

impl FordefiSigner {
    pub fn new(bridge: Arc<dyn ProviderBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl WalletSigner for FordefiSigner {
    fn provider(&self) -> WalletProvider {
        WalletProvider::Fordefi
    }

    async fn send(&self, request: &SendRequest) -> Result<Txid, WalletError> {
        let params = json!({
            "to": request.recipient.to_string(),
            "amount": request.amount_sats,
            "network": request.network.wallet_name(),
        });

        let result = self
            .bridge
            .request("sendBitcoin", params)
            .await
            .map_err(|e| map_rpc_error(e, &[RPC_USER_REJECTED]))?;

        let txid = parse_txid(&result)?;
        info!(%txid, amount_sats = request.amount_sats, "fordefi transfer broadcast");
        Ok(txid)
    }
}
