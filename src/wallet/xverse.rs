//! Xverse browser wallet (sats-connect RPC)

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use serde_json::json;
use tracing::info;

use super::{
    map_rpc_error, parse_txid, ProviderBridge, SendRequest, WalletError, WalletProvider,
    WalletSigner, RPC_USER_REJECTED,
};

/// sats-connect `USER_REJECTION`
const XVERSE_USER_REJECTION: i64 = -32000;

pub struct XverseSigner {
    bridge: Arc<dyn ProviderBridge>,
}

impl XverseSigner {
    pub fn new(bridge: Arc<dyn ProviderBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl WalletSigner for XverseSigner {
    fn provider(&self) -> WalletProvider {
        WalletProvider::Xverse
    }

    async fn send(&self, request: &SendRequest) -> Result<Txid, WalletError> {
        let params = json!({
            "recipients": [{
                "address": request.recipient.to_string(),
                "amount": request.amount_sats,
            }],
        });

        let result = self
            .bridge
            .request("sendTransfer", params)
            .await
            .map_err(|e| map_rpc_error(e, &[XVERSE_USER_REJECTION, RPC_USER_REJECTED]))?;

        let txid = parse_txid(&result)?;
        info!(%txid, amount_sats = request.amount_sats, "xverse transfer broadcast");
        Ok(txid)
    }
}
