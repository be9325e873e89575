// ===============================
// src/gateway.rs
// ===============================
//
// Signed REST access to the exchange: depth snapshot, limit order
// placement, single/bulk cancellation. Every call carries the client-level
// timeout from config so a stuck request cannot wedge the event task.
//

use reqwest::StatusCode;
use thiserror::Error;

use crate::binance::{signed_query, timestamp_ms, DepthSnapshot, OrderAck};
use crate::config::{ApiCredentials, NetParams};
use crate::domain::{Px, Side};

const API_KEY_HEADER: &str = "X-MBX-APIKEY";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// A timed-out request may or may not have reached the exchange; the
    /// caller resolves the ambiguity instead of assuming either outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Transport(e) if e.is_timeout())
    }
}

pub struct BinanceGateway {
    http: reqwest::Client,
    rest_base: String,
    credentials: ApiCredentials,
    recv_window: u64,
}

impl BinanceGateway {
    pub fn new(
        rest_base: String,
        credentials: ApiCredentials,
        net: &NetParams,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(net.request_timeout)
            .build()?;
        Ok(Self { http, rest_base, credentials, recv_window: net.recv_window })
    }

    /// Full-depth snapshot (public endpoint, unsigned).
    pub async fn depth_snapshot(&self, symbol: &str) -> Result<DepthSnapshot, GatewayError> {
        let url = format!("{}/api/v3/depth?symbol={}&limit=5000", self.rest_base, symbol);
        let rsp = self.http.get(url).send().await?;
        if !rsp.status().is_success() {
            return Err(Self::status_error(rsp).await);
        }
        rsp.json::<DepthSnapshot>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Place a LIMIT GTC order. Success requires the exchange to echo an
    /// order id; anything else is an error and the order is not resting as
    /// far as the caller is concerned.
    pub async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        price: Px,
        price_precision: u32,
        quantity: f64,
        client_order_id: &str,
    ) -> Result<OrderAck, GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_api().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", format!("{quantity}")),
            ("price", price.to_api(price_precision)),
            ("newClientOrderId", client_order_id.to_string()),
            ("recvWindow", self.recv_window.to_string()),
            ("timestamp", timestamp_ms().to_string()),
        ];
        let query = signed_query(&self.credentials.secret, &params);
        let url = format!("{}/api/v3/order?{}", self.rest_base, query);

        let rsp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.credentials.key)
            .send()
            .await?;
        if !rsp.status().is_success() {
            return Err(Self::status_error(rsp).await);
        }
        rsp.json::<OrderAck>()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }

    /// Cancel one order by exchange id.
    pub async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("orderId", order_id.to_string()),
            ("recvWindow", self.recv_window.to_string()),
            ("timestamp", timestamp_ms().to_string()),
        ];
        self.delete_signed(&params).await
    }

    /// Cancel by our client id; used to resolve a placement whose response
    /// timed out and whose exchange id we therefore never saw.
    pub async fn cancel_by_client_id(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<(), GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
            ("recvWindow", self.recv_window.to_string()),
            ("timestamp", timestamp_ms().to_string()),
        ];
        self.delete_signed(&params).await
    }

    /// Cancel every open order for the symbol in one call.
    pub async fn cancel_all(&self, symbol: &str) -> Result<(), GatewayError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("recvWindow", self.recv_window.to_string()),
            ("timestamp", timestamp_ms().to_string()),
        ];
        let query = signed_query(&self.credentials.secret, &params);
        let url = format!("{}/api/v3/openOrders?{}", self.rest_base, query);
        let rsp = self
            .http
            .delete(url)
            .header(API_KEY_HEADER, &self.credentials.key)
            .send()
            .await?;
        if !rsp.status().is_success() {
            return Err(Self::status_error(rsp).await);
        }
        Ok(())
    }

    async fn delete_signed(&self, params: &[(&str, String)]) -> Result<(), GatewayError> {
        let query = signed_query(&self.credentials.secret, params);
        let url = format!("{}/api/v3/order?{}", self.rest_base, query);
        let rsp = self
            .http
            .delete(url)
            .header(API_KEY_HEADER, &self.credentials.key)
            .send()
            .await?;
        if !rsp.status().is_success() {
            return Err(Self::status_error(rsp).await);
        }
        Ok(())
    }

    async fn status_error(rsp: reqwest::Response) -> GatewayError {
        let status = rsp.status();
        let body = rsp.text().await.unwrap_or_default();
        GatewayError::Status { status, body }
    }
}
