// JSON-RPC transport to the ledger node

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::LedgerError;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<RpcError>,
    #[allow(dead_code)]
    id: Value,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

pub struct JsonRpcClient {
    http_client: HttpClient,
    rpc_url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(rpc_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            rpc_url,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });
        debug!("RPC {} (id={})", method, id);

        let resp = self
            .http_client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await?;

        let rpc_resp: RpcResponse<T> = resp.json().await?;

        if let Some(error) = rpc_resp.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_resp.result.ok_or(LedgerError::EmptyResult)
    }
}

#[cfg(test)]
pub(crate) mod test_node {
    //! Minimal JSON-RPC node served by axum for transport tests

    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    pub type Handler = Arc<dyn Fn(&Value) -> Result<Value, (i64, String)> + Send + Sync>;

    pub fn handler<F>(f: F) -> Handler
    where
        F: Fn(&Value) -> Result<Value, (i64, String)> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    /// Serve `handlers` keyed by method name and return the node URL
    pub async fn spawn(handlers: HashMap<&'static str, Handler>) -> String {
        let handlers = Arc::new(handlers);
        let app = Router::new()
            .route("/", post(handle))
            .with_state(handlers);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn handle(
        State(handlers): State<Arc<HashMap<&'static str, Handler>>>,
        Json(req): Json<Value>,
    ) -> Json<Value> {
        let method = req["method"].as_str().unwrap_or_default();
        let id = req["id"].clone();
        let outcome = match handlers.get(method) {
            Some(handler) => handler(&req["params"]),
            None => Err((-32601, format!("method {} not found", method))),
        };
        Json(match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "error": {"code": code, "message": message},
                "id": id
            }),
        })
    }
}
