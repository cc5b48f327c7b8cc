// Auth boundary routes: nonce issuance, sign-in verification, proof verification

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ethers::types::{Address, U256};
use ethers::utils::keccak256;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::siwe::verify_signed_message;

const NONCE_COOKIE: &str = "siwe";

/// Outcome reported by the proof verification service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(
        &self,
        proof: &Value,
        app_id: &str,
        action: &str,
        signal: Option<&str>,
    ) -> anyhow::Result<VerifyResponse>;
}

/// World ID cloud verification over HTTP
pub struct CloudProofVerifier {
    client: Client,
    endpoint: String,
}

impl CloudProofVerifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

/// keccak256 of the signal shifted right by 8 bits, as a 32-byte hex field
pub fn hash_to_field(signal: &str) -> String {
    let bytes = match signal.strip_prefix("0x").map(hex::decode) {
        Some(Ok(bytes)) => bytes,
        _ => signal.as_bytes().to_vec(),
    };
    let hash = U256::from_big_endian(&keccak256(bytes)) >> 8u32;
    let mut buf = [0u8; 32];
    hash.to_big_endian(&mut buf);
    format!("0x{}", hex::encode(buf))
}

#[async_trait]
impl ProofVerifier for CloudProofVerifier {
    async fn verify(
        &self,
        proof: &Value,
        app_id: &str,
        action: &str,
        signal: Option<&str>,
    ) -> anyhow::Result<VerifyResponse> {
        let mut body = proof
            .as_object()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("proof payload must be an object"))?;
        body.insert("action".into(), json!(action));
        body.insert("signal_hash".into(), json!(hash_to_field(signal.unwrap_or(""))));

        let url = format!("{}/{}", self.endpoint, app_id);
        let response = self.client.post(&url).json(&body).send().await?;
        if response.status().is_success() {
            return Ok(VerifyResponse {
                success: true,
                detail: Map::new(),
            });
        }

        let detail = match response.json::<Value>().await? {
            Value::Object(map) => map,
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        Ok(VerifyResponse {
            success: false,
            detail,
        })
    }
}

#[derive(Clone)]
pub struct AuthServerState {
    pub verifier: Arc<dyn ProofVerifier>,
    pub app_id: String,
    /// Only mark the nonce cookie Secure when served over https
    pub secure_cookie: bool,
}

pub fn router(state: AuthServerState) -> Router {
    Router::new()
        .route("/api/nonce", get(get_nonce))
        .route("/api/complete-siwe", post(complete_siwe))
        .route("/api/verify", post(verify_proof))
        .with_state(state)
}

fn nonce_cookie(value: &str, secure: bool, clear: bool) -> String {
    let mut cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Strict", NONCE_COOKIE, value);
    if secure {
        cookie.push_str("; Secure");
    }
    if clear {
        cookie.push_str("; Max-Age=0");
    }
    cookie
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

async fn get_nonce(State(state): State<AuthServerState>) -> Response {
    let nonce = Uuid::new_v4().simple().to_string();
    (
        [(header::SET_COOKIE, nonce_cookie(&nonce, state.secure_cookie, false))],
        Json(json!({ "nonce": nonce })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SiwePayload {
    pub message: String,
    pub signature: String,
    pub address: Address,
}

#[derive(Debug, Deserialize)]
pub struct CompleteSiweRequest {
    pub payload: SiwePayload,
    pub nonce: String,
}

fn siwe_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "isValid": false,
            "message": message,
        })),
    )
        .into_response()
}

async fn complete_siwe(
    State(state): State<AuthServerState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let request: CompleteSiweRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            error!("SIWE verification error: {}", e);
            return siwe_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let stored = cookie_value(&headers, NONCE_COOKIE);
    if stored.as_deref() != Some(request.nonce.as_str()) {
        warn!("Rejected sign-in with unknown nonce");
        return siwe_error(StatusCode::BAD_REQUEST, "Invalid nonce");
    }

    let payload = &request.payload;
    match verify_signed_message(&payload.message, &payload.signature, &request.nonce, Utc::now()) {
        Ok(signer) if signer == payload.address => {
            info!("Sign-in verified for {:?}", signer);
            (
                [(header::SET_COOKIE, nonce_cookie("", state.secure_cookie, true))],
                Json(json!({
                    "status": "success",
                    "isValid": true,
                    "address": payload.address,
                })),
            )
                .into_response()
        }
        Ok(_) => siwe_error(StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) if e.is_invalid_signature() => {
            warn!("Sign-in rejected: {}", e);
            siwe_error(StatusCode::BAD_REQUEST, "Invalid signature")
        }
        Err(e) => {
            error!("SIWE verification error: {}", e);
            siwe_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub payload: Value,
    pub action: String,
    #[serde(default)]
    pub signal: Option<String>,
}

/// Always answers 200; the outcome is carried in the body's `status`
async fn verify_proof(
    State(state): State<AuthServerState>,
    Json(request): Json<VerifyRequest>,
) -> Json<Value> {
    if state.app_id.is_empty() {
        return Json(json!({
            "error": "APP_ID not configured in environment variables",
            "status": 500,
        }));
    }

    let result = state
        .verifier
        .verify(
            &request.payload,
            &state.app_id,
            &request.action,
            request.signal.as_deref(),
        )
        .await;

    match result {
        Ok(verify_res) if verify_res.success => {
            info!(
                "Verification successful for action {} (nullifier {})",
                request.action,
                request.payload["nullifier_hash"].as_str().unwrap_or("-")
            );
            Json(json!({
                "verifyRes": verify_res,
                "status": 200,
                "message": "Verification successful",
            }))
        }
        Ok(verify_res) => {
            warn!("Verification failed: {:?}", verify_res.detail);
            Json(json!({
                "verifyRes": verify_res,
                "status": 400,
                "message": "Verification failed",
            }))
        }
        Err(e) => {
            error!("Error in verify route: {}", e);
            Json(json!({
                "error": e.to_string(),
                "status": 500,
                "message": "Internal server error during verification",
            }))
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;

    pub struct FakeVerifier {
        pub success: bool,
    }

    #[async_trait]
    impl ProofVerifier for FakeVerifier {
        async fn verify(
            &self,
            _proof: &Value,
            _app_id: &str,
            _action: &str,
            _signal: Option<&str>,
        ) -> anyhow::Result<VerifyResponse> {
            let mut detail = Map::new();
            if !self.success {
                detail.insert("code".into(), json!("max_verifications_reached"));
            }
            Ok(VerifyResponse {
                success: self.success,
                detail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeVerifier;
    use super::*;
    use crate::siwe::test_support::{signed, signer};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use ethers::signers::Signer;
    use tower::ServiceExt;

    fn app(success: bool) -> Router {
        router(AuthServerState {
            verifier: Arc::new(FakeVerifier { success }),
            app_id: "app_test".into(),
            secure_cookie: true,
        })
    }

    async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn complete_request(cookie: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/complete-siwe")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(nonce) = cookie {
            builder = builder.header(header::COOKIE, format!("siwe={}", nonce));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_nonce_sets_strict_cookie() {
        let response = app(true)
            .oneshot(Request::get("/api/nonce").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        let body = read_json(response).await;
        let nonce = body["nonce"].as_str().unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(cookie.starts_with(&format!("siwe={}", nonce)));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn test_mismatched_nonce_is_rejected() {
        let body = json!({
            "payload": {
                "message": "irrelevant",
                "signature": "0x00",
                "address": "0x0000000000000000000000000000000000000001",
            },
            "nonce": "zzz999",
        });
        let response = app(true)
            .oneshot(complete_request(Some("abc123"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(
            read_json(response).await,
            json!({"status": "error", "isValid": false, "message": "Invalid nonce"})
        );
    }

    #[tokio::test]
    async fn test_missing_cookie_is_rejected() {
        let (message, signature) = signed("abc12345").await;
        let body = json!({
            "payload": {"message": message, "signature": signature, "address": signer().address()},
            "nonce": "abc12345",
        });
        let response = app(true).oneshot(complete_request(None, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valid_sign_in_clears_cookie() {
        let (message, signature) = signed("abc12345").await;
        let body = json!({
            "payload": {"message": message, "signature": signature, "address": signer().address()},
            "nonce": "abc12345",
        });
        let response = app(true)
            .oneshot(complete_request(Some("abc12345"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.contains("Max-Age=0"));
        let body = read_json(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["isValid"], true);
        assert_eq!(body["address"], json!(signer().address()));
    }

    #[tokio::test]
    async fn test_address_mismatch_is_invalid_signature() {
        let (message, signature) = signed("abc12345").await;
        let body = json!({
            "payload": {
                "message": message,
                "signature": signature,
                "address": Address::repeat_byte(0x99),
            },
            "nonce": "abc12345",
        });
        let response = app(true)
            .oneshot(complete_request(Some("abc12345"), body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["message"], "Invalid signature");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_server_error() {
        let response = app(true)
            .oneshot(complete_request(Some("abc"), json!({"nonce": "abc"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(read_json(response).await["isValid"], false);
    }

    #[tokio::test]
    async fn test_verify_reports_outcome_in_body() {
        let request = |success| {
            app(success).oneshot(
                Request::post("/api/verify")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({"payload": {"nullifier_hash": "0x1"}, "action": "claim"}).to_string(),
                    ))
                    .unwrap(),
            )
        };

        let ok = request(true).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        let body = read_json(ok).await;
        assert_eq!(body["status"], 200);
        assert_eq!(body["verifyRes"]["success"], true);

        let rejected = request(false).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::OK);
        let body = read_json(rejected).await;
        assert_eq!(body["status"], 400);
        assert_eq!(body["verifyRes"]["code"], "max_verifications_reached");
    }

    #[test]
    fn test_empty_signal_hash() {
        assert_eq!(
            hash_to_field(""),
            "0x00c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a4"
        );
    }

    async fn spawn_cloud(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/v2/verify", addr)
    }

    fn world_id_proof() -> Value {
        json!({
            "merkle_root": "0x1f38",
            "nullifier_hash": "0x2bf8",
            "proof": "0x0c7f",
            "verification_level": "orb",
        })
    }

    #[tokio::test]
    async fn test_cloud_verifier_posts_hashed_signal() {
        use axum::extract::Path;

        let cloud = Router::new().route(
            "/api/v2/verify/:app_id",
            post(|Path(app_id): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(app_id, "app_test");
                assert_eq!(body["action"], "uniqueuser");
                assert_eq!(body["signal_hash"], json!(hash_to_field("")));
                assert_eq!(body["nullifier_hash"], "0x2bf8");
                Json(json!({"success": true}))
            }),
        );
        let verifier = CloudProofVerifier::new(spawn_cloud(cloud).await);

        let result = verifier
            .verify(&world_id_proof(), "app_test", "uniqueuser", None)
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_cloud_verifier_rejection_keeps_detail() {
        let cloud = Router::new().route(
            "/api/v2/verify/:app_id",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "code": "max_verifications_reached",
                        "detail": "This person has already verified for this action.",
                    })),
                )
            }),
        );
        let verifier = CloudProofVerifier::new(spawn_cloud(cloud).await);

        let result = verifier
            .verify(&world_id_proof(), "app_test", "uniqueuser", Some("0xabcd"))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.detail["code"], "max_verifications_reached");

        let body = serde_json::to_value(&result).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "max_verifications_reached");
    }

    #[tokio::test]
    async fn test_cloud_verifier_requires_object_payload() {
        let verifier = CloudProofVerifier::new("http://127.0.0.1:9".into());
        assert!(verifier
            .verify(&json!("not-an-object"), "app_test", "uniqueuser", None)
            .await
            .is_err());
    }
}
