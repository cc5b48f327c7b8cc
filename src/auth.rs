// Sign-in flow against the auth boundary

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ethers::types::Address;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SiweSettings;
use crate::error::{AuthError, StoreError};
use crate::models::Session;
use crate::refresh::RefreshHandle;
use crate::session::SessionStore;
use crate::wallet::{SignatureRequest, SignedMessage, VerificationRequest, WalletCapability};

/// Action configured for the World ID app
pub const DEFAULT_VERIFY_ACTION: &str = "uniqueuser";
const VERIFICATION_LEVEL: &str = "orb";

/// Verify-route outcome for a personhood proof
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofVerdict {
    pub verified: bool,
    pub detail: Value,
}

#[async_trait]
pub trait AuthBoundary: Send + Sync {
    /// Fetch a single-use nonce bound to this client
    async fn nonce(&self) -> Result<String, AuthError>;

    /// Submit the signed message; returns the verified address
    async fn verify_identity(
        &self,
        signed: &SignedMessage,
        nonce: &str,
    ) -> Result<Address, AuthError>;

    /// Submit a wallet-issued proof to the verify route
    async fn verify_proof(
        &self,
        proof: &Value,
        action: &str,
        signal: &str,
    ) -> Result<ProofVerdict, AuthError>;
}

/// Auth boundary reached over HTTP; the nonce cookie lives in the client's jar
pub struct HttpAuthBoundary {
    client: Client,
    base_url: String,
}

impl HttpAuthBoundary {
    pub fn new(base_url: String) -> anyhow::Result<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AuthBoundary for HttpAuthBoundary {
    async fn nonce(&self) -> Result<String, AuthError> {
        let url = format!("{}/api/nonce", self.base_url);
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;

        body["nonce"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AuthError::VerificationFailed("no nonce in response".into()))
    }

    async fn verify_identity(
        &self,
        signed: &SignedMessage,
        nonce: &str,
    ) -> Result<Address, AuthError> {
        let url = format!("{}/api/complete-siwe", self.base_url);
        let request = json!({
            "payload": {
                "status": "success",
                "message": signed.message,
                "signature": signed.signature,
                "address": signed.address,
                "version": 1,
            },
            "nonce": nonce,
        });
        let body: Value = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        if body["isValid"].as_bool() == Some(true) {
            return serde_json::from_value(body["address"].clone())
                .map_err(|e| AuthError::VerificationFailed(format!("bad address: {}", e)));
        }

        let message = body["message"]
            .as_str()
            .unwrap_or("Verification failed")
            .to_string();
        if message == "Invalid nonce" {
            Err(AuthError::NonceMismatch(message))
        } else {
            Err(AuthError::VerificationFailed(message))
        }
    }

    async fn verify_proof(
        &self,
        proof: &Value,
        action: &str,
        signal: &str,
    ) -> Result<ProofVerdict, AuthError> {
        let url = format!("{}/api/verify", self.base_url);
        let body: Value = self
            .client
            .post(&url)
            .json(&json!({
                "payload": proof,
                "action": action,
                "signal": signal,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        Ok(ProofVerdict {
            verified: body["status"].as_u64() == Some(200),
            detail: body,
        })
    }
}

pub struct AuthFlow {
    wallet: Arc<dyn WalletCapability>,
    boundary: Arc<dyn AuthBoundary>,
    sessions: SessionStore,
    refresh: RefreshHandle,
    siwe: SiweSettings,
    session_ttl: Duration,
}

impl AuthFlow {
    pub fn new(
        wallet: Arc<dyn WalletCapability>,
        boundary: Arc<dyn AuthBoundary>,
        sessions: SessionStore,
        refresh: RefreshHandle,
        siwe: SiweSettings,
        session_ttl: Duration,
    ) -> Self {
        Self {
            wallet,
            boundary,
            sessions,
            refresh,
            siwe,
            session_ttl,
        }
    }

    /// Nonce, wallet signature, verification, then persist the session
    pub async fn sign_in(&self) -> Result<Session, AuthError> {
        let nonce = self.boundary.nonce().await?;

        let now = Utc::now();
        let request = SignatureRequest {
            domain: self.siwe.domain.clone(),
            uri: self.siwe.uri.clone(),
            chain_id: self.siwe.chain_id,
            nonce: nonce.clone(),
            statement: self.siwe.statement.clone(),
            expiration_time: now + self.session_ttl,
        };
        let signed = self
            .wallet
            .request_signature(&request)
            .await
            .map_err(|e| AuthError::SignatureRejected(e.to_string()))?;

        let identity = self.boundary.verify_identity(&signed, &nonce).await?;
        let session = Session::new(identity, now, self.session_ttl);
        self.sessions.save(&session).await?;
        self.refresh.set_session(&session);

        info!("Signed in as {:?}", identity);
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), StoreError> {
        self.sessions.clear().await?;
        self.refresh.set_identity(None);
        info!("Signed out");
        Ok(())
    }

    /// Resume a stored session, if one is still valid
    pub async fn restore(&self) -> Result<Option<Session>, StoreError> {
        let session = self.sessions.load().await?;
        match &session {
            Some(s) => {
                info!("Restored session for {:?}", s.identity);
                self.refresh.set_session(s);
            }
            None => self.refresh.set_identity(None),
        }
        Ok(session)
    }

    /// Have the wallet prove personhood for `action` and verify it server-side
    pub async fn verify_personhood(
        &self,
        action: &str,
        signal: &str,
    ) -> Result<ProofVerdict, AuthError> {
        let request = VerificationRequest {
            action: action.to_string(),
            signal: signal.to_string(),
            verification_level: VERIFICATION_LEVEL.to_string(),
        };
        let proof = self
            .wallet
            .request_verification(&request)
            .await
            .map_err(|e| AuthError::SignatureRejected(e.to_string()))?;

        let verdict = self.boundary.verify_proof(&proof, action, signal).await?;
        if verdict.verified {
            info!("Proof for {} verified", action);
        } else {
            warn!("Proof for {} not verified: {}", action, verdict.detail);
        }
        Ok(verdict)
    }

    /// Current session; an expired one signs the client out
    pub async fn current(&self) -> Result<Option<Session>, StoreError> {
        let session = self.sessions.load().await?;
        if session.is_none() && self.refresh.model().identity.is_some() {
            warn!("Session expired, clearing identity");
            self.refresh.set_identity(None);
        }
        Ok(session)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Boundary handing out a fixed nonce and a scripted verdict
    pub struct FakeBoundary {
        pub nonce: String,
        pub verdict: Result<Address, String>,
        pub proof_verified: bool,
        pub seen_nonces: Mutex<Vec<String>>,
    }

    impl FakeBoundary {
        pub fn accepting(identity: Address) -> Self {
            Self {
                nonce: "abc12345".into(),
                verdict: Ok(identity),
                proof_verified: true,
                seen_nonces: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuthBoundary for FakeBoundary {
        async fn nonce(&self) -> Result<String, AuthError> {
            Ok(self.nonce.clone())
        }

        async fn verify_identity(
            &self,
            _signed: &SignedMessage,
            nonce: &str,
        ) -> Result<Address, AuthError> {
            self.seen_nonces.lock().unwrap().push(nonce.to_string());
            self.verdict
                .clone()
                .map_err(AuthError::VerificationFailed)
        }

        async fn verify_proof(
            &self,
            _proof: &Value,
            _action: &str,
            _signal: &str,
        ) -> Result<ProofVerdict, AuthError> {
            let status = if self.proof_verified { 200 } else { 400 };
            Ok(ProofVerdict {
                verified: self.proof_verified,
                detail: json!({ "status": status }),
            })
        }
    }
}
