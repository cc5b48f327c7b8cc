// Persisted sign-in session

use chrono::{DateTime, Duration, Utc};
use ethers::types::Address;
use tracing::{info, warn};

use crate::database::{Database, DbPool};
use crate::error::StoreError;
use crate::models::Session;

const SESSION_KEY: &str = "session";

impl Session {
    pub fn new(identity: Address, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            identity,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > self.issued_at && now <= self.expires_at
    }
}

#[derive(Clone)]
pub struct SessionStore {
    pool: DbPool,
}

impl SessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        Database::set_item(&self.pool, SESSION_KEY, &raw).await?;
        info!(
            "Session saved for {:?}, expires {}",
            session.identity, session.expires_at
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<Session>, StoreError> {
        self.load_at(Utc::now()).await
    }

    /// Expired or unreadable records are purged and reported as absent
    pub async fn load_at(&self, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        let Some(raw) = Database::get_item(&self.pool, SESSION_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.is_valid_at(now) => Ok(Some(session)),
            Ok(session) => {
                info!("Session for {:?} expired at {}", session.identity, session.expires_at);
                self.clear().await?;
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable session record: {}", e);
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        Database::remove_item(&self.pool, SESSION_KEY).await
    }
}
