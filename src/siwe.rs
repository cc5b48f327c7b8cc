// Sign-In with Ethereum (EIP-4361) messages

use chrono::{DateTime, SecondsFormat, Utc};
use ethers::types::{Address, Signature};
use ethers::utils::to_checksum;
use std::fmt;
use std::str::FromStr;

use crate::error::SiweError;
use crate::wallet::SignatureRequest;

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const FIELD_KEYS: [&str; 8] = [
    "URI",
    "Version",
    "Chain ID",
    "Nonce",
    "Issued At",
    "Expiration Time",
    "Not Before",
    "Request ID",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl SiweMessage {
    /// Message a wallet builds for `address` from a signature request
    pub fn from_request(address: Address, request: &SignatureRequest) -> Self {
        Self {
            domain: request.domain.clone(),
            address,
            statement: Some(request.statement.clone()).filter(|s| !s.is_empty()),
            uri: request.uri.clone(),
            version: "1".to_string(),
            chain_id: request.chain_id,
            nonce: request.nonce.clone(),
            issued_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            expiration_time: Some(request.expiration_time),
        }
    }
}

impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}", self.domain, HEADER_SUFFIX)?;
        writeln!(f, "{}", to_checksum(&self.address, None))?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{}", statement)?;
            writeln!(f)?;
        }
        writeln!(f, "URI: {}", self.uri)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Chain ID: {}", self.chain_id)?;
        writeln!(f, "Nonce: {}", self.nonce)?;
        write!(f, "Issued At: {}", self.issued_at)?;
        if let Some(expiration) = &self.expiration_time {
            write!(
                f,
                "\nExpiration Time: {}",
                expiration.to_rfc3339_opts(SecondsFormat::Millis, true)
            )?;
        }
        Ok(())
    }
}

impl FromStr for SiweMessage {
    type Err = SiweError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines();
        let domain = lines
            .next()
            .and_then(|line| line.strip_suffix(HEADER_SUFFIX))
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| SiweError::Malformed("missing header line".into()))?
            .to_string();
        let address = lines
            .next()
            .and_then(|line| Address::from_str(line.trim()).ok())
            .ok_or_else(|| SiweError::Malformed("missing or invalid address".into()))?;

        let mut statement = None;
        let mut fields: Vec<(&str, &str)> = Vec::new();
        for line in lines {
            if line.is_empty() || line == "Resources:" || line.starts_with("- ") {
                continue;
            }
            match line.split_once(": ") {
                Some((key, value)) if FIELD_KEYS.contains(&key) => fields.push((key, value)),
                _ if fields.is_empty() && statement.is_none() => {
                    statement = Some(line.to_string())
                }
                _ => return Err(SiweError::Malformed(format!("unexpected line '{}'", line))),
            }
        }

        let field = |key: &str| -> Result<String, SiweError> {
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .ok_or_else(|| SiweError::Malformed(format!("missing {}", key)))
        };

        let chain_id = field("Chain ID")?
            .parse::<u64>()
            .map_err(|e| SiweError::Malformed(format!("Chain ID: {}", e)))?;
        let expiration_time = match field("Expiration Time") {
            Ok(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| SiweError::Malformed(format!("Expiration Time: {}", e)))?
                    .with_timezone(&Utc),
            ),
            Err(_) => None,
        };

        Ok(Self {
            domain,
            address,
            statement,
            uri: field("URI")?,
            version: field("Version")?,
            chain_id,
            nonce: field("Nonce")?,
            issued_at: field("Issued At")?,
            expiration_time,
        })
    }
}

/// Check a signed sign-in message against the expected nonce and return its signer
pub fn verify_signed_message(
    message: &str,
    signature: &str,
    expected_nonce: &str,
    now: DateTime<Utc>,
) -> Result<Address, SiweError> {
    let parsed = SiweMessage::from_str(message)?;
    if parsed.nonce != expected_nonce {
        return Err(SiweError::NonceMismatch);
    }
    if parsed.expiration_time.is_some_and(|expiration| expiration <= now) {
        return Err(SiweError::Expired);
    }

    let signature =
        Signature::from_str(signature).map_err(|e| SiweError::BadSignature(e.to_string()))?;
    let signer = signature
        .recover(message.as_bytes())
        .map_err(|e| SiweError::BadSignature(e.to_string()))?;
    if signer != parsed.address {
        return Err(SiweError::SignerMismatch);
    }
    Ok(signer)
}
