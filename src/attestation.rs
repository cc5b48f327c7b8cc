// Attestation adapter
//
// Maps the opaque proof object produced by the notary into the two structured
// arguments of `claimFunds`. Cryptographic validity is checked by the ledger.

use ethers::types::{Address, Signature, H256};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::error::MalformedProofError;

/// Script and session metadata plus the key/value projection of proof data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationInput {
    pub version: String,
    pub script_raw: String,
    pub issued_at: String,
    pub nonce: String,
    pub session_id: String,
    pub data: Vec<(String, String)>,
}

/// Digest, split signature and the signer the ledger should expect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationSignature {
    pub digest: H256,
    pub v: u8,
    pub r: H256,
    pub s: H256,
    pub expected_signer: Address,
}

/// Proof object shape:
///
/// ```json
/// {
///   "version": "...", "scriptRaw": "...", "issuedAt": "...",
///   "nonce": "...", "sessionId": "...",
///   "data": { "upiTransactionId": "...", "amount": "..." },
///   "digest": "0x<32 bytes>", "signature": "0x<65 bytes>",
///   "signer": "0x<address>"
/// }
/// ```
pub fn to_claim_args(
    proof: &Value,
) -> Result<(AttestationInput, AttestationSignature), MalformedProofError> {
    let obj = proof
        .as_object()
        .ok_or_else(|| MalformedProofError::invalid("proof", "expected a JSON object"))?;

    let input = AttestationInput {
        version: required_str(obj, "version")?,
        script_raw: required_str(obj, "scriptRaw")?,
        issued_at: required_str(obj, "issuedAt")?,
        nonce: required_str(obj, "nonce")?,
        session_id: required_str(obj, "sessionId")?,
        data: project_data(obj)?,
    };

    let digest = H256::from_str(&required_str(obj, "digest")?)
        .map_err(|e| MalformedProofError::invalid("digest", e))?;
    let raw_sig = required_str(obj, "signature")?;
    let sig = Signature::from_str(&raw_sig)
        .map_err(|e| MalformedProofError::invalid("signature", e))?;
    let v = normalize_v(sig.v).ok_or_else(|| {
        MalformedProofError::invalid("signature", format!("unexpected recovery id {}", sig.v))
    })?;
    let expected_signer = Address::from_str(&required_str(obj, "signer")?)
        .map_err(|e| MalformedProofError::invalid("signer", e))?;

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    sig.r.to_big_endian(&mut r);
    sig.s.to_big_endian(&mut s);

    let signature = AttestationSignature {
        digest,
        v,
        r: H256::from(r),
        s: H256::from(s),
        expected_signer,
    };
    Ok((input, signature))
}

fn required_str(obj: &Map<String, Value>, field: &str) -> Result<String, MalformedProofError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(MalformedProofError::missing(field))
        }
        Some(other) => Err(MalformedProofError::invalid(
            field,
            format!("expected string, got {}", other),
        )),
    }
}

/// Flatten the proof's data fields to string pairs, sorted by key
fn project_data(obj: &Map<String, Value>) -> Result<Vec<(String, String)>, MalformedProofError> {
    let data = obj
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| MalformedProofError::missing("data"))?;

    let mut pairs: Vec<(String, String)> = data
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(pairs)
}

// Recovery id may come as 0/1 or 27/28
fn normalize_v(v: u64) -> Option<u8> {
    match v {
        0 | 1 => Some(v as u8 + 27),
        27 | 28 => Some(v as u8),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::{json, Value};

    /// Well-formed proof with a 65-byte signature
    pub fn sample_proof() -> Value {
        let mut sig = vec![0x11u8; 32];
        sig.extend([0x22u8; 32]);
        sig.push(28);
        json!({
            "version": "1",
            "scriptRaw": "script",
            "issuedAt": "2024-11-02T10:00:00Z",
            "nonce": "n-1",
            "sessionId": "s-1",
            "data": { "upiTransactionId": "UPI42", "amount": 100 },
            "digest": format!("0x{}", "33".repeat(32)),
            "signature": format!("0x{}", hex::encode(sig)),
            "signer": "0x00000000000000000000000000000000000000aa"
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_proof;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_maps_metadata_and_signature() {
        let (input, signature) = to_claim_args(&sample_proof()).unwrap();
        assert_eq!(input.session_id, "s-1");
        assert_eq!(
            input.data,
            vec![
                ("amount".to_string(), "100".to_string()),
                ("upiTransactionId".to_string(), "UPI42".to_string()),
            ]
        );
        assert_eq!(signature.v, 28);
        assert_eq!(signature.r, H256::repeat_byte(0x11));
        assert_eq!(signature.s, H256::repeat_byte(0x22));
        assert_eq!(signature.digest, H256::repeat_byte(0x33));
        assert_eq!(signature.expected_signer, Address::from_low_u64_be(0xaa));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let mut proof = sample_proof();
        proof.as_object_mut().unwrap().remove("sessionId");
        let err = to_claim_args(&proof).unwrap_err();
        assert_eq!(err, MalformedProofError::missing("sessionId"));
    }

    #[test]
    fn test_missing_data_is_malformed() {
        let mut proof = sample_proof();
        proof.as_object_mut().unwrap().remove("data");
        assert_eq!(
            to_claim_args(&proof).unwrap_err().field,
            "data".to_string()
        );
    }

    #[test]
    fn test_short_signature_is_malformed() {
        let mut proof = sample_proof();
        proof["signature"] = json!("0x1234");
        assert_eq!(to_claim_args(&proof).unwrap_err().field, "signature");
    }
}
