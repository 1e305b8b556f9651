//! `Stripe-Signature` verification: `t=<unix>,v1=<hex hmac>[,v1=...]`, where each
//! `v1` is HMAC-SHA256 of `"{t}.{raw body}"` keyed with the endpoint secret.

use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<ParsedHeader<'_>, ServiceError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    ServiceError::SignatureError("malformed signature timestamp".to_string())
                })?)
            }
            Some(("v1", value)) if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::SignatureError("signature timestamp missing".to_string()))?;
    if signatures.is_empty() {
        return Err(ServiceError::SignatureError(
            "no v1 signature present".to_string(),
        ));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn mac_for(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex signature the provider would send for `payload` at `timestamp`.
pub fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ServiceError> {
    Ok(hex::encode(
        mac_for(payload, secret, timestamp)?.finalize().into_bytes(),
    ))
}

/// A complete header value, as sent by the provider.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, ServiceError> {
    Ok(format!(
        "t={},v1={}",
        timestamp,
        compute_signature(payload, secret, timestamp)?
    ))
}

/// Checks the header against the raw body. `now` is a unix timestamp.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    if secret.is_empty() {
        return Err(ServiceError::SignatureError(
            "webhook signing secret is not configured".to_string(),
        ));
    }

    let parsed = parse_header(header)?;
    if now.abs_diff(parsed.timestamp) > tolerance_secs {
        return Err(ServiceError::SignatureError(
            "signature timestamp outside tolerance".to_string(),
        ));
    }

    for candidate in parsed.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        if mac_for(payload, secret, parsed.timestamp)?
            .verify_slice(&bytes)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(ServiceError::SignatureError(
        "no signature matches the payload".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_fresh_signature() {
        let header = signature_header(BODY, SECRET, NOW).unwrap();
        assert!(verify_signature(BODY, &header, SECRET, 300, NOW + 10).is_ok());
    }

    #[test]
    fn accepts_when_any_v1_matches() {
        let good = compute_signature(BODY, SECRET, NOW).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", NOW, good);
        assert!(verify_signature(BODY, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = signature_header(BODY, SECRET, NOW).unwrap();
        let err = verify_signature(b"{\"id\":\"evt_2\"}", &header, SECRET, 300, NOW).unwrap_err();
        assert!(matches!(err, ServiceError::SignatureError(_)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = signature_header(BODY, "whsec_other", NOW).unwrap();
        assert!(verify_signature(BODY, &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = signature_header(BODY, SECRET, NOW).unwrap();
        assert!(verify_signature(BODY, &header, SECRET, 300, NOW + 301).is_err());
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["garbage", "t=abc,v1=00", "v1=00", &format!("t={}", NOW)] {
            assert!(
                verify_signature(BODY, header, SECRET, 300, NOW).is_err(),
                "{header} accepted"
            );
        }
    }

    #[test]
    fn empty_secret_never_verifies() {
        let header = signature_header(BODY, "", NOW).unwrap();
        assert!(verify_signature(BODY, &header, "", 300, NOW).is_err());
    }
}
