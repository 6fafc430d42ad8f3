use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub addr: Option<String>,
}

/// Reads the claims of a service-issued token without verifying it.
pub fn decode_claims(token: &str) -> eyre::Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub expired: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A missing, malformed or claim-less token counts as expired.
///
/// No clock-skew tolerance is applied.
pub fn expiry(token: Option<&str>) -> Expiry {
    expiry_at(token, Utc::now())
}

fn expiry_at(token: Option<&str>, now: DateTime<Utc>) -> Expiry {
    let expires_at = token
        .and_then(|token| decode_claims(token).ok())
        .and_then(|claims| claims.exp)
        .and_then(|exp| DateTime::from_timestamp(exp, 0));

    match expires_at {
        Some(at) => Expiry {
            expired: at <= now,
            expires_at: Some(at),
        },
        None => Expiry {
            expired: true,
            expires_at: None,
        },
    }
}

#[cfg(test)]
pub mod test_support {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    /// Unsigned token carrying `exp` and `addr`.
    pub fn make_token(addr: &str, exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD
            .encode(serde_json::json!({ "addr": addr, "exp": exp }).to_string());
        format!("{header}.{payload}.sig")
    }

    pub fn in_hours(hours: i64) -> i64 {
        chrono::Utc::now().timestamp() + hours * 3600
    }
}
