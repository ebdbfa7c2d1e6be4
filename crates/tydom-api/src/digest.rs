// HTTP Digest authentication (RFC 2617, MD5 only)
//
// The gateway guards its WebSocket endpoint with a Digest challenge.
// We parse the `WWW-Authenticate` header once per connect attempt and
// build the matching `Authorization` header for the upgrade request.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::Error;

/// Nonce count sent with every `qop=auth` response. We answer each
/// challenge exactly once, so it never advances.
pub const NONCE_COUNT: &str = "00000001";

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Comma-separated qop options as offered, e.g. `"auth,auth-int"`.
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Requires the `Digest ` scheme prefix and both `realm` and `nonce`.
    /// Commas inside quoted values do not split parameters.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let rest = header
            .trim()
            .strip_prefix("Digest ")
            .ok_or_else(|| Error::InvalidChallenge("missing Digest scheme".into()))?;

        let mut params: HashMap<String, String> = HashMap::new();
        for part in split_params(rest) {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            params.insert(key.trim().to_ascii_lowercase(), value.to_owned());
        }

        let realm = params
            .remove("realm")
            .ok_or_else(|| Error::InvalidChallenge("missing realm".into()))?;
        let nonce = params
            .remove("nonce")
            .ok_or_else(|| Error::InvalidChallenge("missing nonce".into()))?;

        Ok(Self {
            realm,
            nonce,
            qop: params.remove("qop"),
            opaque: params.remove("opaque"),
            algorithm: params.remove("algorithm"),
        })
    }

    /// Return a copy with `realm` replaced.
    ///
    /// The gateway advertises a realm that does not match what it verifies
    /// against, so callers substitute a fixed value per transport mode.
    pub fn with_realm(&self, realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            ..self.clone()
        }
    }

    /// Build the `Authorization` header value for one request.
    ///
    /// `random_bytes` seeds the client nonce; pass fixed bytes in tests for
    /// a byte-exact result.
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        random_bytes: [u8; 16],
    ) -> Result<String, Error> {
        if let Some(ref algorithm) = self.algorithm {
            if !algorithm.eq_ignore_ascii_case("MD5") {
                return Err(Error::UnsupportedAlgorithm(algorithm.clone()));
            }
        }

        let ha1 = md5_hex(&format!("{username}:{}:{password}", self.realm));
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        let qop_auth = match self.qop {
            Some(ref offered) => {
                if !offered.split(',').any(|q| q.trim() == "auth") {
                    return Err(Error::UnsupportedQop(offered.clone()));
                }
                Some(hex::encode(random_bytes))
            }
            None => None,
        };

        let response = match qop_auth {
            Some(ref cnonce) => md5_hex(&format!(
                "{ha1}:{}:{NONCE_COUNT}:{cnonce}:auth:{ha2}",
                self.nonce
            )),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
            self.realm, self.nonce
        );
        if let Some(ref algorithm) = self.algorithm {
            let _ = write!(header, ", algorithm={algorithm}");
        }
        if let Some(ref cnonce) = qop_auth {
            let _ = write!(header, ", qop=auth, nc={NONCE_COUNT}, cnonce=\"{cnonce}\"");
        }
        if let Some(ref opaque) = self.opaque {
            let _ = write!(header, ", opaque=\"{opaque}\"");
        }
        Ok(header)
    }
}

/// Split a parameter list on commas that sit outside double quotes.
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(input[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FIXED: [u8; 16] = [0xab; 16];

    #[test]
    fn parse_full_challenge() {
        let c = DigestChallenge::parse(
            r#"Digest realm="protected area", qop="auth,auth-int", nonce="abc123", opaque="xyz", algorithm=MD5"#,
        )
        .unwrap();
        assert_eq!(c.realm, "protected area");
        assert_eq!(c.nonce, "abc123");
        assert_eq!(c.qop.as_deref(), Some("auth,auth-int"));
        assert_eq!(c.opaque.as_deref(), Some("xyz"));
        assert_eq!(c.algorithm.as_deref(), Some("MD5"));
    }

    #[test]
    fn quoted_commas_do_not_split() {
        let c = DigestChallenge::parse(r#"Digest realm="a, b, c", nonce="n""#).unwrap();
        assert_eq!(c.realm, "a, b, c");
        assert_eq!(c.nonce, "n");
    }

    #[test]
    fn missing_prefix_is_invalid() {
        let err = DigestChallenge::parse(r#"Basic realm="x""#).unwrap_err();
        assert!(matches!(err, Error::InvalidChallenge(_)));
    }

    #[test]
    fn missing_nonce_is_invalid() {
        let err = DigestChallenge::parse(r#"Digest realm="x""#).unwrap_err();
        assert!(matches!(err, Error::InvalidChallenge(_)));
    }

    #[test]
    fn missing_realm_is_invalid() {
        let err = DigestChallenge::parse(r#"Digest nonce="x""#).unwrap_err();
        assert!(matches!(err, Error::InvalidChallenge(_)));
    }

    #[test]
    fn response_without_qop() {
        let c = DigestChallenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        let header = c.authorization("user", "pass", "GET", "/x", FIXED).unwrap();

        let ha1 = md5_hex("user:r:pass");
        let ha2 = md5_hex("GET:/x");
        let expected = md5_hex(&format!("{ha1}:n:{ha2}"));

        assert_eq!(
            header,
            format!(
                "Digest username=\"user\", realm=\"r\", nonce=\"n\", uri=\"/x\", response=\"{expected}\""
            )
        );
    }

    #[test]
    fn response_with_qop_selects_auth() {
        let c = DigestChallenge::parse(
            r#"Digest realm="r", nonce="n", qop="auth,auth-int", opaque="o", algorithm=MD5"#,
        )
        .unwrap();
        let header = c.authorization("user", "pass", "GET", "/x", FIXED).unwrap();

        let cnonce = "ab".repeat(16);
        let ha1 = md5_hex("user:r:pass");
        let ha2 = md5_hex("GET:/x");
        let expected = md5_hex(&format!("{ha1}:n:00000001:{cnonce}:auth:{ha2}"));

        assert_eq!(
            header,
            format!(
                "Digest username=\"user\", realm=\"r\", nonce=\"n\", uri=\"/x\", response=\"{expected}\", \
                 algorithm=MD5, qop=auth, nc=00000001, cnonce=\"{cnonce}\", opaque=\"o\""
            )
        );
    }

    #[test]
    fn build_is_deterministic_for_fixed_bytes() {
        let c = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth""#).unwrap();
        let a = c.authorization("u", "p", "GET", "/", FIXED).unwrap();
        let b = c.authorization("u", "p", "GET", "/", FIXED).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_md5_algorithm() {
        let c = DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-256"#).unwrap();
        let err = c.authorization("u", "p", "GET", "/", FIXED).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(a) if a == "SHA-256"));
    }

    #[test]
    fn rejects_qop_without_auth() {
        let c = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth-int""#).unwrap();
        let err = c.authorization("u", "p", "GET", "/", FIXED).unwrap_err();
        assert!(matches!(err, Error::UnsupportedQop(_)));
    }

    #[test]
    fn with_realm_overrides_only_realm() {
        let c = DigestChallenge::parse(r#"Digest realm="bogus", nonce="n""#).unwrap();
        let fixed = c.with_realm("ServiceMedia");
        assert_eq!(fixed.realm, "ServiceMedia");
        assert_eq!(fixed.nonce, "n");
    }
}
