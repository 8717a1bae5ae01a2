//! App Configuration connection strings.
//!
//! The portal hands out strings of the form
//! `Endpoint=https://{store}.azconfig.io;Id={id};Secret={base64}`.

use std::fmt;

use azure_sdk_core::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretSlice;

const ENDPOINT: &str = "Endpoint";
const ID: &str = "Id";
const SECRET: &str = "Secret";

/// A parsed connection string. The secret stays decoded in memory only.
pub struct ConnectionString {
    pub endpoint: String,
    pub id: String,
    pub secret: SecretSlice<u8>,
}

impl ConnectionString {
    /// Parse `Key=Value` segments separated by `;`.
    ///
    /// `Endpoint`, `Id` and `Secret` must each appear exactly once. Other
    /// keys are ignored. Only the first `=` of a segment separates key from
    /// value, so base64 padding survives.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut id = None;
        let mut secret = None;

        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            let slot = match key.trim() {
                ENDPOINT => &mut endpoint,
                ID => &mut id,
                SECRET => &mut secret,
                _ => continue,
            };
            if slot.replace(value.to_string()).is_some() {
                return Err(Error::Config(format!(
                    "duplicate {} in connection string",
                    key.trim()
                )));
            }
        }

        let endpoint = endpoint.ok_or_else(|| missing(ENDPOINT))?;
        let id = id.ok_or_else(|| missing(ID))?;
        let secret = secret.ok_or_else(|| missing(SECRET))?;
        let secret = STANDARD
            .decode(secret.trim())
            .map_err(|e| Error::Config(format!("connection string Secret is not valid base64: {e}")))?;

        Ok(Self {
            endpoint,
            id,
            secret: secret.into(),
        })
    }
}

fn missing(key: &str) -> Error {
    Error::Config(format!("missing {key} in connection string"))
}

impl std::str::FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("id", &self.id)
            .field("secret", &"****")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    // base64("zZ")
    const SECRET_ZZ: &str = "elo=";

    fn assert_parsed(raw: &str) {
        let cs = ConnectionString::parse(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
        assert_eq!(cs.endpoint, "xX");
        assert_eq!(cs.id, "yY");
        assert_eq!(cs.secret.expose_secret(), b"zZ");
    }

    #[test]
    fn parses_in_any_order() {
        assert_parsed(&format!("Endpoint=xX;Id=yY;Secret={SECRET_ZZ}"));
        assert_parsed(&format!("Id=yY;Secret={SECRET_ZZ};Endpoint=xX"));
        assert_parsed(&format!("Secret={SECRET_ZZ};Endpoint=xX;Id=yY;"));
    }

    #[test]
    fn ignores_unrelated_keys_and_trims_keys() {
        assert_parsed(&format!("A=aA;Endpoint=xX;B=bB;Id=yY;C=cC;Secret={SECRET_ZZ}"));
        assert_parsed(&format!(" Endpoint =xX; Id=yY;Secret ={SECRET_ZZ}"));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let cases = [
            format!("Endpoint=xX;Endpoint=xX;Id=yY;Secret={SECRET_ZZ}"),
            format!("Endpoint=xX;Id=yY;Id=yY;Secret={SECRET_ZZ}"),
            format!("Endpoint=xX;Id=yY;Secret={SECRET_ZZ};Secret={SECRET_ZZ}"),
        ];
        for raw in cases {
            let err = ConnectionString::parse(&raw).unwrap_err();
            assert!(err.to_string().contains("duplicate"), "{raw}: {err}");
        }
    }

    #[test]
    fn missing_keys_are_rejected() {
        let cases = [
            format!("Id=yY;Secret={SECRET_ZZ}"),
            format!("Endpoint=xX;Secret={SECRET_ZZ}"),
            "Endpoint=xX;Id=yY".to_string(),
            String::new(),
        ];
        for raw in cases {
            let err = ConnectionString::parse(&raw).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn secret_must_be_base64() {
        let err = ConnectionString::parse("Endpoint=xX;Id=yY;Secret=not base64!").unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn debug_masks_secret() {
        let cs = ConnectionString::parse(&format!("Endpoint=xX;Id=yY;Secret={SECRET_ZZ}")).unwrap();
        let debug = format!("{cs:?}");
        assert!(debug.contains("****"));
        assert!(!debug.contains("zZ"));
    }
}
