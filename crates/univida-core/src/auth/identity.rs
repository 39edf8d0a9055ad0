use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Label shown when no name can be derived from the token.
pub const FALLBACK_DISPLAY_NAME: &str = "Usuario";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Agente,
    Cliente,
}

impl Role {
    /// Page a user of this role lands on after logging in.
    pub fn landing_route(&self) -> &'static str {
        match self {
            Role::Admin => "/admin-dashboard",
            Role::Agente => "/agente-dashboard",
            Role::Cliente => "/mi-poliza",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Agente => "AGENTE",
            Role::Cliente => "CLIENTE",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User identity carried in the access token claims.
///
/// Never stored on its own; recomputed from the current access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "rol")]
    pub role: Role,
}

impl Identity {
    /// Decode the identity claims of an access token.
    ///
    /// The signature is not verified; the issuing server owns that.
    pub fn from_token(token: &str) -> Result<Self, String> {
        let claims = decode_claims(token)?;
        serde_json::from_value(claims).map_err(|e| format!("unexpected claim shape: {e}"))
    }

    /// `first last`, else `first`, else the username, else "Usuario".
    pub fn display_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            _ if !self.username.is_empty() => self.username.clone(),
            _ => FALLBACK_DISPLAY_NAME.to_string(),
        }
    }
}

/// Decode the payload segment of a JWT into raw JSON claims.
pub fn decode_claims(token: &str) -> Result<JsonValue, String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 token segments, got {}", parts.len()));
    }

    // Some issuers pad the segment even though JWT forbids it
    let payload = parts[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| format!("invalid payload encoding: {e}"))?;

    let claims: JsonValue =
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid payload json: {e}"))?;
    if !claims.is_object() {
        return Err("payload is not a JSON object".to_string());
    }
    Ok(claims)
}

/// Build an unsigned token carrying `claims`. Test helper.
#[cfg(test)]
pub(crate) fn token_with_claims(claims: &JsonValue) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_identity_with_names() {
        let token = token_with_claims(&json!({
            "username": "ana",
            "first_name": "Ana",
            "last_name": "Gomez",
            "email": "ana@example.com",
            "rol": "CLIENTE",
            "exp": 1_900_000_000
        }));

        let identity = Identity::from_token(&token).unwrap();
        assert_eq!(identity.username, "ana");
        assert_eq!(identity.email, "ana@example.com");
        assert_eq!(identity.role, Role::Cliente);
        assert_eq!(identity.display_name(), "Ana Gomez");
    }

    #[test]
    fn test_display_name_fallbacks() {
        let token = token_with_claims(&json!({"username": "ana", "rol": "CLIENTE"}));
        let mut identity = Identity::from_token(&token).unwrap();
        assert_eq!(identity.display_name(), "ana");

        identity.first_name = "Ana".to_string();
        assert_eq!(identity.display_name(), "Ana");

        // Last name alone is not enough for "first last"
        identity.first_name.clear();
        identity.last_name = "Gomez".to_string();
        assert_eq!(identity.display_name(), "ana");

        identity.username.clear();
        assert_eq!(identity.display_name(), FALLBACK_DISPLAY_NAME);
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(decode_claims("").is_err());
        assert!(decode_claims("only.two").is_err());
        assert!(decode_claims("a.!!!.c").is_err());

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(decode_claims(&not_json).is_err());

        let array = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(decode_claims(&array).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_role() {
        let token = token_with_claims(&json!({"username": "ana", "rol": "SUPERVISOR"}));
        assert!(Identity::from_token(&token).is_err());

        let missing = token_with_claims(&json!({"username": "ana"}));
        assert!(Identity::from_token(&missing).is_err());
    }

    #[test]
    fn test_role_landing_routes() {
        assert_eq!(Role::Admin.landing_route(), "/admin-dashboard");
        assert_eq!(Role::Agente.landing_route(), "/agente-dashboard");
        assert_eq!(Role::Cliente.landing_route(), "/mi-poliza");
        assert_eq!(Role::Agente.to_string(), "AGENTE");
    }
}
