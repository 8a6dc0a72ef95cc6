use crate::jwt::{DecodedToken, decode_token_for_display};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
}

impl GrantType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Token endpoint answer. Members we do not model are kept in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Kept as sent: some providers quote the number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A token response tagged with the grant that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub grant_type: GrantType,
    #[serde(flatten)]
    pub tokens: TokenResponse,
}

/// One token of a set, with its decoded form when it is a JWT.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct DisplayedToken {
    pub name: String,
    pub raw: String,
    pub decoded: Option<DecodedToken>,
}

/// Every token in `set`, in `id_token`, `access_token`, `refresh_token` order.
/// Opaque tokens are listed with `decoded: None`.
#[must_use]
pub fn display_tokens(set: &TokenSet) -> Vec<DisplayedToken> {
    let tokens = &set.tokens;
    [
        ("id_token", tokens.id_token.as_deref()),
        ("access_token", Some(tokens.access_token.as_str())),
        ("refresh_token", tokens.refresh_token.as_deref()),
    ]
    .into_iter()
    .filter_map(|(name, raw)| {
        let raw = raw.filter(|raw| !raw.is_empty())?;
        Some(DisplayedToken {
            name: name.to_string(),
            raw: raw.to_string(),
            decoded: decode_token_for_display(raw),
        })
    })
    .collect()
}
