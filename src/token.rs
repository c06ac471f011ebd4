//! Text form of security tokens for protocols that carry them as base64 (HTTP `WWW-Authenticate`,
//! SMTP `AUTH GSSAPI`, ...).
//!
//! An absent token and an absent string map onto each other. An empty string is read as "no
//! token".

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub fn encode_token(token: &[u8]) -> String {
    STANDARD.encode(token)
}

pub fn decode_token(token: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(token)
}

pub fn encode_outgoing(token: Option<&[u8]>) -> Option<String> {
    token.map(encode_token)
}

pub fn decode_incoming(token: Option<&str>) -> Result<Option<Vec<u8>>, base64::DecodeError> {
    match token {
        None | Some("") => Ok(None),
        Some(token) => decode_token(token).map(Some),
    }
}
