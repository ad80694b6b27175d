//! Plaintext layout of a capability token.
//!
//! `principal:entity:issued_at[:origin[:session_key_b64]]`, with `\` and `:` inside
//! a field escaped by a backslash. Entity identifier paths therefore appear with
//! their separators escaped.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{AuthError, AuthResult};

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPayload {
    pub principal: String,
    pub entity: String,
    /// Seconds since the Unix epoch.
    pub issued_at: i64,
    pub origin: Option<String>,
    pub session_key: Option<Vec<u8>>,
}

impl TokenPayload {
    pub fn new(principal: impl Into<String>, entity: impl Into<String>, issued_at: i64) -> Self {
        Self { principal: principal.into(), entity: entity.into(), issued_at, origin: None, session_key: None }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_session_key(mut self, key: Vec<u8>) -> Self {
        self.session_key = Some(key);
        self
    }

    /// An empty origin cannot be told apart from an absent one on the wire.
    pub fn check(&self) -> AuthResult<()> {
        if self.origin.as_deref() == Some("") {
            return Err(AuthError::MalformedPayload("origin must not be empty".into()));
        }
        Ok(())
    }

    /// Serialize to the delimited text line. Optional fields are emitted only while
    /// a later field is present, so an origin-less token with a session key carries
    /// an empty origin field.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        push_field(&mut out, &self.principal);
        out.push(SEPARATOR);
        push_field(&mut out, &self.entity);
        out.push(SEPARATOR);
        out.push_str(&self.issued_at.to_string());
        if self.origin.is_some() || self.session_key.is_some() {
            out.push(SEPARATOR);
            push_field(&mut out, self.origin.as_deref().unwrap_or_default());
        }
        if let Some(key) = &self.session_key {
            out.push(SEPARATOR);
            out.push_str(&STANDARD.encode(key));
        }
        out
    }

    pub fn decode(text: &str) -> AuthResult<Self> {
        let fields = split_fields(text)?;
        if !(3..=5).contains(&fields.len()) {
            return Err(AuthError::MalformedPayload(format!("expected 3 to 5 fields, found {}", fields.len())));
        }
        let issued_at = fields[2]
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedPayload("issue time is not an integer".into()))?;
        let origin = fields.get(3).filter(|o| !o.is_empty()).cloned();
        let session_key = match fields.get(4) {
            Some(b64) => Some(
                STANDARD
                    .decode(b64)
                    .map_err(|_| AuthError::MalformedPayload("session key is not base64".into()))?,
            ),
            None => None,
        };
        Ok(Self { principal: fields[0].clone(), entity: fields[1].clone(), issued_at, origin, session_key })
    }
}

fn push_field(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == ESCAPE || c == SEPARATOR {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn split_fields(text: &str) -> AuthResult<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                let next = chars.next().ok_or_else(|| AuthError::MalformedPayload("dangling escape".into()))?;
                current.push(next);
            }
            SEPARATOR => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    Ok(fields)
}
