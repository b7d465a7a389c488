//! Sign-in message codec
//!
//! Canonical, line-oriented text that the wallet displays and signs. The
//! same bytes must come out of `serialize` on the client and on the server,
//! so the layout is fixed and parsing is strict:
//!
//! ```text
//! {domain} wants you to sign in with your Solana account:
//! {publicKey}
//!
//! {statement}
//!
//! Nonce: {nonce}
//! Issued At: {issuedAt}
//! ```
//!
//! The `Issued At` line is present only when the message carries a
//! timestamp. There is no trailing newline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::crypto::WalletPublicKey;

const HEADER_SUFFIX: &str = " wants you to sign in with your Solana account:";
const NONCE_PREFIX: &str = "Nonce: ";
const ISSUED_AT_PREFIX: &str = "Issued At: ";

pub const MIN_NONCE_LEN: usize = 8;
pub const MAX_NONCE_LEN: usize = 128;
const MAX_DOMAIN_LEN: usize = 255;
const MAX_STATEMENT_LEN: usize = 1024;

/// Errors produced while building or parsing a sign-in message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Malformed message layout: {0}")]
    MalformedLayout(&'static str),

    #[error("Unexpected trailing data after message")]
    TrailingData,
}

impl ParseError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ParseError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// The challenge payload a wallet signs
///
/// Fields are private so a constructed message is always valid and its
/// public key cannot be swapped afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SigninMessageFields", into = "SigninMessageFields")]
pub struct SigninMessage {
    domain: String,
    public_key: WalletPublicKey,
    statement: String,
    nonce: String,
    issued_at: Option<DateTime<Utc>>,
}

/// Field-wise wire representation of a [`SigninMessage`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SigninMessageFields {
    pub domain: String,
    pub public_key: String,
    pub statement: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<String>,
}

impl SigninMessage {
    /// Build a message, rejecting any field that could break the layout
    pub fn new(
        domain: impl Into<String>,
        public_key: WalletPublicKey,
        statement: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let domain = domain.into();
        let statement = statement.into();
        let nonce = nonce.into();

        validate_domain(&domain)?;
        validate_statement(&statement)?;
        validate_nonce(&nonce)?;

        Ok(Self {
            domain,
            public_key,
            statement,
            nonce,
            issued_at: None,
        })
    }

    /// Attach an issue time, truncated to the millisecond precision the
    /// text form carries
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at.trunc_subsecs(3));
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn public_key(&self) -> &WalletPublicKey {
        &self.public_key
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Canonical bytes covered by the signature
    pub fn serialize(&self) -> Vec<u8> {
        self.to_text().into_bytes()
    }

    /// Canonical text form
    pub fn to_text(&self) -> String {
        let mut text = format!(
            "{}{}\n{}\n\n{}\n\n{}{}",
            self.domain, HEADER_SUFFIX, self.public_key, self.statement, NONCE_PREFIX, self.nonce
        );

        if let Some(issued_at) = self.issued_at {
            text.push('\n');
            text.push_str(ISSUED_AT_PREFIX);
            text.push_str(&format_issued_at(&issued_at));
        }

        text
    }

    /// Strict inverse of [`SigninMessage::serialize`]
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)?;
        let mut lines = text.split('\n');

        let header = lines.next().ok_or(ParseError::MissingField("domain"))?;
        let domain = header
            .strip_suffix(HEADER_SUFFIX)
            .ok_or(ParseError::MalformedLayout("missing sign-in header"))?;

        let public_key_line = lines.next().ok_or(ParseError::MissingField("publicKey"))?;
        let public_key = public_key_line
            .parse::<WalletPublicKey>()
            .map_err(|e| ParseError::invalid("publicKey", e.to_string()))?;

        expect_blank(lines.next())?;
        let statement = lines.next().ok_or(ParseError::MissingField("statement"))?;
        expect_blank(lines.next())?;

        let nonce_line = lines.next().ok_or(ParseError::MissingField("nonce"))?;
        let nonce = nonce_line
            .strip_prefix(NONCE_PREFIX)
            .ok_or(ParseError::MissingField("nonce"))?;

        let mut message = Self::new(domain, public_key, statement, nonce)?;

        if let Some(line) = lines.next() {
            let raw = line
                .strip_prefix(ISSUED_AT_PREFIX)
                .ok_or(ParseError::TrailingData)?;
            message.issued_at = Some(parse_issued_at(raw)?);
        }

        if lines.next().is_some() {
            return Err(ParseError::TrailingData);
        }

        Ok(message)
    }
}

impl FromStr for SigninMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

impl fmt::Display for SigninMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl TryFrom<SigninMessageFields> for SigninMessage {
    type Error = ParseError;

    fn try_from(fields: SigninMessageFields) -> Result<Self, Self::Error> {
        let public_key = fields
            .public_key
            .parse::<WalletPublicKey>()
            .map_err(|e| ParseError::invalid("publicKey", e.to_string()))?;

        let mut message = Self::new(fields.domain, public_key, fields.statement, fields.nonce)?;
        if let Some(raw) = fields.issued_at {
            message.issued_at = Some(parse_issued_at(&raw)?);
        }

        Ok(message)
    }
}

impl From<SigninMessage> for SigninMessageFields {
    fn from(message: SigninMessage) -> Self {
        Self {
            public_key: message.public_key.to_base58(),
            issued_at: message.issued_at.as_ref().map(format_issued_at),
            domain: message.domain,
            statement: message.statement,
            nonce: message.nonce,
        }
    }
}

fn expect_blank(line: Option<&str>) -> Result<(), ParseError> {
    match line {
        Some("") => Ok(()),
        Some(_) => Err(ParseError::MalformedLayout("expected blank separator line")),
        None => Err(ParseError::MalformedLayout("message truncated")),
    }
}

fn validate_domain(domain: &str) -> Result<(), ParseError> {
    if domain.is_empty() {
        return Err(ParseError::MissingField("domain"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(ParseError::invalid("domain", "too long"));
    }
    if domain.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ParseError::invalid(
            "domain",
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

fn validate_statement(statement: &str) -> Result<(), ParseError> {
    if statement.len() > MAX_STATEMENT_LEN {
        return Err(ParseError::invalid("statement", "too long"));
    }
    // U+2028 and U+2029 render as line breaks in most wallets
    if statement
        .chars()
        .any(|c| c.is_control() || c == '\u{2028}' || c == '\u{2029}')
    {
        return Err(ParseError::invalid(
            "statement",
            "must not contain line breaks or control characters",
        ));
    }
    Ok(())
}

fn validate_nonce(nonce: &str) -> Result<(), ParseError> {
    if nonce.is_empty() {
        return Err(ParseError::MissingField("nonce"));
    }
    if !(MIN_NONCE_LEN..=MAX_NONCE_LEN).contains(&nonce.len()) {
        return Err(ParseError::invalid(
            "nonce",
            format!("length must be between {MIN_NONCE_LEN} and {MAX_NONCE_LEN}"),
        ));
    }
    if !nonce.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ParseError::invalid("nonce", "must be ASCII alphanumeric"));
    }
    Ok(())
}

fn format_issued_at(issued_at: &DateTime<Utc>) -> String {
    issued_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_issued_at(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| ParseError::invalid("issuedAt", e.to_string()))?
        .with_timezone(&Utc);

    // Only the exact text serialize would produce is accepted
    if format_issued_at(&parsed) != raw {
        return Err(ParseError::invalid(
            "issuedAt",
            "must be RFC 3339 UTC with millisecond precision",
        ));
    }

    Ok(parsed)
}
