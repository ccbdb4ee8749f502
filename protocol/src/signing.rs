//! Shared-secret keyed digest over the canonical packet text.
//!
//! The tag is `hex(SHA-256(payload ++ secret))`. It is tamper-evident only to
//! holders of the secret and is not an asymmetric signature.

use crate::errors::ParseError;
use crate::packet::{self, KEY_VIN};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;

/// Lower-case hex SHA-256 of `payload` followed by `secret`.
pub fn compute_tag(payload: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Caller-visible outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Valid,
    Invalid,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Valid => "VALID",
            Verdict::Invalid => "INVALID",
        }
    }

    pub fn is_valid(self) -> bool {
        self == Verdict::Valid
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(Verdict::Valid),
            "INVALID" => Ok(Verdict::Invalid),
            other => Err(ParseError::InvalidValue {
                field: "AUTH_RESULT",
                value: other.to_string(),
            }),
        }
    }
}

/// Why a packet was rejected. For logs only; callers branch on [`Verdict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Malformed,
    MissingIdentity,
    IdentityMismatch,
    DigestMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Malformed => "malformed packet",
            RejectReason::MissingIdentity => "missing identity",
            RejectReason::IdentityMismatch => "identity mismatch",
            RejectReason::DigestMismatch => "digest mismatch",
        };
        f.write_str(s)
    }
}

impl From<Result<(), RejectReason>> for Verdict {
    fn from(result: Result<(), RejectReason>) -> Self {
        match result {
            Ok(()) => Verdict::Valid,
            Err(_) => Verdict::Invalid,
        }
    }
}

/// Checks signed packets against one expected identity and shared secret.
/// Stateless across calls.
#[derive(Debug, Clone)]
pub struct Verifier {
    expected_identity: String,
    secret: String,
}

impl Verifier {
    pub fn new(expected_identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            expected_identity: expected_identity.into(),
            secret: secret.into(),
        }
    }

    /// A verifier whose shared secret is the identity itself.
    pub fn for_identity(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        Self::new(identity.clone(), identity)
    }

    pub fn expected_identity(&self) -> &str {
        &self.expected_identity
    }

    /// Full check with the rejection reason. The identity check runs before,
    /// and short-circuits, the digest comparison.
    pub fn check(&self, raw: &str) -> Result<(), RejectReason> {
        let (payload, tag) = packet::split_signature(raw).ok_or(RejectReason::Malformed)?;

        let identity = packet::field(payload, KEY_VIN)
            .filter(|vin| !vin.is_empty())
            .ok_or(RejectReason::MissingIdentity)?;
        if identity.as_bytes() != self.expected_identity.as_bytes() {
            return Err(RejectReason::IdentityMismatch);
        }

        let expected = compute_tag(payload, &self.secret);
        if bool::from(expected.as_bytes().ct_eq(tag.as_bytes())) {
            Ok(())
        } else {
            Err(RejectReason::DigestMismatch)
        }
    }

    pub fn verify(&self, raw: &str) -> Verdict {
        self.check(raw).into()
    }
}
