//! Bypass policy records.
//!
//! Only two textual commands are understood, `"in bypass"` and
//! `"out bypass"`. They produce a fixed 16-byte `sadb_x_policy` extension
//! that tells the kernel to let the daemon's own negotiation traffic skip
//! IPsec processing in that direction.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// PF_KEY extension type of a policy record (`SADB_X_EXT_POLICY`).
pub const SADB_X_EXT_POLICY: u16 = 18;

/// Default priority stamped on every bypass policy.
pub const PRIORITY_DEFAULT: u32 = 0x8000_0000;

/// Encoded length of a policy record in bytes.
pub const POLICY_DESCRIPTOR_LEN: usize = 16;

/// Result type for policy construction.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors from the policy builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The command is not one of the accepted bypass commands.
    #[error("invalid policy: {command:?}")]
    InvalidPolicy { command: String },
}

/// Traffic direction a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyDirection {
    Inbound,
    Outbound,
}

impl PolicyDirection {
    /// Kernel encoding (`IPSEC_DIR_INBOUND` / `IPSEC_DIR_OUTBOUND`).
    pub fn code(self) -> u8 {
        match self {
            Self::Inbound => 1,
            Self::Outbound => 2,
        }
    }
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("in"),
            Self::Outbound => f.write_str("out"),
        }
    }
}

/// Policy action. Only bypass is produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyType {
    Bypass,
}

impl PolicyType {
    /// Kernel encoding (`IPSEC_POLICY_BYPASS`).
    pub fn code(self) -> u16 {
        match self {
            Self::Bypass => 4,
        }
    }
}

/// A fixed-layout security policy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyDescriptor {
    pub direction: PolicyDirection,
    pub policy_type: PolicyType,
    pub priority: Option<u32>,
}

impl PolicyDescriptor {
    /// Size of the encoded record; independent of the field values.
    pub fn encoded_len(&self) -> usize {
        POLICY_DESCRIPTOR_LEN
    }

    /// Encodes the record in host byte order, as the PF_KEY socket expects.
    ///
    /// Layout: length in 64-bit units (u16), extension type (u16), policy
    /// type (u16), direction (u8), reserved (u8), id (u32), priority (u32).
    pub fn to_bytes(&self) -> [u8; POLICY_DESCRIPTOR_LEN] {
        let mut out = [0u8; POLICY_DESCRIPTOR_LEN];
        let units = (POLICY_DESCRIPTOR_LEN / 8) as u16;
        out[0..2].copy_from_slice(&units.to_ne_bytes());
        out[2..4].copy_from_slice(&SADB_X_EXT_POLICY.to_ne_bytes());
        out[4..6].copy_from_slice(&self.policy_type.code().to_ne_bytes());
        out[6] = self.direction.code();
        out[12..16].copy_from_slice(&self.priority.unwrap_or(0).to_ne_bytes());
        out
    }
}

impl FromStr for PolicyDescriptor {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        build_bypass_policy(s)
    }
}

/// Builds a bypass policy from `"in bypass"` or `"out bypass"`.
///
/// Matching is exact: no trimming, no case folding.
pub fn build_bypass_policy(command: &str) -> PolicyResult<PolicyDescriptor> {
    let direction = match command {
        "in bypass" => PolicyDirection::Inbound,
        "out bypass" => PolicyDirection::Outbound,
        _ => {
            return Err(PolicyError::InvalidPolicy {
                command: command.to_string(),
            });
        }
    };

    Ok(PolicyDescriptor {
        direction,
        policy_type: PolicyType::Bypass,
        priority: Some(PRIORITY_DEFAULT),
    })
}

/// Encoded size of `policy`, or `-1` when there is none.
pub fn policy_len(policy: Option<&PolicyDescriptor>) -> i32 {
    policy.map_or(-1, |p| p.encoded_len() as i32)
}
