//! Scalar attribute types and scan operators for KeelDB indexes.

use serde::{Deserialize, Serialize};

/// Type of the indexed attribute.
///
/// The attribute type is stored in the index meta page. Only `Integer`
/// is functional in the current index core; `Double` and `String` are
/// declared so the on-disk meta encoding is stable, and are rejected
/// with a clean error when an index over them is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttrType {
    /// 4-byte signed integer.
    Integer = 0,
    /// 8-byte IEEE-754 double (reserved).
    Double = 1,
    /// Fixed-length character string (reserved).
    String = 2,
}

impl AttrType {
    /// Returns the byte size of a key of this type.
    pub fn key_size(&self) -> usize {
        match self {
            AttrType::Integer => 4,
            AttrType::Double => 8,
            AttrType::String => 10,
        }
    }

    /// Returns true if this type is implemented by the index core.
    pub fn is_supported(&self) -> bool {
        matches!(self, AttrType::Integer)
    }

    /// Decodes an AttrType from its meta-page byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AttrType::Integer),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Integer => "INTEGER",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operator for a range-scan bound.
///
/// A scan's low bound must use `GT` or `GTE`; its high bound must use
/// `LT` or `LTE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operator {
    /// Strictly greater than.
    Gt = 0,
    /// Greater than or equal.
    Gte = 1,
    /// Strictly less than.
    Lt = 2,
    /// Less than or equal.
    Lte = 3,
}

impl Operator {
    /// Returns true if this operator is valid for a scan's low bound.
    pub fn is_low_bound(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Gte)
    }

    /// Returns true if this operator is valid for a scan's high bound.
    pub fn is_high_bound(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Lte)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
        };
        write!(f, "{}", name)
    }
}
