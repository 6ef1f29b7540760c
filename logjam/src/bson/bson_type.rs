use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use std::fmt::{Display, Formatter};

/// Wire type tags.
///
/// Every child entry of an encoded document or array starts with one of
/// these bytes. Only the tags that have a [Bson](crate::bson::Bson) variant
/// can be decoded; the remaining ones are recognised so they can be reported
/// precisely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BsonType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    JavaScript = 0x0D,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    MinKey = 0xFF,
    MaxKey = 0x7F,
}

impl BsonType {
    #[inline]
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Maps a wire tag byte back to its type.
    pub fn from_tag(tag: u8) -> LogjamResult<BsonType> {
        match tag {
            0x01 => Ok(BsonType::Double),
            0x02 => Ok(BsonType::String),
            0x03 => Ok(BsonType::Document),
            0x04 => Ok(BsonType::Array),
            0x05 => Ok(BsonType::Binary),
            0x08 => Ok(BsonType::Boolean),
            0x09 => Ok(BsonType::DateTime),
            0x0A => Ok(BsonType::Null),
            0x0D => Ok(BsonType::JavaScript),
            0x10 => Ok(BsonType::Int32),
            0x11 => Ok(BsonType::Timestamp),
            0x12 => Ok(BsonType::Int64),
            0xFF => Ok(BsonType::MinKey),
            0x7F => Ok(BsonType::MaxKey),
            _ => {
                log::error!("Unknown type tag 0x{:02x}", tag);
                Err(LogjamError::new(
                    &format!("Unknown type tag 0x{:02x}", tag),
                    ErrorKind::EncodingError,
                ))
            }
        }
    }

    /// Documents and arrays own children.
    #[inline]
    pub fn is_nested(&self) -> bool {
        matches!(self, BsonType::Document | BsonType::Array)
    }

    /// Strings are quoted when rendered inside a container, and index keys
    /// drop their length prefix and terminator.
    #[inline]
    pub fn is_quotable(&self) -> bool {
        matches!(self, BsonType::String)
    }

    /// Whether the node model can hold a value of this type.
    #[inline]
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            BsonType::Binary
                | BsonType::DateTime
                | BsonType::JavaScript
                | BsonType::MinKey
                | BsonType::MaxKey
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BsonType::Double => "double",
            BsonType::String => "string",
            BsonType::Document => "document",
            BsonType::Array => "array",
            BsonType::Binary => "binary",
            BsonType::Boolean => "boolean",
            BsonType::DateTime => "datetime",
            BsonType::Null => "null",
            BsonType::JavaScript => "javascript",
            BsonType::Int32 => "int32",
            BsonType::Timestamp => "timestamp",
            BsonType::Int64 => "int64",
            BsonType::MinKey => "minkey",
            BsonType::MaxKey => "maxkey",
        }
    }
}

impl Display for BsonType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
