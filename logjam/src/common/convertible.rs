use crate::bson::Bson;
use crate::errors::{ErrorKind, LogjamError, LogjamResult};

/// Conversion between Rust values and document nodes.
///
/// Decoding is strict: a node of the wrong type is an error rather than a
/// lossy cast. Use the `as_*` accessors on [Bson] for lenient conversion.
pub trait Convertible {
    type Output;

    fn to_bson(&self) -> LogjamResult<Bson>;
    fn from_bson(value: &Bson) -> LogjamResult<Self::Output>;
}

fn mismatch(value: &Bson, expected: &str) -> LogjamError {
    log::error!("Value {} is not {}", value.as_debug_string(), expected);
    LogjamError::new(
        &format!("Value of type {} is not {}", value.bson_type(), expected),
        ErrorKind::DocumentError,
    )
}

impl Convertible for Bson {
    type Output = Bson;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(self.clone())
    }

    fn from_bson(value: &Bson) -> LogjamResult<Bson> {
        Ok(value.clone())
    }
}

impl Convertible for String {
    type Output = String;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(Bson::String(self.clone()))
    }

    fn from_bson(value: &Bson) -> LogjamResult<String> {
        match value {
            Bson::String(s) => Ok(s.clone()),
            _ => Err(mismatch(value, "a string")),
        }
    }
}

impl Convertible for i32 {
    type Output = i32;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(Bson::Int32(*self))
    }

    fn from_bson(value: &Bson) -> LogjamResult<i32> {
        match value {
            Bson::Int32(i) => Ok(*i),
            _ => Err(mismatch(value, "an i32")),
        }
    }
}

impl Convertible for i64 {
    type Output = i64;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(Bson::Int64(*self))
    }

    fn from_bson(value: &Bson) -> LogjamResult<i64> {
        match value {
            Bson::Int64(i) | Bson::Timestamp(i) => Ok(*i),
            Bson::Int32(i) => Ok(*i as i64),
            _ => Err(mismatch(value, "an i64")),
        }
    }
}

impl Convertible for f64 {
    type Output = f64;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(Bson::Double(*self))
    }

    fn from_bson(value: &Bson) -> LogjamResult<f64> {
        match value {
            Bson::Double(d) => Ok(*d),
            _ => Err(mismatch(value, "an f64")),
        }
    }
}

impl Convertible for bool {
    type Output = bool;

    fn to_bson(&self) -> LogjamResult<Bson> {
        Ok(Bson::Boolean(*self))
    }

    fn from_bson(value: &Bson) -> LogjamResult<bool> {
        match value {
            Bson::Boolean(b) => Ok(*b),
            _ => Err(mismatch(value, "a bool")),
        }
    }
}
