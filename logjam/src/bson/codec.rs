use crate::bson::{Bson, BsonType};
use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

// Wire layout, all integers in native byte order:
//   string    i32 length (payload + NUL), payload, NUL
//   container i32 total size, { tag, name, NUL, value }*, NUL
//   scalars   raw value, null has no payload

impl Bson {
    /// Number of bytes [Bson::to_binary] produces for this node.
    pub fn size(&self) -> usize {
        match self {
            Bson::Null => 0,
            Bson::Boolean(_) => 1,
            Bson::Int32(_) => 4,
            Bson::Int64(_) | Bson::Timestamp(_) | Bson::Double(_) => 8,
            Bson::String(s) => 4 + s.len() + 1,
            Bson::Document(_) | Bson::Array(_) => {
                5 + self
                    .entries()
                    .map(|(name, child)| 1 + name.len() + 1 + child.size())
                    .sum::<usize>()
            }
        }
    }

    /// Encodes the node. Containers produce a complete document; scalars
    /// produce their bare value bytes.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.size());
        write_node(self, &mut buffer);
        buffer
    }

    /// Encodes the node into `buffer` and returns the number of bytes
    /// written.
    pub fn copy_to_bson(&self, buffer: &mut [u8]) -> LogjamResult<usize> {
        let bytes = self.to_binary();
        if buffer.len() < bytes.len() {
            log::error!(
                "Buffer of {} bytes cannot hold {} encoded bytes",
                buffer.len(),
                bytes.len()
            );
            return Err(LogjamError::new(
                &format!(
                    "Buffer of {} bytes cannot hold {} encoded bytes",
                    buffer.len(),
                    bytes.len()
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        buffer[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Decodes a complete document. Trailing bytes past the declared size
    /// are ignored.
    pub fn from_binary(bytes: &[u8]) -> LogjamResult<Bson> {
        decode_value(BsonType::Document, bytes)
    }

    /// Writes the encoded document to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> LogjamResult<()> {
        std::fs::write(path.as_ref(), self.to_binary()).map_err(|e| {
            log::error!("Unable to save document to {:?}: {}", path.as_ref(), e);
            LogjamError::from(e)
        })
    }

    /// Reads a document written by [Bson::save].
    pub fn load<P: AsRef<Path>>(path: P) -> LogjamResult<Bson> {
        let mut file = std::fs::File::open(path.as_ref()).map_err(|e| {
            log::error!("Unable to open document file {:?}: {}", path.as_ref(), e);
            LogjamError::from(e)
        })?;

        let mut prefix = [0u8; 4];
        file.read_exact(&mut prefix)?;
        let total = i32::from_ne_bytes(prefix);
        if total < 5 {
            log::error!("Document file {:?} declares size {}", path.as_ref(), total);
            return Err(LogjamError::new(
                &format!("Invalid document size {}", total),
                ErrorKind::EncodingError,
            ));
        }

        let mut bytes = vec![0u8; total as usize];
        bytes[..4].copy_from_slice(&prefix);
        file.read_exact(&mut bytes[4..])?;
        Bson::from_binary(&bytes)
    }
}

/// Decodes one value of `bson_type` from the start of `bytes`.
pub(crate) fn decode_value(bson_type: BsonType, bytes: &[u8]) -> LogjamResult<Bson> {
    let mut reader = Reader::new(bytes);
    read_node(&mut reader, bson_type)
}

fn write_node(node: &Bson, buffer: &mut Vec<u8>) {
    match node {
        Bson::Null => {}
        Bson::Boolean(b) => buffer.push(*b as u8),
        Bson::Int32(v) => buffer.extend_from_slice(&v.to_ne_bytes()),
        Bson::Int64(v) | Bson::Timestamp(v) => buffer.extend_from_slice(&v.to_ne_bytes()),
        Bson::Double(d) => buffer.extend_from_slice(&d.to_ne_bytes()),
        Bson::String(s) => {
            buffer.extend_from_slice(&((s.len() + 1) as i32).to_ne_bytes());
            buffer.extend_from_slice(s.as_bytes());
            buffer.push(0);
        }
        Bson::Document(_) | Bson::Array(_) => {
            buffer.extend_from_slice(&(node.size() as i32).to_ne_bytes());
            for (name, child) in node.entries() {
                buffer.push(child.bson_type().tag());
                buffer.extend_from_slice(name.as_bytes());
                buffer.push(0);
                write_node(child, buffer);
            }
            buffer.push(0);
        }
    }
}

fn read_node(reader: &mut Reader<'_>, bson_type: BsonType) -> LogjamResult<Bson> {
    match bson_type {
        BsonType::Double => Ok(Bson::Double(f64::from_ne_bytes(reader.array()?))),
        BsonType::String => {
            let length = i32::from_ne_bytes(reader.array()?);
            if length < 1 {
                return Err(encoding_error(&format!("Invalid string length {}", length)));
            }
            let payload = reader.take(length as usize)?;
            // stops at the first NUL, wherever it is
            let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
            Ok(Bson::String(String::from_utf8(payload[..end].to_vec())?))
        }
        BsonType::Document | BsonType::Array => read_container(reader, bson_type),
        BsonType::Boolean => Ok(Bson::Boolean(reader.byte()? != 0)),
        BsonType::Null => Ok(Bson::Null),
        BsonType::Int32 => Ok(Bson::Int32(i32::from_ne_bytes(reader.array()?))),
        BsonType::Timestamp => Ok(Bson::Timestamp(i64::from_ne_bytes(reader.array()?))),
        BsonType::Int64 => Ok(Bson::Int64(i64::from_ne_bytes(reader.array()?))),
        unsupported => Err(encoding_error(&format!(
            "Unsupported value type {}",
            unsupported
        ))),
    }
}

fn read_container(reader: &mut Reader<'_>, bson_type: BsonType) -> LogjamResult<Bson> {
    let start = reader.position;
    let total = i32::from_ne_bytes(reader.array()?);
    if total < 5 {
        return Err(encoding_error(&format!("Invalid document size {}", total)));
    }
    let terminator = start + total as usize - 1;
    if terminator >= reader.bytes.len() {
        return Err(encoding_error(&format!(
            "Document size {} exceeds the {} available bytes",
            total,
            reader.bytes.len() - start
        )));
    }

    let mut children = BTreeMap::new();
    let mut items = Vec::new();
    while reader.position < terminator {
        let child_type = BsonType::from_tag(reader.byte()?)?;
        let name = reader.cstring()?;
        let child = read_node(reader, child_type)?;
        if bson_type == BsonType::Array {
            items.push(child);
        } else {
            children.insert(name, child);
        }
    }
    if reader.position != terminator {
        return Err(encoding_error(&format!(
            "Children overrun document size {}",
            total
        )));
    }
    reader.position = terminator + 1;

    if bson_type == BsonType::Array {
        Ok(Bson::Array(items))
    } else {
        Ok(Bson::Document(children))
    }
}

fn encoding_error(message: &str) -> LogjamError {
    log::error!("{}", message);
    LogjamError::new(message, ErrorKind::EncodingError)
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, position: 0 }
    }

    fn take(&mut self, count: usize) -> LogjamResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                encoding_error(&format!(
                    "Truncated input: need {} bytes at offset {}, have {}",
                    count,
                    self.position,
                    self.bytes.len().saturating_sub(self.position)
                ))
            })?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> LogjamResult<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn byte(&mut self) -> LogjamResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn cstring(&mut self) -> LogjamResult<String> {
        let rest = &self.bytes[self.position.min(self.bytes.len())..];
        let length = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| encoding_error("Unterminated child name"))?;
        let name = self.take(length)?;
        self.position += 1;
        Ok(std::str::from_utf8(name)?.to_string())
    }
}
