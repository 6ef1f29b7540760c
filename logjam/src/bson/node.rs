use crate::bson::path::split_path;
use crate::bson::BsonType;
use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use itertools::Either;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A document node.
///
/// `Bson` is a recursive tree value. Documents own their children by name
/// (iterated in key order), arrays own theirs by position, and every other
/// variant carries one natively typed scalar. A node never holds a scalar and
/// children at the same time: assigning one replaces the other.
///
/// A freshly created node is an empty document. Empty documents and arrays
/// do not [exist](Bson::exists); every scalar, including [Bson::Null], does.
///
/// # Examples
///
/// ```rust,ignore
/// use logjam::bson::Bson;
///
/// let mut user = Bson::default();
/// user.nav_mut("name/first").value("Jason");
/// user.nav_mut("age").value(33);
///
/// assert_eq!(user.nav("name/first")?.as_string(), "Jason");
/// assert_eq!(user.as_string(), r#"{"age":33,"name":{"first":"Jason"}}"#);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Bson {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    /// Milliseconds since the unix epoch.
    Timestamp(i64),
    Double(f64),
    String(String),
    Document(BTreeMap<String, Bson>),
    Array(Vec<Bson>),
}

impl Default for Bson {
    fn default() -> Self {
        Bson::Document(BTreeMap::new())
    }
}

impl Bson {
    /// A timestamp node holding the current time.
    pub fn now() -> Bson {
        Bson::Timestamp(chrono::Utc::now().timestamp_millis())
    }

    pub fn new_array() -> Bson {
        Bson::Array(Vec::new())
    }

    pub fn bson_type(&self) -> BsonType {
        match self {
            Bson::Null => BsonType::Null,
            Bson::Boolean(_) => BsonType::Boolean,
            Bson::Int32(_) => BsonType::Int32,
            Bson::Int64(_) => BsonType::Int64,
            Bson::Timestamp(_) => BsonType::Timestamp,
            Bson::Double(_) => BsonType::Double,
            Bson::String(_) => BsonType::String,
            Bson::Document(_) => BsonType::Document,
            Bson::Array(_) => BsonType::Array,
        }
    }

    /// True for scalars (null included) and for containers with at least
    /// one child.
    pub fn exists(&self) -> bool {
        match self {
            Bson::Document(children) => !children.is_empty(),
            Bson::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        self.bson_type().is_nested()
    }

    #[inline]
    pub fn is_quotable(&self) -> bool {
        self.bson_type().is_quotable()
    }

    /// Replaces the content of this node with `value`.
    pub fn value<V: Into<Bson>>(&mut self, value: V) -> &mut Self {
        *self = value.into();
        self
    }

    /// Replaces the content of this node with a value decoded from wire
    /// bytes laid out for `bson_type`. The node is untouched when decoding
    /// fails.
    pub fn set_value(&mut self, bson_type: BsonType, bytes: &[u8]) -> LogjamResult<&mut Self> {
        let decoded = crate::bson::codec::decode_value(bson_type, bytes)?;
        *self = decoded;
        Ok(self)
    }

    /// Marks the node as present without a value.
    pub fn nullify(&mut self) -> &mut Self {
        *self = Bson::Null;
        self
    }

    /// Resets the node to an empty document.
    pub fn destroy(&mut self) -> &mut Self {
        *self = Bson::default();
        self
    }

    /// Looks up a direct child without creating it.
    ///
    /// Array children are addressed by their decimal position.
    pub fn get(&self, name: &str) -> Option<&Bson> {
        match self {
            Bson::Document(children) => children.get(name),
            Bson::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Returns the named child or a [ErrorKind::DocumentError] when it is
    /// absent.
    pub fn child(&self, name: &str) -> LogjamResult<&Bson> {
        self.get(name).ok_or_else(|| {
            log::error!("Unable to find child [{}].", name);
            LogjamError::new(
                &format!("Unable to find child [{}].", name),
                ErrorKind::DocumentError,
            )
        })
    }

    /// Returns the named child, creating an empty one when absent.
    ///
    /// A scalar node turns into an empty document first. An array accepts
    /// decimal positions and pads any gap with empty documents; any other
    /// name turns the array into a document keyed by position.
    pub fn child_mut(&mut self, name: &str) -> &mut Bson {
        match (self, name.parse::<usize>()) {
            (Bson::Document(children), _) => children.entry(name.to_string()).or_default(),
            (Bson::Array(items), Ok(index)) => {
                if items.len() <= index {
                    items.resize_with(index + 1, Bson::default);
                }
                &mut items[index]
            }
            (other, _) => {
                other.promote_to_document();
                other.child_mut(name)
            }
        }
    }

    /// Installs `node` under `name`, dropping whatever was there before, and
    /// returns the installed child.
    pub fn set_child(&mut self, name: &str, node: Bson) -> &mut Bson {
        let slot = self.child_mut(name);
        *slot = node;
        slot
    }

    /// Detaches and returns the named child.
    pub fn remove_child(&mut self, name: &str) -> Option<Bson> {
        match self {
            Bson::Document(children) => children.remove(name),
            Bson::Array(items) => match name.parse::<usize>() {
                Ok(index) if index < items.len() => Some(items.remove(index)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Appends `node` as the next positional child.
    ///
    /// Documents name the new child after their current child count;
    /// scalars become arrays first.
    pub fn push_child(&mut self, node: Bson) -> &mut Bson {
        match self {
            Bson::Array(items) => {
                items.push(node);
                let last = items.len() - 1;
                &mut items[last]
            }
            Bson::Document(children) => {
                let mut position = children.len();
                while children.contains_key(&position.to_string()) {
                    position += 1;
                }
                children.entry(position.to_string()).or_insert(node)
            }
            other => {
                *other = Bson::new_array();
                other.push_child(node)
            }
        }
    }

    /// Names of the children that [exist](Bson::exists).
    pub fn children(&self) -> Vec<String> {
        self.entries()
            .filter(|(_, child)| child.exists())
            .map(|(name, _)| name.into_owned())
            .collect()
    }

    /// Iterates `(name, child)` pairs in wire order. Scalars have none.
    pub fn entries(&self) -> impl Iterator<Item = (Cow<'_, str>, &Bson)> {
        match self {
            Bson::Document(children) => {
                Either::Left(children.iter().map(|(k, v)| (Cow::Borrowed(k.as_str()), v)))
            }
            Bson::Array(items) => Either::Right(Either::Left(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (Cow::Owned(i.to_string()), v)),
            )),
            _ => Either::Right(Either::Right(std::iter::empty())),
        }
    }

    /// Follows a `/` separated path without creating anything.
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut node = self;
        for segment in split_path(path) {
            node = node.get(&segment)?;
        }
        Some(node)
    }

    /// Follows a `/` separated path, failing with
    /// [ErrorKind::DocumentError] on the first missing segment.
    pub fn nav(&self, path: &str) -> LogjamResult<&Bson> {
        let mut node = self;
        for segment in split_path(path) {
            node = node.child(&segment)?;
        }
        Ok(node)
    }

    /// Follows a `/` separated path, creating empty documents for missing
    /// segments.
    pub fn nav_mut(&mut self, path: &str) -> &mut Bson {
        let mut node = self;
        for segment in split_path(path) {
            node = node.child_mut(&segment);
        }
        node
    }

    fn promote_to_document(&mut self) {
        let children = match std::mem::take(self) {
            Bson::Document(children) => children,
            Bson::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, child)| (i.to_string(), child))
                .collect(),
            _ => BTreeMap::new(),
        };
        *self = Bson::Document(children);
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Bson::String(s) => leading_integer(s) as i32,
            Bson::Int32(v) => *v,
            Bson::Double(d) => *d as i32,
            Bson::Int64(v) | Bson::Timestamp(v) => *v as i32,
            Bson::Boolean(b) => *b as i32,
            _ => 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Bson::String(s) => leading_integer(s),
            Bson::Int32(v) => *v as i64,
            Bson::Double(d) => *d as i64,
            Bson::Int64(v) | Bson::Timestamp(v) => *v,
            Bson::Boolean(b) => *b as i64,
            _ => 0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.as_i64() as u64
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Bson::String(s) => leading_float(s),
            Bson::Int32(v) => *v as f64,
            Bson::Double(d) => *d,
            Bson::Int64(v) | Bson::Timestamp(v) => *v as f64,
            Bson::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Truthiness of the node.
    ///
    /// Empty strings and `"0"` are false. Every other string is true,
    /// `"false"` included: strings other than `"1"` and `"true"` (any case)
    /// are judged on their non-zero length prefix. Doubles are truncated
    /// before the zero test. Null and containers are false.
    pub fn as_bool(&self) -> bool {
        match self {
            Bson::String(s) => match s.as_str() {
                "" | "0" => false,
                "1" => true,
                s if s.eq_ignore_ascii_case("true") => true,
                // length prefix of a non-empty string is never zero
                _ => true,
            },
            Bson::Int32(v) => *v != 0,
            Bson::Double(d) => (*d as i64) != 0,
            Bson::Int64(v) | Bson::Timestamp(v) => *v != 0,
            Bson::Boolean(b) => *b,
            _ => false,
        }
    }
}

/// `atol`-style parse: optional leading whitespace and sign, then as many
/// digits as present. Anything unparsable yields 0.
fn leading_integer(s: &str) -> i64 {
    let trimmed = s.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(|b| b.is_ascii_digit()) {
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as i64);
    }
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

/// `atof`-style parse of the longest numeric prefix.
fn leading_float(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let bytes = trimmed.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || (end == digits_start + 1 && bytes[digits_start] == b'.') {
        return 0.0;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-') | Some(b'+')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    trimmed[..end].parse::<f64>().unwrap_or(0.0)
}

impl From<&str> for Bson {
    fn from(value: &str) -> Self {
        Bson::String(value.to_string())
    }
}

impl From<String> for Bson {
    fn from(value: String) -> Self {
        Bson::String(value)
    }
}

impl From<&String> for Bson {
    fn from(value: &String) -> Self {
        Bson::String(value.clone())
    }
}

impl From<i32> for Bson {
    fn from(value: i32) -> Self {
        Bson::Int32(value)
    }
}

impl From<i64> for Bson {
    fn from(value: i64) -> Self {
        Bson::Int64(value)
    }
}

impl From<u64> for Bson {
    fn from(value: u64) -> Self {
        Bson::Int64(value as i64)
    }
}

impl From<f64> for Bson {
    fn from(value: f64) -> Self {
        Bson::Double(value)
    }
}

impl From<bool> for Bson {
    fn from(value: bool) -> Self {
        Bson::Boolean(value)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(values: Vec<T>) -> Self {
        Bson::Array(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Bson>> for Bson {
    fn from(children: BTreeMap<String, Bson>) -> Self {
        Bson::Document(children)
    }
}

/// Builds a document node from `name => value` pairs.
///
/// ```rust,ignore
/// let user = doc! {
///     "name" => "Jason",
///     "tags" => vec!["a", "b"],
///     "address" => doc! { "city" => "Seattle" },
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::bson::Bson::default()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::bson::Bson::default();
        $(
            document.set_child($key, $crate::bson::Bson::from($value));
        )+
        document
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_empty_document() {
        let node = Bson::default();
        assert_eq!(node.bson_type(), BsonType::Document);
        assert!(!node.exists());
        assert!(node.is_nested());
    }

    #[test]
    fn null_exists_but_empty_containers_do_not() {
        let mut node = Bson::default();
        node.nullify();
        assert_eq!(node, Bson::Null);
        assert!(node.exists());
        assert!(!Bson::new_array().exists());
        assert!(Bson::from(0).exists());
        assert!(Bson::from("").exists());
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut node = doc! { "a" => 1, "b" => "x" };
        node.destroy();
        let once = node.clone();
        node.destroy();
        assert_eq!(node, once);
        assert_eq!(node, Bson::default());
    }

    #[test]
    fn value_replaces_children() {
        let mut node = doc! { "a" => 1 };
        node.value("scalar");
        assert_eq!(node, Bson::String("scalar".to_string()));
        assert!(node.children().is_empty());
    }

    #[test]
    fn child_replacement_keeps_one_child() {
        let mut node = Bson::default();
        node.set_child("x", doc! { "a" => 1 });
        node.set_child("x", Bson::from("b"));
        assert_eq!(node.children(), vec!["x".to_string()]);
        assert_eq!(node.child("x").unwrap(), &Bson::from("b"));
    }

    #[test]
    fn const_child_missing_is_document_error() {
        let node = doc! { "a" => 1 };
        let err = node.child("b").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DocumentError);
        assert_eq!(err.message(), "Unable to find child [b].");
    }

    #[test]
    fn child_mut_creates_empty_child() {
        let mut node = Bson::default();
        let child = node.child_mut("fresh");
        assert_eq!(child, &mut Bson::default());
        assert!(node.get("fresh").is_some());
        // an empty child does not exist, so it is not listed
        assert!(node.children().is_empty());
    }

    #[test]
    fn child_mut_on_scalar_becomes_document() {
        let mut node = Bson::from(5);
        node.child_mut("a").value(1);
        assert_eq!(node, doc! { "a" => 1 });
    }

    #[test]
    fn nav_auto_creates_path() {
        let mut node = Bson::default();
        node.nav_mut("a/b/c").value("v");
        let c = node
            .child("a")
            .and_then(|a| a.child("b"))
            .and_then(|b| b.child("c"))
            .unwrap();
        assert_eq!(c.as_string(), "v");
        assert_eq!(node.nav("a/b/c").unwrap().as_string(), "v");
    }

    #[test]
    fn const_nav_fails_on_missing_segment() {
        let mut node = Bson::default();
        node.nav_mut("a/x").value(1);
        let err = node.nav("a/b/c").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DocumentError);
        assert!(node.get_path("a/b/c").is_none());
        assert!(node.get_path("a/x").is_some());
    }

    #[test]
    fn nav_honours_escaped_slash() {
        let mut node = Bson::default();
        node.nav_mut("index/tree/a\\/b").value(1);
        let tree = node.nav("index/tree").unwrap();
        assert_eq!(tree.children(), vec!["a/b".to_string()]);
    }

    #[test]
    fn array_children_by_position() {
        let mut node = Bson::from(vec!["a", "b"]);
        assert_eq!(node.child("1").unwrap(), &Bson::from("b"));
        assert!(node.get("2").is_none());

        node.child_mut("3").value("d");
        match &node {
            Bson::Array(items) => {
                assert_eq!(items.len(), 4);
                assert!(!items[2].exists());
            }
            other => panic!("expected array, got {:?}", other),
        }
        assert_eq!(node.children(), vec!["0", "1", "3"]);
    }

    #[test]
    fn array_named_child_turns_into_document() {
        let mut node = Bson::from(vec!["a"]);
        node.child_mut("name").value("x");
        assert_eq!(node, doc! { "0" => "a", "name" => "x" });
    }

    #[test]
    fn push_and_remove_children() {
        let mut node = Bson::new_array();
        node.push_child(Bson::from("a"));
        node.push_child(Bson::from("b"));
        assert_eq!(node.remove_child("0"), Some(Bson::from("a")));
        assert_eq!(node, Bson::from(vec!["b"]));

        let mut document = Bson::default();
        document.push_child(Bson::from(1));
        document.push_child(Bson::from(2));
        assert_eq!(document, doc! { "0" => 1, "1" => 2 });
        assert_eq!(document.remove_child("missing"), None);
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(Bson::from("42abc").as_i32(), 42);
        assert_eq!(Bson::from("  -17").as_i64(), -17);
        assert_eq!(Bson::from("abc").as_i64(), 0);
        assert_eq!(Bson::from(3.9).as_i32(), 3);
        assert_eq!(Bson::from(7i64).as_i32(), 7);
        assert_eq!(Bson::from(true).as_i64(), 1);
        assert_eq!(Bson::Null.as_i64(), 0);
        assert_eq!(doc! { "a" => 1 }.as_i64(), 0);
        assert_eq!(Bson::Timestamp(99).as_u64(), 99);
    }

    #[test]
    fn float_conversions() {
        assert_eq!(Bson::from("3.25xyz").as_f64(), 3.25);
        assert_eq!(Bson::from("1e3").as_f64(), 1000.0);
        assert_eq!(Bson::from("2e").as_f64(), 2.0);
        assert_eq!(Bson::from(".").as_f64(), 0.0);
        assert_eq!(Bson::from("-.5").as_f64(), -0.5);
        assert_eq!(Bson::from(4).as_f64(), 4.0);
        assert_eq!(Bson::from(false).as_f64(), 0.0);
    }

    #[test]
    fn boolean_conversions() {
        assert!(!Bson::from("").as_bool());
        assert!(!Bson::from("0").as_bool());
        assert!(Bson::from("1").as_bool());
        assert!(Bson::from("TRUE").as_bool());
        assert!(Bson::from("true").as_bool());
        // any other non-empty string is truthy, "false" included
        assert!(Bson::from("false").as_bool());
        assert!(Bson::from("no").as_bool());

        assert!(!Bson::from(0.9).as_bool());
        assert!(Bson::from(1.5).as_bool());
        assert!(Bson::from(-3).as_bool());
        assert!(!Bson::from(0i64).as_bool());
        assert!(Bson::from(true).as_bool());
        assert!(!Bson::Null.as_bool());
        assert!(!doc! { "a" => 1 }.as_bool());
    }

    #[test]
    fn now_is_a_timestamp() {
        match Bson::now() {
            Bson::Timestamp(millis) => assert!(millis > 0),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }
}
