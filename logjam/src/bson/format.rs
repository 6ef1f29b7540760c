use crate::bson::Bson;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Write};

impl Bson {
    /// Renders the node as text.
    ///
    /// Strings come out raw at the top level and quoted inside containers.
    /// Booleans render as `1`/`0`, doubles use six significant digits.
    /// Documents render as `{"key":value,...}` and arrays as `[value,...]`,
    /// skipping children that do not exist.
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        write_compact(self, &mut out);
        out
    }

    /// Multi-line rendering, two spaces of indent per `level`.
    pub fn as_pretty_string(&self, level: usize) -> String {
        let mut out = String::new();
        write_pretty(self, level, &mut out);
        out
    }

    /// Rendering that exposes the wire sizes and type names of every value.
    pub fn as_debug_string(&self) -> String {
        let mut out = String::new();
        write_debug(self, &mut out);
        out
    }

    /// The rendered values of all children, or of the node itself when it
    /// is a scalar.
    pub fn as_set(&self) -> BTreeSet<String> {
        self.as_list().into_iter().collect()
    }

    /// Like [Bson::as_set] but keeps child order and duplicates.
    pub fn as_list(&self) -> Vec<String> {
        if self.is_nested() {
            self.entries().map(|(_, child)| child.as_string()).collect()
        } else {
            vec![self.as_string()]
        }
    }
}

impl Display for Bson {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// `%g` with the default precision.
pub(crate) fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.5e}", value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => (scientific.clone(), 0),
    };

    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            trim_fraction(&mantissa),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (5 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value))
    }
}

fn trim_fraction(number: &str) -> String {
    if number.contains('.') {
        number
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        number.to_string()
    }
}

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '\\' | '"' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n\\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn write_scalar(node: &Bson, out: &mut String) {
    match node {
        Bson::Null => out.push_str("null"),
        Bson::Boolean(b) => out.push(if *b { '1' } else { '0' }),
        Bson::Int32(v) => {
            let _ = write!(out, "{}", v);
        }
        Bson::Int64(v) | Bson::Timestamp(v) => {
            let _ = write!(out, "{}", v);
        }
        Bson::Double(d) => out.push_str(&format_double(*d)),
        Bson::String(s) => out.push_str(s),
        Bson::Document(_) | Bson::Array(_) => {}
    }
}

fn write_quoted<F: FnOnce(&mut String)>(node: &Bson, out: &mut String, body: F) {
    let quoted = node.is_quotable();
    if quoted {
        out.push('"');
    }
    body(out);
    if quoted {
        out.push('"');
    }
}

fn write_compact(node: &Bson, out: &mut String) {
    let (open, close, keyed) = match node {
        Bson::Document(_) => ('{', '}', true),
        Bson::Array(_) => ('[', ']', false),
        scalar => return write_scalar(scalar, out),
    };

    out.push(open);
    let mut first = true;
    for (name, child) in node.entries().filter(|(_, child)| child.exists()) {
        if !first {
            out.push(',');
        }
        first = false;
        if keyed {
            let _ = write!(out, "\"{}\":", escape_key(&name));
        }
        write_quoted(child, out, |out| write_compact(child, out));
    }
    out.push(close);
}

fn write_pretty(node: &Bson, level: usize, out: &mut String) {
    let (open, close, empty, keyed) = match node {
        Bson::Document(_) => ("{\n", '}', "{}", true),
        Bson::Array(_) => ("[ \n", ']', "[]", false),
        scalar => return write_scalar(scalar, out),
    };

    let present: Vec<_> = node.entries().filter(|(_, child)| child.exists()).collect();
    if present.is_empty() {
        out.push_str(empty);
        return;
    }

    let indent = "  ".repeat(level);
    out.push_str(open);
    for (i, (name, child)) in present.iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        out.push_str(&indent);
        out.push_str("  ");
        if keyed {
            let _ = write!(out, "\"{}\":", escape_key(name));
        }
        write_quoted(child, out, |out| write_pretty(child, level + 1, out));
    }
    out.push('\n');
    out.push_str(&indent);
    out.push(close);
}

fn write_debug(node: &Bson, out: &mut String) {
    match node {
        Bson::Null => {}
        Bson::String(s) => {
            let _ = write!(out, "(4-{}){}", s.len() + 1, s);
        }
        Bson::Int32(v) => {
            let _ = write!(out, "(4){}", v);
        }
        Bson::Double(d) => {
            let _ = write!(out, "(8){}", format_double(*d));
        }
        Bson::Int64(v) | Bson::Timestamp(v) => {
            let _ = write!(out, "(8){}", v);
        }
        Bson::Boolean(b) => {
            let _ = write!(out, "(1){}", *b as u8);
        }
        Bson::Document(_) | Bson::Array(_) => {
            if !node.exists() {
                out.push_str("{(4-0)(1-0)}");
                return;
            }
            let _ = write!(out, "{{(4-{})", node.size());
            let mut first = true;
            for (name, child) in node.entries() {
                if !first {
                    out.push(',');
                }
                first = false;
                let _ = write!(
                    out,
                    "(1-{})\"({}){}\":",
                    child.bson_type(),
                    name.len() + 1,
                    escape_key(&name)
                );
                write_quoted(child, out, |out| write_debug(child, out));
            }
            out.push_str("(1-0)}");
        }
    }
}
