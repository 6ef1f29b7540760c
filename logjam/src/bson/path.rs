use smallvec::SmallVec;

pub(crate) type PathSegments = SmallVec<[String; 4]>;

/// Splits a `/` separated path into child names.
///
/// A `\` makes the following character literal, so `a\/b` names a single
/// child `a/b`. Empty segments are dropped, which makes `a//b`, `/a/b` and
/// `a/b/` all equivalent to `a/b`. A trailing lone `\` is kept verbatim.
pub fn split_path(path: &str) -> PathSegments {
    let mut parts = PathSegments::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Escapes every `/` in a child name so it survives [split_path] as one
/// segment.
pub fn escape_path(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '/' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
