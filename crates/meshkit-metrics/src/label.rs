use std::fmt;

/// Sentinel substituted for missing label values.
///
/// Used when a `with()` call passes an odd number of strings (the trailing
/// key gets this value) and when a template name references a label that was
/// never attached to the handle.
pub const SENTINEL: &str = "unknown";

/// An ordered, immutable sequence of label key/value pairs.
///
/// Every metric handle carries one of these. `with()` produces a *new*
/// sequence with the additional pairs appended; the original is never
/// mutated, so handles can be freely shared across threads and derived
/// handles never interfere with their parent.
///
/// # Semantics
///
/// - An odd number of strings is a programmer error; rather than panic, the
///   trailing key is paired with [`SENTINEL`].
/// - Duplicate keys within a single `with()` call: the last value wins.
/// - Across `with()` calls labels accumulate; there is no removal.
///
/// # Example
///
/// ```rust
/// use meshkit_metrics::LabelValues;
///
/// let base = LabelValues::default();
/// let derived = base.with(&["method", "get", "outcome", "success"]);
/// assert!(base.is_empty());
/// assert_eq!(derived.get("method"), Some("get"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LabelValues {
    pairs: Vec<(String, String)>,
}

impl LabelValues {
    /// Returns a new sequence with `labelvalues` (alternating key, value)
    /// appended. Odd counts are padded with [`SENTINEL`]; duplicate keys
    /// within this call collapse to the last occurrence.
    pub fn with(&self, labelvalues: &[&str]) -> Self {
        let mut pairs = self.pairs.clone();
        let mut incoming: Vec<(String, String)> = Vec::with_capacity(labelvalues.len() / 2 + 1);
        let mut chunks = labelvalues.chunks(2);
        for chunk in &mut chunks {
            let key = chunk[0].to_string();
            let value = chunk.get(1).copied().unwrap_or(SENTINEL).to_string();
            // Last write wins within a single with() call.
            if let Some(existing) = incoming.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                incoming.push((key, value));
            }
        }
        pairs.extend(incoming);
        Self { pairs }
    }

    /// The label pairs, in attachment order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// The value for `key`, searching from the most recently attached pair
    /// so that re-attached keys shadow earlier ones.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The flat key/value sequence, for comparing against an expected list.
    pub fn flattened(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.pairs.len() * 2);
        for (k, v) in &self.pairs {
            out.push(k.as_str());
            out.push(v.as_str());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl fmt::Display for LabelValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.pairs {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

/// Expands `{key}` placeholders in `name` with the corresponding label value.
///
/// Placeholders whose key has no attached label are replaced with
/// [`SENTINEL`]. This lets dimension-naive backends (flat-namespace sinks)
/// receive one series per label combination without user code branching on
/// the backend:
///
/// ```rust
/// use meshkit_metrics::{expand_name, LabelValues};
///
/// let labels = LabelValues::default().with(&["method", "get"]);
/// assert_eq!(expand_name("requests.{method}", &labels), "requests.get");
/// assert_eq!(expand_name("requests.{missing}", &labels), "requests.unknown");
/// ```
pub fn expand_name(name: &str, labels: &LabelValues) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close) => {
                let key = &rest[open + 1..open + close];
                out.push_str(labels.get(key).unwrap_or(SENTINEL));
                rest = &rest[open + close + 1..];
            }
            None => {
                // Unterminated placeholder: emit the remainder verbatim.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
