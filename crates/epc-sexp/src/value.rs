use std::fmt;

/// One decoded s-expression value.
///
/// The empty list and the symbol `nil` are both represented as
/// [`Value::Nil`], matching Emacs Lisp reader semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Symbol(String),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Build a symbol value.
    pub fn sym(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// Build a string value.
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    /// Build a list value. An empty vector collapses to `Nil`.
    pub fn list(items: Vec<Value>) -> Self {
        if items.is_empty() {
            Value::Nil
        } else {
            Value::List(items)
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// String content of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Symbol name of a `Symbol` value.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// List elements; `Nil` yields the empty slice.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            Value::Nil => Some(&[]),
            _ => None,
        }
    }

    /// Consume the value into list elements; `Nil` yields an empty vector.
    pub fn into_list(self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            Value::Nil => Some(Vec::new()),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl fmt::Display for Value {
    /// Canonical printed form, readable by the Emacs Lisp reader and by
    /// [`crate::parse`].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Int(n) => write!(f, "{n}"),
            // {:?} keeps a decimal point or exponent, so the text parses
            // back as a float rather than an int.
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Symbol(name) => f.write_str(name),
            Value::String(text) => {
                f.write_str("\"")?;
                for ch in text.chars() {
                    match ch {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        _ => write!(f, "{ch}")?,
                    }
                }
                f.write_str("\"")
            }
            Value::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}
