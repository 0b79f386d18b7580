use crate::error::{Result, SexpError};
use crate::value::Value;

/// Maximum list nesting depth accepted by the parser.
///
/// The parser recurses per nesting level; the cap keeps hostile input from
/// exhausting the stack.
pub const MAX_DEPTH: usize = 128;

/// Parse one complete s-expression from `input`.
///
/// Surrounding whitespace is skipped. Anything other than whitespace after
/// the first complete expression is an error.
pub fn parse(input: &str) -> Result<Value> {
    let mut p = Parser {
        bytes: input.as_bytes(),
        pos: 0,
    };
    p.skip_whitespace();
    if p.at_end() {
        return Err(SexpError::Empty);
    }
    let value = p.parse_value(0)?;
    p.skip_whitespace();
    if !p.at_end() {
        return Err(SexpError::TrailingData { at: p.pos });
    }
    Ok(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(SexpError::TooDeep { max: MAX_DEPTH });
        }
        match self.peek() {
            None => Err(SexpError::Empty),
            Some(b'(') => self.parse_list(depth),
            Some(b')') => Err(SexpError::UnexpectedChar {
                ch: ')',
                at: self.pos,
            }),
            Some(b'"') => self.parse_string(),
            Some(_) => self.parse_atom(),
        }
    }

    fn parse_list(&mut self, depth: usize) -> Result<Value> {
        let open_at = self.pos;
        self.pos += 1; // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(SexpError::UnbalancedList { open_at }),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Value::list(items));
                }
                Some(_) => items.push(self.parse_value(depth + 1)?),
            }
        }
    }

    fn parse_string(&mut self) -> Result<Value> {
        let open_at = self.pos;
        self.pos += 1; // consume opening quote
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(SexpError::UnterminatedString { open_at }),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Value::String(out));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Err(SexpError::UnterminatedString { open_at }),
                        Some(b'n') => {
                            out.push('\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            out.push('\t');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            out.push('\r');
                            self.pos += 1;
                        }
                        // \" and \\ and any other escaped byte: take it
                        // literally, like the Emacs reader.
                        Some(_) => out.push(self.take_char()),
                    }
                }
                Some(_) => out.push(self.take_char()),
            }
        }
    }

    /// Consume and return the UTF-8 character starting at `pos`.
    ///
    /// `bytes` came from a `&str`, so a character boundary is guaranteed.
    fn take_char(&mut self) -> char {
        let rest = &self.bytes[self.pos..];
        let s = std::str::from_utf8(rest).unwrap_or("\u{FFFD}");
        let ch = s.chars().next().unwrap_or('\u{FFFD}');
        self.pos += ch.len_utf8();
        ch
    }

    fn parse_atom(&mut self) -> Result<Value> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || b == b'(' || b == b')' || b == b'"' {
                break;
            }
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or_default();
        Ok(classify_atom(text))
    }
}

fn classify_atom(text: &str) -> Value {
    if text == "nil" {
        return Value::Nil;
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int(n);
    }
    // Only atoms that look numeric become floats; names like "1st-level"
    // or "nan" stay symbols.
    if looks_numeric(text) {
        if let Ok(x) = text.parse::<f64>() {
            return Value::Float(x);
        }
    }
    Value::Symbol(text.to_string())
}

fn looks_numeric(text: &str) -> bool {
    let rest = text.strip_prefix(['+', '-']).unwrap_or(text);
    rest.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_atoms() {
        assert_eq!(parse("nil").unwrap(), Value::Nil);
        assert_eq!(parse("42").unwrap(), Value::Int(42));
        assert_eq!(parse("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(parse("echo").unwrap(), Value::sym("echo"));
        assert_eq!(parse("epc-error").unwrap(), Value::sym("epc-error"));
    }

    #[test]
    fn parses_strings_with_escapes() {
        assert_eq!(parse(r#""hi""#).unwrap(), Value::string("hi"));
        assert_eq!(parse(r#""a \"b\"""#).unwrap(), Value::string("a \"b\""));
        assert_eq!(parse(r#""a\\b""#).unwrap(), Value::string("a\\b"));
        assert_eq!(parse(r#""line\n""#).unwrap(), Value::string("line\n"));
    }

    #[test]
    fn parses_unicode_strings() {
        let s = "日本語能力!!ソﾊﾝｶｸ";
        assert_eq!(parse(&format!("\"{s}\"")).unwrap(), Value::string(s));
    }

    #[test]
    fn parses_lists() {
        assert_eq!(
            parse("(call 1 echo (55))").unwrap(),
            Value::list(vec![
                Value::sym("call"),
                Value::Int(1),
                Value::sym("echo"),
                Value::list(vec![Value::Int(55)]),
            ])
        );
    }

    #[test]
    fn empty_list_is_nil() {
        assert_eq!(parse("()").unwrap(), Value::Nil);
        assert_eq!(parse("( )").unwrap(), Value::Nil);
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        assert_eq!(parse("  (methods 4) \n").unwrap(), parse("(methods 4)").unwrap());
    }

    #[test]
    fn unbalanced_list_is_reported() {
        let err = parse("(((invalid sexp!").unwrap_err();
        assert!(matches!(err, SexpError::UnbalancedList { .. }));
        assert!(err.to_string().contains("missing closing paren"));
    }

    #[test]
    fn stray_close_paren_is_reported() {
        let err = parse(")").unwrap_err();
        assert!(matches!(err, SexpError::UnexpectedChar { ch: ')', .. }));
    }

    #[test]
    fn unterminated_string_is_reported() {
        assert!(matches!(
            parse("\"never ends"),
            Err(SexpError::UnterminatedString { .. })
        ));
        assert!(matches!(
            parse("\"ends in escape\\"),
            Err(SexpError::UnterminatedString { .. })
        ));
    }

    #[test]
    fn trailing_data_is_reported() {
        assert!(matches!(
            parse("(a) (b)"),
            Err(SexpError::TrailingData { .. })
        ));
    }

    #[test]
    fn empty_input_is_reported() {
        assert!(matches!(parse(""), Err(SexpError::Empty)));
        assert!(matches!(parse("   "), Err(SexpError::Empty)));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let deep = "(".repeat(MAX_DEPTH + 1) + &")".repeat(MAX_DEPTH + 1);
        assert!(matches!(parse(&deep), Err(SexpError::TooDeep { .. })));
    }

    #[test]
    fn numeric_looking_symbols_stay_symbols() {
        assert_eq!(parse("1st-level").unwrap(), Value::sym("1st-level"));
        assert_eq!(parse("nan").unwrap(), Value::sym("nan"));
        assert_eq!(parse("+").unwrap(), Value::sym("+"));
    }

    #[test]
    fn roundtrip_print_then_parse() {
        let cases = vec![
            Value::Nil,
            Value::Int(0),
            Value::Int(i64::MIN),
            Value::Float(3.25),
            Value::sym("return-error"),
            Value::string("quote \" backslash \\ done"),
            Value::string("line one\nline two"),
            Value::list(vec![
                Value::sym("return"),
                Value::Int(2),
                Value::list(vec![Value::string("x"), Value::Nil, Value::Float(0.5)]),
            ]),
        ];
        for v in cases {
            assert_eq!(parse(&v.to_string()).unwrap(), v, "roundtrip of {v}");
        }
    }
}
