/// Errors that can occur while parsing s-expression text.
#[derive(Debug, thiserror::Error)]
pub enum SexpError {
    /// Input ended before a complete expression was read.
    #[error("unbalanced list: missing closing paren (opened at byte {open_at})")]
    UnbalancedList { open_at: usize },

    /// A string literal was not closed before the end of input.
    #[error("unterminated string literal (opened at byte {open_at})")]
    UnterminatedString { open_at: usize },

    /// A character that cannot start an expression, e.g. a stray `)`.
    #[error("unexpected character {ch:?} at byte {at}")]
    UnexpectedChar { ch: char, at: usize },

    /// The input contained no expression at all.
    #[error("empty input: expected an expression")]
    Empty,

    /// Non-whitespace input remained after the first complete expression.
    #[error("trailing data after expression at byte {at}")]
    TrailingData { at: usize },

    /// Lists nested deeper than the parser allows.
    #[error("expression nested deeper than {max} levels")]
    TooDeep { max: usize },
}

pub type Result<T> = std::result::Result<T, SexpError>;
