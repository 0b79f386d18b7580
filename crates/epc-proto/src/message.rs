use epc_sexp::{SexpError, Value};

/// Identifies one request/response pair within a connection.
pub type Uid = u64;

/// One decoded protocol message.
///
/// Reply kinds carry `Option<Uid>` because the peer may answer with a `nil`
/// uid when it could not extract one from a malformed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Invoke a registered method: `(call UID METHOD ARGS)`.
    Call {
        uid: Uid,
        method: String,
        /// The raw argument-list field, usually a list or `nil`.
        args: Value,
    },
    /// Request method introspection: `(methods UID)`.
    Methods { uid: Uid },
    /// Successful reply: `(return UID VALUE)`.
    Return { uid: Uid, value: Value },
    /// The invoked method failed: `(return-error UID MESSAGE)`.
    ReturnError { uid: Option<Uid>, error: Value },
    /// Protocol-level failure: `(epc-error UID MESSAGE)`.
    EpcError { uid: Option<Uid>, error: Value },
}

/// Violations of the per-kind message contract.
///
/// `RequestArity` and `BadMethodName` carry the uid so the endpoint can
/// answer `epc-error`; `ReturnArity` carries it so the endpoint can unblock
/// the waiting caller through the local error path.
#[derive(Debug, thiserror::Error)]
pub enum GrammarError {
    #[error("message is not a list")]
    NotAList,

    #[error("message kind is not a symbol")]
    BadKind,

    #[error("unknown message kind {kind:?}")]
    UnknownKind { kind: String, uid: Option<Uid> },

    #[error("({kind} ...): uid is not an integer")]
    BadUid { kind: &'static str },

    #[error("({kind} {uid} ...): {detail}")]
    RequestArity {
        kind: &'static str,
        uid: Uid,
        detail: String,
    },

    #[error("(return {uid} ...): Got {got} arguments in the reply: {fields}")]
    ReturnArity { uid: Uid, got: &'static str, fields: String },

    #[error("(call {uid} ...): method name is not a symbol or string")]
    BadMethodName { uid: Uid },
}

impl GrammarError {
    /// Uid to answer with over the wire, when a reply is owed at all.
    pub fn reply_uid(&self) -> Option<Uid> {
        match self {
            GrammarError::RequestArity { uid, .. } | GrammarError::BadMethodName { uid } => {
                Some(*uid)
            }
            _ => None,
        }
    }
}

/// Failure to turn raw frame bytes into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("parse error: {0}")]
    Sexp(#[from] SexpError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),
}

pub const KIND_CALL: &str = "call";
pub const KIND_METHODS: &str = "methods";
pub const KIND_RETURN: &str = "return";
pub const KIND_RETURN_ERROR: &str = "return-error";
pub const KIND_EPC_ERROR: &str = "epc-error";

impl Message {
    /// Wire name of this message's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Call { .. } => KIND_CALL,
            Message::Methods { .. } => KIND_METHODS,
            Message::Return { .. } => KIND_RETURN,
            Message::ReturnError { .. } => KIND_RETURN_ERROR,
            Message::EpcError { .. } => KIND_EPC_ERROR,
        }
    }

    /// Whether this kind expects a reply frame. Reply kinds are terminal.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Message::Call { .. } | Message::Methods { .. })
    }

    /// Serialize to the structured list form `(kind uid fields...)`.
    pub fn to_value(&self) -> Value {
        match self {
            Message::Call { uid, method, args } => Value::list(vec![
                Value::sym(KIND_CALL),
                Value::Int(*uid as i64),
                Value::sym(method.clone()),
                args.clone(),
            ]),
            Message::Methods { uid } => Value::list(vec![
                Value::sym(KIND_METHODS),
                Value::Int(*uid as i64),
            ]),
            Message::Return { uid, value } => Value::list(vec![
                Value::sym(KIND_RETURN),
                Value::Int(*uid as i64),
                value.clone(),
            ]),
            Message::ReturnError { uid, error } => Value::list(vec![
                Value::sym(KIND_RETURN_ERROR),
                encode_uid(*uid),
                error.clone(),
            ]),
            Message::EpcError { uid, error } => Value::list(vec![
                Value::sym(KIND_EPC_ERROR),
                encode_uid(*uid),
                error.clone(),
            ]),
        }
    }

    /// Decode one frame payload into a message.
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(payload)?;
        let value = epc_sexp::parse(text)?;
        Ok(Self::from_value(value)?)
    }

    /// Validate and destructure the list form of a message.
    ///
    /// Arity contract: `call` takes exactly two fields, `methods` zero,
    /// `return` exactly one. `return-error` and `epc-error` are terminal
    /// reply kinds with no further reply channel, so excess fields are
    /// logged rather than rejected.
    pub fn from_value(value: Value) -> Result<Self, GrammarError> {
        let items = value.into_list().ok_or(GrammarError::NotAList)?;
        let mut items = items.into_iter();
        let kind = match items.next() {
            Some(Value::Symbol(kind)) => kind,
            Some(_) => return Err(GrammarError::BadKind),
            None => return Err(GrammarError::NotAList),
        };
        let uid = items.next();
        let fields: Vec<Value> = items.collect();

        match kind.as_str() {
            KIND_CALL => {
                let uid = require_uid(uid, KIND_CALL)?;
                check_request_arity(KIND_CALL, uid, &fields, 2)?;
                let mut fields = fields.into_iter();
                let method = match fields.next() {
                    Some(Value::Symbol(name)) => name,
                    Some(Value::String(name)) => name,
                    _ => return Err(GrammarError::BadMethodName { uid }),
                };
                let args = fields.next().unwrap_or(Value::Nil);
                Ok(Message::Call { uid, method, args })
            }
            KIND_METHODS => {
                let uid = require_uid(uid, KIND_METHODS)?;
                check_request_arity(KIND_METHODS, uid, &fields, 0)?;
                Ok(Message::Methods { uid })
            }
            KIND_RETURN => {
                let uid = require_uid(uid, KIND_RETURN)?;
                if fields.len() != 1 {
                    return Err(GrammarError::ReturnArity {
                        uid,
                        got: if fields.is_empty() {
                            "not enough"
                        } else {
                            "too many"
                        },
                        fields: format_fields(&fields),
                    });
                }
                let mut fields = fields.into_iter();
                Ok(Message::Return {
                    uid,
                    value: fields.next().unwrap_or(Value::Nil),
                })
            }
            KIND_RETURN_ERROR => {
                let uid = optional_uid(uid, KIND_RETURN_ERROR)?;
                Ok(Message::ReturnError {
                    uid,
                    error: reply_error_field(KIND_RETURN_ERROR, uid, fields),
                })
            }
            KIND_EPC_ERROR => {
                let uid = optional_uid(uid, KIND_EPC_ERROR)?;
                Ok(Message::EpcError {
                    uid,
                    error: reply_error_field(KIND_EPC_ERROR, uid, fields),
                })
            }
            // The uid, if one parses, lets the endpoint answer the sender.
            _ => Err(GrammarError::UnknownKind {
                kind,
                uid: match uid {
                    Some(Value::Int(n)) if n >= 0 => Some(n as Uid),
                    _ => None,
                },
            }),
        }
    }
}

fn encode_uid(uid: Option<Uid>) -> Value {
    match uid {
        Some(uid) => Value::Int(uid as i64),
        None => Value::Nil,
    }
}

fn require_uid(value: Option<Value>, kind: &'static str) -> Result<Uid, GrammarError> {
    match value {
        Some(Value::Int(n)) if n >= 0 => Ok(n as Uid),
        _ => Err(GrammarError::BadUid { kind }),
    }
}

fn optional_uid(value: Option<Value>, kind: &'static str) -> Result<Option<Uid>, GrammarError> {
    match value {
        Some(Value::Int(n)) if n >= 0 => Ok(Some(n as Uid)),
        Some(Value::Nil) | None => Ok(None),
        _ => Err(GrammarError::BadUid { kind }),
    }
}

fn check_request_arity(
    kind: &'static str,
    uid: Uid,
    fields: &[Value],
    expect: usize,
) -> Result<(), GrammarError> {
    if fields.len() == expect {
        return Ok(());
    }
    let detail = if fields.len() < expect {
        format!("Not enough arguments {}", format_fields(fields))
    } else {
        format!("Too many arguments {}", format_fields(fields))
    };
    Err(GrammarError::RequestArity { kind, uid, detail })
}

/// Extract the single error field of a reply kind, tolerating anomalies.
fn reply_error_field(kind: &str, uid: Option<Uid>, fields: Vec<Value>) -> Value {
    if fields.len() > 1 {
        tracing::warn!(
            kind,
            uid = ?uid,
            fields = %format_fields(&fields),
            "too many fields in terminal reply; extras ignored"
        );
    }
    fields.into_iter().next().unwrap_or(Value::Nil)
}

fn format_fields(fields: &[Value]) -> String {
    Value::list(fields.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use epc_sexp::parse;

    fn decode(text: &str) -> Result<Message, MessageError> {
        Message::decode(text.as_bytes())
    }

    #[test]
    fn decodes_call() {
        assert_eq!(
            decode("(call 1 echo (55))").unwrap(),
            Message::Call {
                uid: 1,
                method: "echo".into(),
                args: Value::list(vec![Value::Int(55)]),
            }
        );
    }

    #[test]
    fn decodes_call_with_string_method_name() {
        assert_eq!(
            decode("(call 1 \"echo\" nil)").unwrap(),
            Message::Call {
                uid: 1,
                method: "echo".into(),
                args: Value::Nil,
            }
        );
    }

    #[test]
    fn decodes_methods_and_return() {
        assert_eq!(decode("(methods 4)").unwrap(), Message::Methods { uid: 4 });
        assert_eq!(
            decode("(return 4 (55))").unwrap(),
            Message::Return {
                uid: 4,
                value: Value::list(vec![Value::Int(55)]),
            }
        );
    }

    #[test]
    fn decodes_error_replies_with_absent_uid() {
        assert_eq!(
            decode("(epc-error nil \"boom\")").unwrap(),
            Message::EpcError {
                uid: None,
                error: Value::string("boom"),
            }
        );
        assert_eq!(
            decode("(return-error 7 \"bad\")").unwrap(),
            Message::ReturnError {
                uid: Some(7),
                error: Value::string("bad"),
            }
        );
    }

    #[test]
    fn roundtrips_through_value() {
        let messages = vec![
            Message::Call {
                uid: 1,
                method: "add".into(),
                args: Value::list(vec![Value::Int(1), Value::Int(2)]),
            },
            Message::Methods { uid: 2 },
            Message::Return {
                uid: 3,
                value: Value::string("ok"),
            },
            Message::ReturnError {
                uid: Some(4),
                error: Value::string("err"),
            },
            Message::EpcError {
                uid: None,
                error: Value::string("parse"),
            },
        ];
        for msg in messages {
            let text = msg.to_value().to_string();
            assert_eq!(
                Message::from_value(parse(&text).unwrap()).unwrap(),
                msg,
                "roundtrip of {text}"
            );
        }
    }

    #[test]
    fn call_arity_violations_carry_the_uid() {
        let err = match decode("(call 9 echo)") {
            Err(MessageError::Grammar(err)) => err,
            other => panic!("expected grammar error, got {other:?}"),
        };
        assert_eq!(err.reply_uid(), Some(9));
        assert!(err.to_string().contains("Not enough arguments"));

        let err = match decode("(call 9 echo nil nil)") {
            Err(MessageError::Grammar(err)) => err,
            other => panic!("expected grammar error, got {other:?}"),
        };
        assert!(err.to_string().contains("Too many arguments"));
    }

    #[test]
    fn methods_arity_violation() {
        let err = match decode("(methods 5 extra)") {
            Err(MessageError::Grammar(err)) => err,
            other => panic!("expected grammar error, got {other:?}"),
        };
        assert!(matches!(
            err,
            GrammarError::RequestArity {
                kind: KIND_METHODS,
                uid: 5,
                ..
            }
        ));
    }

    #[test]
    fn return_arity_violation_routes_to_local_error_path() {
        let err = match decode("(return 6 a b)") {
            Err(MessageError::Grammar(err)) => err,
            other => panic!("expected grammar error, got {other:?}"),
        };
        // No wire reply for reply kinds; the uid travels in the variant.
        assert_eq!(err.reply_uid(), None);
        assert!(matches!(err, GrammarError::ReturnArity { uid: 6, .. }));
        assert!(err.to_string().contains("too many"));

        let err = match decode("(return 6)") {
            Err(MessageError::Grammar(err)) => err,
            other => panic!("expected grammar error, got {other:?}"),
        };
        assert!(err.to_string().contains("not enough"));
    }

    #[test]
    fn reply_kinds_tolerate_extra_fields() {
        assert_eq!(
            decode("(return-error 7 \"bad\" extra junk)").unwrap(),
            Message::ReturnError {
                uid: Some(7),
                error: Value::string("bad"),
            }
        );
        assert_eq!(
            decode("(epc-error 8)").unwrap(),
            Message::EpcError {
                uid: Some(8),
                error: Value::Nil,
            }
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            decode("(shutdown 1)"),
            Err(MessageError::Grammar(GrammarError::UnknownKind { .. }))
        ));
    }

    #[test]
    fn non_list_and_bad_kind_are_rejected() {
        assert!(matches!(
            decode("42"),
            Err(MessageError::Grammar(GrammarError::NotAList))
        ));
        assert!(matches!(
            decode("(\"call\" 1 echo nil)"),
            Err(MessageError::Grammar(GrammarError::BadKind))
        ));
    }

    #[test]
    fn request_uid_must_be_an_integer() {
        assert!(matches!(
            decode("(call nil echo nil)"),
            Err(MessageError::Grammar(GrammarError::BadUid { kind: KIND_CALL }))
        ));
        assert!(matches!(
            decode("(return nil 1)"),
            Err(MessageError::Grammar(GrammarError::BadUid { .. }))
        ));
    }

    #[test]
    fn unparsable_payload_is_a_sexp_error() {
        assert!(matches!(
            decode("(((invalid sexp!"),
            Err(MessageError::Sexp(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_reported() {
        assert!(matches!(
            Message::decode(&[0x28, 0xFF, 0xFE, 0x29]),
            Err(MessageError::Utf8(_))
        ));
    }
}
