use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use epc_sexp::Value;

/// Prefix that marks a name (or path segment) as private.
///
/// Private members are never remote-callable, mirroring the convention of
/// the editors this protocol talks to.
pub const PRIVATE_PREFIX: char = '_';

/// Failure of a registered method.
///
/// The text travels to the peer inside a `return-error` reply.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MethodError(pub String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A remote-callable function.
pub type Method = Arc<dyn Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync>;

/// Why a lookup produced no callable.
///
/// Both variants answer the peer as "no such method"; `Private` exists so
/// the local log can tell a denied access from a typo.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no method registered under {0:?}")]
    NotFound(String),

    #[error("{0:?} names a private member")]
    Private(String),
}

/// Introspection metadata for one registered method, as enumerated by a
/// `methods` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub docstring: Option<String>,
}

impl MethodInfo {
    /// The `(name arg-spec docstring)` element of a `methods` reply.
    /// The arg-spec slot is a `nil` placeholder.
    pub fn to_value(&self) -> Value {
        Value::list(vec![
            Value::sym(self.name.clone()),
            Value::Nil,
            Value::string(self.docstring.clone().unwrap_or_default()),
        ])
    }
}

/// Custom name resolution hook.
///
/// When installed on a registry, the hook takes precedence over namespace
/// path walking for names not found in the flat table.
pub trait MethodResolver: Send + Sync {
    fn get_method(&self, name: &str) -> Option<Method>;
}

/// A tree of methods exposed under dotted paths, the explicit Rust model
/// of registering an object instance and its nested attributes.
#[derive(Default)]
pub struct Namespace {
    entries: BTreeMap<String, NamespaceEntry>,
}

enum NamespaceEntry {
    Method { func: Method, docstring: Option<String> },
    Child(Namespace),
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method at this level. Builder-style.
    pub fn method<F>(mut self, name: impl Into<String>, docstring: Option<&str>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            NamespaceEntry::Method {
                func: Arc::new(func),
                docstring: docstring.map(str::to_string),
            },
        );
        self
    }

    /// Nest a child namespace under `name`. Builder-style.
    pub fn child(mut self, name: impl Into<String>, namespace: Namespace) -> Self {
        self.entries
            .insert(name.into(), NamespaceEntry::Child(namespace));
        self
    }

    /// Walk a pre-split dotted path down the tree.
    ///
    /// Any segment with the privacy prefix aborts the walk, even when the
    /// entry exists.
    fn resolve(&self, full_name: &str, path: &[&str]) -> Result<Method, LookupError> {
        let (head, rest) = match path.split_first() {
            Some(split) => split,
            None => return Err(LookupError::NotFound(full_name.to_string())),
        };
        if head.starts_with(PRIVATE_PREFIX) {
            return Err(LookupError::Private(full_name.to_string()));
        }
        match self.entries.get(*head) {
            Some(NamespaceEntry::Method { func, .. }) if rest.is_empty() => Ok(Arc::clone(func)),
            Some(NamespaceEntry::Child(child)) if !rest.is_empty() => {
                child.resolve(full_name, rest)
            }
            _ => Err(LookupError::NotFound(full_name.to_string())),
        }
    }
}

enum InstanceBinding {
    Resolver(Arc<dyn MethodResolver>),
    Namespace {
        root: Namespace,
        allow_dotted_names: bool,
    },
}

struct Entry {
    func: Method,
    docstring: Option<String>,
}

/// Name-to-callable table shared by the endpoints that serve a connection.
///
/// Reads happen on receive-loop threads while the embedding application may
/// still be registering, so the interior is lock-protected.
#[derive(Default)]
pub struct Registry {
    methods: RwLock<BTreeMap<String, Entry>>,
    instance: RwLock<Option<InstanceBinding>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `func` under `name`. Re-registering a name replaces the
    /// previous entry. Returns `&Self` so registrations chain.
    pub fn register<F>(&self, name: impl Into<String>, docstring: Option<&str>, func: F) -> &Self
    where
        F: Fn(&[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(name, "registering method");
        self.methods.write().unwrap_or_else(|p| p.into_inner()).insert(
            name,
            Entry {
                func: Arc::new(func),
                docstring: docstring.map(str::to_string),
            },
        );
        self
    }

    /// Expose a namespace tree as remote methods.
    ///
    /// With `allow_dotted_names`, names may contain `.`-separated segments
    /// resolved by walking the tree; without it only top-level names
    /// resolve. Replaces any previously registered namespace or resolver.
    pub fn register_namespace(&self, root: Namespace, allow_dotted_names: bool) -> &Self {
        *self.instance.write().unwrap_or_else(|p| p.into_inner()) =
            Some(InstanceBinding::Namespace {
                root,
                allow_dotted_names,
            });
        self
    }

    /// Install a custom resolution hook, which takes precedence over
    /// namespace walking. Replaces any previously registered namespace or
    /// resolver.
    pub fn register_resolver(&self, resolver: Arc<dyn MethodResolver>) -> &Self {
        *self.instance.write().unwrap_or_else(|p| p.into_inner()) =
            Some(InstanceBinding::Resolver(resolver));
        self
    }

    /// Find the callable for `name`: the flat table first, then whatever
    /// instance binding is installed.
    pub fn lookup(&self, name: &str) -> Result<Method, LookupError> {
        if name.starts_with(PRIVATE_PREFIX) {
            return Err(LookupError::Private(name.to_string()));
        }
        if let Some(entry) = self
            .methods
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
        {
            return Ok(Arc::clone(&entry.func));
        }
        match &*self.instance.read().unwrap_or_else(|p| p.into_inner()) {
            Some(InstanceBinding::Resolver(resolver)) => resolver
                .get_method(name)
                .ok_or_else(|| LookupError::NotFound(name.to_string())),
            Some(InstanceBinding::Namespace {
                root,
                allow_dotted_names,
            }) => {
                if !allow_dotted_names && name.contains('.') {
                    return Err(LookupError::NotFound(name.to_string()));
                }
                let path: Vec<&str> = name.split('.').collect();
                root.resolve(name, &path)
            }
            None => Err(LookupError::NotFound(name.to_string())),
        }
    }

    /// Metadata for every name in the flat table, in stable (sorted)
    /// order. Namespace and resolver methods are callable but unlisted,
    /// matching the protocol's reference servers.
    pub fn snapshot(&self) -> Vec<MethodInfo> {
        self.methods
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(name, entry)| MethodInfo {
                name: name.clone(),
                docstring: entry.docstring.clone(),
            })
            .collect()
    }
}
