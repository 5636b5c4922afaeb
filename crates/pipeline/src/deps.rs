//! Dependency registry with singleton and scoped lifetimes.
//!
//! Dependencies are keyed by a [`DependencyKey`], either a name or a Rust
//! type. A [`Token<T>`] pairs a key with the type it resolves to, so callers
//! get an `Arc<T>` back without runtime casts of their own.

use std::{
    any::{Any, TypeId, type_name},
    borrow::Cow,
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{Arc, OnceLock},
};

use tracing::debug;

use crate::error::{Error, Result};

type Instance = Arc<dyn Any + Send + Sync>;
type Constructor = Arc<dyn Fn() -> Instance + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Built on first resolution, then shared for the life of the process.
    Singleton,
    /// Built anew on every resolution, including repeated resolutions inside
    /// one dispatch.
    Scoped,
}

/// Stable identity of a registered dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyKey {
    Named(Cow<'static, str>),
    Type { id: TypeId, name: &'static str },
}

impl DependencyKey {
    pub fn of<T: 'static>() -> Self {
        Self::Type {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "\"{name}\""),
            Self::Type { name, .. } => f.write_str(name),
        }
    }
}

/// Typed handle to a dependency.
pub struct Token<T> {
    key: DependencyKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Token<T> {
    /// Token keyed by the type itself.
    pub fn of_type() -> Self {
        Self {
            key: DependencyKey::of::<T>(),
            _marker: PhantomData,
        }
    }
}

impl<T> Token<T> {
    /// Token keyed by a string name. Usable in `const` items.
    pub const fn named(name: &'static str) -> Self {
        Self {
            key: DependencyKey::Named(Cow::Borrowed(name)),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &DependencyKey {
        &self.key
    }
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&self.key).finish()
    }
}

impl<T> From<Token<T>> for DependencyKey {
    fn from(token: Token<T>) -> Self {
        token.key
    }
}

impl<T> From<&Token<T>> for DependencyKey {
    fn from(token: &Token<T>) -> Self {
        token.key.clone()
    }
}

struct Entry {
    lifetime: Lifetime,
    construct: Constructor,
    cached: OnceLock<Instance>,
}

impl Entry {
    fn instance(&self) -> Instance {
        match self.lifetime {
            Lifetime::Singleton => Arc::clone(self.cached.get_or_init(|| (self.construct)())),
            Lifetime::Scoped => (self.construct)(),
        }
    }
}

/// Registry of dependency constructors and cached singletons.
///
/// Registration needs `&mut self`; resolution only `&self`, so a registry
/// shared behind an `Arc` can be resolved from concurrent dispatches.
/// Singletons are built exactly once even when first resolved concurrently.
#[derive(Default)]
pub struct DependencyRegistry {
    entries: HashMap<DependencyKey, Entry>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` with an explicit constructor.
    pub fn register<T, F>(&mut self, token: &Token<T>, lifetime: Lifetime, construct: F) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        if self.entries.contains_key(&token.key) {
            return Err(Error::AlreadyRegistered {
                key: token.key.to_string(),
            });
        }
        debug!(key = %token.key, ?lifetime, "registering dependency");
        self.entries.insert(token.key.clone(), Entry {
            lifetime,
            construct: Arc::new(move || Arc::new(construct()) as Instance),
            cached: OnceLock::new(),
        });
        Ok(())
    }

    /// Register a type-keyed token built through `T::default()`.
    ///
    /// Named tokens carry no constructor of their own and are rejected with
    /// [`Error::InvalidToken`].
    pub fn register_default<T>(&mut self, token: &Token<T>, lifetime: Lifetime) -> Result<()>
    where
        T: Default + Send + Sync + 'static,
    {
        if let DependencyKey::Named(_) = token.key {
            return Err(Error::InvalidToken {
                key: token.key.to_string(),
                reason: "named tokens require an explicit constructor".into(),
            });
        }
        self.register(token, lifetime, T::default)
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn lifetime(&self, key: &DependencyKey) -> Option<Lifetime> {
        self.entries.get(key).map(|e| e.lifetime)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a typed instance.
    pub fn resolve<T>(&self, token: &Token<T>) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let instance = self.resolve_key(&token.key)?;
        downcast(&token.key, instance)
    }

    /// Resolve an untyped instance by key.
    pub fn resolve_key(&self, key: &DependencyKey) -> Result<Instance> {
        let entry = self.entries.get(key).ok_or_else(|| Error::NotRegistered {
            key: key.to_string(),
        })?;
        Ok(entry.instance())
    }

    /// Resolve every key of a stage, in order.
    pub fn resolve_all(&self, keys: &[DependencyKey]) -> Result<Deps> {
        let resolved = keys
            .iter()
            .map(|key| Ok((key.clone(), self.resolve_key(key)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Deps { resolved })
    }

    /// Fail with [`Error::UnknownDependency`] if any key is missing.
    pub(crate) fn ensure_registered(&self, owner: &str, keys: &[DependencyKey]) -> Result<()> {
        match keys.iter().find(|key| !self.contains(key)) {
            Some(missing) => Err(Error::UnknownDependency {
                owner: owner.to_string(),
                key: missing.to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &DependencyKey, instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| Error::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<T>(),
    })
}

/// Dependencies resolved for one stage, in declaration order.
pub struct Deps {
    resolved: Vec<(DependencyKey, Instance)>,
}

impl Deps {
    pub fn empty() -> Self {
        Self {
            resolved: Vec::new(),
        }
    }

    /// The instance resolved for `token`. The stage must have declared it.
    pub fn get<T>(&self, token: &Token<T>) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let (key, instance) = self
            .resolved
            .iter()
            .find(|(key, _)| *key == token.key)
            .ok_or_else(|| Error::Undeclared {
                key: token.key.to_string(),
            })?;
        downcast(key, Arc::clone(instance))
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolved.iter().map(|(key, _)| key))
            .finish()
    }
}
