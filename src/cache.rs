//! Result caching for async computations.
//!
//! [`Cache::wrap`] turns a computation into a [`CachedFn`]: the first call
//! with a given set of arguments runs the computation and stores its JSON
//! encoding with a TTL, later calls with equal arguments read it back.
//!
//! ## Key Layout
//!
//! ```text
//! cache:<sha256 hex of  name \0 [[positional...],{keyword...}]>
//! ```
//!
//! Arguments are reduced to JSON first. Sequences and tuples are positional
//! (order matters); structs and maps are keyword arguments, which JSON
//! objects keep sorted, so field order never changes the key.
//!
//! ## Failure Mode
//!
//! Fail-closed: if the store cannot be read or written the call returns the
//! error instead of falling back to running the computation uncached.

use crate::codec;
use crate::error::{Result, StoreError};
use crate::store::{SetOptions, Store};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default key prefix for cache entries.
pub const DEFAULT_PREFIX: &str = "cache";

/// Canonical form of a call's arguments.
///
/// # Example
///
/// ```
/// use kvkit::CallArgs;
///
/// let a = CallArgs::new().arg(&42)?.kwarg("lang", "en")?.kwarg("page", &2)?;
/// let b = CallArgs::new().arg(&42)?.kwarg("page", &2)?.kwarg("lang", "en")?;
/// assert_eq!(a.fingerprint("get_user")?, b.fingerprint("get_user")?);
/// # Ok::<(), kvkit::StoreError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.positional.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Sets a keyword argument.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self> {
        self.keyword
            .insert(name.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Derives arguments from any serializable value.
    ///
    /// - `()` means no arguments
    /// - tuples, arrays and sequences become positional arguments
    /// - structs and maps become keyword arguments
    /// - any other value is a single positional argument
    pub fn from_serialize<T: Serialize + ?Sized>(args: &T) -> Result<Self> {
        let mut call = Self::new();
        match serde_json::to_value(args)? {
            Value::Null => {}
            Value::Array(values) => call.positional = values,
            Value::Object(fields) => call.keyword = fields.into_iter().collect(),
            single => call.positional.push(single),
        }
        Ok(call)
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// JSON text that is equal for equal arguments.
    pub fn canonical(&self) -> Result<String> {
        Ok(serde_json::to_string(&(&self.positional, &self.keyword))?)
    }

    /// Hex SHA-256 over the function name and the canonical arguments.
    pub fn fingerprint(&self, name: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.canonical()?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Factory for cached computations sharing one store.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn Store>,
    prefix: String,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.store.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_prefix(store, DEFAULT_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// The store key holding the result of `name(args)`.
    pub fn key_for(&self, name: &str, args: &CallArgs) -> Result<String> {
        Ok(format!("{}:{}", self.prefix, args.fingerprint(name)?))
    }

    /// Wraps `func` so its results are cached under `name` for `ttl`.
    ///
    /// `name` plays the role of the function's identity: two wrappers with
    /// the same name and arguments share entries.
    ///
    /// # Example
    ///
    /// ```
    /// use kvkit::{Cache, MemoryStore};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> kvkit::Result<()> {
    /// let cache = Cache::new(Arc::new(MemoryStore::new()));
    /// let square = cache.wrap("square", Duration::from_secs(60), |n: i64| async move { n * n });
    ///
    /// assert_eq!(square.call(12).await?, 144);
    /// assert_eq!(square.call(12).await?, 144); // served from the store
    /// # Ok(())
    /// # }
    /// ```
    pub fn wrap<F>(&self, name: impl Into<String>, ttl: Duration, func: F) -> CachedFn<F> {
        CachedFn {
            cache: self.clone(),
            name: name.into(),
            ttl,
            func,
        }
    }
}

/// A computation whose results are memoized in the store.
#[derive(Clone)]
pub struct CachedFn<F> {
    cache: Cache,
    name: String,
    ttl: Duration,
    func: F,
}

impl<F> std::fmt::Debug for CachedFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFn")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<F> CachedFn<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The store key for a call with `args`.
    pub fn key<A: Serialize + ?Sized>(&self, args: &A) -> Result<String> {
        self.cache
            .key_for(&self.name, &CallArgs::from_serialize(args)?)
    }

    /// Runs the computation unless a cached result exists.
    pub async fn call<A, T, Fut>(&self, args: A) -> Result<T>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
        T: Serialize + DeserializeOwned,
    {
        let key = self.key(&args)?;
        if let Some(hit) = self.lookup(&key).await? {
            return Ok(hit);
        }

        let value = (self.func)(args).await;
        self.remember(&key, &value).await?;
        Ok(value)
    }

    /// Like [`call`](Self::call) for fallible computations. Errors are
    /// returned as-is and never cached.
    pub async fn try_call<A, T, E, Fut>(&self, args: A) -> std::result::Result<T, E>
    where
        A: Serialize,
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
    {
        let key = self.key(&args)?;
        if let Some(hit) = self.lookup(&key).await? {
            return Ok(hit);
        }

        let value = (self.func)(args).await?;
        self.remember(&key, &value).await?;
        Ok(value)
    }

    /// Drops the cached result for `args`. Returns whether one existed.
    pub async fn invalidate<A: Serialize + ?Sized>(&self, args: &A) -> Result<bool> {
        let key = self.key(args)?;
        let removed = self.cache.store.delete(&[key.as_str()]).await? > 0;
        debug!(name = %self.name, key = %key, removed, "Cache entry invalidated");
        Ok(removed)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.store.get(key).await? {
            Some(data) => {
                debug!(name = %self.name, key, "Cache hit");
                Ok(Some(codec::decode(&data)?))
            }
            None => {
                debug!(name = %self.name, key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn remember<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = codec::encode(value)?;
        self.cache
            .store
            .set(key, data, SetOptions::new().expire_in(self.ttl))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize)]
    struct Query {
        user: u32,
        lang: &'static str,
    }

    #[derive(Serialize)]
    struct QueryReordered {
        lang: &'static str,
        user: u32,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u32,
        name: String,
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fingerprint = CallArgs::new().arg(&1).unwrap().fingerprint("f").unwrap();
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_positional_order_matters() {
        let ab = CallArgs::from_serialize(&(1, 2)).unwrap();
        let ba = CallArgs::from_serialize(&(2, 1)).unwrap();
        assert_ne!(ab.fingerprint("f").unwrap(), ba.fingerprint("f").unwrap());
    }

    #[test]
    fn test_keyword_order_does_not_matter() {
        let a = CallArgs::from_serialize(&Query { user: 7, lang: "en" }).unwrap();
        let b = CallArgs::from_serialize(&QueryReordered { lang: "en", user: 7 }).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint("f").unwrap(), b.fingerprint("f").unwrap());
    }

    #[test]
    fn test_keyword_values_matter() {
        let en = CallArgs::new().kwarg("lang", "en").unwrap();
        let de = CallArgs::new().kwarg("lang", "de").unwrap();
        assert_ne!(en.fingerprint("f").unwrap(), de.fingerprint("f").unwrap());
    }

    #[test]
    fn test_name_is_part_of_the_key() {
        let args = CallArgs::from_serialize(&5).unwrap();
        assert_ne!(args.fingerprint("f").unwrap(), args.fingerprint("g").unwrap());
    }

    #[test]
    fn test_unit_means_no_arguments() {
        assert!(CallArgs::from_serialize(&()).unwrap().is_empty());
        assert_eq!(CallArgs::from_serialize(&"x").unwrap().positional.len(), 1);
    }

    #[tokio::test]
    async fn test_call_computes_once() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let profile = cache.wrap("profile", Duration::from_secs(60), move |id: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Profile {
                    id,
                    name: format!("user-{}", id),
                }
            }
        });

        let first = profile.call(3).await.unwrap();
        let second = profile.call(3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let key = profile.key(&3).unwrap();
        assert!(key.starts_with("cache:"));
        assert!(store.ttl(&key).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_try_call_does_not_cache_errors() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let flaky = cache.wrap("flaky", Duration::from_secs(60), move |n: u32| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(StoreError::Server("upstream down".into()))
                } else {
                    Ok(n * 10)
                }
            }
        });

        assert!(flaky.try_call(1).await.is_err());
        assert_eq!(flaky.try_call(1).await.unwrap(), 10);
        assert_eq!(flaky.try_call(1).await.unwrap(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = Cache::new(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let double = cache.wrap("double", Duration::from_secs(60), move |n: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { n * 2 }
        });

        double.call(4).await.unwrap();
        assert!(double.invalidate(&4).await.unwrap());
        assert!(!double.invalidate(&4).await.unwrap());
        double.call(4).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_serialization_error() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone());
        let ident = cache.wrap("ident", Duration::from_secs(60), |n: u32| async move { n });

        let key = ident.key(&1).unwrap();
        store.set_value(&key, bytes::Bytes::from("not json"), SetOptions::new());

        let err = ident.call(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
