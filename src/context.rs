use std::{any::Any, borrow::Cow, collections::HashMap, fmt, sync::Arc};

type DynValue = Arc<dyn Any + Send + Sync>;

#[derive(Debug)]
struct Layer {
    entries: HashMap<Cow<'static, str>, DynValue>,
    parent: Option<Arc<Layer>>,
}

/// An immutable, layered key/value bag carried through a single call.
///
/// A fresh `Context` is produced per call by the context factory the transport
/// supplies to the [`Connection`](crate::exec::Connection). Middleware never
/// mutate the context they were given; [`Context::with_value`] pushes a new
/// layer on top and returns a new value, so a middleware's extensions are
/// visible to everything downstream of it and invisible to everything above.
///
/// Cloning is cheap (the layers are `Arc`-linked).
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Layer>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new context with `value` stored under `key`, shadowing any
    /// entry of the same name in an older layer. The receiver is untouched.
    pub fn with_value<K, V>(&self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Any + Send + Sync,
    {
        let mut entries = HashMap::with_capacity(1);
        entries.insert(key.into(), Arc::new(value) as DynValue);
        Self {
            head: Some(Arc::new(Layer {
                entries,
                parent: self.head.clone(),
            })),
        }
    }

    /// Looks `key` up, newest layer first. Returns `None` if the key is
    /// missing or was stored with a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let mut layer = self.head.as_ref();
        while let Some(l) = layer {
            if let Some(value) = l.entries.get(key) {
                return value.clone().downcast::<T>().ok();
            }
            layer = l.parent.as_ref();
        }
        None
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let mut layer = self.head.as_ref();
        while let Some(l) = layer {
            if l.entries.contains_key(key) {
                return true;
            }
            layer = l.parent.as_ref();
        }
        false
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        let mut layer = self.head.as_ref();
        while let Some(l) = layer {
            keys.extend(l.entries.keys().map(|k| k.as_ref()));
            layer = l.parent.as_ref();
        }
        f.debug_struct("Context").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layering_is_additive_and_isolated() {
        let base = Context::new();
        let a = base.with_value("a", 1i64);
        let b = a.with_value("b", 2i64);

        // The older values never observe the newer layers.
        assert!(!base.contains_key("a"));
        assert!(a.get::<i64>("b").is_none());

        assert_eq!(*a.get::<i64>("a").unwrap(), 1);
        assert_eq!(*b.get::<i64>("a").unwrap(), 1);
        assert_eq!(*b.get::<i64>("b").unwrap(), 2);
    }

    #[test]
    fn newer_layers_shadow_older_ones() {
        let ctx = Context::new().with_value("user", "anon").with_value("user", "admin");
        assert_eq!(*ctx.get::<&str>("user").unwrap(), "admin");
    }

    #[test]
    fn lookup_is_type_checked() {
        let ctx = Context::new().with_value("n", 1u32);
        assert!(ctx.get::<String>("n").is_none());
        assert!(ctx.contains_key("n"));
    }
}
