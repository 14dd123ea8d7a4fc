//! The four collection facades.
//!
//! Each facade wraps a [`Collection`](crate::Collection) opened with its
//! own [`CollectionKind`](crate::CollectionKind) and dereferences to it, so
//! the shared operations (`get`, `update`, `remove`, `count`, `iter`, the
//! async variants, events...) are available on all of them.

/// Struct, `Clone`, `Deref`, constructors and `IntoIterator` for a facade.
macro_rules! facade {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        pub struct $name<T, C: $crate::codec::Codec = $crate::codec::MessagePack> {
            inner: $crate::collection::Collection<T, C>,
        }

        impl<T, C: $crate::codec::Codec> Clone for $name<T, C> {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone(),
                }
            }
        }

        impl<T, C: $crate::codec::Codec> std::ops::Deref for $name<T, C> {
            type Target = $crate::collection::Collection<T, C>;

            fn deref(&self) -> &Self::Target {
                &self.inner
            }
        }

        impl<T, C: $crate::codec::Codec> $name<T, C> {
            /// Open the root at `path`, creating it if missing.
            pub fn open(path: impl AsRef<std::path::Path>) -> $crate::error::Result<Self> {
                Self::open_with($crate::config::CollectionConfig::new(path))
            }

            /// Open a root with explicit configuration.
            pub fn open_with(config: $crate::config::CollectionConfig) -> $crate::error::Result<Self> {
                Ok(Self {
                    inner: $crate::collection::Collection::open($kind, &config)?,
                })
            }
        }

        impl<'a, T, C> IntoIterator for &'a $name<T, C>
        where
            T: serde::Serialize + serde::de::DeserializeOwned,
            C: $crate::codec::Codec,
        {
            type Item = $crate::error::Result<T>;
            type IntoIter = $crate::collection::Iter<'a, T, C>;

            fn into_iter(self) -> Self::IntoIter {
                self.inner.iter()
            }
        }
    };
}

pub(crate) use facade;

mod dictionary;
mod list;
mod queue;
mod stack;

pub use dictionary::PersistentDictionary;
pub use list::PersistentList;
pub use queue::PersistentQueue;
pub use stack::PersistentStack;
