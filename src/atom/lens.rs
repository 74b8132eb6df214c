//! Lens and derived views
//!
//! A `Lens<S, A>` is a pair of pure functions focusing on a part `A` of a
//! state `S`. `LensAtom` applies a lens to a parent store, giving a store of
//! `A` whose reads and writes go through the parent.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};

use super::ReactiveStore;

type Getter<S, A> = dyn Fn(&S) -> A + Send + Sync;
type Setter<S, A> = dyn Fn(A, &mut S) + Send + Sync;

// == Lens ==
/// Bidirectional projection from `S` to `A`.
pub struct Lens<S, A> {
    get: Arc<Getter<S, A>>,
    set: Arc<Setter<S, A>>,
}

impl<S, A> Clone for Lens<S, A> {
    fn clone(&self) -> Self {
        Self {
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
        }
    }
}

impl<S, A> Lens<S, A> {
    /// Creates a lens from a getter and a setter.
    ///
    /// The setter writes the focused part back into the whole in place.
    pub fn new<G, W>(get: G, set: W) -> Self
    where
        G: Fn(&S) -> A + Send + Sync + 'static,
        W: Fn(A, &mut S) + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    /// Reads the focused part.
    pub fn view(&self, whole: &S) -> A {
        (self.get)(whole)
    }

    /// Writes the focused part back into `whole`.
    pub fn update(&self, part: A, whole: &mut S) {
        (self.set)(part, whole)
    }
}

/// Focus on one map entry; `None` means absent and writing `None` removes it.
pub fn by_key<K, V>(key: K) -> Lens<HashMap<K, V>, Option<V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + 'static,
{
    let read_key = key.clone();
    Lens::new(
        move |map: &HashMap<K, V>| map.get(&read_key).cloned(),
        move |value: Option<V>, map: &mut HashMap<K, V>| match value {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None => {
                map.remove(&key);
            }
        },
    )
}

/// Focus on one map entry, reading `default` when the key is absent.
pub fn by_key_with_default<K, V>(key: K, default: V) -> Lens<HashMap<K, V>, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let read_key = key.clone();
    Lens::new(
        move |map: &HashMap<K, V>| map.get(&read_key).cloned().unwrap_or_else(|| default.clone()),
        move |value: V, map: &mut HashMap<K, V>| {
            map.insert(key.clone(), value);
        },
    )
}

// == Lens Atom ==
/// A store of `A` derived from a parent store of `S` through a lens.
pub struct LensAtom<S, A> {
    parent: Arc<dyn ReactiveStore<S>>,
    lens: Lens<S, A>,
}

impl<S, A> Clone for LensAtom<S, A> {
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            lens: self.lens.clone(),
        }
    }
}

impl<S, A> fmt::Debug for LensAtom<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LensAtom").finish_non_exhaustive()
    }
}

impl<S, A> LensAtom<S, A> {
    /// Derives a view of `parent` through `lens`.
    pub fn new(parent: Arc<dyn ReactiveStore<S>>, lens: Lens<S, A>) -> Self {
        Self { parent, lens }
    }
}

impl<S, A> ReactiveStore<A> for LensAtom<S, A>
where
    S: Send + 'static,
    A: Send + 'static,
{
    fn get(&self) -> A {
        let mut part = None;
        self.parent.inspect(&mut |whole| part = Some(self.lens.view(whole)));
        part.unwrap_or_else(|| self.lens.view(&self.parent.get()))
    }

    fn set(&self, value: A) {
        let mut value = Some(value);
        self.parent.modify(&mut |whole| match value.take() {
            Some(part) => {
                self.lens.update(part, whole);
                true
            }
            None => false,
        });
    }

    fn modify(&self, f: &mut dyn FnMut(&mut A) -> bool) -> bool {
        self.parent.modify(&mut |whole| {
            let mut part = self.lens.view(whole);
            let changed = f(&mut part);
            if changed {
                self.lens.update(part, whole);
            }
            changed
        })
    }

    fn inspect(&self, f: &mut dyn FnMut(&A)) {
        self.parent.inspect(&mut |whole| f(&self.lens.view(whole)));
    }

    /// Projects inside the parent's borrow on each change, so the parent
    /// state is never copied. Holds the parent weakly: the stream still ends
    /// once every owner of the parent is gone.
    fn subscribe(&self) -> BoxStream<'static, A> {
        let parent: Weak<dyn ReactiveStore<S>> = Arc::downgrade(&self.parent);
        let lens = self.lens.clone();
        self.parent
            .changes()
            .filter_map(move |()| {
                let mut part = None;
                if let Some(parent) = parent.upgrade() {
                    parent.inspect(&mut |whole| part = Some(lens.view(whole)));
                }
                future::ready(part)
            })
            .boxed()
    }

    fn changes(&self) -> BoxStream<'static, ()> {
        self.parent.changes()
    }
}
