//! Process-wide engine library state.
//!
//! Engines typically guard a non-reentrant global initialization routine
//! that must run once before the first instance is configured and be torn
//! down again when the last instance goes away. Channels may be constructed
//! and dropped concurrently from different threads, so the reference count
//! lives under a mutex. The count is kept per engine type.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use crate::engine::{Engine, Status};

/// Per-engine-type initialization reference counts.
static LIBRARIES: Mutex<Option<HashMap<TypeId, usize>>> = Mutex::new(None);

//------------ LibraryGuard --------------------------------------------------

/// A hold on the initialized library state of engine type `E`.
///
/// The first guard for an engine type runs [`Engine::library_init`]; every
/// later acquisition only bumps the count. Dropping the last guard runs
/// [`Engine::library_cleanup`].
#[derive(Debug)]
pub(crate) struct LibraryGuard<E: Engine> {
    /// Guards are per engine type but hold no engine data.
    _marker: PhantomData<fn() -> E>,
}

impl<E: Engine> LibraryGuard<E> {
    /// Acquires a hold on the library state, initializing it if needed.
    ///
    /// Initialization runs while the lock is held so that a concurrent
    /// acquire cannot observe a half-initialized library.
    pub(crate) fn acquire() -> Result<Self, Status> {
        let mut libraries = LIBRARIES.lock().unwrap();
        let count = libraries
            .get_or_insert_with(HashMap::new)
            .entry(TypeId::of::<E>())
            .or_insert(0);
        if *count == 0 {
            E::library_init()?;
        }
        *count += 1;
        Ok(LibraryGuard {
            _marker: PhantomData,
        })
    }
}

impl<E: Engine> Drop for LibraryGuard<E> {
    fn drop(&mut self) {
        let mut libraries = LIBRARIES.lock().unwrap();
        let count = libraries
            .as_mut()
            .and_then(|map| map.get_mut(&TypeId::of::<E>()))
            .expect("library guard without library state");
        *count -= 1;
        if *count == 0 {
            E::library_cleanup();
        }
    }
}

//============ Tests =========================================================
