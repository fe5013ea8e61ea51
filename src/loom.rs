//! Re-exports that switch between the real synchronization primitives and
//! [`loom`]'s simulated ones, so the semaphore's internals can be exercised
//! by the loom model under `--cfg loom`.
//!
//! [`loom`]: https://crates.io/crates/loom
#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code)]

    pub(crate) use loom::{future, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::{atomic, Arc};

        use core::fmt;
        use loom::sync;

        /// Mock version of the mutex guarding the semaphore state, backed by
        /// [`loom::sync::Mutex`]. Poisoning is unwrapped here: a panic inside
        /// the critical section fails the loom model outright.
        pub(crate) struct Mutex<T>(sync::Mutex<T>);

        pub(crate) type MutexGuard<'a, T> = sync::MutexGuard<'a, T>;

        impl<T> Mutex<T> {
            #[track_caller]
            pub(crate) fn new(data: T) -> Self {
                Self(sync::Mutex::new(data))
            }

            #[track_caller]
            pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
                self.0.lock().expect("loom mutex will not be poisoned")
            }

            #[track_caller]
            pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
                self.0.try_lock().ok()
            }
        }

        impl<T> fmt::Debug for Mutex<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad("Mutex { .. }")
            }
        }
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code)]

    pub(crate) mod sync {
        pub(crate) use std::sync::{atomic, Arc};

        use core::fmt;
        use std::sync;

        /// The mutex guarding the semaphore state.
        ///
        /// Poisoning is deliberately ignored: if a thread panics while
        /// holding this lock, the permit bookkeeping it guards is still
        /// internally consistent (every mutation is completed before any
        /// waker runs), and wedging every subsequent acquisition would turn
        /// one task's panic into a deadlock for the rest of the system.
        pub(crate) struct Mutex<T>(sync::Mutex<T>);

        pub(crate) type MutexGuard<'a, T> = sync::MutexGuard<'a, T>;

        impl<T> Mutex<T> {
            pub(crate) fn new(data: T) -> Self {
                Self(sync::Mutex::new(data))
            }

            pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
                match self.0.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                }
            }

            pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
                self.0.try_lock().ok()
            }
        }

        impl<T> fmt::Debug for Mutex<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad("Mutex { .. }")
            }
        }
    }
}
