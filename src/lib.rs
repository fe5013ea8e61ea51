#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
mod util;

pub mod semaphore;

#[doc(inline)]
pub use self::semaphore::{
    Acquire, AcquireOwned, KeyedSemaphore, OwnedPermit, Permit, TryAcquireError,
};

use core::task::Poll;

/// An error indicating that a [`KeyedSemaphore`] was closed while attempting
/// to acquire permits from it.
///
/// This error is returned by the [`KeyedSemaphore::acquire`],
/// [`KeyedSemaphore::acquire_owned`], and [`KeyedSemaphore::with_permits`]
/// methods.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Closed(());

/// The result of waiting on a [`KeyedSemaphore`].
pub type WaitResult<T> = Result<T, Closed>;

pub(crate) const fn closed<T>() -> Poll<WaitResult<T>> {
    Poll::Ready(Err(Closed::new()))
}

impl Closed {
    pub(crate) const fn new() -> Self {
        Self(())
    }
}

impl core::fmt::Display for Closed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad("closed")
    }
}

impl std::error::Error for Closed {}
