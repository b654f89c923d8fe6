// Unified synchronization primitive shim.
//
// Under `cfg(loom)`, re-exports from `loom`. Otherwise, re-exports from `std`.
//
// **Every** file in the crate must import sync primitives through this module.
// The depot lock and the shared counters are the only synchronization points in
// the cache; a direct `use std::sync::Mutex` anywhere would hide them from
// loom's scheduler.
#![allow(unused_imports)]

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicU64, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicU64, Ordering};
}

// ---------------------------------------------------------------------------
// sync (Mutex, Arc)
// ---------------------------------------------------------------------------
#[cfg(loom)]
pub(crate) use loom::sync::{Arc, Mutex, MutexGuard};

#[cfg(not(loom))]
pub(crate) use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// thread
// ---------------------------------------------------------------------------
pub(crate) mod thread {
    #[cfg(loom)]
    pub(crate) use loom::thread::yield_now;

    // loom has no scoped threads; its models spawn with `loom::thread::spawn`.
    #[cfg(not(loom))]
    pub(crate) use std::thread::{scope, yield_now};
}

// ---------------------------------------------------------------------------
// Barrier: loom does not provide one and the loom models never need it;
// only the std integration tests line workers up on a barrier.
// ---------------------------------------------------------------------------
pub(crate) mod barrier {
    #[cfg(not(loom))]
    pub(crate) use std::sync::Barrier;
}

// Same for the channel the integration tests hand items across threads with.
pub(crate) mod channel {
    #[cfg(not(loom))]
    pub(crate) use std::sync::mpsc::channel;
}

// ---------------------------------------------------------------------------
// OnceLock: only the platform VM layer caches its page size. That layer is
// replaced by a heap mock under loom, so no loom variant is required.
// ---------------------------------------------------------------------------
#[cfg(not(loom))]
pub(crate) use std::sync::OnceLock;
