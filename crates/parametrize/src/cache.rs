//! Scoped memoization of parametrized reads.
//!
//! While a [`CacheScope`] is alive on the current thread, every
//! [`ParametrizedTensor`](crate::ParametrizedTensor) evaluates its map at most
//! once and serves later reads from the stored tensor. Scopes nest; only the
//! outermost one owns the memo. Dropping it, on return or while unwinding,
//! clears every entry that was filled inside it.

use std::{
    cell::RefCell,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, Weak,
    },
};

use candle_core::Tensor;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE: RefCell<Option<ActiveScope>> = const { RefCell::new(None) };
}

struct ActiveScope {
    id: u64,
    depth: usize,
    filled: Vec<Weak<Mutex<Option<CacheEntry>>>>,
}

/// A memoized map output tagged with the scope that produced it.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    scope: u64,
    value: Tensor,
}

pub(crate) type CacheSlot = std::sync::Arc<Mutex<Option<CacheEntry>>>;

/// RAII guard returned by [`cached`]. Not `Send`: the scope belongs to the
/// thread that opened it.
#[must_use = "the cache is disabled as soon as the scope is dropped"]
pub struct CacheScope {
    _thread_bound: PhantomData<*const ()>,
}

/// Enables caching of parametrized reads until the returned guard is dropped.
pub fn cached() -> CacheScope {
    ACTIVE.with(|active| {
        let mut active = active.borrow_mut();
        match active.as_mut() {
            Some(scope) => scope.depth += 1,
            None => {
                *active = Some(ActiveScope {
                    id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                    depth: 1,
                    filled: Vec::new(),
                })
            }
        }
    });
    CacheScope {
        _thread_bound: PhantomData,
    }
}

/// Runs `f` inside a cache scope.
pub fn with_cache<T>(f: impl FnOnce() -> T) -> T {
    let _scope = cached();
    f()
}

/// Whether a cache scope is open on the current thread.
pub fn is_caching() -> bool {
    ACTIVE.with(|active| active.borrow().is_some())
}

impl Drop for CacheScope {
    fn drop(&mut self) {
        let finished = ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            let scope = active.as_mut()?;
            scope.depth -= 1;
            if scope.depth == 0 {
                active.take()
            } else {
                None
            }
        });
        if let Some(scope) = finished {
            let mut cleared = 0usize;
            for slot in scope.filled.iter().filter_map(Weak::upgrade) {
                let mut entry = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if entry.as_ref().is_some_and(|e| e.scope == scope.id) {
                    *entry = None;
                    cleared += 1;
                }
            }
            log::debug!("parametrization cache scope {} closed: cleared {} entries", scope.id, cleared);
        }
    }
}

/// Returns the memoized value in `slot`, computing and storing it on a miss.
/// Outside a scope this always calls `compute` and leaves `slot` untouched.
pub(crate) fn read_through<E>(
    slot: &CacheSlot,
    compute: impl FnOnce() -> Result<Tensor, E>,
) -> Result<Tensor, E> {
    let Some(scope_id) = ACTIVE.with(|active| active.borrow().as_ref().map(|s| s.id)) else {
        return compute();
    };

    let mut entry = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(hit) = entry.as_ref().filter(|e| e.scope == scope_id) {
        log::debug!("parametrization cache hit: scope {}", scope_id);
        return Ok(hit.value.clone());
    }
    log::debug!("parametrization cache miss: scope {}", scope_id);
    let value = compute()?;
    *entry = Some(CacheEntry {
        scope: scope_id,
        value: value.clone(),
    });
    drop(entry);

    let weak = std::sync::Arc::downgrade(slot);
    ACTIVE.with(|active| {
        if let Some(scope) = active.borrow_mut().as_mut() {
            if !scope.filled.iter().any(|seen| seen.ptr_eq(&weak)) {
                scope.filled.push(weak);
            }
        }
    });
    Ok(value)
}
