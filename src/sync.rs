#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering, fence},
    };

    pub(crate) fn wait_while<T>(
        mutex: &Mutex<T>,
        condvar: &Condvar,
        mut condition: impl FnMut(&mut T) -> bool,
    ) {
        let mut guard = mutex.lock().unwrap();
        while condition(&mut guard) {
            guard = condvar.wait(guard).unwrap();
        }
    }

    /// Loom has no timed waits; the model explores the untimed wait instead.
    pub(crate) fn wait_while_for<T>(
        mutex: &Mutex<T>,
        condvar: &Condvar,
        condition: impl FnMut(&mut T) -> bool,
        _timeout: std::time::Duration,
    ) {
        wait_while(mutex, condvar, condition);
    }

    pub(crate) fn notify_all<T>(mutex: &Mutex<T>, condvar: &Condvar) {
        let _guard = mutex.lock().unwrap();
        condvar.notify_all();
    }
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering, fence};
    pub(crate) use parking_lot::{Condvar, Mutex};
    pub(crate) use std::sync::Arc;
    use std::time::{Duration, Instant};

    pub(crate) fn wait_while<T>(
        mutex: &Mutex<T>,
        condvar: &Condvar,
        mut condition: impl FnMut(&mut T) -> bool,
    ) {
        let mut guard = mutex.lock();
        while condition(&mut guard) {
            condvar.wait(&mut guard);
        }
    }

    pub(crate) fn wait_while_for<T>(
        mutex: &Mutex<T>,
        condvar: &Condvar,
        mut condition: impl FnMut(&mut T) -> bool,
        timeout: Duration,
    ) {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = mutex.lock();
        while condition(&mut guard) {
            match deadline {
                Some(deadline) => {
                    if condvar.wait_until(&mut guard, deadline).timed_out() {
                        return;
                    }
                }
                None => condvar.wait(&mut guard),
            }
        }
    }

    pub(crate) fn notify_all<T>(mutex: &Mutex<T>, condvar: &Condvar) {
        // Taking the lock orders the notification after any waiter's
        // condition check, so the wakeup cannot slip in between.
        let _guard = mutex.lock();
        condvar.notify_all();
    }
}

pub(crate) use imp::*;
