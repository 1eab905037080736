use log::warn;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// A reader-writer lock that reports suspiciously long acquisitions.
///
/// Module locks in silo are expected to be held briefly and in a fixed
/// order (consensus before host before gateway). An acquisition that stalls
/// past `stall_warning` indicates a hold-time or ordering bug, so a
/// diagnostic is logged and the caller then blocks normally. The delay is a
/// construction parameter, typically taken from the module's params.
pub struct TimedRwLock<T> {
    inner: RwLock<T>,
    name: &'static str,
    stall_warning: Duration,
}

impl<T> TimedRwLock<T> {
    pub fn new(value: T, name: &'static str, stall_warning: Duration) -> Self {
        Self { inner: RwLock::new(value), name, stall_warning }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        if let Some(guard) = self.inner.try_read_for(self.stall_warning) {
            return guard;
        }
        warn!("read lock on {} stalled for more than {:?}", self.name, self.stall_warning);
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        if let Some(guard) = self.inner.try_write_for(self.stall_warning) {
            return guard;
        }
        warn!("write lock on {} stalled for more than {:?}", self.name, self.stall_warning);
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_round_trip() {
        let lock = TimedRwLock::new(5u64, "test", Duration::from_millis(100));
        {
            let r1 = lock.read();
            let r2 = lock.read();
            assert_eq!(*r1 + *r2, 10);
        }
        *lock.write() += 1;
        assert_eq!(*lock.read(), 6);
    }
}
