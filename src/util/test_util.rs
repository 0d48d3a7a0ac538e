use std::sync::Mutex;

lazy_static! {
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

/// Run a test serially. Tests that mutate `MockVM`'s global state (the
/// literal pool, generations, bracket and flush counters) have to go
/// through this, as cargo runs tests in parallel by default.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test panics, the lock is poisoned. We ignore poisoning so the
    // remaining tests still run (each test resets the mock state itself).
    let _guard = match SERIAL_TEST_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f();
}
