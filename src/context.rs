use std::{
    mem::take,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Cancellation token shared between a Supervisor's worker thread and whoever
/// controls it (the Fleet Manager, a signal handler). `T` carries the reason
/// for cancellation (e.g. a stop vs. restart request).
#[derive(Debug, Clone, Default)]
pub struct Context<T>(Arc<(Mutex<T>, Condvar)>);

impl<T> Context<T>
where
    T: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation signal. All threads that are waiting for this signal (i.e. were passed this [`Context`] are notified so they unblock and finish execution, cancelling the processes.
    pub fn cancel_all(&self, val: T) -> Result<(), PoisonError<MutexGuard<'_, T>>> /* this is the error type returned by a failed `lock()` */
    {
        let (lck, cvar) = &*self.0;
        let mut lck = lck.lock()?;
        *lck = val;
        cvar.notify_all();
        Ok(())
    }

    // waits for and update in the condvar returning the modified value and setting the default in
    // the internal mutex
    pub fn wait_condvar(&self) -> Result<T, PoisonError<MutexGuard<'_, T>>> /* this is the error type returned by a failed `lock()` */
    {
        let (lck, cvar) = &*self.0;
        let mut lck = lck.lock()?;
        lck = cvar.wait(lck)?;
        let current = take(&mut *lck);
        Ok(current)
    }

    /// Sleeps up to `dur`, waking early if cancelled. Returns `true` if woken by
    /// cancellation, `false` if the timeout elapsed first. This is the primitive
    /// behind every interruptible sleep in the Supervisor tick loop.
    pub fn wait_timeout_cancelled(&self, dur: Duration) -> bool
    where
        T: PartialEq,
    {
        let (lck, cvar) = &*self.0;
        let guard = match lck.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let default = T::default();
        if *guard != default {
            return true;
        }
        let (guard, timeout_result) = match cvar.wait_timeout(guard, dur) {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        };
        !timeout_result.timed_out() || *guard != default
    }

    pub(crate) fn get_lock_cvar(&self) -> &(Mutex<T>, Condvar) {
        &self.0
    }

    /// Resets the Mutex to the default T value
    pub fn reset(&self) -> Result<(), PoisonError<MutexGuard<'_, T>>> /* this is the error type returned by a failed `lock()` */
    {
        let (lck, _) = &*self.0;
        let mut lck = lck.lock()?;
        *lck = <T as Default>::default();
        Ok(())
    }

    /// Reads the current signal and resets it to the default, without
    /// blocking. Used after [`Self::wait_timeout_cancelled`] returns `true`
    /// to find out which signal woke the waiter.
    pub fn take(&self) -> T {
        let (lck, _) = &*self.0;
        let mut lck = match lck.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        take(&mut *lck)
    }

    /// Non-blocking check of whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool
    where
        T: PartialEq,
    {
        let (lck, _) = &*self.0;
        *lck.lock().unwrap() != T::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn take_reads_and_resets_signal() {
        let ctx: Context<bool> = Context::new();
        ctx.cancel_all(true).unwrap();
        assert!(ctx.take());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn wait_timeout_elapses_when_not_cancelled() {
        let ctx: Context<bool> = Context::new();
        let cancelled = ctx.wait_timeout_cancelled(Duration::from_millis(20));
        assert!(!cancelled);
    }

    #[test]
    fn wait_timeout_returns_early_when_cancelled() {
        let ctx: Context<bool> = Context::new();
        let ctx_clone = ctx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            ctx_clone.cancel_all(true).unwrap();
        });
        let cancelled = ctx.wait_timeout_cancelled(Duration::from_secs(5));
        assert!(cancelled);
    }

    #[test]
    fn is_cancelled_reflects_state() {
        let ctx: Context<bool> = Context::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel_all(true).unwrap();
        assert!(ctx.is_cancelled());
    }
}
