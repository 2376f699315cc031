use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Create a linked cancellation handle and token.
///
/// Nothing is ever sent on the channel. Cancellation is the sender going
/// away, so dropping the handle (including on panic unwind) cancels too.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = bounded::<()>(0);
    (CancelHandle { tx: Some(tx) }, CancelToken { rx })
}

/// Owner side. Held by the capture loop.
#[derive(Debug)]
pub struct CancelHandle {
    tx: Option<Sender<()>>,
}

impl CancelHandle {
    pub fn cancel(&mut self) {
        self.tx.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_none()
    }
}

/// Worker side.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// Sleep up to `timeout`, returning early with `true` on cancellation.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
            Ok(()) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.wait(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn wait_times_out_while_live() {
        let (_handle, token) = cancel_pair();
        let started = Instant::now();
        assert!(!token.wait(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_wakes_a_waiting_worker() {
        let (mut handle, token) = cancel_pair();
        let waiter = std::thread::spawn(move || {
            let started = Instant::now();
            let cancelled = token.wait(Duration::from_secs(10));
            (cancelled, started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert!(handle.is_cancelled());
        let (cancelled, elapsed) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let (handle, token) = cancel_pair();
        drop(handle);
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(1)));
    }
}
