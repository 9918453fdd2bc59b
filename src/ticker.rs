//! Background one-second tick source.
//!
//! A worker thread sleeps for the period and sends the current wall-clock
//! time over a one-slot channel, so at most one tick waits for a reader.
//! The thread exits when the handle is stopped or dropped, or when the
//! receiving side goes away.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Handle to a running ticker thread
pub struct Ticker {
    rx: Receiver<DateTime<Utc>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn start(period: Duration) -> Self {
        let (tx, rx) = mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            // Sleep in short slices so a stop request is honored promptly
            let slice = period.min(Duration::from_millis(50));
            loop {
                let mut waited = Duration::ZERO;
                while waited < period {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(slice);
                    waited += slice;
                }
                if flag.load(Ordering::Relaxed) {
                    return;
                }
                match tx.try_send(Utc::now()) {
                    // unread tick still pending; drop this one
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
        });

        Self {
            rx,
            stop,
            handle: Some(handle),
        }
    }

    /// Wait up to `timeout` for the next tick
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DateTime<Utc>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Discard a tick left over from before the reader showed up
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Cancel the interval and wait for the thread to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
