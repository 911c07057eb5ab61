//! Single-slot request/response channel.
//!
//! A caller takes the channel's spin lock, writes its request into the
//! request region and raises `request_ready`. The serving side claims the
//! request, writes the answer into the response region and raises
//! `response_ready`. The caller copies the response out and releases the
//! lock for the next caller.
//!
//! ```text
//! caller                        server
//!   lock 0→1
//!   write request
//!   request_ready = 1 ────────→ claim 1→2
//!                               verify, run handler
//!   wait ←──────────────────── response_ready = 1
//!   verify, copy response
//!   request_ready = 0
//!   lock 1→0
//! ```
//!
//! Each region holds one message framed exactly like an arena message: the
//! 16-byte header with [`MAGIC`], length, XXH32 checksum and
//! [`FLAG_COMMITTED`], then the payload. Both sides check the frame with
//! [`decode_at`] before touching the payload, so a damaged region surfaces
//! as [`ArenaError::BadMagic`] or [`ArenaError::ChecksumMismatch`].
//!
//! Waits spin briefly and then park on a condition variable.

use super::{ArenaError, FLAG_COMMITTED, HEADER_SIZE, MAGIC, MessageHeader, checksum, decode_at};
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default size of each region: 64 KiB.
pub const DEFAULT_REGION_SIZE: usize = 64 * 1024;

const SPIN_LIMIT: usize = 128;

const EMPTY: u32 = 0;
const READY: u32 = 1;
const CLAIMED: u32 = 2;

/// A blocking request/response mailbox shared between threads.
///
/// # Examples
///
/// ```
/// use reqforge_core::ipc::SharedChannel;
/// use std::sync::Arc;
///
/// let channel = Arc::new(SharedChannel::new(1024, 1024));
///
/// let server = {
///     let channel = channel.clone();
///     std::thread::spawn(move || {
///         channel.serve_one(|req| req.to_ascii_uppercase());
///     })
/// };
///
/// assert_eq!(channel.call(b"ping").unwrap(), b"PING");
/// server.join().unwrap();
/// ```
pub struct SharedChannel {
    lock: AtomicU32,
    request_ready: AtomicU32,
    response_ready: AtomicU32,
    request: UnsafeCell<Box<[u8]>>,
    response: UnsafeCell<Box<[u8]>>,
    request_capacity: usize,
    response_capacity: usize,
    /// Set by the server instead of a response frame when it cannot answer.
    fault: Mutex<Option<ArenaError>>,
    mutex: Mutex<()>,
    cond: Condvar,
}

// SAFETY: the request region is written only by the lock holder before
// `request_ready` is released, the response region only by the server that
// claimed the request before `response_ready` is released.
unsafe impl Sync for SharedChannel {}

/// Writes `payload` behind a committed header at the start of `region`.
/// The caller has checked that it fits.
fn write_frame(region: &mut [u8], payload: &[u8]) {
    let header = MessageHeader {
        magic: MAGIC,
        length: payload.len() as u32,
        checksum: checksum(payload),
        flags: FLAG_COMMITTED,
    };
    region[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    region[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
}

/// Largest payload a region of `capacity` bytes can frame.
fn max_payload(capacity: usize) -> usize {
    capacity
        .saturating_sub(HEADER_SIZE)
        .min(u32::MAX as usize)
}

impl SharedChannel {
    /// Creates a channel with the given region sizes. Each region also holds
    /// a 16-byte header, so the largest payload is 16 bytes smaller.
    pub fn new(request_capacity: usize, response_capacity: usize) -> Self {
        Self {
            lock: AtomicU32::new(0),
            request_ready: AtomicU32::new(EMPTY),
            response_ready: AtomicU32::new(0),
            request: UnsafeCell::new(vec![0; request_capacity].into_boxed_slice()),
            response: UnsafeCell::new(vec![0; response_capacity].into_boxed_slice()),
            request_capacity,
            response_capacity,
            fault: Mutex::new(None),
            mutex: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Size of the request region.
    pub fn request_capacity(&self) -> usize {
        self.request_capacity
    }

    /// Size of the response region.
    pub fn response_capacity(&self) -> usize {
        self.response_capacity
    }

    /// Whether a request is waiting to be served.
    pub fn has_request(&self) -> bool {
        self.request_ready.load(Ordering::Acquire) == READY
    }

    /// Sends `request` and blocks until the server answers.
    ///
    /// Callers are serialized; a second caller waits until the first has its
    /// response. A response whose frame fails verification is returned as the
    /// matching [`ArenaError`].
    pub fn call(&self, request: &[u8]) -> Result<Vec<u8>, ArenaError> {
        let max = max_payload(self.request_capacity);
        if request.len() > max {
            return Err(ArenaError::TooLarge {
                size: request.len(),
                max,
            });
        }

        let _guard = self.lock();
        self.publish_request(request);
        self.collect_response()
    }

    /// Frames `request` into the request region and raises `request_ready`.
    /// The caller holds the lock.
    fn publish_request(&self, request: &[u8]) {
        // SAFETY: we hold the lock and no request is outstanding.
        unsafe { write_frame(&mut *self.request.get(), request) };
        self.response_ready.store(0, Ordering::Relaxed);
        self.request_ready.store(READY, Ordering::Release);
        self.notify();
    }

    /// Waits for the answer to the published request and resets the slot.
    fn collect_response(&self) -> Result<Vec<u8>, ArenaError> {
        self.wait_until(|| self.response_ready.load(Ordering::Acquire) == 1);

        let result = match self.fault.lock().take() {
            Some(err) => Err(err),
            // SAFETY: the server finished writing before releasing
            // `response_ready`, and nobody writes again until we clear it.
            None => unsafe { decode_at(&*self.response.get(), 0).map(<[u8]>::to_vec) },
        };

        self.response_ready.store(0, Ordering::Relaxed);
        self.request_ready.store(EMPTY, Ordering::Release);
        result
    }

    /// Serves one request if one is waiting.
    ///
    /// Returns `false` without blocking when there is nothing to serve.
    pub fn try_serve<F>(&self, handler: F) -> bool
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        self.claim_and_serve(&mut Some(handler))
    }

    /// Blocks until a request arrives and serves it.
    pub fn serve_one<F>(&self, handler: F)
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let mut handler = Some(handler);
        while handler.is_some() {
            self.wait_until(|| self.has_request());
            self.claim_and_serve(&mut handler);
        }
    }

    /// Like [`serve_one`](Self::serve_one), but gives up after `timeout`.
    ///
    /// Returns whether a request was served.
    pub fn serve_timeout<F>(&self, timeout: Duration, handler: F) -> bool
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let deadline = Instant::now() + timeout;
        let mut handler = Some(handler);
        while handler.is_some() {
            if !self.wait_deadline(deadline, || self.has_request()) {
                return false;
            }
            self.claim_and_serve(&mut handler);
        }
        true
    }

    /// Claims a ready request and answers it with `handler`, which is only
    /// taken when the claim succeeds. A request frame that fails
    /// verification never reaches the handler; the caller gets the error.
    fn claim_and_serve<F>(&self, handler: &mut Option<F>) -> bool
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        if handler.is_none()
            || self
                .request_ready
                .compare_exchange(READY, CLAIMED, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
        {
            return false;
        }
        let Some(handler) = handler.take() else {
            return false;
        };

        // SAFETY: the claim gives this thread the request until it answers.
        let fault = match unsafe { decode_at(&*self.request.get(), 0) } {
            Ok(request) => {
                debug!("Serving {} byte request", request.len());
                let response = handler(request);
                let max = max_payload(self.response_capacity);
                if response.len() > max {
                    warn!(
                        "Response of {} bytes exceeds the {} byte region",
                        response.len(),
                        max
                    );
                    Some(ArenaError::ResponseTooLarge {
                        size: response.len(),
                        max,
                    })
                } else {
                    // SAFETY: the caller does not read the region until
                    // `response_ready` is released below.
                    unsafe { write_frame(&mut *self.response.get(), &response) };
                    None
                }
            }
            Err(e) => {
                warn!("Rejected request frame: {}", e);
                Some(e)
            }
        };

        *self.fault.lock() = fault;
        self.response_ready.store(1, Ordering::Release);
        self.notify();
        true
    }

    fn lock(&self) -> LockGuard<'_> {
        loop {
            if self
                .lock
                .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return LockGuard { channel: self };
            }
            self.wait_until(|| self.lock.load(Ordering::Relaxed) == 0);
        }
    }

    fn notify(&self) {
        let _guard = self.mutex.lock();
        self.cond.notify_all();
    }

    fn wait_until(&self, ready: impl Fn() -> bool) {
        for _ in 0..SPIN_LIMIT {
            if ready() {
                return;
            }
            std::hint::spin_loop();
        }
        let mut guard = self.mutex.lock();
        while !ready() {
            self.cond.wait(&mut guard);
        }
    }

    fn wait_deadline(&self, deadline: Instant, ready: impl Fn() -> bool) -> bool {
        for _ in 0..SPIN_LIMIT {
            if ready() {
                return true;
            }
            std::hint::spin_loop();
        }
        let mut guard = self.mutex.lock();
        while !ready() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return ready();
            }
        }
        true
    }
}

impl Default for SharedChannel {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_SIZE, DEFAULT_REGION_SIZE)
    }
}

impl fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannel")
            .field("request_capacity", &self.request_capacity())
            .field("response_capacity", &self.response_capacity())
            .field("locked", &(self.lock.load(Ordering::Relaxed) == 1))
            .finish()
    }
}

struct LockGuard<'a> {
    channel: &'a SharedChannel,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.channel.lock.store(0, Ordering::Release);
        self.channel.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_serve_without_request() {
        let channel = SharedChannel::default();
        assert!(!channel.has_request());
        assert!(!channel.try_serve(|_| Vec::new()));
    }

    #[test]
    fn test_serve_timeout_expires() {
        let channel = SharedChannel::new(16, 16);
        assert!(!channel.serve_timeout(Duration::from_millis(20), |_| Vec::new()));
    }

    #[test]
    fn test_request_too_large() {
        let channel = SharedChannel::new(20, 64);
        assert_eq!(
            channel.call(b"too long").unwrap_err(),
            ArenaError::TooLarge { size: 8, max: 4 }
        );
    }

    #[test]
    fn test_response_too_large() {
        let channel = Arc::new(SharedChannel::new(32, 20));
        let server = {
            let channel = channel.clone();
            thread::spawn(move || channel.serve_one(|_| vec![0; 10]))
        };

        assert_eq!(
            channel.call(b"hi").unwrap_err(),
            ArenaError::ResponseTooLarge { size: 10, max: 4 }
        );
        server.join().unwrap();
    }

    #[test]
    fn test_regions_hold_verified_frames() {
        let channel = SharedChannel::new(64, 64);
        let _guard = channel.lock();
        channel.publish_request(b"ping");

        // SAFETY: single-threaded test; nobody else touches the regions.
        let request = unsafe { (*channel.request.get()).to_vec() };
        let header = MessageHeader::from_bytes(&request).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.length, 4);
        assert_eq!(header.checksum, checksum(b"ping"));
        assert_eq!(header.flags, FLAG_COMMITTED);

        assert!(channel.try_serve(|_| b"pong".to_vec()));
        assert_eq!(channel.collect_response().unwrap(), b"pong");
    }

    #[test]
    fn test_corrupt_request_never_reaches_handler() {
        let channel = SharedChannel::new(64, 64);
        let _guard = channel.lock();
        channel.publish_request(b"ping");
        // SAFETY: single-threaded test; nobody else touches the regions.
        unsafe { (*channel.request.get())[HEADER_SIZE] ^= 0xFF };

        assert!(channel.try_serve(|_: &[u8]| -> Vec<u8> {
            unreachable!("a damaged request was handed to the handler")
        }));
        assert!(matches!(
            channel.collect_response(),
            Err(ArenaError::ChecksumMismatch { .. })
        ));
        assert!(!channel.has_request());
    }

    #[test]
    fn test_corrupt_response_is_rejected() {
        let channel = SharedChannel::new(64, 64);
        let _guard = channel.lock();

        channel.publish_request(b"ping");
        assert!(channel.try_serve(|_| b"pong".to_vec()));
        // SAFETY: single-threaded test; nobody else touches the regions.
        unsafe { (*channel.response.get())[HEADER_SIZE + 1] ^= 0x01 };
        assert!(matches!(
            channel.collect_response(),
            Err(ArenaError::ChecksumMismatch { .. })
        ));

        channel.publish_request(b"ping");
        assert!(channel.try_serve(|_| b"pong".to_vec()));
        // SAFETY: as above.
        unsafe { (*channel.response.get())[0] = 0 };
        assert!(matches!(
            channel.collect_response(),
            Err(ArenaError::BadMagic { offset: 0, .. })
        ));
    }

    #[test]
    fn test_many_callers_are_serialized() {
        let channel = Arc::new(SharedChannel::new(64, 64));
        let callers = 4;
        let per_caller = 25;

        let server = {
            let channel = channel.clone();
            thread::spawn(move || {
                for _ in 0..callers * per_caller {
                    channel.serve_one(|req| {
                        let mut out = b"echo:".to_vec();
                        out.extend_from_slice(req);
                        out
                    });
                }
            })
        };

        let handles: Vec<_> = (0..callers)
            .map(|c| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for i in 0..per_caller {
                        let msg = format!("{c}-{i}");
                        let reply = channel.call(msg.as_bytes()).unwrap();
                        assert_eq!(reply, format!("echo:{msg}").into_bytes());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        server.join().unwrap();
        assert!(!channel.has_request());
    }
}
