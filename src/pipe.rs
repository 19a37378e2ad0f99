// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bounded in-memory pipe and cancellation.
//!
//! A push streams the archive produced by the bundler straight into the biome
//! while it is still being written. The producer and consumer sit on opposite
//! ends of a [`pipe`] and run on separate threads.
//!
//! # Closing
//!
//! Either end may close the pipe with an error, and the opposite end observes
//! that same error on its next read or write. Dropping the writer is a clean
//! end of file for the reader, and dropping the reader fails writes with
//! [`ErrorKind::BrokenPipe`]. A [`CancelToken`] bound to the pipe fails both
//! ends with [`CANCELLED`], waking any blocked thread, so that neither side can
//! wait on the other forever.
//!
//! # Pitfalls
//!
//! Cancellation is reported as [`ErrorKind::Other`], never as
//! [`ErrorKind::Interrupted`]. Helpers like [`Write::write_all`] and
//! [`std::io::copy`] retry interrupted calls, and would spin on a cancelled
//! pipe.

use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    fmt::{Debug, Formatter, Result as FmtResult},
    io::{self, ErrorKind, Read, Write},
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

type Hook = Box<dyn FnOnce() + Send>;

/// Error message of both pipe ends after cancellation.
pub const CANCELLED: &str = "operation cancelled";

/// Cloneable cancellation flag.
///
/// All clones share the same flag. Hooks registered with
/// [`CancelToken::on_cancel`] run exactly once, on the first cancellation.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
}

impl CancelToken {
    /// Construct new token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel token and run its hooks.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let hooks = mem::take(&mut *self.inner.hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Check if token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Run hook on cancellation.
    ///
    /// Runs hook immediately if the token is already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.hooks.lock();
        if self.is_cancelled() {
            drop(hooks);
            hook();
            return;
        }

        hooks.push(Box::new(hook));
    }
}

impl Debug for CancelToken {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Error recorded when one end closes the pipe.
#[derive(Clone, Debug)]
struct Failure {
    kind: ErrorKind,
    message: String,
}

impl Failure {
    fn new(error: &io::Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    fn to_error(&self) -> io::Error {
        io::Error::new(self.kind, self.message.clone())
    }
}

#[derive(Debug, Default)]
struct State {
    buffer: VecDeque<u8>,

    // INVARIANT: `writer_closed` is set once and never cleared.
    writer_closed: bool,
    writer_failure: Option<Failure>,
    reader_failure: Option<Failure>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl Shared {
    fn close_writer(&self, failure: Option<Failure>) {
        let mut state = self.state.lock();
        if !state.writer_closed {
            state.writer_closed = true;
            state.writer_failure = failure;
        }
        self.readable.notify_all();
    }

    fn close_reader(&self, failure: Failure) {
        let mut state = self.state.lock();
        if state.reader_failure.is_none() {
            state.reader_failure = Some(failure);
        }
        state.buffer.clear();
        self.writable.notify_all();
    }

    fn cancel(&self) {
        let failure = Failure {
            kind: ErrorKind::Other,
            message: CANCELLED.into(),
        };

        let mut state = self.state.lock();
        state.buffer.clear();
        state.writer_closed = true;
        state.writer_failure = Some(failure.clone());
        state.reader_failure.get_or_insert(failure);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// Construct bounded pipe holding at most `capacity` bytes in flight.
///
/// Cancelling `cancel` fails both ends of the pipe.
pub fn pipe(capacity: usize, cancel: &CancelToken) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        readable: Condvar::new(),
        writable: Condvar::new(),
        capacity: capacity.max(1),
    });

    let weak: Weak<Shared> = Arc::downgrade(&shared);
    cancel.on_cancel(move || {
        if let Some(shared) = weak.upgrade() {
            shared.cancel();
        }
    });

    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Write end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Close pipe so that reader fails with error once it drains buffered data.
    pub fn close_with_error(self, error: io::Error) {
        self.shared.close_writer(Some(Failure::new(&error)));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(failure) = &state.reader_failure {
                return Err(failure.to_error());
            }

            if state.writer_closed {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "write on closed pipe"));
            }

            let room = self.shared.capacity - state.buffer.len();
            if room > 0 {
                let count = room.min(data.len());
                state.buffer.extend(&data[..count]);
                self.shared.readable.notify_all();
                return Ok(count);
            }

            self.shared.writable.wait(&mut state);
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.close_writer(None);
    }
}

/// Read end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Close pipe so that any further write fails with error.
    pub fn close_with_error(self, error: io::Error) {
        self.shared.close_reader(Failure::new(&error));
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        loop {
            if !state.buffer.is_empty() {
                let count = out.len().min(state.buffer.len());
                for (dst, src) in out.iter_mut().zip(state.buffer.drain(..count)) {
                    *dst = src;
                }
                self.shared.writable.notify_all();
                return Ok(count);
            }

            if state.writer_closed {
                return match &state.writer_failure {
                    Some(failure) => Err(failure.to_error()),
                    None => Ok(0),
                };
            }

            self.shared.readable.wait(&mut state);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.close_reader(Failure {
            kind: ErrorKind::BrokenPipe,
            message: "read end of pipe closed".into(),
        });
    }
}
