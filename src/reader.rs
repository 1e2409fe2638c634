//! Background read loop for [`ReadMode::Cancellable`](crate::ReadMode).
//!
//! One thread performs every read on the device. Callers hand it an owned
//! buffer together with a private reply channel and wait on that channel.
//! `stop` drops both the stop sender and the request sender, which
//!
//! - ends the thread whether it is idle on the request queue or backing off
//!   after a `WouldBlock`,
//! - drops any request still queued or in progress, so the waiting caller's
//!   reply channel disconnects and it reports end-of-stream.
//!
//! The thread checks the stop signal before every read and never reads
//! after observing it.

use std::io;
use std::mem;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::Device;
use crate::error::{is_transient, Result, TunnelError};

struct Request {
    buf: Vec<u8>,
    reply: SyncSender<Reply>,
}

struct Reply {
    buf: Vec<u8>,
    result: io::Result<usize>,
}

/// What a cancellable read produced.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Data(usize),
    Failed(io::Error),
    /// The loop was stopped before a reply came back.
    Stopped,
}

pub(crate) struct ReadLoop {
    requests: Mutex<Option<Sender<Request>>>,
    stop: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    // Reused between reads, taken while a request is in flight.
    scratch: Mutex<Vec<u8>>,
}

impl ReadLoop {
    /// Starts the loop. The device must already be non-blocking so that a
    /// read never parks the thread beyond one backoff interval.
    pub(crate) fn spawn<D: Device + 'static>(
        device: Arc<D>,
        backoff: Duration,
    ) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();
        let name = format!("{}-reader", device.name());

        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || run(device, request_rx, stop_rx, backoff))
            .map_err(TunnelError::ReadLoopSpawn)?;

        Ok(Self {
            requests: Mutex::new(Some(request_tx)),
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
            scratch: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        let Some(requests) = lock(&self.requests).clone() else {
            return ReadOutcome::Stopped;
        };

        let mut scratch = mem::take(&mut *lock(&self.scratch));
        scratch.resize(buf.len(), 0);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let sent = requests.send(Request {
            buf: scratch,
            reply: reply_tx,
        });
        // Only `stop` may keep the queue open.
        drop(requests);
        if sent.is_err() {
            return ReadOutcome::Stopped;
        }

        match reply_rx.recv() {
            Ok(Reply { buf: filled, result }) => {
                let outcome = match result {
                    Ok(n) => {
                        let n = n.min(buf.len());
                        buf[..n].copy_from_slice(&filled[..n]);
                        ReadOutcome::Data(n)
                    }
                    Err(err) => ReadOutcome::Failed(err),
                };
                *lock(&self.scratch) = filled;
                outcome
            }
            Err(_) => ReadOutcome::Stopped,
        }
    }

    /// Raises the stop signal and waits for the thread to exit. Idempotent.
    pub(crate) fn stop(&self) {
        lock(&self.stop).take();
        lock(&self.requests).take();

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!("read loop panicked");
            }
        }
    }
}

impl Drop for ReadLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<D: Device>(
    device: Arc<D>,
    requests: Receiver<Request>,
    stop: Receiver<()>,
    backoff: Duration,
) {
    tracing::debug!(iface = device.name(), "read loop started");

    'main: while let Ok(mut request) = requests.recv() {
        loop {
            if stopped(&stop) {
                break 'main;
            }
            match device.recv(&mut request.buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if is_transient(&err) => match stop.recv_timeout(backoff) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break 'main,
                },
                result => {
                    // The caller may have given up; nothing to do then.
                    let _ = request.reply.send(Reply {
                        buf: request.buf,
                        result,
                    });
                    continue 'main;
                }
            }
        }
    }

    tracing::debug!(iface = device.name(), "read loop stopped");
}

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
