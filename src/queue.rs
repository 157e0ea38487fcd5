//! Shared command queues & audio ring buffer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// A command a worker thread executes inside its own step.
pub type Command = Box<dyn FnOnce() + Send>;

/// Bounded MPSC command queue: producers push from any thread, the owning
/// thread pops inside its step loop. Wraps `crossbeam_channel::bounded`
/// with a boxed-closure payload.
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        CommandQueue { tx, rx }
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender { tx: self.tx.clone() }
    }

    /// Executes `f` under `mtx`'s lock and notifies `cv` afterwards — used for
    /// config-change barriers and savestate rendezvous.
    pub fn push_and_signal(
        &self,
        f: impl FnOnce() + Send + 'static,
        mtx: &Mutex<bool>,
        cv: &Condvar,
    ) {
        let _ = self.tx.send(Box::new(f));
        let mut done = mtx.lock().unwrap();
        *done = true;
        cv.notify_all();
    }

    /// Blocks until a command arrives, or `timeout` elapses (returns `None`).
    pub fn wait_and_pop(&self, timeout: Duration) -> Option<Command> {
        match self.rx.recv_timeout(timeout) {
            Ok(cmd) => Some(cmd),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains every command currently queued without blocking.
    pub fn try_and_pop_all(&self) -> Vec<Command> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => out.push(cmd),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn receiver(&self) -> &Receiver<Command> {
        &self.rx
    }
}

#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Returns `Err` when the queue is full — a program invariant violation
    /// resource-exhaustion policy, surfaced rather than blocked on.
    pub fn push(&self, f: impl FnOnce() + Send + 'static) -> Result<(), crate::error::CoreError> {
        self.tx.try_send(Box::new(f)).map_err(|_| crate::error::CoreError::ResourceExhaustion {
            what: "command queue full".into(),
        })
    }
}

/// Single-producer/single-consumer byte ring feeding the host audio device.
/// Capacity is fixed at construction; `write` drops the newest bytes past
/// capacity (callers should `shrink_data` proactively instead).
pub struct AudioRing {
    buf: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl AudioRing {
    pub fn new(capacity: usize) -> Self {
        AudioRing { buf: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends bytes, returning the number actually written (may be less than
    /// `data.len()` if the ring is full).
    pub fn write(&self, data: &[u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        let room = self.capacity.saturating_sub(buf.len());
        let n = data.len().min(room);
        buf.extend(&data[..n]);
        n
    }

    /// Reads up to `out.len()` bytes, returning the number actually read.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        let n = out.len().min(buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.pop_front().unwrap();
        }
        n
    }

    pub fn get_read_avail(&self) -> usize {
        self.buf.lock().unwrap().len()
    }

    pub fn get_write_avail(&self) -> usize {
        self.capacity - self.get_read_avail()
    }

    /// Drops oldest bytes until only `keep` remain — overflow recovery.
    pub fn shrink_data(&self, keep: usize) {
        let mut buf = self.buf.lock().unwrap();
        while buf.len() > keep {
            buf.pop_front();
        }
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ring_conserves_capacity_invariant() {
        let ring = AudioRing::new(16);
        ring.write(&[1, 2, 3, 4, 5]);
        assert_eq!(ring.get_read_avail() + ring.get_write_avail(), ring.capacity());
        let mut out = [0u8; 3];
        ring.read(&mut out);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ring.get_read_avail() + ring.get_write_avail(), ring.capacity());
    }

    #[test]
    fn ring_write_past_capacity_is_bounded() {
        let ring = AudioRing::new(4);
        let written = ring.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(written, 4);
        assert_eq!(ring.get_read_avail(), 4);
    }

    #[test]
    fn ring_shrink_data_drops_oldest() {
        let ring = AudioRing::new(8);
        ring.write(&[1, 2, 3, 4, 5]);
        ring.shrink_data(2);
        let mut out = [0u8; 2];
        ring.read(&mut out);
        assert_eq!(out, [4, 5]);
    }

    #[test]
    fn command_queue_round_trips_commands() {
        let q = CommandQueue::new(4);
        let sender = q.sender();
        sender.push(|| {}).unwrap();
        let popped = q.wait_and_pop(Duration::from_millis(100));
        assert!(popped.is_some());
    }

    #[test]
    fn command_queue_try_and_pop_all_drains() {
        let q = CommandQueue::new(4);
        let sender = q.sender();
        sender.push(|| {}).unwrap();
        sender.push(|| {}).unwrap();
        assert_eq!(q.try_and_pop_all().len(), 2);
        assert!(q.try_and_pop_all().is_empty());
    }
}
