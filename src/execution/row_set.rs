//! Bounded row buffers between step copies
//!
//! A row set connects exactly one producer copy with one consumer copy. It is
//! a bounded FIFO that blocks the producer when full (backpressure) and the
//! consumer when empty. Two flags travel next to the rows:
//!
//! * `done`: the producer will not send more rows; the consumer drains what
//!   is buffered and then sees end of stream
//! * `errored`: the run is aborting; every blocked or future put/get returns
//!   an error at once
//!
//! Both flags also disconnect a zero-capacity signal channel so that threads
//! blocked in `put`/`get` wake up immediately instead of polling.

use crate::core::error::RowSetError;
use crate::core::row::{Row, RowMeta};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

/// Outcome of a non-blocking or timed read
#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Row(Row),
    /// Nothing buffered right now, the producer is still active
    Empty,
    EndOfStream,
}

pub struct RowSet {
    name: String,
    origin: (String, usize),
    destination: (String, usize),
    capacity: usize,
    sender: Sender<Row>,
    receiver: Receiver<Row>,
    signal_tx: Mutex<Option<Sender<()>>>,
    signal_rx: Receiver<()>,
    done: AtomicBool,
    errored: AtomicBool,
    row_meta: OnceLock<Arc<RowMeta>>,
}

impl RowSet {
    /// A row set between two step copies
    pub fn between(
        from_step: &str,
        from_copy: usize,
        to_step: &str,
        to_copy: usize,
        capacity: usize,
    ) -> Self {
        // a zero sized buffer would deadlock a step that writes before it reads
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        let (signal_tx, signal_rx) = bounded(0);

        Self {
            name: format!("{}.{} - {}.{}", from_step, from_copy, to_step, to_copy),
            origin: (from_step.to_string(), from_copy),
            destination: (to_step.to_string(), to_copy),
            capacity,
            sender,
            receiver,
            signal_tx: Mutex::new(Some(signal_tx)),
            signal_rx,
            done: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            row_meta: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin_step(&self) -> &str {
        &self.origin.0
    }

    pub fn origin_copy(&self) -> usize {
        self.origin.1
    }

    pub fn destination_step(&self) -> &str {
        &self.destination.0
    }

    pub fn destination_copy(&self) -> usize {
        self.destination.1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows currently buffered
    pub fn size(&self) -> usize {
        self.receiver.len()
    }

    /// Layout of the rows, fixed by the first `put`
    pub fn row_meta(&self) -> Option<Arc<RowMeta>> {
        self.row_meta.get().cloned()
    }

    /// Enqueues a row, blocking while the buffer is full
    pub fn put(&self, meta: &Arc<RowMeta>, row: Row) -> Result<(), RowSetError> {
        self.check_writable()?;

        let bound = self.row_meta.get_or_init(|| Arc::clone(meta));
        if !Arc::ptr_eq(bound, meta) && !bound.same_shape(meta) {
            return Err(RowSetError::SchemaDrift {
                row_set: self.name.clone(),
            });
        }

        select! {
            send(self.sender, row) -> res => res.map_err(|_| RowSetError::Errored(self.name.clone())),
            recv(self.signal_rx) -> _ => Err(self.closed_error()),
        }
    }

    /// Dequeues the next row, blocking while the buffer is empty
    ///
    /// `Ok(None)` means the producer is done and every buffered row was read.
    pub fn get(&self) -> Result<Option<Row>, RowSetError> {
        self.check_readable()?;

        select! {
            recv(self.receiver) -> msg => Ok(msg.ok()),
            recv(self.signal_rx) -> _ => self.after_signal(),
        }
    }

    /// Like [`RowSet::get`] but gives up after `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<Fetch, RowSetError> {
        self.check_readable()?;

        select! {
            recv(self.receiver) -> msg => Ok(msg.map(Fetch::Row).unwrap_or(Fetch::EndOfStream)),
            recv(self.signal_rx) -> _ => self.after_signal().map(|row| row.map(Fetch::Row).unwrap_or(Fetch::EndOfStream)),
            default(timeout) => Ok(Fetch::Empty),
        }
    }

    /// Reads a row only if one is buffered
    pub fn try_get(&self) -> Result<Fetch, RowSetError> {
        self.get_timeout(Duration::ZERO)
    }

    /// Marks the end of the stream; idempotent
    pub fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.disconnect_signal();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Aborts the row set, waking every blocked reader and writer
    pub fn set_errored(&self) {
        self.errored.store(true, Ordering::SeqCst);
        self.disconnect_signal();
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), RowSetError> {
        if self.is_errored() || self.is_done() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<(), RowSetError> {
        if self.is_errored() {
            return Err(RowSetError::Errored(self.name.clone()));
        }
        Ok(())
    }

    fn closed_error(&self) -> RowSetError {
        if self.is_errored() {
            RowSetError::Errored(self.name.clone())
        } else {
            RowSetError::Done(self.name.clone())
        }
    }

    fn after_signal(&self) -> Result<Option<Row>, RowSetError> {
        if self.is_errored() {
            return Err(RowSetError::Errored(self.name.clone()));
        }
        // done: drain what the producer left behind
        match self.receiver.try_recv() {
            Ok(row) => Ok(Some(row)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn disconnect_signal(&self) {
        self.signal_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for RowSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSet")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("done", &self.is_done())
            .field("errored", &self.is_errored())
            .finish()
    }
}
