//! Bounded record streams with an in-band end-of-stream sentinel.

use crossbeam_channel::{Receiver, RecvError, Sender};
use std::fmt;

/// Default number of items a stream buffers before `send` blocks.
pub const DEFAULT_CAPACITY: usize = 100;

/// One item on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Record(T),
    /// End of stream. Each consumer observes exactly one, and nothing after it.
    Sentinel,
}

impl<T> Envelope<T> {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Envelope::Sentinel)
    }

    pub fn into_record(self) -> Option<T> {
        match self {
            Envelope::Record(record) => Some(record),
            Envelope::Sentinel => None,
        }
    }
}

/// The other side of the stream has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// Create a bounded stream. A capacity of zero is raised to one.
pub fn bounded<T>(capacity: usize) -> (StreamSender<T>, StreamReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (StreamSender { tx }, StreamReceiver { rx })
}

/// Producing half of a stream. Cloning shares the same underlying queue.
pub struct StreamSender<T> {
    tx: Sender<Envelope<T>>,
}

impl<T> Clone for StreamSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> StreamSender<T> {
    /// Send one record, blocking while the stream is full.
    pub fn send(&self, record: T) -> Result<(), Disconnected> {
        self.tx
            .send(Envelope::Record(record))
            .map_err(|_| Disconnected)
    }

    /// Emit the end-of-stream sentinel and give up this handle.
    ///
    /// Consuming `self` means no record can be sent through this handle afterwards.
    pub fn finish(self) -> Result<(), Disconnected> {
        self.send_sentinel()
    }

    pub(crate) fn send_sentinel(&self) -> Result<(), Disconnected> {
        self.tx.send(Envelope::Sentinel).map_err(|_| Disconnected)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

/// Consuming half of a stream.
///
/// Cloneable: every item is delivered to exactly one of the clones.
pub struct StreamReceiver<T> {
    rx: Receiver<Envelope<T>>,
}

impl<T> Clone for StreamReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> StreamReceiver<T> {
    /// Block until the next item arrives.
    pub fn recv(&self) -> Result<Envelope<T>, Disconnected> {
        self.rx.recv().map_err(|_: RecvError| Disconnected)
    }

    /// Iterate records until the sentinel (or a disconnect) ends the stream.
    pub fn records(&self) -> Records<'_, T> {
        Records {
            rx: self,
            done: false,
            saw_sentinel: false,
        }
    }

    pub(crate) fn channel(&self) -> &Receiver<Envelope<T>> {
        &self.rx
    }
}

/// Iterator returned by [`StreamReceiver::records`].
pub struct Records<'a, T> {
    rx: &'a StreamReceiver<T>,
    done: bool,
    saw_sentinel: bool,
}

impl<T> Records<'_, T> {
    /// Whether iteration ended on a sentinel rather than a disconnect.
    pub fn ended_cleanly(&self) -> bool {
        self.saw_sentinel
    }
}

impl<T> Iterator for Records<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        match self.rx.recv() {
            Ok(Envelope::Record(record)) => Some(record),
            Ok(Envelope::Sentinel) => {
                self.done = true;
                self.saw_sentinel = true;
                None
            }
            Err(Disconnected) => {
                self.done = true;
                None
            }
        }
    }
}
