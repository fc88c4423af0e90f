/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The exitless request ring.
//!
//! A bounded, lock-free, multi-producer multi-consumer queue of pointers to
//! [`RpcRequest`] descriptors. Producers are enclave threads submitting
//! OCALLs without leaving the enclave; consumers are untrusted RPC worker
//! threads servicing them. The ring itself lives in host memory: on the
//! enclave side it is reached through a validated [`QueueDescriptor`], on
//! the host side it can be allocated in-process with [`bounded`].
//!
//! Producers never block: [`Sender::try_send`] fails with
//! [`TrySendError::QueueFull`] and the caller is expected to fall back to a
//! direct enclave exit. Consumers may block through a [`Synchronizer`],
//! which abstracts how a waiting worker is parked and woken.
//!
//! No FIFO order is promised between requests of different threads. A
//! single thread observes its own requests in order because it blocks on
//! each request's completion lock before issuing the next.

use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::Arc;

use ocall_abi::{QueueDescriptor, RpcRequest};

use self::fifo::{Fifo, FifoBuffer};

mod fifo;
#[cfg(test)]
mod test_support;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueEvent {
    NotEmpty,
    NotFull,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError {
    /// All workers are busy with outstanding requests and the ring is full.
    /// Not an error at the call site: the submitter falls back to a direct
    /// enclave exit instead of waiting.
    QueueFull,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    QueueEmpty,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RecvError {
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SynchronizationError {
    ChannelClosed,
}

/// How a consumer parks when the ring is empty, and how either side pokes
/// the other. The enclave-side producer never waits, so its synchronizer
/// only ever `notify`s.
pub trait Synchronizer: Clone {
    /// Block execution until the specified event happens.
    fn wait(&self, event: QueueEvent) -> Result<(), SynchronizationError>;

    /// Notify all waiters blocked on the specified event for the same ring.
    fn notify(&self, event: QueueEvent);
}

/// Allocate a ring of `len` slots (a power of two) in this process's memory
/// and return both endpoints. Host-side use; the enclave side attaches with
/// [`Sender::from_descriptor`].
pub fn bounded<S: Synchronizer>(len: usize, s: S) -> (Sender<S>, Receiver<S>) {
    let arc = Arc::new(FifoBuffer::new(len));
    let inner = Fifo::from_arc(arc);
    let tx = Sender { inner: inner.clone(), synchronizer: s.clone() };
    let rx = Receiver { inner, synchronizer: s };
    (tx, rx)
}

pub struct Sender<S> {
    inner: Fifo,
    synchronizer: S,
}

pub struct Receiver<S> {
    inner: Fifo,
    synchronizer: S,
}

unsafe impl<S: Send> Send for Sender<S> {}
unsafe impl<S: Sync> Sync for Sender<S> {}

impl<S: Clone> Clone for Sender<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            synchronizer: self.synchronizer.clone(),
        }
    }
}

impl<S: Synchronizer> Sender<S> {
    /// Attach a producer endpoint to a ring described by `d`.
    ///
    /// # Safety
    ///
    /// The caller must ensure the following:
    ///
    /// * `d.data` points to `d.len` valid pointer slots and `d.offsets` to a
    ///   valid `AtomicUsize`, both alive for the lifetime of the endpoint;
    /// * on the enclave side, both regions have been verified to lie
    ///   entirely outside the enclave before this call;
    /// * the synchronizer knows how to reach the consumers of this ring.
    pub unsafe fn from_descriptor(d: QueueDescriptor, synchronizer: S) -> Self {
        Self {
            inner: Fifo::from_descriptor(d),
            synchronizer,
        }
    }

    /// Publish a request descriptor. Never blocks; a full ring is reported
    /// as [`TrySendError::QueueFull`] and the descriptor is handed back
    /// untouched.
    pub fn try_send(&self, req: NonNull<RpcRequest>) -> Result<(), TrySendError> {
        self.inner.try_send_impl(req).map(|wake_receiver| {
            if wake_receiver {
                self.synchronizer.notify(QueueEvent::NotEmpty);
            }
        })
    }

    /// Consume this endpoint and pin the underlying in-process ring, so its
    /// raw [`QueueDescriptor`] can be handed across the boundary.
    /// Panics if the endpoint was itself created from a raw descriptor.
    pub fn into_descriptor_guard(self) -> DescriptorGuard {
        self.inner.into_descriptor_guard()
    }
}

unsafe impl<S: Send> Send for Receiver<S> {}

impl<S: Clone> Clone for Receiver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            synchronizer: self.synchronizer.clone(),
        }
    }
}

impl<S: Synchronizer> Receiver<S> {
    /// Attach a consumer endpoint to a ring described by `d`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Sender::from_descriptor`]. Any number of
    /// consumers may share one ring; each dequeued descriptor is delivered
    /// to exactly one of them.
    pub unsafe fn from_descriptor(d: QueueDescriptor, synchronizer: S) -> Self {
        Self {
            inner: Fifo::from_descriptor(d),
            synchronizer,
        }
    }

    pub fn try_recv(&self) -> Result<NonNull<RpcRequest>, TryRecvError> {
        self.inner.try_recv_impl().map(|(val, wake_sender)| {
            if wake_sender {
                self.synchronizer.notify(QueueEvent::NotFull);
            }
            val
        })
    }

    pub fn try_iter(&self) -> TryIter<'_, S> {
        TryIter(self)
    }

    pub fn recv(&self) -> Result<NonNull<RpcRequest>, RecvError> {
        loop {
            match self.inner.try_recv_impl() {
                Ok((val, wake_sender)) => {
                    if wake_sender {
                        self.synchronizer.notify(QueueEvent::NotFull);
                    }
                    return Ok(val);
                }
                Err(TryRecvError::QueueEmpty) => {
                    self.synchronizer
                        .wait(QueueEvent::NotEmpty)
                        .map_err(|SynchronizationError::ChannelClosed| RecvError::Closed)?;
                }
            }
        }
    }
}

pub struct TryIter<'r, S>(&'r Receiver<S>);

impl<'r, S: Synchronizer> Iterator for TryIter<'r, S> {
    type Item = NonNull<RpcRequest>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.try_recv().ok()
    }
}

/// `DescriptorGuard` produces a [`QueueDescriptor`] that is guaranteed to
/// remain valid as long as the guard is not dropped.
pub struct DescriptorGuard {
    descriptor: QueueDescriptor,
    _fifo: Arc<FifoBuffer>,
}

impl DescriptorGuard {
    pub fn queue_descriptor(&self) -> QueueDescriptor {
        self.descriptor
    }
}

/// Capacity helper: the ring length needed so that `workers` workers plus
/// some slack never make a well-tuned deployment fall back to direct exits.
/// Always a power of two.
pub fn recommended_len(workers: NonZeroUsize) -> usize {
    workers.get().next_power_of_two() * 2
}
