/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use super::*;

use std::ptr;
use std::sync::atomic::AtomicI32;

use ocall_abi::{Ocall, RpcRequest};

use self::pubsub::{Channel, Subscription};

/// Build a request that lives forever, tagged through its result field so
/// tests can tell descriptors apart.
pub fn leak_request(code: Ocall, tag: u32) -> NonNull<RpcRequest> {
    let req = Box::leak(Box::new(RpcRequest {
        code: code as u32,
        lock: Default::default(),
        args: ptr::null_mut(),
        result: AtomicI32::new(tag as i32),
    }));
    NonNull::from(req)
}

pub fn req_code(req: NonNull<RpcRequest>) -> u32 {
    unsafe { req.as_ref() }.code
}

#[derive(Clone)]
pub struct NoopSynchronizer;

impl Synchronizer for NoopSynchronizer {
    fn wait(&self, _event: QueueEvent) -> Result<(), SynchronizationError> {
        Ok(())
    }
    fn notify(&self, _event: QueueEvent) {}
}

static_assertions::assert_impl_all!(crate::Sender<NoopSynchronizer>: Send, Sync, Clone);
static_assertions::assert_impl_all!(crate::Receiver<NoopSynchronizer>: Send, Clone);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Msg {
    Notify,
    Close,
}

/// Broadcast-channel synchronizer standing in for the host-side parking a
/// real deployment would use. Notifications sent between a consumer's empty
/// poll and its wait are buffered in the consumer's subscription, so no
/// wake-up is lost.
#[derive(Clone)]
pub struct TestSynchronizer {
    not_empty: Subscription<Msg>,
    not_full: Subscription<Msg>,
}

impl TestSynchronizer {
    pub fn new() -> Self {
        Self {
            not_empty: Channel::new().subscribe(),
            not_full: Channel::new().subscribe(),
        }
    }

    /// Wake every current waiter with `ChannelClosed`.
    pub fn close(&self) {
        let _ = self.not_empty.broadcast(Msg::Close);
        let _ = self.not_full.broadcast(Msg::Close);
    }
}

impl Synchronizer for TestSynchronizer {
    fn wait(&self, event: QueueEvent) -> Result<(), SynchronizationError> {
        let msg = match event {
            QueueEvent::NotEmpty => self.not_empty.recv(),
            QueueEvent::NotFull => self.not_full.recv(),
        }
        .map_err(|_| SynchronizationError::ChannelClosed)?;
        match msg {
            Msg::Notify => Ok(()),
            Msg::Close => Err(SynchronizationError::ChannelClosed),
        }
    }

    fn notify(&self, event: QueueEvent) {
        let _ = match event {
            QueueEvent::NotEmpty => self.not_empty.broadcast(Msg::Notify),
            QueueEvent::NotFull => self.not_full.broadcast(Msg::Notify),
        };
    }
}

// A publisher/subscriber channel implementation
pub mod pubsub {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};

    pub struct Channel<T> {
        inner: Arc<ChannelInner<T>>,
    }

    pub struct Subscription<T> {
        receiver: mpsc::Receiver<T>,
        inner: Arc<ChannelInner<T>>,
        id: usize,
    }

    struct ChannelInner<T> {
        senders: Mutex<HashMap<usize, mpsc::Sender<T>>>,
        last_id: AtomicUsize,
    }

    impl<T: Clone> ChannelInner<T> {
        // the lock is held for a short duration since mpsc::Sender::send()
        // never blocks.
        fn broadcast(&self, msg: T) -> Result<(), mpsc::SendError<T>> {
            let senders = self.senders.lock().unwrap();
            for (_, sender) in senders.iter() {
                match sender.send(msg.clone()) {
                    Ok(_) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(())
        }

        fn subscribe(self: Arc<Self>) -> Subscription<T> {
            let id = self.last_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel();
            {
                let mut senders = self.senders.lock().unwrap();
                assert!(senders.insert(id, tx).is_none());
            }
            Subscription {
                receiver: rx,
                inner: self,
                id,
            }
        }
    }

    impl<T: Clone> Channel<T> {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(ChannelInner {
                    senders: Mutex::new(HashMap::new()),
                    last_id: AtomicUsize::new(0),
                }),
            }
        }

        #[allow(unused)]
        pub fn broadcast(&self, msg: T) -> Result<(), mpsc::SendError<T>> {
            self.inner.broadcast(msg)
        }

        pub fn subscribe(&self) -> Subscription<T> {
            self.inner.clone().subscribe()
        }
    }

    impl<T: Clone> Subscription<T> {
        // blocks current thread until a message is received or hangup.
        pub fn recv(&self) -> Result<T, mpsc::RecvError> {
            self.receiver.recv()
        }

        pub fn broadcast(&self, msg: T) -> Result<(), mpsc::SendError<T>> {
            self.inner.broadcast(msg)
        }
    }

    impl<T> Drop for Subscription<T> {
        fn drop(&mut self) {
            let mut senders = self.inner.senders.lock().unwrap();
            senders.remove(&self.id);
        }
    }

    impl<T: Clone> Clone for Subscription<T> {
        fn clone(&self) -> Self {
            self.inner.clone().subscribe()
        }
    }
}
