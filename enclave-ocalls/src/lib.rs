/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The in-enclave side of the OCALL boundary.
//!
//! This crate marshals system-call-like requests out of the enclave, hands
//! them to the untrusted runtime, and brings the results back in without
//! ever trusting host memory. It is built from four pieces:
//!
//! * [`usermem`], the boundary memory checker: region classification over
//!   the fixed enclave address range and the only copy primitives allowed
//!   to move bytes across it. Host memory is named exclusively through
//!   [`usermem::HostPtr`].
//! * [`ustack`], a per-thread bump allocator over a scratch region in host
//!   memory. Argument structures and small buffers for one OCALL live
//!   there; a scope guard returns the space on every exit path.
//! * `exitless`, the dispatch layer. If an RPC queue has been installed, requests
//!   are pushed to untrusted worker threads and the calling thread waits on
//!   the request's three-state lock, spinning first and falling back to a
//!   host futex wait. Without a queue, or when the queue is full, the
//!   thread takes a direct enclave exit instead.
//! * [`ocalls`](OcallHandle), one method per operation, each following the
//!   same shape: build arguments on the scratch stack, dispatch, validate
//!   and copy outputs back in, release the scratch space.
//!
//! # Setup
//!
//! The untrusted runtime provides two things at enclave initialization: an
//! implementation of [`ExitCall`] (the raw exit transition) and, optionally,
//! a request queue serviced by RPC worker threads. The queue may be
//! installed at most once, before any concurrent use, through
//! [`Gateway::install_rpc_queue`]; it is deliberately a write-once cell, not
//! a mutable global.
//!
//! Each enclave thread then obtains its own [`OcallHandle`], which owns that
//! thread's untrusted scratch stack. Handles are not shareable between
//! threads.

use std::num::NonZeroU32;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;

use ocall_abi::{Ocall, RpcRequest, USTACK_SIZE};
use rpc_queue::{Sender, Synchronizer, TrySendError};

pub mod usermem;
pub mod ustack;

mod exitless;
mod ocalls;

#[cfg(test)]
mod test_support;

pub use self::ocalls::{AddrBuf, AttestationEvidence, ControlBuf, ProcessHandles};
pub use self::usermem::{EnclaveLayout, HostPtr};
pub use ocall_abi::Errno;

/// Number of lock acquisition attempts before an exitless call gives up
/// spinning and waits on a host futex. A latency/CPU trade-off, not a
/// correctness parameter.
pub const RPC_SPINLOCK_TIMEOUT: u32 = 100_000;

/// The direct enclave-exit primitive, provided by the untrusted runtime.
///
/// Implementations receive the call number and a pointer to the argument
/// structure in host memory, dispatch outside the enclave, and return the
/// wire result. The gateway never passes an enclave pointer to this trait.
pub trait ExitCall: Send + Sync {
    fn ocall(&self, code: Ocall, args: *mut u8) -> i32;
}

/// Producer endpoint of the exitless request ring, as the gateway sees it.
///
/// [`rpc_queue::Sender`] is the real implementation; the indirection keeps
/// the gateway generic over the synchronizer and lets tests model edge
/// conditions such as a permanently full ring.
pub trait RequestQueue: Send + Sync {
    fn try_send(&self, req: NonNull<RpcRequest>) -> Result<(), TrySendError>;
}

impl<S: Synchronizer + Send + Sync> RequestQueue for Sender<S> {
    fn try_send(&self, req: NonNull<RpcRequest>) -> Result<(), TrySendError> {
        Sender::try_send(self, req)
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("the rpc queue may only be installed once")]
    QueueAlreadyInstalled,
    #[error("enclave region overflows the address space")]
    BadLayout,
    #[error("untrusted stack region overlaps the enclave")]
    StackInsideEnclave,
}

struct Shared {
    layout: EnclaveLayout,
    exit: Box<dyn ExitCall>,
    rpc_queue: OnceCell<Box<dyn RequestQueue>>,
    spin_timeout: u32,
}

/// Per-enclave gateway state: the boundary layout, the exit primitive, and
/// the optional request queue. Holds no per-thread data; threads mint their
/// own [`OcallHandle`]s from it.
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    pub fn new(layout: EnclaveLayout, exit: impl ExitCall + 'static) -> Gateway {
        Gateway::with_spin_timeout(
            layout,
            exit,
            NonZeroU32::new(RPC_SPINLOCK_TIMEOUT).unwrap(),
        )
    }

    /// Like [`Gateway::new`] with an explicit spin bound, for tuning and for
    /// tests that need to reach the futex path quickly.
    pub fn with_spin_timeout(
        layout: EnclaveLayout,
        exit: impl ExitCall + 'static,
        spin_timeout: NonZeroU32,
    ) -> Gateway {
        Gateway {
            shared: Arc::new(Shared {
                layout,
                exit: Box::new(exit),
                rpc_queue: OnceCell::new(),
                spin_timeout: spin_timeout.get(),
            }),
        }
    }

    /// Install the exitless request queue. May be called at most once, at
    /// enclave initialization, before any OCALL traffic. Until then (or
    /// forever, if never called) every OCALL takes the direct-exit path.
    pub fn install_rpc_queue(
        &self,
        queue: impl RequestQueue + 'static,
    ) -> Result<(), SetupError> {
        self.shared
            .rpc_queue
            .set(Box::new(queue))
            .map_err(|_| SetupError::QueueAlreadyInstalled)?;
        log::debug!("exitless rpc queue installed");
        Ok(())
    }

    pub fn layout(&self) -> &EnclaveLayout {
        &self.shared.layout
    }

    /// Create this thread's OCALL handle, allocating its untrusted scratch
    /// stack.
    pub fn handle(&self) -> Result<OcallHandle, SetupError> {
        self.handle_with_stack_size(USTACK_SIZE)
    }

    /// Like [`Gateway::handle`] with a non-default scratch stack size, for
    /// constrained threads and for exhaustion tests.
    pub fn handle_with_stack_size(&self, size: usize) -> Result<OcallHandle, SetupError> {
        let ustack = ustack::UntrustedStack::new(&self.shared.layout, size)?;
        Ok(OcallHandle {
            shared: Arc::clone(&self.shared),
            ustack,
        })
    }
}

/// One enclave thread's way out of the enclave.
///
/// Owns the thread's untrusted scratch stack and is deliberately not
/// `Sync`: every OCALL's scratch allocations live and die on the one thread
/// using the handle.
pub struct OcallHandle {
    shared: Arc<Shared>,
    ustack: ustack::UntrustedStack,
}

impl OcallHandle {
    pub fn layout(&self) -> &EnclaveLayout {
        &self.shared.layout
    }

    /// The scratch stack, exposed for diagnostics and tests; OCALL
    /// implementations manage it through internal scopes.
    pub fn ustack(&self) -> &ustack::UntrustedStack {
        &self.ustack
    }
}
