/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use ocall_abi::{QueueDescriptor, RpcRequest};

use super::{DescriptorGuard, TryRecvError, TrySendError};

/// Backing storage for an in-process ring.
pub(crate) struct FifoBuffer {
    data: Box<[AtomicPtr<RpcRequest>]>,
    offsets: Box<AtomicUsize>,
}

impl FifoBuffer {
    pub(crate) fn new(len: usize) -> Self {
        assert!(
            len.is_power_of_two(),
            "ring len should be a power of two"
        );
        let mut data = Vec::with_capacity(len);
        data.resize_with(len, || AtomicPtr::new(ptr::null_mut()));
        Self {
            data: data.into_boxed_slice(),
            offsets: Box::new(AtomicUsize::new(0)),
        }
    }
}

enum Storage {
    Shared(Arc<FifoBuffer>),
    Static,
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        match self {
            Storage::Shared(arc) => Storage::Shared(arc.clone()),
            Storage::Static => Storage::Static,
        }
    }
}

pub(crate) struct Fifo {
    data: NonNull<[AtomicPtr<RpcRequest>]>,
    offsets: NonNull<AtomicUsize>,
    storage: Storage,
}

impl Clone for Fifo {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            offsets: self.offsets,
            storage: self.storage.clone(),
        }
    }
}

impl Fifo {
    /// See `Sender::from_descriptor` for the safety contract.
    pub(crate) unsafe fn from_descriptor(descriptor: QueueDescriptor) -> Self {
        assert!(
            descriptor.len.is_power_of_two(),
            "ring len should be a power of two"
        );
        let data_slice = std::slice::from_raw_parts_mut(descriptor.data, descriptor.len);
        Self {
            data: NonNull::new_unchecked(data_slice as *mut [AtomicPtr<RpcRequest>]),
            offsets: NonNull::new_unchecked(descriptor.offsets as *mut AtomicUsize),
            storage: Storage::Static,
        }
    }

    pub(crate) fn from_arc(fifo: Arc<FifoBuffer>) -> Self {
        unsafe {
            Self {
                data: NonNull::new_unchecked(
                    fifo.data.as_ref() as *const [AtomicPtr<RpcRequest>]
                        as *mut [AtomicPtr<RpcRequest>],
                ),
                offsets: NonNull::new_unchecked(
                    fifo.offsets.as_ref() as *const AtomicUsize as *mut AtomicUsize,
                ),
                storage: Storage::Shared(fifo),
            }
        }
    }

    /// Consumes `self` and returns a `DescriptorGuard`.
    /// Panics if `self` was created using `from_descriptor`.
    pub(crate) fn into_descriptor_guard(self) -> DescriptorGuard {
        let arc = match self.storage {
            Storage::Shared(arc) => arc,
            Storage::Static => {
                panic!("endpoints created using `from_descriptor()` cannot be turned into DescriptorGuard.")
            }
        };
        let data = unsafe { self.data.as_ref() };
        let descriptor = QueueDescriptor {
            data: data.as_ptr() as _,
            len: data.len(),
            offsets: self.offsets.as_ptr(),
        };
        DescriptorGuard { descriptor, _fifo: arc }
    }

    fn slot(&self, index: usize) -> &AtomicPtr<RpcRequest> {
        unsafe { &self.data.as_ref()[index] }
    }

    fn data_len(&self) -> usize {
        unsafe { self.data.as_ref().len() }
    }

    fn offsets(&self) -> &AtomicUsize {
        unsafe { self.offsets.as_ref() }
    }

    pub(crate) fn try_send_impl(
        &self,
        req: NonNull<RpcRequest>,
    ) -> Result</*wake up a reader:*/ bool, TrySendError> {
        let (new, was_empty) = loop {
            // 1. Load the current offsets.
            let current = Offsets::new(self.offsets().load(Ordering::SeqCst), self.data_len() as u32);
            let was_empty = current.is_empty();

            // 2. If the ring is full, report it; the caller falls back to a
            //    direct enclave exit instead of waiting.
            if current.is_full() {
                return Err(TrySendError::QueueFull);
            }

            // 3. Add 1 to the write offset and do an atomic compare-and-swap
            //    (CAS) with the current offsets. If the CAS was not
            //    successful, go to step 1.
            let new = current.increment_write_offset();
            if self
                .offsets()
                .compare_exchange(current.as_usize(), new.as_usize(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break (new, was_empty);
            }
        };

        // 4. Publish the descriptor pointer. The slot may transiently still
        //    hold the pointer of a previous lap while its consumer has
        //    claimed the read offset but not yet taken the value; wait for
        //    it to drain rather than overwrite.
        let slot = self.slot(new.write_offset());
        loop {
            match slot.compare_exchange(
                ptr::null_mut(),
                req.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(_) => std::hint::spin_loop(),
            }
        }

        // 5. If the ring was empty in step 1, signal a reader to wake up.
        Ok(was_empty)
    }

    pub(crate) fn try_recv_impl(
        &self,
    ) -> Result<(NonNull<RpcRequest>, /*wake up a writer:*/ bool), TryRecvError> {
        let (current, new) = loop {
            // 1. Load the current offsets.
            let current = Offsets::new(self.offsets().load(Ordering::SeqCst), self.data_len() as u32);

            // 2. If the ring is empty, report it; blocking is the
            //    synchronizer's business.
            if current.is_empty() {
                return Err(TryRecvError::QueueEmpty);
            }

            // 3. Add 1 to the read offset and CAS with the current offsets.
            //    Claiming the offset first is what makes the pop safe with
            //    multiple consumers: each slot index is owned by exactly one
            //    claimant per lap. If the CAS was not successful, go to
            //    step 1.
            let new = current.increment_read_offset();
            if self
                .offsets()
                .compare_exchange(current.as_usize(), new.as_usize(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break (current, new);
            }
        };

        // 4. Take the pointer out of the claimed slot, leaving it empty for
        //    the next lap. If the producer has claimed the slot but not yet
        //    published, spin: the value is expected imminently.
        let slot = self.slot(new.read_offset());
        let req = loop {
            match NonNull::new(slot.swap(ptr::null_mut(), Ordering::Acquire)) {
                Some(req) => break req,
                None => std::hint::spin_loop(),
            }
        };

        // 5. If the ring was full before the claim in step 3, signal a
        //    writer to wake up.
        Ok((req, current.is_full()))
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Offsets {
    write: u32,
    read: u32,
    len: u32,
}

impl Offsets {
    // This implementation only works on 64-bit platforms.
    fn _assert_usize_is_eight_bytes() -> [u8; 8] {
        [0u8; mem::size_of::<usize>()]
    }

    pub(crate) fn new(offsets: usize, len: u32) -> Self {
        debug_assert!(len.is_power_of_two());
        Self {
            write: (offsets >> 32) as u32,
            read: offsets as u32,
            len,
        }
    }

    pub(crate) fn as_usize(&self) -> usize {
        ((self.write as usize) << 32) | (self.read as usize)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub(crate) fn is_full(&self) -> bool {
        self.read != self.write && self.read_offset() == self.write_offset()
    }

    pub(crate) fn read_offset(&self) -> usize {
        (self.read & (self.len - 1)) as _
    }

    pub(crate) fn write_offset(&self) -> usize {
        (self.write & (self.len - 1)) as _
    }

    pub(crate) fn increment_read_offset(&self) -> Self {
        Self {
            read: (self.read + 1) & (self.len * 2 - 1),
            ..*self
        }
    }

    pub(crate) fn increment_write_offset(&self) -> Self {
        Self {
            write: (self.write + 1) & (self.len * 2 - 1),
            ..*self
        }
    }
}
