/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Per-thread scratch allocations in host memory.
//!
//! Every OCALL needs a little host memory: the argument structure, copies
//! of input strings and buffers, sometimes a futex argument block. All of
//! it is bump-allocated from a fixed per-thread region and released in one
//! motion when the call ends, successfully or not: the [`UstackScope`]
//! guard taken at call entry restores the saved stack top when dropped, so
//! no exit path can forget.
//!
//! The stack grows downward. Allocations are never handed to another
//! thread, and the allocator itself is single-threaded by construction.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::usermem::{EnclaveLayout, HostPtr};
use crate::SetupError;

pub struct UntrustedStack {
    buf: Box<[u8]>,
    /// Offset of the current top from the start of `buf`; allocations move
    /// it toward zero.
    top: Cell<usize>,
}

impl UntrustedStack {
    /// Reserve `size` bytes of host memory as this thread's scratch stack.
    /// The region is verified to lie entirely outside the enclave.
    pub fn new(layout: &EnclaveLayout, size: usize) -> Result<UntrustedStack, SetupError> {
        let buf = vec![0u8; size].into_boxed_slice();
        if !layout.entirely_outside(buf.as_ptr(), size) {
            return Err(SetupError::StackInsideEnclave);
        }
        Ok(UntrustedStack { buf, top: Cell::new(size) })
    }

    fn base(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    /// Current top offset. Equal amounts before and after a call are how
    /// the tests pin down that no path leaks scratch space.
    pub fn top_offset(&self) -> usize {
        self.top.get()
    }

    /// Open an allocation scope; dropping the guard frees everything
    /// allocated inside it.
    pub fn scope(&self) -> UstackScope<'_> {
        UstackScope { stack: self, saved: self.top.get() }
    }

    /// Allocate `n` bytes with no particular alignment. Returns `None` when
    /// the scratch space is exhausted, which callers surface as `EPERM`.
    pub fn alloc(&self, n: usize) -> Option<HostPtr<u8>> {
        self.alloc_aligned(n, 1)
    }

    /// Allocate `n` bytes aligned to `align` (a power of two). Descriptors
    /// carrying a futex word need at least 4-byte alignment; the allocator
    /// imposes no minimum of its own.
    pub fn alloc_aligned(&self, n: usize, align: usize) -> Option<HostPtr<u8>> {
        debug_assert!(align.is_power_of_two());
        let top_addr = self.base() + self.top.get();
        let new_addr = top_addr.checked_sub(n)? & !(align - 1);
        if new_addr < self.base() {
            return None;
        }
        self.top.set(new_addr - self.base());
        // in-bounds offset of a live allocation, hence non-null
        NonNull::new(new_addr as *mut u8).map(HostPtr::new_verified)
    }

    /// Allocate space for a `T`, correctly aligned. The memory starts
    /// zeroed only on the first lap over the stack; callers must write the
    /// structure before telling the host about it.
    pub fn alloc_val<T>(&self) -> Option<HostPtr<T>> {
        self.alloc_aligned(std::mem::size_of::<T>(), std::mem::align_of::<T>())
            .map(|p| p.cast())
    }

    /// Copy an enclave buffer onto the scratch stack and return where it
    /// landed.
    pub fn copy_in_from_enclave(&self, src: &[u8]) -> Option<HostPtr<u8>> {
        let dst = self.alloc(src.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len());
        }
        Some(dst)
    }

    /// Discard all allocations. Prefer [`UntrustedStack::scope`]; this
    /// exists for the thread-teardown path, which has no scope to unwind.
    pub fn reset(&self) {
        self.top.set(self.buf.len());
    }
}

/// Guard over the allocations of one OCALL. Dropping it restores the stack
/// top saved at creation, on every exit path alike.
pub struct UstackScope<'s> {
    stack: &'s UntrustedStack,
    saved: usize,
}

impl Drop for UstackScope<'_> {
    fn drop(&mut self) {
        self.stack.top.set(self.saved);
    }
}
