/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Classification and copy primitives across the trust boundary.
//!
//! The enclave occupies one fixed address range; everything else is host
//! memory. Every pointer received from the host is classified against that
//! range before use, and a region touching both sides (*straddling*) is
//! always rejected. Bytes only cross the boundary through the checked copy
//! functions in this module.
//!
//! Enclave-side destinations and sources are ordinary Rust references:
//! memory reachable through a safe `&`/`&mut` is enclave memory by
//! construction, which is exactly the guarantee the reference type already
//! encodes. Host-side memory, in contrast, is only ever named through
//! [`HostPtr`], and the only ways to obtain one are the verified conversion
//! [`EnclaveLayout::copy_ptr_to_enclave`] and the scratch-stack allocator.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use ocall_abi::Errno;

use crate::SetupError;

/// A pointer into host memory, known to lie entirely outside the enclave.
///
/// `HostPtr` is proof of a past verification, not of present validity: the
/// host can remap or poison the region at any time, so data read through it
/// is untrusted and must be copied in before interpretation.
pub struct HostPtr<T> {
    ptr: NonNull<T>,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for HostPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for HostPtr<T> {}

impl<T> std::fmt::Debug for HostPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HostPtr").field(&self.ptr).finish()
    }
}

impl<T> HostPtr<T> {
    /// Wrap a pointer that the caller has verified to be entirely outside
    /// the enclave for `size_of::<T>()` (or the intended span) bytes.
    pub(crate) fn new_verified(ptr: NonNull<T>) -> HostPtr<T> {
        HostPtr { ptr, _marker: PhantomData }
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    pub(crate) fn as_non_null(&self) -> NonNull<T> {
        self.ptr
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn cast<U>(&self) -> HostPtr<U> {
        HostPtr { ptr: self.ptr.cast(), _marker: PhantomData }
    }

    /// Write a value into host memory.
    ///
    /// # Safety
    ///
    /// The region `self..self + size_of::<T>()` must be valid for writes;
    /// for pointers produced by the scratch-stack allocator or a verified
    /// host mapping this holds by construction.
    pub unsafe fn write(&self, val: T) {
        self.ptr.as_ptr().write(val)
    }

    /// Bit-copy a value out of host memory. The result is untrusted data.
    ///
    /// # Safety
    ///
    /// The region `self..self + size_of::<T>()` must be valid for reads and
    /// hold initialized bytes for `T`; `T` must tolerate any bit pattern
    /// (the argument structures in this ABI are all plain data).
    pub unsafe fn read(&self) -> T {
        self.ptr.as_ptr().read()
    }
}

/// The enclave's address range, fixed at enclave creation.
#[derive(Clone, Copy, Debug)]
pub struct EnclaveLayout {
    start: usize,
    end: usize,
}

impl EnclaveLayout {
    pub fn new(start: usize, len: usize) -> Result<EnclaveLayout, SetupError> {
        let end = start.checked_add(len).ok_or(SetupError::BadLayout)?;
        Ok(EnclaveLayout { start, end })
    }

    /// Does `[p, p + n)` lie entirely within the enclave?
    pub fn entirely_inside(&self, p: *const u8, n: usize) -> bool {
        let addr = p as usize;
        match addr.checked_add(n) {
            Some(end) => addr >= self.start && end <= self.end,
            None => false,
        }
    }

    /// Does `[p, p + n)` lie entirely outside the enclave?
    pub fn entirely_outside(&self, p: *const u8, n: usize) -> bool {
        let addr = p as usize;
        match addr.checked_add(n) {
            Some(end) => end <= self.start || addr >= self.end,
            None => false,
        }
    }

    /// A region that is neither entirely inside nor entirely outside
    /// touches both sides of the boundary and is rejected everywhere.
    pub fn straddles(&self, p: *const u8, n: usize) -> bool {
        !self.entirely_inside(p, n) && !self.entirely_outside(p, n)
    }

    /// Copy `n` bytes of host memory at `src` into the enclave buffer
    /// `dst`. Fails without copying anything unless the source region is
    /// entirely outside the enclave and `n` fits in `dst`.
    ///
    /// # Safety
    ///
    /// `src..src + n` must be mapped readable host memory, e.g. a live
    /// scratch-stack allocation or a mapping obtained from the host.
    pub unsafe fn copy_to_enclave(
        &self,
        dst: &mut [u8],
        src: *const u8,
        n: usize,
    ) -> Result<usize, Errno> {
        if n > dst.len() || self.straddles(dst.as_ptr(), n) || !self.entirely_outside(src, n) {
            return Err(Errno::EPERM);
        }
        ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), n);
        Ok(n)
    }

    /// Copy the enclave buffer `src` out to host memory at `dst`. Fails
    /// without copying anything unless the destination region is entirely
    /// outside the enclave.
    ///
    /// # Safety
    ///
    /// `dst..dst + src.len()` must be mapped writable host memory.
    pub unsafe fn copy_to_host(&self, dst: *mut u8, src: &[u8]) -> Result<usize, Errno> {
        if !self.entirely_outside(dst, src.len()) {
            return Err(Errno::EPERM);
        }
        ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        Ok(src.len())
    }

    /// Admit a host-supplied pointer into enclave code: verify that the
    /// `n`-byte region behind it is entirely outside the enclave and
    /// non-null, and wrap it as a [`HostPtr`].
    pub fn copy_ptr_to_enclave<T>(&self, ptr: *mut T, n: usize) -> Result<HostPtr<T>, Errno> {
        let nonnull = NonNull::new(ptr).ok_or(Errno::EPERM)?;
        if !self.entirely_outside(ptr as *const u8, n) {
            return Err(Errno::EPERM);
        }
        Ok(HostPtr::new_verified(nonnull))
    }
}
