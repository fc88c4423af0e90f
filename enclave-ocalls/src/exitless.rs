/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Exitless dispatch and the request completion lock.
//!
//! The completion lock is the mutex from "Futexes Are Tricky" (Mutex 2),
//! with the twist that the wait step is itself an OCALL: the futex word
//! lives in host memory inside the request descriptor, the waiter is an
//! enclave thread, and the waker is an untrusted RPC worker. The state
//! transitions are split by side: only the enclave thread moves the lock
//! to `LOCKED_WITH_WAITERS`, and only the worker moves it to `UNLOCKED`.

use log::trace;

use ocall_abi::{
    Errno, FutexArgs, Ocall, RequestLock, RpcRequest, FUTEX_PRIVATE_FLAG, FUTEX_WAIT,
    TIMEOUT_INFINITE,
};

use crate::OcallHandle;

impl OcallHandle {
    /// Perform the raw exit transition.
    pub(crate) fn direct_ocall(&self, code: Ocall, args: *mut u8) -> i32 {
        self.shared.exit.ocall(code, args)
    }

    /// Dispatch one OCALL, staying inside the enclave when possible.
    ///
    /// The request descriptor is allocated on the caller's scratch stack,
    /// so it is freed together with the argument structure when the
    /// caller's scope closes; by then the servicing worker has unlocked and
    /// forgotten it.
    pub(crate) fn exitless_ocall(&self, code: Ocall, args: *mut u8) -> i32 {
        let queue = match self.shared.rpc_queue.get() {
            Some(queue) => queue,
            None => return self.direct_ocall(code, args),
        };

        let req = match self.ustack.alloc_val::<RpcRequest>() {
            Some(req) => req,
            None => return Errno::EPERM.as_ret(),
        };
        unsafe { req.write(RpcRequest::new(code, args)) };
        // grab the lock on this request; always succeeds immediately since
        // this thread is currently the sole owner. The servicing worker is
        // the one to unlock it.
        let req_ref = unsafe { &*req.as_ptr() };
        req_ref.lock.acquire_initial();

        if queue.try_send(req.as_non_null()).is_err() {
            // no space in the ring: all RPC workers are busy with
            // outstanding ocalls. Fall back to the normal path with an
            // enclave exit.
            trace!("rpc queue full, {:?} falls back to direct exit", code);
            return self.direct_ocall(code, args);
        }

        if !self.spin_for_completion(&req_ref.lock) {
            if let Err(e) = self.futex_wait_for_completion(&req_ref.lock) {
                return e.as_ret();
            }
        }

        // the acquiring CAS above paired with the worker's release unlock,
        // so the result is visible
        req_ref.result()
    }

    /// Bounded optimistic wait: try to re-take the lock for a while in the
    /// hope that the worker finishes quickly. Returns whether it did.
    fn spin_for_completion(&self, lock: &RequestLock) -> bool {
        for _ in 0..self.shared.spin_timeout {
            if lock
                .compare_exchange(RequestLock::UNLOCKED, RequestLock::LOCKED_NO_WAITERS)
                .is_ok()
            {
                return true;
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Slow path: announce a waiter and block in a host futex until the
    /// worker unlocks.
    fn futex_wait_for_completion(&self, lock: &RequestLock) -> Result<(), Errno> {
        // A subtle race starts here: the worker may release the lock
        // between the spin phase and this point. In that case the CAS
        // observes UNLOCKED, re-takes the lock and no futex call is needed
        // (that this thread now holds the lock is irrelevant, the request
        // is done).
        let mut observed = match lock.compare_exchange(
            RequestLock::UNLOCKED,
            RequestLock::LOCKED_NO_WAITERS,
        ) {
            Ok(_) => return Ok(()),
            Err(observed) => observed,
        };

        let ms = match self.ustack.alloc_val::<FutexArgs>() {
            Some(ms) => ms,
            None => return Err(Errno::EPERM),
        };

        loop {
            // before waiting, the lock must read LOCKED_WITH_WAITERS: that
            // state is what obliges the unlocking worker to issue a wake.
            // Skip the CAS if some earlier lap already promoted it.
            if observed == RequestLock::LOCKED_WITH_WAITERS
                || lock
                    .compare_exchange(observed, RequestLock::LOCKED_WITH_WAITERS)
                    .is_ok()
            {
                trace!("exitless wait promoted to futex");
                // the expected value pins the state this thread believes
                // the word is in; if the worker moved it back to UNLOCKED
                // in the meantime the host returns EAGAIN and the loop
                // re-checks.
                unsafe {
                    ms.write(FutexArgs {
                        futex: lock.as_futex_word(),
                        op: FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
                        val: RequestLock::LOCKED_WITH_WAITERS,
                        timeout_us: TIMEOUT_INFINITE,
                    })
                };
                let ret = self.direct_ocall(Ocall::Futex, ms.as_ptr().cast());
                if ret < 0 && ret != Errno::EAGAIN.as_ret() {
                    return Err(Errno::EPERM);
                }
            }
            // wake-ups may be spurious: keep waiting until the word
            // actually reads UNLOCKED, and re-announce the waiter when
            // re-taking it so a still-pending worker owes the next wake.
            match lock.compare_exchange(
                RequestLock::UNLOCKED,
                RequestLock::LOCKED_WITH_WAITERS,
            ) {
                Ok(_) => return Ok(()),
                Err(now) => observed = now,
            }
        }
    }
}
