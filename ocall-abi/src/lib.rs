/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! ABI between an enclave and its untrusted runtime for *OCALLs*: calls that
//! originate inside the enclave but must be serviced outside of it.
//!
//! Every OCALL crosses the trust boundary as a pair of one [`Ocall`] number
//! and one pointer to a call-specific argument structure. The argument
//! structure, and everything it points to, lives in *host* (untrusted)
//! memory, either on the caller's untrusted scratch stack or in a region
//! obtained through [`Ocall::MmapUntrusted`]. The enclave must never store an
//! enclave-resident pointer into any of these structures, and it must never
//! dereference a pointer found in them without first verifying that the
//! pointed-to region lies entirely outside the enclave.
//!
//! An OCALL can be dispatched two ways:
//!
//! 1. **Direct exit**: the calling thread leaves the enclave, the untrusted
//!    runtime dispatches on the call number, and the thread re-enters with
//!    the result.
//! 2. **Exitless**: the calling thread stays inside the enclave and hands a
//!    [`RpcRequest`] descriptor to a pool of untrusted RPC worker threads
//!    through a shared ring (see [`QueueDescriptor`]). Completion is
//!    signalled through the descriptor's [`RequestLock`], a futex-compatible
//!    three-state word.
//!
//! Both paths use the same argument structures and the same result
//! convention: a non-negative `i32` on success, a negated errno value from
//! [`Errno`] on failure.
//!
//! Untrusted runtimes implementing the dispatcher side of this contract must
//! treat all pointer fields as requests to read or write *host* memory only;
//! a well-behaved dispatcher never receives an enclave pointer, and a
//! malicious enclave cannot gain anything by sending one.

#![cfg_attr(not(test), no_std)]

use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, AtomicUsize, Ordering};

/// Size of a thread's untrusted scratch stack.
pub const USTACK_SIZE: usize = 2 * 1024 * 1024;

/// Largest buffer the gateway will place on the untrusted scratch stack.
///
/// Buffers larger than this are bounced through [`Ocall::MmapUntrusted`]
/// instead. A quarter of the stack is a conservative bound that also works
/// for the main thread, whose stack is managed by the host OS.
pub const MAX_UNTRUSTED_STACK_BUF: usize = USTACK_SIZE / 4;

/// Futex operation: wait while the word equals the expected value.
pub const FUTEX_WAIT: i32 = 0;
/// Futex operation: wake up to `val` waiters.
pub const FUTEX_WAKE: i32 = 1;
/// Process-private futex flag, OR-ed into the operation.
pub const FUTEX_PRIVATE_FLAG: i32 = 128;

/// Timeout value meaning "never time out", for calls taking microseconds.
pub const TIMEOUT_INFINITE: i64 = -1;

/// Host memory may be read.
pub const PROT_READ: u16 = 0x1;
/// Host memory may be written.
pub const PROT_WRITE: u16 = 0x2;

/// An error number, in its conventional positive Linux value.
///
/// The wire encoding of an OCALL failure is the *negated* value: an OCALL
/// returning `-22` reports [`Errno::EINVAL`]. The gateway itself only ever
/// produces the named constants below; the host may pass through any other
/// errno value, which travels through this type untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    /// Operation not permitted. Also the catch-all for every isolation
    /// violation detected inside the enclave: scratch-stack exhaustion,
    /// straddling regions, rejected copies, forged descriptors.
    pub const EPERM: Errno = Errno(1);
    /// Interrupted by a signal on the host side.
    pub const EINTR: Errno = Errno(4);
    /// Resource temporarily unavailable; benign for futex races.
    pub const EAGAIN: Errno = Errno(11);
    /// Permission denied; used for copy-back failures on attestation blobs.
    pub const EACCES: Errno = Errno(13);
    /// Invalid argument supplied by the caller.
    pub const EINVAL: Errno = Errno(22);

    /// Wrap a positive errno value.
    pub fn from_raw(raw: i32) -> Option<Errno> {
        if raw > 0 {
            Some(Errno(raw))
        } else {
            None
        }
    }

    /// The positive errno value.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// The wire encoding of this error.
    pub fn as_ret(self) -> i32 {
        -self.0
    }

    /// Split a wire result into `Ok(non-negative)` or the errno it encodes.
    pub fn check_ret(ret: i32) -> Result<i32, Errno> {
        if ret < 0 {
            // i32::MIN is not a valid encoding; saturate rather than wrap
            Err(Errno((-(ret as i64)).min(i32::MAX as i64) as i32))
        } else {
            Ok(ret)
        }
    }

    fn name(self) -> Option<&'static str> {
        match self.0 {
            1 => Some("EPERM"),
            4 => Some("EINTR"),
            11 => Some("EAGAIN"),
            13 => Some("EACCES"),
            22 => Some("EINVAL"),
            _ => None,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "errno {}", self.0),
        }
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => f.debug_tuple("Errno").field(&self.0).finish(),
        }
    }
}

macro_rules! define_ocalls {
    ($( $(#[$meta:meta])* $name:ident = $num:literal, )*) => {
        /// The list of all OCALL numbers.
        ///
        /// Each number fixes the layout of the argument structure the
        /// accompanying pointer refers to; the structure types in this crate
        /// are named after the call (`Open` ⇒ [`OpenArgs`] and so on). A new
        /// number may only be added together with its untrusted dispatcher
        /// implementation.
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Ocall {
            $( $(#[$meta])* $name = $num, )*
        }

        impl Ocall {
            /// Decode a wire call number.
            pub fn from_u32(n: u32) -> Option<Ocall> {
                match n {
                    $( $num => Some(Ocall::$name), )*
                    _ => None,
                }
            }
        }
    };
}

define_ocalls! {
    /// Terminate the enclave. Takes [`ExitArgs`]; never produces a result.
    Exit = 0,
    /// Map host memory for bulk transfers. Takes [`MmapUntrustedArgs`].
    MmapUntrusted = 1,
    /// Unmap a region obtained through `MmapUntrusted`. Takes
    /// [`MunmapUntrustedArgs`].
    MunmapUntrusted = 2,
    /// Execute CPUID on the host. Takes [`CpuidArgs`].
    Cpuid = 3,
    /// Open a host file. Takes [`OpenArgs`]; returns the host fd.
    Open = 4,
    /// Close a host fd. Takes [`CloseArgs`].
    Close = 5,
    /// Read from a host fd. Takes [`ReadArgs`]; returns the byte count.
    Read = 6,
    /// Write to a host fd. Takes [`WriteArgs`]; returns the byte count.
    Write = 7,
    /// Stat a host fd. Takes [`FstatArgs`].
    Fstat = 8,
    /// Bytes available for reading on a host fd. Takes [`FionreadArgs`].
    Fionread = 9,
    /// Toggle non-blocking mode on a host fd. Takes [`FsetnonblockArgs`].
    Fsetnonblock = 10,
    /// Change mode bits of a host fd. Takes [`FchmodArgs`].
    Fchmod = 11,
    /// Flush a host fd. Takes [`FsyncArgs`].
    Fsync = 12,
    /// Truncate a host fd. Takes [`FtruncateArgs`].
    Ftruncate = 13,
    /// Reposition a host fd. Takes [`LseekArgs`]; returns the new offset
    /// through the argument structure.
    Lseek = 14,
    /// Create a host directory. Takes [`MkdirArgs`].
    Mkdir = 15,
    /// Read directory entries from a host fd. Takes [`GetdentsArgs`];
    /// returns the byte count.
    Getdents = 16,
    /// Resume an enclave thread parked in the untrusted runtime. The
    /// argument pointer *is* the host thread handle; there is no wrapper
    /// structure.
    ResumeThread = 17,
    /// Ask the untrusted runtime to enter the enclave on a fresh thread.
    /// The argument pointer is null.
    CloneThread = 18,
    /// Spawn a child enclave process. Takes [`CreateProcessArgs`].
    CreateProcess = 19,
    /// Host futex operation on a host-memory word. Takes [`FutexArgs`].
    Futex = 20,
    /// Create a connected socket pair. Takes [`SocketpairArgs`].
    Socketpair = 21,
    /// Create a bound, listening socket. Takes [`ListenArgs`]; returns the
    /// host fd.
    Listen = 22,
    /// Accept a connection. Takes [`AcceptArgs`]; returns the host fd.
    Accept = 23,
    /// Create a connected socket. Takes [`ConnectArgs`]; returns the host
    /// fd.
    Connect = 24,
    /// Receive a message. Takes [`RecvArgs`]; returns the byte count.
    Recv = 25,
    /// Send a message. Takes [`SendArgs`]; returns the byte count.
    Send = 26,
    /// Set a socket option. Takes [`SetsockoptArgs`].
    Setsockopt = 27,
    /// Shut down part of a connection. Takes [`ShutdownArgs`].
    Shutdown = 28,
    /// Read the host wall clock. Takes [`GettimeArgs`].
    Gettime = 29,
    /// Sleep on the host. Takes [`SleepArgs`]. Always dispatched with a
    /// direct exit: the calling thread has nothing better to do than leave.
    Sleep = 30,
    /// Poll host fds. Takes [`PollArgs`]; returns the ready count.
    Poll = 31,
    /// Rename a host path. Takes [`RenameArgs`].
    Rename = 32,
    /// Unlink a host path. Takes [`DeleteArgs`].
    Delete = 33,
    /// Pass a command string to the host debugger integration. The argument
    /// pointer is the NUL-terminated string itself; there is no wrapper
    /// structure.
    LoadDebug = 34,
    /// Obtain remote-attestation evidence. Takes [`GetAttestationArgs`].
    /// The host returns four separately mmap-ed blobs that the enclave must
    /// copy in and unmap.
    GetAttestation = 35,
    /// Create a host eventfd. Takes [`EventfdArgs`]; returns the host fd.
    Eventfd = 36,
}

/// Nanosecond-resolution timestamp, Linux `timespec` layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

/// Host file metadata, Linux x86-64 `struct stat` layout. Bit-copied across
/// the boundary; the enclave must not interpret host-controlled fields as
/// trusted.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub nlink: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub _pad0: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub _reserved: [i64; 3],
}

/// Socket address storage, large enough for any address family the host
/// supports. `len` bytes of `data` are valid.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SockAddrStorage {
    pub family: u16,
    pub data: [u8; 126],
}

impl Default for SockAddrStorage {
    fn default() -> Self {
        SockAddrStorage { family: 0, data: [0; 126] }
    }
}

/// Socket defaults reported back by the host when it creates a socket on the
/// enclave's behalf.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SockOptDefaults {
    pub receive_buf: i32,
    pub send_buf: i32,
    pub linger_us: u64,
    pub receive_timeout_us: i32,
    pub send_timeout_us: i32,
    pub tcp_cork: u8,
    pub tcp_keepalive: u8,
    pub tcp_nodelay: u8,
    pub _pad: u8,
}

/// One pollable fd, Linux `struct pollfd` layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollFd {
    pub fd: i32,
    pub events: i16,
    pub revents: i16,
}

/// Service-provider ID for the attestation service.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct Spid(pub [u8; 16]);

/// Freshness nonce included in a quote request.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteNonce(pub [u8; 16]);

/// Local attestation report targeted at the quoting enclave. Opaque at this
/// layer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Report(pub [u8; 432]);

impl Default for Report {
    fn default() -> Self {
        Report([0; 432])
    }
}

/// Attestation evidence as returned by the host.
///
/// All four pointers refer to host memory mapped by the host specifically
/// for this call; after copying the contents into the enclave, the enclave
/// must unmap each region through [`Ocall::MunmapUntrusted`].
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Attestation {
    pub quote: *mut u8,
    pub quote_len: u64,
    pub ias_report: *mut u8,
    pub ias_report_len: u64,
    pub ias_sig: *mut u8,
    pub ias_sig_len: u64,
    pub ias_certs: *mut u8,
    pub ias_certs_len: u64,
}

impl Default for Attestation {
    fn default() -> Self {
        Attestation {
            quote: core::ptr::null_mut(),
            quote_len: 0,
            ias_report: core::ptr::null_mut(),
            ias_report_len: 0,
            ias_sig: core::ptr::null_mut(),
            ias_sig_len: 0,
            ias_certs: core::ptr::null_mut(),
            ias_certs_len: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ExitArgs {
    pub exitcode: i32,
    pub is_exitgroup: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MmapUntrustedArgs {
    pub fd: i32,
    pub prot: u16,
    pub offset: u64,
    pub size: u64,
    /// Out: start of the mapped host region.
    pub addr: *mut u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MunmapUntrustedArgs {
    pub addr: *const u8,
    pub size: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuidArgs {
    pub leaf: u32,
    pub subleaf: u32,
    /// Out: EAX, EBX, ECX, EDX.
    pub values: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct OpenArgs {
    pub flags: i32,
    pub mode: u16,
    /// NUL-terminated path in host memory.
    pub pathname: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CloseArgs {
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ReadArgs {
    pub fd: i32,
    pub count: usize,
    pub buf: *mut u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct WriteArgs {
    pub fd: i32,
    pub count: usize,
    pub buf: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FstatArgs {
    pub fd: i32,
    /// Out: bit-copied host `stat`.
    pub stat: Stat,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FionreadArgs {
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FsetnonblockArgs {
    pub fd: i32,
    pub nonblocking: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FchmodArgs {
    pub fd: i32,
    pub mode: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FsyncArgs {
    pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FtruncateArgs {
    pub fd: i32,
    pub length: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct LseekArgs {
    pub fd: i32,
    pub whence: i32,
    pub offset: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MkdirArgs {
    pub mode: u16,
    /// NUL-terminated path in host memory.
    pub pathname: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct GetdentsArgs {
    pub fd: i32,
    pub size: u32,
    pub dirp: *mut u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct CreateProcessArgs {
    /// NUL-terminated executable URI in host memory, or null.
    pub uri: *const u8,
    pub nargs: usize,
    /// `nargs` host pointers to NUL-terminated strings, in host memory.
    pub args: *const *const u8,
    /// Out: pid of the spawned process.
    pub pid: u32,
    /// Out: stream fds connected to the child.
    pub proc_fds: [i32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FutexArgs {
    /// The futex word. Must lie entirely outside the enclave; the host
    /// kernel and enclave threads address the same physical word.
    pub futex: *mut u32,
    pub op: i32,
    pub val: u32,
    /// Microseconds, or [`TIMEOUT_INFINITE`].
    pub timeout_us: i64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketpairArgs {
    pub domain: i32,
    pub ty: i32,
    pub protocol: i32,
    /// Out: the connected pair.
    pub sockfds: [i32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ListenArgs {
    pub domain: i32,
    pub ty: i32,
    pub protocol: i32,
    /// In: valid bytes at `addr`. Out: host-reported address length; the
    /// enclave clamps the copy-back to the caller's capacity.
    pub addrlen: u32,
    pub addr: *mut u8,
    /// Out: socket defaults chosen by the host.
    pub sockopt: SockOptDefaults,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AcceptArgs {
    pub sockfd: i32,
    /// In/out, as in [`ListenArgs::addrlen`].
    pub addrlen: u32,
    pub addr: *mut u8,
    /// Out: socket defaults chosen by the host.
    pub sockopt: SockOptDefaults,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ConnectArgs {
    pub domain: i32,
    pub ty: i32,
    pub protocol: i32,
    pub addrlen: u32,
    /// In/out: capacity of `bind_addr` in, reported length out.
    pub bind_addrlen: u32,
    pub addr: *const u8,
    pub bind_addr: *mut u8,
    /// Out: socket defaults chosen by the host.
    pub sockopt: SockOptDefaults,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RecvArgs {
    pub sockfd: i32,
    pub count: usize,
    /// In/out: capacity of `addr` in, reported length out.
    pub addrlen: u32,
    pub addr: *mut u8,
    /// In/out: capacity of `control` in, reported length out.
    pub controllen: u64,
    pub control: *mut u8,
    pub buf: *mut u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SendArgs {
    pub sockfd: i32,
    pub count: usize,
    pub addrlen: u32,
    pub addr: *const u8,
    pub controllen: u64,
    pub control: *const u8,
    pub buf: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SetsockoptArgs {
    pub sockfd: i32,
    pub level: i32,
    pub optname: i32,
    pub optlen: u32,
    pub optval: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ShutdownArgs {
    pub sockfd: i32,
    pub how: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GettimeArgs {
    /// Out: microseconds since the epoch, as reported by the host.
    pub microsec: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepArgs {
    /// In: requested sleep. Out on `EINTR`: remaining microseconds.
    pub microsec: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PollArgs {
    pub nfds: u64,
    pub timeout_us: i64,
    pub fds: *mut PollFd,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RenameArgs {
    pub oldpath: *const u8,
    pub newpath: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DeleteArgs {
    pub pathname: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct GetAttestationArgs {
    pub spid: Spid,
    pub linkable: u8,
    /// NUL-terminated subscription key in host memory.
    pub subkey: *const u8,
    pub report: Report,
    pub nonce: QuoteNonce,
    /// Out: four host-mapped evidence blobs.
    pub attestation: Attestation,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct EventfdArgs {
    pub initval: u32,
    pub flags: i32,
}

/// Completion lock embedded in every [`RpcRequest`].
///
/// A three-state word driven from both sides of the trust boundary:
///
/// * [`UNLOCKED`](RequestLock::UNLOCKED): the request is complete and
///   `result` is valid.
/// * [`LOCKED_NO_WAITERS`](RequestLock::LOCKED_NO_WAITERS): the request is
///   in flight; the enclave thread is spinning or has not yet started to
///   wait.
/// * [`LOCKED_WITH_WAITERS`](RequestLock::LOCKED_WITH_WAITERS): the
///   enclave thread announced that it is (about to be) blocked in a host
///   futex wait; whoever unlocks must also issue a futex wake.
///
/// Only the enclave thread moves the lock *to* `LOCKED_WITH_WAITERS`; only
/// an RPC worker moves it to `UNLOCKED`. The word is exactly the memory the
/// host futex syscall operates on, so it must stay 4-byte aligned and must
/// never be torn.
#[repr(transparent)]
pub struct RequestLock(AtomicU32);

impl RequestLock {
    pub const UNLOCKED: u32 = 0;
    pub const LOCKED_NO_WAITERS: u32 = 1;
    pub const LOCKED_WITH_WAITERS: u32 = 2;

    pub fn new() -> RequestLock {
        RequestLock(AtomicU32::new(Self::UNLOCKED))
    }

    /// First acquisition by the enclave thread that created the request.
    /// Cannot fail: nobody else has seen the request yet.
    pub fn acquire_initial(&self) {
        let prev = self.0.swap(Self::LOCKED_NO_WAITERS, Ordering::Acquire);
        debug_assert_eq!(prev, Self::UNLOCKED);
    }

    /// One CAS step of the enclave-side wait protocol. On failure the
    /// observed state is returned so the caller can decide whether to
    /// promote, wait, or retry.
    pub fn compare_exchange(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.0
            .compare_exchange(current, new, Ordering::Acquire, Ordering::Acquire)
    }

    /// Worker-side completion. Returns the state the lock was in, so the
    /// worker knows whether a futex wake is owed. The release ordering is
    /// what publishes the worker's `result` write to the enclave thread.
    pub fn unlock(&self) -> u32 {
        self.0.swap(Self::UNLOCKED, Ordering::Release)
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// The word a host futex call must operate on.
    pub fn as_futex_word(&self) -> *mut u32 {
        &self.0 as *const AtomicU32 as *mut u32
    }
}

impl Default for RequestLock {
    fn default() -> Self {
        RequestLock::new()
    }
}

impl fmt::Debug for RequestLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0.load(Ordering::Relaxed) {
            Self::UNLOCKED => "UNLOCKED",
            Self::LOCKED_NO_WAITERS => "LOCKED_NO_WAITERS",
            Self::LOCKED_WITH_WAITERS => "LOCKED_WITH_WAITERS",
            _ => "<invalid>",
        };
        f.debug_tuple("RequestLock").field(&state).finish()
    }
}

/// One exitless OCALL in flight.
///
/// Created in host memory (on the caller's untrusted scratch stack) by the
/// enclave thread, handed to exactly one RPC worker through the request
/// ring, and owned jointly until the worker unlocks: the worker alone writes
/// `result`, the enclave thread alone reads it, and only after observing the
/// unlock. The descriptor dies when the caller's scratch stack is reset.
#[repr(C)]
pub struct RpcRequest {
    pub code: u32,
    pub lock: RequestLock,
    /// The call's argument structure, in host memory.
    pub args: *mut u8,
    /// Written by the servicing worker before it unlocks.
    pub result: AtomicI32,
}

impl RpcRequest {
    pub fn new(code: Ocall, args: *mut u8) -> RpcRequest {
        RpcRequest {
            code: code as u32,
            lock: RequestLock::new(),
            args,
            result: AtomicI32::new(0),
        }
    }

    /// Read the result. Valid only after the lock has been re-acquired by
    /// the enclave thread (the acquire pairs with the worker's unlock).
    pub fn result(&self) -> i32 {
        self.result.load(Ordering::Relaxed)
    }

    /// Store the result before unlocking. Worker side only.
    pub fn set_result(&self, result: i32) {
        self.result.store(result, Ordering::Relaxed)
    }
}

// The descriptor is shared by address between an enclave thread and one RPC
// worker; all racing fields are atomics.
unsafe impl Send for RpcRequest {}
unsafe impl Sync for RpcRequest {}

/// Shared-memory layout of the exitless request ring.
///
/// `data` points to `len` pointer slots (`len` a power of two ≤ 2³¹). A null
/// slot is empty. `offsets` is a packed `(u32, u32)` pair (read offset in
/// the low dword, write offset in the high dword) updated atomically as one
/// word; the lowest unused bit of each offset tracks wrap-around so that
/// equal masked offsets distinguish empty from full.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct QueueDescriptor {
    pub data: *mut AtomicPtr<RpcRequest>,
    pub len: usize,
    pub offsets: *const AtomicUsize,
}
