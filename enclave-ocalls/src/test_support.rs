/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An in-process stand-in for the untrusted side of the boundary.
//!
//! The "enclave" is a leaked arena; everything the layout classifies as
//! inside comes from it, everything else in the process is host memory.
//! [`MockHost`] interprets argument structures the way a real untrusted
//! dispatcher would (including, on request, the ways a *malicious* one
//! would), and a [`WorkerPool`] drains the exitless ring with the same
//! store-result / unlock / wake protocol real RPC workers use.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as mpmc;

use ocall_abi::*;
use rpc_queue::{QueueEvent, Receiver, RecvError, SynchronizationError, Synchronizer};

use crate::usermem::EnclaveLayout;
use crate::{ExitCall, Gateway, OcallHandle};

/// Extra host-classified bytes past the arena end, so straddling regions
/// are real mapped memory.
const ARENA_TAIL: usize = 4096;

/// The simulated enclave address range, with a bump allocator for
/// "enclave-resident" test buffers.
pub struct EnclaveArena {
    base: *mut u8,
    len: usize,
    next: Cell<usize>,
}

impl EnclaveArena {
    pub fn new(len: usize) -> EnclaveArena {
        let buf = vec![0u8; len + ARENA_TAIL].into_boxed_slice();
        let base = Box::leak(buf).as_mut_ptr();
        EnclaveArena { base, len, next: Cell::new(0) }
    }

    pub fn layout(&self) -> EnclaveLayout {
        EnclaveLayout::new(self.base as usize, self.len).unwrap()
    }

    /// Carve an enclave-resident buffer out of the arena.
    pub fn alloc(&self, n: usize) -> &'static mut [u8] {
        let at = self.next.get();
        assert!(at + n <= self.len, "test arena exhausted");
        self.next.set(at + n);
        unsafe { std::slice::from_raw_parts_mut(self.base.add(at), n) }
    }

    /// A region spanning the enclave's upper edge: half inside, half in the
    /// mapped tail beyond it.
    pub fn straddling(&self, n: usize) -> &'static mut [u8] {
        assert!(n >= 2 && n / 2 <= ARENA_TAIL && n / 2 <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.base.add(self.len - n / 2), n) }
    }

    /// An address inside the enclave, for forged host replies.
    pub fn inside_addr(&self) -> usize {
        self.base as usize + self.len / 2
    }
}

/// Emulation of the host kernel's futex: compare under a lock, block until
/// woken.
pub struct FutexTable {
    words: Mutex<HashMap<usize, Arc<FutexWaiter>>>,
}

struct FutexWaiter {
    guard: Mutex<()>,
    cond: Condvar,
}

impl FutexTable {
    fn new() -> FutexTable {
        FutexTable { words: Mutex::new(HashMap::new()) }
    }

    fn waiter(&self, addr: usize) -> Arc<FutexWaiter> {
        self.words
            .lock()
            .unwrap()
            .entry(addr)
            .or_insert_with(|| {
                Arc::new(FutexWaiter { guard: Mutex::new(()), cond: Condvar::new() })
            })
            .clone()
    }

    /// FUTEX_WAIT: returns `-EAGAIN` if the word no longer holds the
    /// expected value, otherwise blocks until a wake (spurious wake-ups
    /// permitted, like the real thing).
    pub fn wait(&self, addr: usize, expected: u32) -> i32 {
        let waiter = self.waiter(addr);
        let guard = waiter.guard.lock().unwrap();
        let word = unsafe { &*(addr as *const AtomicU32) };
        if word.load(Ordering::SeqCst) != expected {
            return Errno::EAGAIN.as_ret();
        }
        let _guard = waiter
            .cond
            .wait_timeout(guard, Duration::from_secs(10))
            .unwrap();
        0
    }

    pub fn wake(&self, addr: usize) {
        let waiter = self.waiter(addr);
        let _guard = waiter.guard.lock().unwrap();
        waiter.cond.notify_all();
    }
}

#[derive(Default)]
struct FileObj {
    path: String,
    pos: usize,
}

#[derive(Default)]
struct HostState {
    next_fd: i32,
    files: HashMap<i32, FileObj>,
    contents: HashMap<String, Vec<u8>>,
    written: HashMap<i32, Vec<u8>>,
    log: Vec<String>,
    mappings: HashMap<usize, Box<[u8]>>,
}

/// The untrusted dispatcher, with tweakable misbehavior for the tests.
pub struct MockHost {
    state: Mutex<HostState>,
    pub futexes: FutexTable,
    calls: Mutex<Vec<Ocall>>,
    direct_calls: AtomicUsize,
    exit_calls: AtomicUsize,
    exit_park: (Mutex<bool>, Condvar),
    /// How many exit OCALLs to let "fail" (return) before parking the
    /// caller for good.
    pub exit_returns_before_park: AtomicUsize,
    /// Remaining number of gettime calls to interrupt.
    pub gettime_eintr_budget: AtomicUsize,
    /// When non-zero, sleep is "interrupted" with this much time left.
    pub sleep_remaining_us: AtomicU64,
    /// Delay applied by RPC workers before servicing, to hold requests
    /// in flight.
    pub service_delay_ms: AtomicU64,
    /// When non-zero, attestation blobs are forged at this (enclave)
    /// address instead of being properly host-mapped.
    pub forge_attestation_blobs_at: AtomicUsize,
}

impl MockHost {
    pub fn new() -> Arc<MockHost> {
        Arc::new(MockHost {
            state: Mutex::new(HostState { next_fd: 3, ..Default::default() }),
            futexes: FutexTable::new(),
            calls: Mutex::new(Vec::new()),
            direct_calls: AtomicUsize::new(0),
            exit_calls: AtomicUsize::new(0),
            exit_park: (Mutex::new(false), Condvar::new()),
            exit_returns_before_park: AtomicUsize::new(0),
            gettime_eintr_budget: AtomicUsize::new(0),
            sleep_remaining_us: AtomicU64::new(0),
            service_delay_ms: AtomicU64::new(0),
            forge_attestation_blobs_at: AtomicUsize::new(0),
        })
    }

    pub fn add_file(&self, path: &str, content: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .contents
            .insert(path.to_string(), content);
    }

    pub fn written_to(&self, fd: i32) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .written
            .get(&fd)
            .cloned()
            .unwrap_or_default()
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn calls(&self) -> Vec<Ocall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, code: Ocall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == code).count()
    }

    pub fn direct_calls(&self) -> usize {
        self.direct_calls.load(Ordering::SeqCst)
    }

    pub fn exit_calls(&self) -> usize {
        self.exit_calls.load(Ordering::SeqCst)
    }

    pub fn live_mappings(&self) -> usize {
        self.state.lock().unwrap().mappings.len()
    }

    fn host_alloc(&self, size: usize) -> *mut u8 {
        let buf = vec![0u8; size.max(1)].into_boxed_slice();
        let ptr = buf.as_ptr() as *mut u8;
        self.state.lock().unwrap().mappings.insert(ptr as usize, buf);
        ptr
    }

    /// Service one OCALL the way the untrusted dispatcher would: read the
    /// argument structure out of host memory, act, write outputs back into
    /// host memory.
    pub unsafe fn handle_ocall(&self, code: Ocall, args: *mut u8) -> i32 {
        self.calls.lock().unwrap().push(code);
        match code {
            Ocall::Exit => {
                let n = self.exit_calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n > self.exit_returns_before_park.load(Ordering::SeqCst) {
                    // a real host would not return from here; park the
                    // thread so the test can observe the re-issue loop
                    let (lock, cond) = &self.exit_park;
                    let mut parked = lock.lock().unwrap();
                    loop {
                        parked = cond.wait(parked).unwrap();
                    }
                }
                0
            }
            Ocall::MmapUntrusted => {
                let ms = &mut *(args as *mut MmapUntrustedArgs);
                ms.addr = self.host_alloc(ms.size as usize);
                0
            }
            Ocall::MunmapUntrusted => {
                let ms = &*(args as *const MunmapUntrustedArgs);
                self.state
                    .lock()
                    .unwrap()
                    .mappings
                    .remove(&(ms.addr as usize));
                0
            }
            Ocall::Cpuid => {
                let ms = &mut *(args as *mut CpuidArgs);
                ms.values = [ms.leaf, ms.subleaf, 0x2222, 0x4444];
                0
            }
            Ocall::Open => {
                let ms = &*(args as *const OpenArgs);
                let path = CStr::from_ptr(ms.pathname as *const i8)
                    .to_string_lossy()
                    .into_owned();
                let mut state = self.state.lock().unwrap();
                if !state.contents.contains_key(&path) {
                    return -2; // ENOENT
                }
                let fd = state.next_fd;
                state.next_fd += 1;
                state.files.insert(fd, FileObj { path, pos: 0 });
                fd
            }
            Ocall::Close => {
                let ms = &*(args as *const CloseArgs);
                self.state.lock().unwrap().files.remove(&ms.fd);
                0
            }
            Ocall::Read => {
                let ms = &*(args as *const ReadArgs);
                let mut state = self.state.lock().unwrap();
                let (path, pos) = match state.files.get(&ms.fd) {
                    Some(f) => (f.path.clone(), f.pos),
                    None => return -9, // EBADF
                };
                let content = state.contents.get(&path).cloned().unwrap_or_default();
                let n = ms.count.min(content.len().saturating_sub(pos));
                if n > 0 {
                    ptr::copy_nonoverlapping(content.as_ptr().add(pos), ms.buf, n);
                }
                state.files.get_mut(&ms.fd).unwrap().pos += n;
                n as i32
            }
            Ocall::Write => {
                let ms = &*(args as *const WriteArgs);
                let data = std::slice::from_raw_parts(ms.buf, ms.count);
                self.state
                    .lock()
                    .unwrap()
                    .written
                    .entry(ms.fd)
                    .or_default()
                    .extend_from_slice(data);
                ms.count as i32
            }
            Ocall::Fstat => {
                let ms = &mut *(args as *mut FstatArgs);
                let state = self.state.lock().unwrap();
                let size = state
                    .files
                    .get(&ms.fd)
                    .and_then(|f| state.contents.get(&f.path))
                    .map(|c| c.len() as i64)
                    .unwrap_or(0);
                ms.stat = Stat { mode: 0o100644, size, nlink: 1, ..Stat::default() };
                0
            }
            Ocall::Fionread => 0,
            Ocall::Fsetnonblock | Ocall::Fchmod | Ocall::Fsync | Ocall::Ftruncate => 0,
            Ocall::Lseek => {
                let ms = &*(args as *const LseekArgs);
                let mut state = self.state.lock().unwrap();
                match state.files.get_mut(&ms.fd) {
                    Some(f) => {
                        f.pos = ms.offset as usize;
                        ms.offset as i32
                    }
                    None => -9,
                }
            }
            Ocall::Mkdir => {
                let ms = &*(args as *const MkdirArgs);
                let path = CStr::from_ptr(ms.pathname as *const i8)
                    .to_string_lossy()
                    .into_owned();
                self.state.lock().unwrap().log.push(format!("mkdir {}", path));
                0
            }
            Ocall::Getdents => {
                let ms = &*(args as *const GetdentsArgs);
                let canned = b"dirent-record-bytes";
                let n = canned.len().min(ms.size as usize);
                ptr::copy_nonoverlapping(canned.as_ptr(), ms.dirp, n);
                n as i32
            }
            Ocall::ResumeThread | Ocall::CloneThread => 0,
            Ocall::CreateProcess => {
                let ms = &mut *(args as *mut CreateProcessArgs);
                let argv = std::slice::from_raw_parts(ms.args, ms.nargs);
                let mut rendered = Vec::new();
                for &arg in argv {
                    rendered.push(
                        CStr::from_ptr(arg as *const i8).to_string_lossy().into_owned(),
                    );
                }
                self.state
                    .lock()
                    .unwrap()
                    .log
                    .push(format!("create_process {:?}", rendered));
                ms.pid = 1234;
                ms.proc_fds = [10, 11, 12];
                0
            }
            Ocall::Futex => {
                let ms = &*(args as *const FutexArgs);
                if ms.op & !FUTEX_PRIVATE_FLAG == FUTEX_WAIT {
                    self.futexes.wait(ms.futex as usize, ms.val)
                } else {
                    self.futexes.wake(ms.futex as usize);
                    0
                }
            }
            Ocall::Socketpair => {
                let ms = &mut *(args as *mut SocketpairArgs);
                ms.sockfds = [100, 101];
                0
            }
            Ocall::Listen | Ocall::Accept => {
                // report a canned peer address, deliberately bigger than
                // some callers' capacity
                let canned: &[u8] = b"\x02\x00peer-address-bytes";
                let (addr, addrlen, sockopt) = match code {
                    Ocall::Listen => {
                        let ms = &mut *(args as *mut ListenArgs);
                        (ms.addr, &mut ms.addrlen, &mut ms.sockopt)
                    }
                    _ => {
                        let ms = &mut *(args as *mut AcceptArgs);
                        (ms.addr, &mut ms.addrlen, &mut ms.sockopt)
                    }
                };
                if !addr.is_null() {
                    let n = canned.len().min(*addrlen as usize);
                    ptr::copy_nonoverlapping(canned.as_ptr(), addr, n);
                }
                *addrlen = canned.len() as u32;
                sockopt.receive_buf = 4096;
                sockopt.send_buf = 8192;
                sockopt.tcp_nodelay = 1;
                let mut state = self.state.lock().unwrap();
                let fd = state.next_fd;
                state.next_fd += 1;
                fd
            }
            Ocall::Connect => {
                let ms = &mut *(args as *mut ConnectArgs);
                if !ms.bind_addr.is_null() && ms.bind_addrlen >= 2 {
                    ptr::copy_nonoverlapping(b"\x02\x01".as_ptr(), ms.bind_addr, 2);
                    ms.bind_addrlen = 2;
                }
                ms.sockopt.send_buf = 1024;
                let mut state = self.state.lock().unwrap();
                let fd = state.next_fd;
                state.next_fd += 1;
                fd
            }
            Ocall::Recv => {
                let ms = &mut *(args as *mut RecvArgs);
                let payload = b"recv-payload";
                let n = payload.len().min(ms.count);
                ptr::copy_nonoverlapping(payload.as_ptr(), ms.buf, n);
                if !ms.addr.is_null() {
                    let addr = b"\x02\x00from";
                    let an = addr.len().min(ms.addrlen as usize);
                    ptr::copy_nonoverlapping(addr.as_ptr(), ms.addr, an);
                    ms.addrlen = an as u32;
                }
                if !ms.control.is_null() {
                    let ctl = b"ctl";
                    let cn = ctl.len().min(ms.controllen as usize);
                    ptr::copy_nonoverlapping(ctl.as_ptr(), ms.control, cn);
                    ms.controllen = cn as u64;
                }
                n as i32
            }
            Ocall::Send => {
                let ms = &*(args as *const SendArgs);
                let data = std::slice::from_raw_parts(ms.buf, ms.count);
                self.state
                    .lock()
                    .unwrap()
                    .written
                    .entry(ms.sockfd)
                    .or_default()
                    .extend_from_slice(data);
                ms.count as i32
            }
            Ocall::Setsockopt | Ocall::Shutdown => 0,
            Ocall::Gettime => {
                let budget = &self.gettime_eintr_budget;
                let left = budget.load(Ordering::SeqCst);
                if left > 0 {
                    budget.store(left - 1, Ordering::SeqCst);
                    return Errno::EINTR.as_ret();
                }
                let ms = &mut *(args as *mut GettimeArgs);
                ms.microsec = 1_690_000_000_000_000;
                0
            }
            Ocall::Sleep => {
                let remaining = self.sleep_remaining_us.load(Ordering::SeqCst);
                let ms = &mut *(args as *mut SleepArgs);
                if remaining > 0 {
                    ms.microsec = remaining;
                    return Errno::EINTR.as_ret();
                }
                0
            }
            Ocall::Poll => {
                let ms = &*(args as *const PollArgs);
                let fds = std::slice::from_raw_parts_mut(ms.fds, ms.nfds as usize);
                for fd in fds.iter_mut() {
                    fd.revents = fd.events;
                }
                ms.nfds as i32
            }
            Ocall::Rename => {
                let ms = &*(args as *const RenameArgs);
                let old = CStr::from_ptr(ms.oldpath as *const i8).to_string_lossy().into_owned();
                let new = CStr::from_ptr(ms.newpath as *const i8).to_string_lossy().into_owned();
                self.state
                    .lock()
                    .unwrap()
                    .log
                    .push(format!("rename {} -> {}", old, new));
                0
            }
            Ocall::Delete => {
                let ms = &*(args as *const DeleteArgs);
                let path = CStr::from_ptr(ms.pathname as *const i8).to_string_lossy().into_owned();
                self.state.lock().unwrap().log.push(format!("delete {}", path));
                0
            }
            Ocall::LoadDebug => {
                let cmd = CStr::from_ptr(args as *const i8).to_string_lossy().into_owned();
                self.state.lock().unwrap().log.push(format!("load_debug {}", cmd));
                0
            }
            Ocall::GetAttestation => {
                let ms = &mut *(args as *mut GetAttestationArgs);
                let forged = self.forge_attestation_blobs_at.load(Ordering::SeqCst);
                let mut fill = |content: &[u8]| -> (*mut u8, u64) {
                    if forged != 0 {
                        return (forged as *mut u8, content.len() as u64);
                    }
                    let p = self.host_alloc(content.len());
                    ptr::copy_nonoverlapping(content.as_ptr(), p, content.len());
                    (p, content.len() as u64)
                };
                let (quote, quote_len) = fill(b"quote-blob");
                let (report, report_len) = fill(b"{\"isvEnclaveQuoteStatus\":\"OK\"}");
                let (sig, sig_len) = fill(b"signature-blob");
                let (certs, certs_len) = fill(b"-----BEGIN CERTIFICATE-----");
                ms.attestation = Attestation {
                    quote,
                    quote_len,
                    ias_report: report,
                    ias_report_len: report_len,
                    ias_sig: sig,
                    ias_sig_len: sig_len,
                    ias_certs: certs,
                    ias_certs_len: certs_len,
                };
                0
            }
            Ocall::Eventfd => 200,
        }
    }
}

/// `ExitCall` view of the mock host: the direct enclave-exit transition.
pub struct HostExit(pub Arc<MockHost>);

impl ExitCall for HostExit {
    fn ocall(&self, code: Ocall, args: *mut u8) -> i32 {
        self.0.direct_calls.fetch_add(1, Ordering::SeqCst);
        unsafe { self.0.handle_ocall(code, args) }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WorkerMsg {
    Notify,
    Shutdown,
}

/// Channel-backed synchronizer for the worker side of the ring. The
/// enclave-side producer never waits, so only `NotEmpty` matters.
#[derive(Clone)]
pub struct ChannelSynchronizer {
    tx: mpmc::Sender<WorkerMsg>,
    rx: mpmc::Receiver<WorkerMsg>,
}

impl ChannelSynchronizer {
    pub fn new() -> ChannelSynchronizer {
        let (tx, rx) = mpmc::unbounded();
        ChannelSynchronizer { tx, rx }
    }

    fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
    }
}

impl Synchronizer for ChannelSynchronizer {
    fn wait(&self, event: QueueEvent) -> Result<(), SynchronizationError> {
        match event {
            QueueEvent::NotEmpty => match self.rx.recv() {
                Ok(WorkerMsg::Notify) => Ok(()),
                Ok(WorkerMsg::Shutdown) | Err(_) => Err(SynchronizationError::ChannelClosed),
            },
            QueueEvent::NotFull => Ok(()),
        }
    }

    fn notify(&self, event: QueueEvent) {
        if event == QueueEvent::NotEmpty {
            let _ = self.tx.send(WorkerMsg::Notify);
        }
    }
}

/// Untrusted RPC workers draining the exitless ring.
pub struct WorkerPool {
    sync: ChannelSynchronizer,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        rx: Receiver<ChannelSynchronizer>,
        sync: ChannelSynchronizer,
        host: Arc<MockHost>,
    ) -> WorkerPool {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let rx = rx.clone();
            let host = Arc::clone(&host);
            handles.push(
                thread::Builder::new()
                    .name(format!("rpc-worker-{}", i))
                    .spawn(move || worker_loop(rx, host))
                    .unwrap(),
            );
        }
        log::debug!("spawned {} rpc workers", count);
        WorkerPool { sync, handles }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.handles {
            self.sync.shutdown();
        }
        for handle in self.handles.drain(..) {
            handle.join().unwrap();
        }
    }
}

fn worker_loop(rx: Receiver<ChannelSynchronizer>, host: Arc<MockHost>) {
    loop {
        let req = match rx.recv() {
            Ok(req) => req,
            Err(RecvError::Closed) => break,
        };
        let delay = host.service_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        unsafe { service(req, &host) };
    }
}

/// The completion protocol every real RPC worker must honor: result first,
/// then unlock with release, then a futex wake if a waiter announced
/// itself.
unsafe fn service(req: NonNull<RpcRequest>, host: &MockHost) {
    let req = req.as_ref();
    let code = Ocall::from_u32(req.code).expect("worker dequeued unknown ocall code");
    let ret = host.handle_ocall(code, req.args);
    req.set_result(ret);
    if req.lock.unlock() == RequestLock::LOCKED_WITH_WAITERS {
        host.futexes.wake(req.lock.as_futex_word() as usize);
    }
}

/// Everything one test needs: arena, gateway, mock host, and (optionally)
/// an exitless ring with workers.
pub struct Harness {
    pub arena: EnclaveArena,
    pub host: Arc<MockHost>,
    pub gateway: Gateway,
    _workers: Option<WorkerPool>,
}

impl Harness {
    /// Direct-exit only: no rpc queue installed.
    pub fn direct_only() -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = EnclaveArena::new(1 << 23);
        let host = MockHost::new();
        let gateway = Gateway::new(arena.layout(), HostExit(Arc::clone(&host)));
        Harness { arena, host, gateway, _workers: None }
    }

    /// Exitless setup with `workers` RPC workers and a ring of `queue_len`
    /// slots.
    pub fn exitless(workers: usize, queue_len: usize) -> Harness {
        Harness::exitless_with_spin(workers, queue_len, crate::RPC_SPINLOCK_TIMEOUT)
    }

    /// Exitless setup with a custom spin bound; a tiny bound forces the
    /// futex wait path.
    pub fn exitless_with_spin(workers: usize, queue_len: usize, spin: u32) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let arena = EnclaveArena::new(1 << 23);
        let host = MockHost::new();
        let gateway = Gateway::with_spin_timeout(
            arena.layout(),
            HostExit(Arc::clone(&host)),
            std::num::NonZeroU32::new(spin).unwrap(),
        );
        let sync = ChannelSynchronizer::new();
        let (tx, rx) = rpc_queue::bounded(queue_len, sync.clone());
        let pool = WorkerPool::spawn(workers, rx, sync, Arc::clone(&host));
        gateway.install_rpc_queue(tx).unwrap();
        Harness {
            arena,
            host,
            gateway,
            _workers: Some(pool),
        }
    }

    pub fn handle(&self) -> OcallHandle {
        self.gateway.handle().unwrap()
    }

    pub fn small_stack_handle(&self, size: usize) -> OcallHandle {
        self.gateway.handle_with_stack_size(size).unwrap()
    }
}

static_assertions::assert_impl_all!(Gateway: Send, Sync);
static_assertions::assert_impl_all!(OcallHandle: Send);
static_assertions::assert_not_impl_any!(OcallHandle: Sync);
