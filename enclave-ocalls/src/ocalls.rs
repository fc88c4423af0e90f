/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! One method per OCALL.
//!
//! Every operation follows the same shape: open a scratch-stack scope,
//! build the argument structure and input copies on it, dispatch, validate
//! and copy outputs back into enclave memory, and let the scope guard
//! return the scratch space, on error paths just the same as on success.
//!
//! Buffers larger than [`MAX_UNTRUSTED_STACK_BUF`] would not fit on the
//! scratch stack and are bounced through a host mapping instead, obtained
//! and released with a pair of recursive OCALLs.

use std::cmp;
use std::ffi::CStr;
use std::mem;
use std::ptr;
use std::slice;

use ocall_abi::*;

use crate::usermem::HostPtr;
use crate::OcallHandle;

/// Round up to whole pages, the granularity of host mappings.
fn page_align_up(n: usize) -> usize {
    (n + 0xfff) & !0xfff
}

/// Caller-provided socket address buffer. `len` names the valid bytes of
/// `buf` on the way in and receives the (capacity-clamped) length the host
/// reported on the way out.
pub struct AddrBuf<'a> {
    pub buf: &'a mut [u8],
    pub len: &'a mut u32,
}

/// Caller-provided ancillary-data buffer for [`OcallHandle::recv`], with
/// the same in/out convention as [`AddrBuf`].
pub struct ControlBuf<'a> {
    pub buf: &'a mut [u8],
    pub len: &'a mut u64,
}

/// What the host hands back for a freshly spawned child process.
#[derive(Clone, Copy, Debug)]
pub struct ProcessHandles {
    pub pid: u32,
    pub stream_fds: [i32; 3],
}

/// Attestation evidence copied into enclave memory. `ias_report` and
/// `ias_certs` carry a trailing NUL so they can be handed to text parsers.
#[derive(Default, Debug)]
pub struct AttestationEvidence {
    pub quote: Vec<u8>,
    pub ias_report: Vec<u8>,
    pub ias_sig: Vec<u8>,
    pub ias_certs: Vec<u8>,
}

/// A host mapping obtained for one oversized transfer, returned on drop.
struct MappedBuf<'h> {
    handle: &'h OcallHandle,
    ptr: HostPtr<u8>,
    size: u64,
}

impl<'h> MappedBuf<'h> {
    fn map(handle: &'h OcallHandle, len: usize) -> Result<MappedBuf<'h>, Errno> {
        let size = page_align_up(len) as u64;
        let ptr = handle.mmap_untrusted(-1, 0, size, PROT_READ | PROT_WRITE)?;
        Ok(MappedBuf { handle, ptr, size })
    }
}

impl Drop for MappedBuf<'_> {
    fn drop(&mut self) {
        // nothing to do about an unmap failure on this path
        let _ = self.handle.munmap_untrusted(self.ptr.as_ptr(), self.size);
    }
}

impl OcallHandle {
    fn dispatch<T>(&self, code: Ocall, ms: HostPtr<T>) -> Result<i32, Errno> {
        Errno::check_ret(self.exitless_ocall(code, ms.as_ptr().cast()))
    }

    fn alloc_args<T>(&self) -> Result<HostPtr<T>, Errno> {
        self.ustack.alloc_val::<T>().ok_or(Errno::EPERM)
    }

    /// Copy an enclave buffer onto the scratch stack. A buffer straddling
    /// the enclave boundary is refused; in an enclave build a safe
    /// reference can't straddle, but the bytes still cross the boundary
    /// here, so the check stays.
    fn copy_to_ustack(&self, src: &[u8]) -> Result<HostPtr<u8>, Errno> {
        if self.shared.layout.straddles(src.as_ptr(), src.len()) {
            return Err(Errno::EPERM);
        }
        self.ustack.copy_in_from_enclave(src).ok_or(Errno::EPERM)
    }

    /// Terminate the enclave.
    ///
    /// This loops for two reasons: the exit OCALL can be interrupted, and
    /// the host cannot be trusted to actually terminate the enclave. If
    /// control ever comes back, the only safe thing to do is ask again.
    pub fn exit(&self, exitcode: i32, is_exitgroup: bool) -> ! {
        let _scope = self.ustack.scope();
        let args = match self.ustack.alloc_val::<ExitArgs>() {
            Some(ms) => {
                unsafe {
                    ms.write(ExitArgs {
                        exitcode,
                        is_exitgroup: is_exitgroup as i32,
                    })
                };
                ms.as_ptr().cast()
            }
            None => ptr::null_mut(),
        };
        loop {
            self.direct_ocall(Ocall::Exit, args);
        }
    }

    /// Map `size` bytes of host memory, e.g. as a bounce buffer for a
    /// transfer too large for the scratch stack. The host's chosen
    /// placement is admitted only after verification.
    pub fn mmap_untrusted(
        &self,
        fd: i32,
        offset: u64,
        size: u64,
        prot: u16,
    ) -> Result<HostPtr<u8>, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<MmapUntrustedArgs>()?;
        unsafe {
            ms.write(MmapUntrustedArgs {
                fd,
                prot,
                offset,
                size,
                addr: ptr::null_mut(),
            })
        };
        self.dispatch(Ocall::MmapUntrusted, ms)?;
        let out = unsafe { ms.read() };
        self.shared.layout.copy_ptr_to_enclave(out.addr, size as usize)
    }

    /// Unmap a region previously obtained from the host. A region not
    /// entirely outside the enclave was never ours to unmap.
    pub fn munmap_untrusted(&self, addr: *const u8, size: u64) -> Result<(), Errno> {
        if !self.shared.layout.entirely_outside(addr, size as usize) {
            return Err(Errno::EINVAL);
        }
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<MunmapUntrustedArgs>()?;
        unsafe { ms.write(MunmapUntrustedArgs { addr, size }) };
        self.dispatch(Ocall::MunmapUntrusted, ms)?;
        Ok(())
    }

    pub fn cpuid(&self, leaf: u32, subleaf: u32) -> Result<[u32; 4], Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<CpuidArgs>()?;
        unsafe {
            ms.write(CpuidArgs {
                leaf,
                subleaf,
                values: [0; 4],
            })
        };
        self.dispatch(Ocall::Cpuid, ms)?;
        Ok(unsafe { ms.read() }.values)
    }

    /// Open a host file. The returned fd only means anything to the host;
    /// the enclave must not attach trust to it.
    pub fn open(&self, pathname: &CStr, flags: i32, mode: u16) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<OpenArgs>()?;
        let path = self.copy_to_ustack(pathname.to_bytes_with_nul())?;
        unsafe {
            ms.write(OpenArgs {
                flags,
                mode,
                pathname: path.as_ptr(),
            })
        };
        self.dispatch(Ocall::Open, ms)
    }

    pub fn close(&self, fd: i32) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<CloseArgs>()?;
        unsafe { ms.write(CloseArgs { fd }) };
        self.dispatch(Ocall::Close, ms)?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes from a host fd. The host's reported
    /// length is clamped to the caller's capacity before the copy-back.
    pub fn read(&self, fd: i32, buf: &mut [u8]) -> Result<usize, Errno> {
        let count = buf.len();
        // a bounce mapping is set up before this call's own scope opens:
        // mapping is itself an OCALL with its own scratch needs
        let obuf = if count > MAX_UNTRUSTED_STACK_BUF {
            Some(MappedBuf::map(self, count)?)
        } else {
            None
        };
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<ReadArgs>()?;
        let host_buf = match &obuf {
            Some(m) => m.ptr,
            None => self.ustack.alloc(count).ok_or(Errno::EPERM)?,
        };
        unsafe {
            ms.write(ReadArgs {
                fd,
                count,
                buf: host_buf.as_ptr(),
            })
        };
        let ret = self.dispatch(Ocall::Read, ms)?;
        let mut n = ret as usize;
        if ret > 0 {
            n = cmp::min(n, count);
            unsafe {
                self.shared
                    .layout
                    .copy_to_enclave(buf, host_buf.as_ptr(), n)?
            };
        }
        Ok(n)
    }

    /// Write a buffer to a host fd. The buffer's classification picks the
    /// marshalling: host-resident buffers (e.g. a file the host mapped for
    /// the enclave) pass through untouched, small enclave buffers are
    /// copied onto the scratch stack, large enclave buffers bounce through
    /// a host mapping, and buffers straddling the boundary are refused.
    pub fn write(&self, fd: i32, buf: &[u8]) -> Result<usize, Errno> {
        let count = buf.len();
        let layout = self.shared.layout;

        enum Marshal<'h> {
            PassThrough(*const u8),
            Mapped(MappedBuf<'h>),
            Stack,
        }

        let marshal = if layout.entirely_outside(buf.as_ptr(), count) {
            Marshal::PassThrough(buf.as_ptr())
        } else if layout.entirely_inside(buf.as_ptr(), count) {
            if count > MAX_UNTRUSTED_STACK_BUF {
                let m = MappedBuf::map(self, count)?;
                unsafe { layout.copy_to_host(m.ptr.as_ptr(), buf)? };
                Marshal::Mapped(m)
            } else {
                Marshal::Stack
            }
        } else {
            return Err(Errno::EPERM);
        };

        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<WriteArgs>()?;
        let host_buf = match &marshal {
            Marshal::PassThrough(p) => *p,
            Marshal::Mapped(m) => m.ptr.as_ptr(),
            Marshal::Stack => self.copy_to_ustack(buf)?.as_ptr(),
        };
        unsafe {
            ms.write(WriteArgs {
                fd,
                count,
                buf: host_buf,
            })
        };
        let ret = self.dispatch(Ocall::Write, ms)?;
        Ok(cmp::min(ret as usize, count))
    }

    pub fn fstat(&self, fd: i32) -> Result<Stat, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FstatArgs>()?;
        unsafe {
            ms.write(FstatArgs {
                fd,
                stat: Stat::default(),
            })
        };
        self.dispatch(Ocall::Fstat, ms)?;
        Ok(unsafe { ms.read() }.stat)
    }

    pub fn fionread(&self, fd: i32) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FionreadArgs>()?;
        unsafe { ms.write(FionreadArgs { fd }) };
        self.dispatch(Ocall::Fionread, ms)
    }

    pub fn fsetnonblock(&self, fd: i32, nonblocking: bool) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FsetnonblockArgs>()?;
        unsafe {
            ms.write(FsetnonblockArgs {
                fd,
                nonblocking: nonblocking as i32,
            })
        };
        self.dispatch(Ocall::Fsetnonblock, ms)?;
        Ok(())
    }

    pub fn fchmod(&self, fd: i32, mode: u16) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FchmodArgs>()?;
        unsafe { ms.write(FchmodArgs { fd, mode }) };
        self.dispatch(Ocall::Fchmod, ms)?;
        Ok(())
    }

    pub fn fsync(&self, fd: i32) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FsyncArgs>()?;
        unsafe { ms.write(FsyncArgs { fd }) };
        self.dispatch(Ocall::Fsync, ms)?;
        Ok(())
    }

    pub fn ftruncate(&self, fd: i32, length: u64) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FtruncateArgs>()?;
        unsafe { ms.write(FtruncateArgs { fd, length }) };
        self.dispatch(Ocall::Ftruncate, ms)?;
        Ok(())
    }

    pub fn lseek(&self, fd: i32, offset: u64, whence: i32) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<LseekArgs>()?;
        unsafe { ms.write(LseekArgs { fd, whence, offset }) };
        self.dispatch(Ocall::Lseek, ms)
    }

    pub fn mkdir(&self, pathname: &CStr, mode: u16) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<MkdirArgs>()?;
        let path = self.copy_to_ustack(pathname.to_bytes_with_nul())?;
        unsafe {
            ms.write(MkdirArgs {
                mode,
                pathname: path.as_ptr(),
            })
        };
        self.dispatch(Ocall::Mkdir, ms)?;
        Ok(())
    }

    pub fn getdents(&self, fd: i32, dirp: &mut [u8]) -> Result<usize, Errno> {
        let size = dirp.len();
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<GetdentsArgs>()?;
        let host_dirp = self.ustack.alloc(size).ok_or(Errno::EPERM)?;
        unsafe {
            ms.write(GetdentsArgs {
                fd,
                size: size as u32,
                dirp: host_dirp.as_ptr(),
            })
        };
        let ret = self.dispatch(Ocall::Getdents, ms)?;
        let mut n = ret as usize;
        if ret > 0 {
            n = cmp::min(n, size);
            unsafe {
                self.shared
                    .layout
                    .copy_to_enclave(dirp, host_dirp.as_ptr(), n)?
            };
        }
        Ok(n)
    }

    /// Resume an enclave thread parked in the untrusted runtime. `tcs` is a
    /// host-side handle passed through verbatim; nothing dereferences it in
    /// here.
    pub fn resume_thread(&self, tcs: *mut u8) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        Errno::check_ret(self.exitless_ocall(Ocall::ResumeThread, tcs))?;
        Ok(())
    }

    pub fn clone_thread(&self) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        Errno::check_ret(self.exitless_ocall(Ocall::CloneThread, ptr::null_mut()))?;
        Ok(())
    }

    pub fn create_process(
        &self,
        uri: Option<&CStr>,
        args: &[&CStr],
    ) -> Result<ProcessHandles, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<CreateProcessArgs>()?;
        let uri_host = match uri {
            Some(uri) => self.copy_to_ustack(uri.to_bytes_with_nul())?.as_ptr() as *const u8,
            None => ptr::null(),
        };
        // the argv vector lives on the scratch stack next to the strings
        let argv = self
            .ustack
            .alloc_aligned(
                args.len() * mem::size_of::<*const u8>(),
                mem::align_of::<*const u8>(),
            )
            .ok_or(Errno::EPERM)?
            .cast::<*const u8>();
        for (i, arg) in args.iter().enumerate() {
            let s = self.copy_to_ustack(arg.to_bytes_with_nul())?;
            unsafe { argv.as_ptr().add(i).write(s.as_ptr()) };
        }
        unsafe {
            ms.write(CreateProcessArgs {
                uri: uri_host,
                nargs: args.len(),
                args: argv.as_ptr(),
                pid: 0,
                proc_fds: [-1; 3],
            })
        };
        self.dispatch(Ocall::CreateProcess, ms)?;
        let out = unsafe { ms.read() };
        Ok(ProcessHandles {
            pid: out.pid,
            stream_fds: out.proc_fds,
        })
    }

    /// Host futex operation. The word must be a cross-boundary word: a
    /// futex on enclave memory is meaningless to the host kernel and is
    /// rejected before any dispatch.
    pub fn futex(&self, uaddr: *mut u32, op: i32, val: u32, timeout_us: i64) -> Result<i32, Errno> {
        if !self
            .shared
            .layout
            .entirely_outside(uaddr as *const u8, mem::size_of::<u32>())
        {
            return Err(Errno::EINVAL);
        }
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<FutexArgs>()?;
        unsafe {
            ms.write(FutexArgs {
                futex: uaddr,
                op,
                val,
                timeout_us,
            })
        };
        self.dispatch(Ocall::Futex, ms)
    }

    pub fn socketpair(&self, domain: i32, ty: i32, protocol: i32) -> Result<[i32; 2], Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<SocketpairArgs>()?;
        unsafe {
            ms.write(SocketpairArgs {
                domain,
                ty,
                protocol,
                sockfds: [-1; 2],
            })
        };
        self.dispatch(Ocall::Socketpair, ms)?;
        Ok(unsafe { ms.read() }.sockfds)
    }

    /// Create a bound, listening socket. `addr` carries the bind address in
    /// and receives the host's view of it back out, clamped to its
    /// capacity.
    pub fn listen(
        &self,
        domain: i32,
        ty: i32,
        protocol: i32,
        mut addr: Option<AddrBuf<'_>>,
        sockopt: Option<&mut SockOptDefaults>,
    ) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<ListenArgs>()?;
        let len = addr
            .as_ref()
            .map(|a| cmp::min(*a.len as usize, a.buf.len()))
            .unwrap_or(0);
        let addr_host = match &addr {
            Some(a) if len > 0 => self.copy_to_ustack(&a.buf[..len])?.as_ptr(),
            _ => ptr::null_mut(),
        };
        unsafe {
            ms.write(ListenArgs {
                domain,
                ty,
                protocol,
                addrlen: len as u32,
                addr: addr_host,
                sockopt: SockOptDefaults::default(),
            })
        };
        let fd = self.dispatch(Ocall::Listen, ms)?;
        let out = unsafe { ms.read() };
        if let Some(a) = addr.as_mut() {
            if len > 0 {
                let copied = cmp::min(out.addrlen as usize, len);
                unsafe {
                    self.shared
                        .layout
                        .copy_to_enclave(a.buf, out.addr as *const u8, copied)?
                };
                *a.len = copied as u32;
            }
        }
        if let Some(so) = sockopt {
            *so = out.sockopt;
        }
        Ok(fd)
    }

    pub fn accept(
        &self,
        sockfd: i32,
        mut addr: Option<AddrBuf<'_>>,
        sockopt: Option<&mut SockOptDefaults>,
    ) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<AcceptArgs>()?;
        let len = addr
            .as_ref()
            .map(|a| cmp::min(*a.len as usize, a.buf.len()))
            .unwrap_or(0);
        let addr_host = match &addr {
            Some(a) if len > 0 => self.copy_to_ustack(&a.buf[..len])?.as_ptr(),
            _ => ptr::null_mut(),
        };
        unsafe {
            ms.write(AcceptArgs {
                sockfd,
                addrlen: len as u32,
                addr: addr_host,
                sockopt: SockOptDefaults::default(),
            })
        };
        let fd = self.dispatch(Ocall::Accept, ms)?;
        let out = unsafe { ms.read() };
        if let Some(a) = addr.as_mut() {
            if len > 0 {
                let copied = cmp::min(out.addrlen as usize, len);
                unsafe {
                    self.shared
                        .layout
                        .copy_to_enclave(a.buf, out.addr as *const u8, copied)?
                };
                *a.len = copied as u32;
            }
        }
        if let Some(so) = sockopt {
            *so = out.sockopt;
        }
        Ok(fd)
    }

    pub fn connect(
        &self,
        domain: i32,
        ty: i32,
        protocol: i32,
        addr: &[u8],
        mut bind_addr: Option<AddrBuf<'_>>,
        sockopt: Option<&mut SockOptDefaults>,
    ) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<ConnectArgs>()?;
        let addr_host = self.copy_to_ustack(addr)?;
        let bind_len = bind_addr
            .as_ref()
            .map(|a| cmp::min(*a.len as usize, a.buf.len()))
            .unwrap_or(0);
        let bind_host = match &bind_addr {
            Some(a) => self.copy_to_ustack(&a.buf[..bind_len])?.as_ptr(),
            None => ptr::null_mut(),
        };
        unsafe {
            ms.write(ConnectArgs {
                domain,
                ty,
                protocol,
                addrlen: addr.len() as u32,
                bind_addrlen: bind_len as u32,
                addr: addr_host.as_ptr(),
                bind_addr: bind_host,
                sockopt: SockOptDefaults::default(),
            })
        };
        let fd = self.dispatch(Ocall::Connect, ms)?;
        let out = unsafe { ms.read() };
        if let Some(a) = bind_addr.as_mut() {
            if bind_len > 0 {
                let copied = cmp::min(out.bind_addrlen as usize, bind_len);
                unsafe {
                    self.shared
                        .layout
                        .copy_to_enclave(a.buf, out.bind_addr as *const u8, copied)?
                };
                *a.len = copied as u32;
            }
        }
        if let Some(so) = sockopt {
            *so = out.sockopt;
        }
        Ok(fd)
    }

    /// Receive a message. The address and ancillary buffers are optional;
    /// all reported sizes are clamped to the caller's capacities. Attaching
    /// a `control` buffer with no capacity is ambiguous and rejected.
    pub fn recv(
        &self,
        sockfd: i32,
        buf: &mut [u8],
        mut addr: Option<AddrBuf<'_>>,
        mut control: Option<ControlBuf<'_>>,
    ) -> Result<usize, Errno> {
        if let Some(c) = &control {
            if c.buf.is_empty() || *c.len == 0 {
                return Err(Errno::EINVAL);
            }
        }
        let count = buf.len();
        let addrlen = addr
            .as_ref()
            .map(|a| cmp::min(*a.len as usize, a.buf.len()))
            .unwrap_or(0);
        let controllen = control
            .as_ref()
            .map(|c| cmp::min(*c.len as usize, c.buf.len()))
            .unwrap_or(0);

        let obuf = if count + addrlen + controllen > MAX_UNTRUSTED_STACK_BUF {
            Some(MappedBuf::map(self, count)?)
        } else {
            None
        };
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<RecvArgs>()?;
        let addr_host = match &addr {
            Some(_) => self.ustack.alloc(addrlen).ok_or(Errno::EPERM)?.as_ptr(),
            None => ptr::null_mut(),
        };
        let control_host = match &control {
            Some(_) => self.ustack.alloc(controllen).ok_or(Errno::EPERM)?.as_ptr(),
            None => ptr::null_mut(),
        };
        let data_host = match &obuf {
            Some(m) => m.ptr,
            None => self.ustack.alloc(count).ok_or(Errno::EPERM)?,
        };
        unsafe {
            ms.write(RecvArgs {
                sockfd,
                count,
                addrlen: addrlen as u32,
                addr: addr_host,
                controllen: controllen as u64,
                control: control_host,
                buf: data_host.as_ptr(),
            })
        };
        let ret = self.dispatch(Ocall::Recv, ms)?;
        let out = unsafe { ms.read() };
        if let Some(a) = addr.as_mut() {
            if addrlen > 0 {
                let copied = cmp::min(out.addrlen as usize, addrlen);
                unsafe {
                    self.shared
                        .layout
                        .copy_to_enclave(a.buf, out.addr as *const u8, copied)?
                };
                *a.len = copied as u32;
            }
        }
        if let Some(c) = control.as_mut() {
            let copied = cmp::min(out.controllen as usize, controllen);
            unsafe {
                self.shared
                    .layout
                    .copy_to_enclave(c.buf, out.control as *const u8, copied)?
            };
            *c.len = copied as u64;
        }
        let mut n = ret as usize;
        if ret > 0 {
            n = cmp::min(n, count);
            unsafe {
                self.shared
                    .layout
                    .copy_to_enclave(buf, out.buf as *const u8, n)?
            };
        }
        Ok(n)
    }

    /// Send a message. The payload is marshalled by classification exactly
    /// like [`OcallHandle::write`].
    pub fn send(
        &self,
        sockfd: i32,
        buf: &[u8],
        addr: Option<&[u8]>,
        control: Option<&[u8]>,
    ) -> Result<usize, Errno> {
        if let Some(c) = control {
            if c.is_empty() {
                return Err(Errno::EINVAL);
            }
        }
        let count = buf.len();
        let addrlen = addr.map(<[u8]>::len).unwrap_or(0);
        let controllen = control.map(<[u8]>::len).unwrap_or(0);
        let layout = self.shared.layout;

        enum Marshal<'h> {
            PassThrough(*const u8),
            Mapped(MappedBuf<'h>),
            Stack,
        }

        let marshal = if layout.entirely_outside(buf.as_ptr(), count) {
            Marshal::PassThrough(buf.as_ptr())
        } else if layout.entirely_inside(buf.as_ptr(), count) {
            if count + addrlen + controllen > MAX_UNTRUSTED_STACK_BUF {
                let m = MappedBuf::map(self, count)?;
                unsafe { layout.copy_to_host(m.ptr.as_ptr(), buf)? };
                Marshal::Mapped(m)
            } else {
                Marshal::Stack
            }
        } else {
            return Err(Errno::EPERM);
        };

        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<SendArgs>()?;
        let addr_host = match addr {
            Some(a) => self.copy_to_ustack(a)?.as_ptr() as *const u8,
            None => ptr::null(),
        };
        let control_host = match control {
            Some(c) => self.copy_to_ustack(c)?.as_ptr() as *const u8,
            None => ptr::null(),
        };
        let host_buf = match &marshal {
            Marshal::PassThrough(p) => *p,
            Marshal::Mapped(m) => m.ptr.as_ptr(),
            Marshal::Stack => self.copy_to_ustack(buf)?.as_ptr(),
        };
        unsafe {
            ms.write(SendArgs {
                sockfd,
                count,
                addrlen: addrlen as u32,
                addr: addr_host,
                controllen: controllen as u64,
                control: control_host,
                buf: host_buf,
            })
        };
        let ret = self.dispatch(Ocall::Send, ms)?;
        Ok(cmp::min(ret as usize, count))
    }

    pub fn setsockopt(
        &self,
        sockfd: i32,
        level: i32,
        optname: i32,
        optval: &[u8],
    ) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<SetsockoptArgs>()?;
        let (optval_host, optlen) = if optval.is_empty() {
            (ptr::null(), 0)
        } else {
            (
                self.copy_to_ustack(optval)?.as_ptr() as *const u8,
                optval.len() as u32,
            )
        };
        unsafe {
            ms.write(SetsockoptArgs {
                sockfd,
                level,
                optname,
                optlen,
                optval: optval_host,
            })
        };
        self.dispatch(Ocall::Setsockopt, ms)?;
        Ok(())
    }

    pub fn shutdown(&self, sockfd: i32, how: i32) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<ShutdownArgs>()?;
        unsafe { ms.write(ShutdownArgs { sockfd, how }) };
        self.dispatch(Ocall::Shutdown, ms)?;
        Ok(())
    }

    /// Host wall-clock time in microseconds. Interruptions are retried
    /// internally; callers never see `EINTR` from here.
    pub fn gettime(&self) -> Result<u64, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<GettimeArgs>()?;
        unsafe { ms.write(GettimeArgs::default()) };
        loop {
            match self.dispatch(Ocall::Gettime, ms) {
                Ok(_) => return Ok(unsafe { ms.read() }.microsec),
                Err(e) if e == Errno::EINTR => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleep on the host. On `EINTR` the remaining time is written back to
    /// `microsec`. Always a direct exit: there is no point keeping the
    /// thread inside the enclave to do nothing.
    pub fn sleep(&self, microsec: &mut u64) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<SleepArgs>()?;
        unsafe { ms.write(SleepArgs { microsec: *microsec }) };
        match Errno::check_ret(self.direct_ocall(Ocall::Sleep, ms.as_ptr().cast())) {
            Ok(_) => {
                *microsec = 0;
                Ok(())
            }
            Err(e) if e == Errno::EINTR => {
                *microsec = unsafe { ms.read() }.microsec;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub fn poll(&self, fds: &mut [PollFd], timeout_us: i64) -> Result<usize, Errno> {
        let nfds = fds.len();
        let nfds_bytes = nfds * mem::size_of::<PollFd>();
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<PollArgs>()?;
        let fds_in = unsafe { slice::from_raw_parts(fds.as_ptr() as *const u8, nfds_bytes) };
        let host_fds = self.copy_to_ustack(fds_in)?;
        unsafe {
            ms.write(PollArgs {
                nfds: nfds as u64,
                timeout_us,
                fds: host_fds.as_ptr() as *mut PollFd,
            })
        };
        let ret = self.dispatch(Ocall::Poll, ms)?;
        let out = unsafe { ms.read() };
        let fds_out = unsafe { slice::from_raw_parts_mut(fds.as_mut_ptr() as *mut u8, nfds_bytes) };
        unsafe {
            self.shared
                .layout
                .copy_to_enclave(fds_out, out.fds as *const u8, nfds_bytes)?
        };
        Ok(cmp::min(ret as usize, nfds))
    }

    pub fn rename(&self, oldpath: &CStr, newpath: &CStr) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<RenameArgs>()?;
        let old_host = self.copy_to_ustack(oldpath.to_bytes_with_nul())?;
        let new_host = self.copy_to_ustack(newpath.to_bytes_with_nul())?;
        unsafe {
            ms.write(RenameArgs {
                oldpath: old_host.as_ptr(),
                newpath: new_host.as_ptr(),
            })
        };
        self.dispatch(Ocall::Rename, ms)?;
        Ok(())
    }

    pub fn delete(&self, pathname: &CStr) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<DeleteArgs>()?;
        let path = self.copy_to_ustack(pathname.to_bytes_with_nul())?;
        unsafe {
            ms.write(DeleteArgs {
                pathname: path.as_ptr(),
            })
        };
        self.dispatch(Ocall::Delete, ms)?;
        Ok(())
    }

    /// Pass a command to the host debugger integration. The command string
    /// itself is the whole argument block.
    pub fn load_debug(&self, command: &CStr) -> Result<(), Errno> {
        let _scope = self.ustack.scope();
        let cmd = self.copy_to_ustack(command.to_bytes_with_nul())?;
        Errno::check_ret(self.exitless_ocall(Ocall::LoadDebug, cmd.as_ptr()))?;
        Ok(())
    }

    /// Obtain remote-attestation evidence from the host's quoting stack.
    ///
    /// The host returns four separately mapped blobs. Each is copied into
    /// fresh enclave memory and its host mapping released; if any copy is
    /// refused, every blob copied so far is dropped and the whole call
    /// fails, so no partial evidence survives.
    pub fn get_attestation(
        &self,
        spid: &Spid,
        subkey: &CStr,
        linkable: bool,
        report: &Report,
        nonce: &QuoteNonce,
    ) -> Result<AttestationEvidence, Errno> {
        let scope = self.ustack.scope();
        let ms = self.alloc_args::<GetAttestationArgs>()?;
        let subkey_host = self.copy_to_ustack(subkey.to_bytes_with_nul())?;
        unsafe {
            ms.write(GetAttestationArgs {
                spid: *spid,
                linkable: linkable as u8,
                subkey: subkey_host.as_ptr(),
                report: *report,
                nonce: *nonce,
                attestation: Attestation::default(),
            })
        };
        self.dispatch(Ocall::GetAttestation, ms)?;
        // take the record out before the scratch space goes away; the
        // blob copies below each need scratch space of their own
        let att = unsafe { ms.read() }.attestation;
        drop(scope);

        let mut failed = false;
        let evidence = AttestationEvidence {
            quote: self.copy_in_blob(att.quote, att.quote_len, false, &mut failed),
            ias_report: self.copy_in_blob(att.ias_report, att.ias_report_len, true, &mut failed),
            ias_sig: self.copy_in_blob(att.ias_sig, att.ias_sig_len, false, &mut failed),
            ias_certs: self.copy_in_blob(att.ias_certs, att.ias_certs_len, true, &mut failed),
        };
        if failed {
            // evidence drops here; nothing partial escapes
            return Err(Errno::EACCES);
        }
        Ok(evidence)
    }

    /// Copy one host-mapped attestation blob into enclave memory and unmap
    /// it. A refused copy is recorded in `failed` but the unmapping still
    /// happens: the host region must not be kept alive by our failure.
    fn copy_in_blob(&self, blob: *mut u8, len: u64, nul_terminate: bool, failed: &mut bool) -> Vec<u8> {
        if blob.is_null() || len == 0 {
            return Vec::new();
        }
        let len = len as usize;
        let mut buf = vec![0u8; len + nul_terminate as usize];
        if unsafe { self.shared.layout.copy_to_enclave(&mut buf[..len], blob, len) }.is_err() {
            *failed = true;
        }
        let _ = self.munmap_untrusted(blob, page_align_up(len) as u64);
        buf
    }

    pub fn eventfd(&self, initval: u32, flags: i32) -> Result<i32, Errno> {
        let _scope = self.ustack.scope();
        let ms = self.alloc_args::<EventfdArgs>()?;
        unsafe { ms.write(EventfdArgs { initval, flags }) };
        self.dispatch(Ocall::Eventfd, ms)
    }
}
