//! The interpreter runtime: one owned object holding the whole machine.
//!
//! RAM is carved into contiguous regions bounded by base/cursor pairs:
//!
//! ```text
//! csp0..csp   interned strings        csp..tsp    temporary strings
//! pp0..pp     tokenized program       vp0..vp     variable records
//! sp0..sp     value stack             rsp0..rsp   return stack
//! obj         staging for the line being tokenized
//! bufs[0..5]  terminal and channel line buffers, at the top of RAM
//! ```
//!
//! Bases are fixed at construction (CLEAR may rebase the pool/program
//! boundary); cursors move as the regions fill and drain.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::console::Console;
use crate::error::Error;
use crate::ram::{Addr, Ram, NIL, RAM_SIZE};

pub const BUF_SIZE: u16 = 256;
pub const CSTR_SIZE: u16 = 4096;
pub const PROG_SIZE: u16 = 8192;
pub const STACK_SIZE: u16 = 120;
pub const RSTACK_SIZE: u16 = 60;
pub const ESTACK_SIZE: usize = 20;
pub const CHANNELS: usize = 5;

/// A value-stack item takes six bytes: string offset, then number.
pub const VALUE_BYTES: u16 = 6;
/// A return-stack frame takes four bytes: line start, then token address.
pub const FRAME_BYTES: u16 = 4;

/// An open file channel. Channel 0 is the terminal and is never stored here.
pub enum Channel {
    Read(BufReader<File>),
    Write(File),
}

/// An operator pending on the evaluator stack: index into the operator
/// table, or `None` for the per-invocation sentinel.
pub struct PendingOper {
    pub oper: Option<u8>,
    pub priority: u8,
}

pub struct Runtime {
    pub ram: Ram,

    pub csp0: Addr,
    pub csp: Addr,
    pub tsp: Addr,
    pub pp0: Addr,
    pub pp: Addr,
    pub vp0: Addr,
    pub vp: Addr,
    pub sp0: Addr,
    pub sp: Addr,
    pub rsp0: Addr,
    pub rsp: Addr,
    pub obj: Addr,
    pub bufs: [Addr; CHANNELS],

    /// First byte (size field) of the line under execution.
    pub ip0: Addr,
    /// Next token to execute, or NIL to stop.
    pub ip: Addr,
    /// First byte of the next line; NIL while executing outside the program.
    pub ipn: Addr,
    /// Walks DATA bodies for READ.
    pub data_next: Addr,

    /// Line to jump to on error, or NIL for the default handler.
    pub on_error: Addr,
    /// Last error code captured by an ON ERROR jump; read by ERR.
    pub err: u8,
    /// Resume point recorded when a program stops; used by CONTINUE.
    pub cont: Option<(Addr, Addr, Addr)>,

    pub prog_changed: bool,
    pub trace: bool,
    pub bye: bool,

    pub estack: Vec<PendingOper>,
    pub channels: [Option<Channel>; CHANNELS],
    pub rng: StdRng,
    pub started: Instant,
    pub console: Box<dyn Console>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("csp0", &self.csp0)
            .field("csp", &self.csp)
            .field("tsp", &self.tsp)
            .field("pp0", &self.pp0)
            .field("pp", &self.pp)
            .field("vp0", &self.vp0)
            .field("vp", &self.vp)
            .field("sp0", &self.sp0)
            .field("sp", &self.sp)
            .field("rsp0", &self.rsp0)
            .field("rsp", &self.rsp)
            .field("obj", &self.obj)
            .field("bufs", &self.bufs)
            .field("ip0", &self.ip0)
            .field("ip", &self.ip)
            .field("ipn", &self.ipn)
            .field("data_next", &self.data_next)
            .field("on_error", &self.on_error)
            .field("err", &self.err)
            .field("cont", &self.cont)
            .field("prog_changed", &self.prog_changed)
            .field("trace", &self.trace)
            .field("bye", &self.bye)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(console: Box<dyn Console>) -> Self {
        let top = RAM_SIZE as u32;
        let buf = |i: u32| (top - (CHANNELS as u32 - i) * BUF_SIZE as u32) as Addr;
        let bufs = [buf(0), buf(1), buf(2), buf(3), buf(4)];
        let obj = bufs[0] - BUF_SIZE;
        let rsp0 = obj - RSTACK_SIZE;
        let sp0 = rsp0 - STACK_SIZE;

        let mut rt = Runtime {
            ram: Ram::new(),
            csp0: 0,
            csp: 0,
            tsp: 0,
            pp0: CSTR_SIZE,
            pp: CSTR_SIZE,
            vp0: CSTR_SIZE + PROG_SIZE,
            vp: CSTR_SIZE + PROG_SIZE,
            sp0,
            sp: sp0,
            rsp0,
            rsp: rsp0,
            obj,
            bufs,
            ip0: NIL,
            ip: NIL,
            ipn: NIL,
            data_next: CSTR_SIZE + 4,
            on_error: NIL,
            err: 0,
            cont: None,
            prog_changed: false,
            trace: false,
            bye: false,
            estack: Vec::with_capacity(ESTACK_SIZE),
            channels: [None, None, None, None, None],
            rng: StdRng::seed_from_u64(0),
            started: Instant::now(),
            console,
        };
        rt.reset_full();
        rt
    }

    /// The byte under the instruction pointer.
    pub fn code(&self) -> u8 {
        self.ram.byte(self.ip)
    }

    /// Consume one expected token byte.
    pub fn expect(&mut self, tok: u8, err: Error) -> Result<(), Error> {
        if self.ram.byte(self.ip) != tok {
            return Err(err);
        }
        self.ip += 1;
        Ok(())
    }

    /// True while the executing line belongs to the program store.
    pub fn in_program(&self) -> bool {
        self.ipn != NIL
    }

    // ---- reset levels ------------------------------------------------

    /// Dispatcher-entry reset: value stack, operator stack, temp strings.
    pub fn reset_volatile(&mut self) {
        self.sp = self.sp0;
        self.estack.clear();
        self.tsp = self.csp;
    }

    /// RUN-level reset: variables, stacks, data pointer, error state.
    /// Program and interned strings survive.
    pub fn reset_variables(&mut self) {
        self.reset_volatile();
        self.rsp = self.rsp0;
        self.vp = self.vp0;
        self.data_next = self.pp0 + 4;
        self.on_error = NIL;
        self.err = 0;
        self.cont = None;
        self.rng = StdRng::seed_from_u64(0);
    }

    /// Cold start: everything, including program, strings and channels.
    pub fn reset_full(&mut self) {
        self.reset_variables();
        self.csp = self.csp0;
        self.tsp = self.csp0;
        self.pp = self.pp0;
        self.prog_changed = false;
        self.trace = false;
        self.close_channels();
    }

    pub fn close_channels(&mut self) {
        for ch in self.channels.iter_mut() {
            *ch = None;
        }
    }

    // ---- value stack -------------------------------------------------

    pub fn push(&mut self, n: f32, s: Addr) -> Result<(), Error> {
        if self.sp - self.sp0 > STACK_SIZE - VALUE_BYTES {
            return Err(Error::ExpressionTooLong);
        }
        self.ram.poke(self.sp, s);
        self.ram.poke_num(self.sp + 2, n);
        self.sp += VALUE_BYTES;
        Ok(())
    }

    pub fn push_num(&mut self, n: f32) -> Result<(), Error> {
        self.push(n, NIL)
    }

    pub fn push_str(&mut self, s: Addr) -> Result<(), Error> {
        debug_assert!(s != NIL);
        self.push(0.0, s)
    }

    pub fn pop(&mut self) -> Result<(f32, Addr), Error> {
        if self.sp == self.sp0 {
            return Err(Error::Value);
        }
        self.sp -= VALUE_BYTES;
        Ok((self.ram.peek_num(self.sp + 2), self.ram.peek(self.sp)))
    }

    pub fn pop_num(&mut self) -> Result<f32, Error> {
        let (n, s) = self.pop()?;
        if s != NIL {
            return Err(Error::Type);
        }
        Ok(n)
    }

    pub fn pop_str(&mut self) -> Result<Addr, Error> {
        let (_, s) = self.pop()?;
        if s == NIL {
            return Err(Error::Type);
        }
        Ok(s)
    }

    /// Address of the number field of the topmost item.
    pub fn tos_num(&self) -> Result<Addr, Error> {
        if self.sp == self.sp0 {
            return Err(Error::Value);
        }
        Ok(self.sp - VALUE_BYTES + 2)
    }

    // ---- return stack ------------------------------------------------

    pub fn rpush(&mut self, ip0: Addr, ip: Addr) -> Result<(), Error> {
        if self.rsp - self.rsp0 > RSTACK_SIZE - FRAME_BYTES {
            return Err(Error::TooManyGosub);
        }
        self.ram.poke(self.rsp, ip0);
        self.ram.poke(self.rsp + 2, ip);
        self.rsp += FRAME_BYTES;
        Ok(())
    }

    pub fn rpop(&mut self) -> Result<(Addr, Addr), Error> {
        if self.rsp == self.rsp0 {
            return Err(Error::Return);
        }
        self.rsp -= FRAME_BYTES;
        Ok((self.ram.peek(self.rsp), self.ram.peek(self.rsp + 2)))
    }

    // ---- operator stack ----------------------------------------------

    pub fn epush(&mut self, oper: Option<u8>, priority: u8) -> Result<(), Error> {
        if self.estack.len() >= ESTACK_SIZE {
            return Err(Error::ExpressionTooLong);
        }
        self.estack.push(PendingOper { oper, priority });
        Ok(())
    }

    pub fn epop(&mut self) -> Result<Option<u8>, Error> {
        match self.estack.pop() {
            Some(item) => Ok(item.oper),
            None => Err(Error::Syntax),
        }
    }

    // ---- string pool -------------------------------------------------

    /// Intern a string; the caller is expected to `cstr_find` first.
    pub fn cstr_add(&mut self, bytes: &[u8]) -> Result<Addr, Error> {
        let len = bytes.len() as u32;
        if self.csp as u32 + len + 1 >= self.pp0 as u32 {
            return Err(Error::OutOfStrings);
        }
        let at = self.csp;
        self.ram.write_cstr(at, bytes);
        self.csp += len as u16 + 1;
        Ok(at)
    }

    /// Allocate a transient string, discarded at the next volatile reset.
    pub fn cstr_add_temp(&mut self, bytes: &[u8]) -> Result<Addr, Error> {
        let len = bytes.len() as u32;
        if self.tsp as u32 + len + 1 >= self.pp0 as u32 {
            return Err(Error::OutOfStrings);
        }
        let at = self.tsp;
        self.ram.write_cstr(at, bytes);
        self.tsp += len as u16 + 1;
        Ok(at)
    }

    /// Look for an exact match in the interned portion of the pool.
    pub fn cstr_find(&self, bytes: &[u8]) -> Option<Addr> {
        let mut s = self.csp0;
        while s < self.csp {
            let len = self.ram.strlen(s);
            if self.ram.cstr(s) == bytes {
                return Some(s);
            }
            s += len + 1;
        }
        None
    }

    /// Allocate a temporary string and push it.
    pub fn push_temp(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let s = self.cstr_add_temp(bytes)?;
        self.push_str(s)
    }

    /// Push the empty string, reusing the trailing NUL of the last interned
    /// string when there is one.
    pub fn push_empty(&mut self) -> Result<(), Error> {
        if self.csp == self.csp0 {
            self.ram.set_byte(self.csp, 0);
            self.csp += 1;
        }
        self.push_str(self.csp - 1)
    }

    // ---- channels ----------------------------------------------------

    /// Parse an optional `#channel,` prefix; `None` means the terminal.
    pub fn parse_channel(&mut self) -> Result<Option<usize>, Error> {
        if self.code() != b'#' {
            return Ok(None);
        }
        self.ip += 1;
        let ch = self.expr_int()?;
        if !(1..CHANNELS as i32).contains(&ch) {
            return Err(Error::IllegalChannel);
        }
        if self.channels[ch as usize].is_none() {
            return Err(Error::ChannelClosed);
        }
        self.expect(b',', Error::Comma)?;
        Ok(Some(ch as usize))
    }

    pub fn channel_read_line(&mut self, ch: usize) -> Result<String, Error> {
        match self.channels[ch].as_mut() {
            Some(Channel::Read(reader)) => {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => Err(Error::IllegalInput),
                    Ok(_) => {
                        while line.ends_with('\n') || line.ends_with('\r') {
                            line.pop();
                        }
                        Ok(line)
                    }
                }
            }
            _ => Err(Error::IllegalInput),
        }
    }

    pub fn channel_write(&mut self, ch: usize, text: &str) -> Result<(), Error> {
        use std::io::Write;
        match self.channels[ch].as_mut() {
            Some(Channel::Write(file)) => {
                file.write_all(text.as_bytes()).map_err(|_| Error::File)
            }
            _ => Err(Error::IllegalMode),
        }
    }

    /// Copy a text line into one of the RAM line buffers, NUL-terminated and
    /// truncated to the buffer size.
    pub fn load_buffer(&mut self, at: Addr, text: &str) {
        let mut bytes = text.as_bytes();
        if bytes.len() > BUF_SIZE as usize - 1 {
            bytes = &bytes[..BUF_SIZE as usize - 1];
        }
        self.ram.write_cstr(at, bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::TestConsole;

    fn runtime() -> Runtime {
        let (con, _, _) = TestConsole::new(&[]);
        Runtime::new(Box::new(con))
    }

    #[test]
    fn test_region_ordering() {
        let rt = runtime();
        assert!(rt.csp0 <= rt.csp && rt.csp <= rt.tsp && rt.tsp <= rt.pp0);
        assert!(rt.pp0 <= rt.pp && rt.pp <= rt.vp0);
        assert!(rt.vp0 <= rt.vp && rt.vp <= rt.sp0);
        assert!(rt.sp0 <= rt.sp && rt.sp <= rt.rsp0);
        assert!(rt.rsp0 <= rt.rsp && rt.rsp <= rt.obj);
        assert!(rt.obj < rt.bufs[0]);
        for i in 1..CHANNELS {
            assert!(rt.bufs[i - 1] < rt.bufs[i]);
        }
        assert_eq!(rt.bufs[CHANNELS - 1] as usize + BUF_SIZE as usize, RAM_SIZE);
    }

    #[test]
    fn test_value_stack_tags() {
        let mut rt = runtime();
        rt.push_num(2.5).unwrap();
        assert_eq!(rt.pop_num().unwrap(), 2.5);
        rt.push_num(1.0).unwrap();
        assert!(matches!(rt.pop_str(), Err(Error::Type)));
        assert!(matches!(rt.pop(), Err(Error::Value)));
    }

    #[test]
    fn test_value_stack_overflow() {
        let mut rt = runtime();
        for _ in 0..STACK_SIZE / VALUE_BYTES {
            rt.push_num(0.0).unwrap();
        }
        assert!(matches!(rt.push_num(0.0), Err(Error::ExpressionTooLong)));
        assert_eq!((rt.sp - rt.sp0) % VALUE_BYTES, 0);
    }

    #[test]
    fn test_return_stack() {
        let mut rt = runtime();
        rt.rpush(10, 20).unwrap();
        assert_eq!((rt.rsp - rt.rsp0) % FRAME_BYTES, 0);
        assert_eq!(rt.rpop().unwrap(), (10, 20));
        assert!(matches!(rt.rpop(), Err(Error::Return)));
    }

    #[test]
    fn test_pool_interning() {
        let mut rt = runtime();
        let a = rt.cstr_add(b"ALPHA").unwrap();
        let b = rt.cstr_add(b"BETA").unwrap();
        assert_eq!(rt.cstr_find(b"ALPHA"), Some(a));
        assert_eq!(rt.cstr_find(b"BETA"), Some(b));
        assert_eq!(rt.cstr_find(b"GAMMA"), None);
        assert_eq!(rt.ram.cstr(a), b"ALPHA");
    }

    #[test]
    fn test_temp_strings_dropped_on_volatile_reset() {
        let mut rt = runtime();
        rt.cstr_add(b"KEEP").unwrap();
        let t = rt.cstr_add_temp(b"TEMP").unwrap();
        assert!(t >= rt.csp);
        rt.reset_volatile();
        assert_eq!(rt.tsp, rt.csp);
        assert_eq!(rt.sp, rt.sp0);
        assert!(rt.estack.is_empty());
        assert_eq!(rt.cstr_find(b"KEEP"), Some(rt.csp0));
    }
}
