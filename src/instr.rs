//! Statement dispatch and control flow.
//!
//! The dispatcher executes exactly one statement per call: volatile reset,
//! skip separators, read the opcode, run the routine, then resolve whatever
//! trails the statement. Statement routines are free to move `ip0`/`ip`;
//! `ip == NIL` afterwards means stop executing. Errors unwind to
//! [`Runtime::instr_exec`], the single catch point, which either reports and
//! stops or jumps to the ON ERROR line.

use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Error;
use crate::eval::{self, CODE_EQ};
use crate::ram::{Addr, NIL};
use crate::runtime::{Channel, Runtime, CHANNELS, RSTACK_SIZE, STACK_SIZE};
use crate::token::{self, *};
use crate::variables::{VarRef, VAR_FOR, VAR_MAT, VAR_NUM, VAR_STR, VAR_VEC};

impl Runtime {
    /// Keep dispatching statements until the program stops or fails.
    pub fn continue_exec(&mut self) {
        while self.ip != NIL && !self.bye {
            if self.instr_exec() != 0 {
                break;
            }
        }
    }

    /// Execute one statement; returns its error code, 0 on success.
    pub fn instr_exec(&mut self) -> u8 {
        self.reset_volatile();
        match self.exec_statement() {
            Ok(()) => 0,
            Err(e) => self.handle_error(e),
        }
    }

    fn exec_statement(&mut self) -> Result<(), Error> {
        if self.console.take_interrupt() {
            if self.in_program() {
                return Err(Error::Break);
            }
            self.ip = NIL;
            return Ok(());
        }
        loop {
            match self.code() {
                b':' | CODE_THEN => self.ip += 1,
                0 => {
                    if self.instr_skip() == NIL {
                        return Ok(());
                    }
                }
                _ => break,
            }
        }
        if self.trace {
            self.trace_statement();
        }
        let op = self.code();
        if token::is_keyword(op) {
            self.ip += 1;
            self.dispatch(op)?;
        } else if op == CODE_IDN || op == CODE_IDNS {
            self.instr_let()?;
        } else if op == b'\'' {
            self.skip_rest_of_line();
        } else {
            return Err(Error::IllegalInstruction);
        }
        if self.ip != NIL {
            let c = self.code();
            if c == b'\'' || c == 0 {
                self.instr_skip();
            } else if self.ip != self.line_first(self.ip0) && c != b':' && c != CODE_THEN {
                return Err(Error::Syntax);
            }
        }
        Ok(())
    }

    /// Either report the error and stop, or transfer to the ON ERROR line.
    /// The handler jump also pushes a return frame for the fault site, so a
    /// handler can RETURN to the statement after the failure.
    fn handle_error(&mut self, e: Error) -> u8 {
        let code = e.code();
        if self.on_error != NIL && self.rpush(self.ip0, self.ip).is_ok() {
            self.err = code;
            self.ip0 = self.on_error;
            self.instr_line();
            return 0;
        }
        let mut msg = String::new();
        if self.in_program() {
            msg.push_str(&format!("LINE {}: ", self.line_num(self.ip0)));
            self.cont = Some((self.ip0, self.ip, self.ipn));
        }
        msg.push_str(&format!("{}\n", e));
        self.console.diag(&msg);
        self.on_error = NIL;
        self.close_channels();
        self.ip = NIL;
        code
    }

    fn dispatch(&mut self, op: u8) -> Result<(), Error> {
        match op {
            CODE_ATTR => self.instr_attr(),
            CODE_BYE => self.instr_bye(),
            CODE_CHAIN => self.instr_chain(),
            CODE_CLEAR => self.instr_clear(),
            CODE_CLOSE => self.instr_close(),
            CODE_CLS => {
                self.console.cls();
                Ok(())
            }
            CODE_CONTINUE => {
                if let Some((ip0, ip, ipn)) = self.cont.take() {
                    self.ip0 = ip0;
                    self.ip = ip;
                    self.ipn = ipn;
                }
                Ok(())
            }
            CODE_DATA => {
                if !self.in_program() {
                    return Err(Error::IllegalOutsideProgram);
                }
                self.skip_rest_of_line();
                Ok(())
            }
            CODE_DEF => {
                // Declarations execute as no-ops; calls find them by rescan.
                self.skip_rest_of_line();
                Ok(())
            }
            CODE_DIM => self.instr_dim(),
            CODE_DUMP => {
                self.dump();
                Ok(())
            }
            CODE_END => {
                self.ip = NIL;
                self.ipn = NIL;
                self.on_error = NIL;
                Ok(())
            }
            CODE_ERROR => {
                let n = self.expr_int()?;
                Err(Error::from_code(n as u8))
            }
            CODE_FOR => self.instr_for(),
            CODE_GOSUB => {
                let line = self.expr_int()?;
                self.instr_gosub(line)
            }
            CODE_GOTO => {
                let line = self.expr_int()?;
                self.instr_goto(line)
            }
            CODE_IF => self.instr_if(),
            CODE_INPUT => self.instr_input(),
            CODE_LET => self.instr_let(),
            CODE_LINPUT => self.instr_linput(),
            CODE_LIST => {
                let listing = self.list_program();
                self.console.write(&listing);
                Ok(())
            }
            CODE_LOAD => self.instr_load(),
            CODE_MERGE => self.instr_merge(),
            CODE_NEW => {
                if self.prog_check() {
                    let inside = self.in_program();
                    self.reset_full();
                    if inside {
                        self.ip = NIL;
                        self.ipn = NIL;
                    }
                }
                Ok(())
            }
            CODE_NEXT => self.instr_next(),
            CODE_ON => self.instr_on(),
            CODE_OPEN => self.instr_open(),
            CODE_PRINT => self.instr_print(),
            CODE_RANDOMIZE => self.instr_randomize(),
            CODE_READ => self.instr_read(),
            CODE_REM => {
                self.skip_rest_of_line();
                Ok(())
            }
            CODE_REPEAT => {
                if !self.in_program() {
                    return Err(Error::IllegalOutsideProgram);
                }
                self.ip = self.line_text(self.ip0);
                Ok(())
            }
            CODE_RESTORE => self.instr_restore(),
            CODE_RETURN => {
                let (ip0, ip) = self.rpop()?;
                self.set_line_from(ip0);
                self.ip = ip;
                Ok(())
            }
            CODE_RUN => {
                self.reset_variables();
                self.ip0 = self.pp0;
                self.instr_line();
                Ok(())
            }
            CODE_SAVE => self.instr_save(),
            CODE_SKIP => {
                if !self.in_program() {
                    return Err(Error::IllegalOutsideProgram);
                }
                self.skip_rest_of_line();
                Ok(())
            }
            CODE_STEP | CODE_THEN | CODE_TO => Err(Error::IllegalInstruction),
            CODE_STOP => Err(Error::Stop),
            CODE_SYS => {
                let s = self.expr_str()?;
                let command = self.ram.cstr_string(s);
                self.console.sys(&command);
                Ok(())
            }
            CODE_TRACE => {
                let n = self.expr_num()?;
                self.trace = n != 0.0;
                Ok(())
            }
            _ => Err(Error::IllegalInstruction),
        }
    }

    // ---- line walking ------------------------------------------------

    /// Advance `ip` to the next statement, crossing into the next line when
    /// the current one ends. Returns the new `ip`, NIL when nothing is left.
    pub fn instr_skip(&mut self) -> Addr {
        while self.code() != 0 {
            if self.code() == b':' || self.code() == CODE_THEN {
                self.ip += 1;
                return self.ip;
            }
            self.ip = token::token_skip(&self.ram, self.ip);
        }
        if self.ipn == NIL || self.ipn >= self.pp {
            self.ip = NIL;
            return NIL;
        }
        self.ip0 = self.ipn;
        self.ipn = self.line_next(self.ip0);
        self.ip = self.line_text(self.ip0);
        self.ip
    }

    /// Scan forward statement by statement for the given keyword code;
    /// returns the address just past it, or NIL.
    pub fn instr_lookfor(&mut self, code: u8) -> Addr {
        if self.ip == NIL {
            return NIL;
        }
        loop {
            if self.code() == code {
                self.ip += 1;
                return self.ip;
            }
            if self.instr_skip() == NIL {
                return NIL;
            }
        }
    }

    /// Park `ip` on the current line's terminator so the dispatcher moves to
    /// the next line; ends execution on the transient line.
    fn skip_rest_of_line(&mut self) {
        if self.ipn == NIL {
            self.ip = NIL;
        } else {
            self.ip = self.ipn - 1;
        }
    }

    fn instr_goto(&mut self, line: i32) -> Result<(), Error> {
        self.ip0 = self.prog_find(line)?;
        self.instr_line();
        Ok(())
    }

    fn instr_gosub(&mut self, line: i32) -> Result<(), Error> {
        self.rpush(self.ip0, self.ip)?;
        self.instr_goto(line)
    }

    fn trace_statement(&mut self) {
        let mut out = String::from("\nEXECUTE ");
        if self.in_program() {
            out.push_str(&format!("{:4} ", self.line_num(self.ip0)));
        }
        let mut a = self.ip;
        let mut space = false;
        while self.ram.byte(a) != 0 {
            a = self.write_token(a, &mut out, &mut space);
        }
        out.push('\n');
        self.console.diag(&out);
    }

    // ---- assignment and declarations ---------------------------------

    /// LET, explicit or implied. A scalar seen for the first time becomes
    /// visible only after its right-hand side has evaluated, so
    /// `LET X = X + 1` on a fresh X is an undefined-variable error.
    fn instr_let(&mut self) -> Result<(), Error> {
        loop {
            let code = self.code();
            if code != CODE_IDN && code != CODE_IDNS {
                return Err(Error::Identifier);
            }
            let name = self.ram.peek(self.ip + 1);
            match self.var_find(name) {
                Some(v) => {
                    let r = self.var_parse(v)?;
                    self.assign_expr(r)?;
                }
                None => {
                    self.ip += 3;
                    if self.code() == b'(' {
                        return Err(Error::UndefinedVariable);
                    }
                    self.expect(CODE_EQ, Error::Assignment)?;
                    self.expr()?;
                    if code == CODE_IDNS {
                        let s = self.pop_str()?;
                        let bytes = self.ram.cstr(s).to_vec();
                        let v = self.var_create_scalar(name, VAR_STR)?;
                        let va = self.var_addr(v);
                        self.assign_string(v, va, &bytes)?;
                    } else {
                        let n = self.pop_num()?;
                        let v = self.var_create_scalar(name, VAR_NUM)?;
                        let va = self.var_addr(v);
                        self.ram.poke_num(va, n);
                    }
                }
            }
            if self.code() != b',' {
                return Ok(());
            }
            self.ip += 1;
        }
    }

    fn instr_dim(&mut self) -> Result<(), Error> {
        loop {
            let code = self.code();
            if code != CODE_IDN && code != CODE_IDNS {
                return Err(Error::Identifier);
            }
            let name = self.ram.peek(self.ip + 1);
            if self.var_find(name).is_some() {
                return Err(Error::VariableAlreadyDefined);
            }
            self.ip += 3;
            let mut ty = if code == CODE_IDNS { VAR_STR } else { VAR_NUM };
            self.expect(b'(', Error::Subscript)?;
            let d1 = self.expr_int()?;
            let mut d2 = 1i32;
            if self.code() == b',' {
                self.ip += 1;
                d2 = self.expr_int()?;
                ty |= VAR_MAT;
            } else {
                ty |= VAR_VEC;
            }
            self.expect(b')', Error::OpenParWithoutClosePar)?;
            if d1 < 1 || d2 < 1 || d1 > 0xFFFF || d2 > 0xFFFF {
                return Err(Error::SubscriptRange);
            }
            self.var_create_array(name, ty, d1 as u16, d2 as u16)?;
            if self.code() != b',' {
                return Ok(());
            }
            self.ip += 1;
        }
    }

    // ---- loops and jumps ---------------------------------------------

    fn instr_for(&mut self) -> Result<(), Error> {
        self.expect(CODE_IDN, Error::NumVar)?;
        let name = self.ram.peek(self.ip);
        match self.var_find(name) {
            Some(v) => {
                if self.var_type(v) != VAR_FOR {
                    return Err(Error::ForVar);
                }
            }
            None => {
                self.var_create_for(name, 0.0, 0.0, 1.0)?;
            }
        }
        self.ip += 2;
        // The record is re-located after every expression: each one may
        // shift the variable region.
        let r = VarRef::scalar(name, VAR_FOR);
        self.assign_expr(r)?;
        self.expect(CODE_TO, Error::ToExpected)?;
        let bound = self.expr_num()?;
        let (_, va) = self.var_locate(r)?;
        self.ram.poke_num(va + 4, bound);
        if self.code() == CODE_STEP {
            self.ip += 1;
            let step = self.expr_num()?;
            let (_, va) = self.var_locate(r)?;
            self.ram.poke_num(va + 8, step);
        } else {
            self.ram.poke_num(va + 8, 1.0);
        }
        // Resume point: NEXT jumps back to the token after this header.
        let (v, va) = self.var_locate(r)?;
        self.ram.poke(va + 12, self.ip0);
        self.ram.poke(va + 14, self.ip);
        if !self.var_for_check(v) {
            // Body never runs: find the matching NEXT and fall past it.
            loop {
                if self.instr_lookfor(CODE_NEXT) == NIL {
                    return Err(Error::ForWithoutNext);
                }
                self.expect(CODE_IDN, Error::NumVar)?;
                let found = self.ram.peek(self.ip);
                self.ip += 2;
                if found == name {
                    break;
                }
            }
        }
        Ok(())
    }

    fn instr_next(&mut self) -> Result<(), Error> {
        self.expect(CODE_IDN, Error::NumVar)?;
        let name = self.ram.peek(self.ip);
        self.ip += 2;
        let v = self.var_find(name).ok_or(Error::UndefinedVariable)?;
        if self.var_type(v) != VAR_FOR {
            return Err(Error::ForVar);
        }
        self.var_for_next(v);
        Ok(())
    }

    fn instr_if(&mut self) -> Result<(), Error> {
        let cond = self.expr_num()?;
        if cond == 0.0 {
            self.skip_rest_of_line();
            return Ok(());
        }
        if self.code() == CODE_THEN && self.ram.byte(self.ip + 1) == CODE_INTLIT {
            self.ip += 1;
            let line = self.expr_int()?;
            self.instr_goto(line)?;
        }
        Ok(())
    }

    /// ON expr GOTO/GOSUB n1, ..., nk and ON ERROR lineno.
    fn instr_on(&mut self) -> Result<(), Error> {
        if self.code() == CODE_ERROR {
            self.ip += 1;
            self.expect(CODE_INTLIT, Error::IllegalLineNumber)?;
            let n = self.ram.peek(self.ip);
            self.ip += 2;
            self.on_error = if n == 0 {
                NIL
            } else {
                self.prog_find(n as i32)?
            };
            return Ok(());
        }
        let n = self.expr_int()?;
        if n < 1 {
            return Err(Error::On);
        }
        let kw = self.code();
        if kw != CODE_GOTO && kw != CODE_GOSUB {
            return Err(Error::Syntax);
        }
        let mut nth = None;
        let mut i = 1;
        loop {
            self.ip += 1;
            if self.code() != CODE_INTLIT {
                return Err(Error::IllegalLineNumber);
            }
            if i == n {
                nth = Some(self.ram.peek(self.ip + 1));
            }
            self.ip += 3;
            i += 1;
            if self.code() != b',' {
                break;
            }
        }
        let line = nth.ok_or(Error::On)? as i32;
        if kw == CODE_GOTO {
            self.instr_goto(line)
        } else {
            self.instr_gosub(line)
        }
    }

    // ---- DATA / READ / RESTORE ---------------------------------------

    /// Find the next DATA body at or after `from`, walking whole lines so
    /// token alignment is never lost. Returns the address of the raw text.
    fn data_seek(&self, from: Addr) -> Option<Addr> {
        let mut line = self.pp0;
        while line < self.pp {
            let end = self.line_next(line);
            if end > from {
                let mut a = self.line_text(line);
                while self.ram.byte(a) != 0 {
                    if a >= from && self.ram.byte(a) == CODE_DATA {
                        return Some(a + 1);
                    }
                    a = token::token_skip(&self.ram, a);
                }
            }
            line = end;
        }
        None
    }

    fn instr_read(&mut self) -> Result<(), Error> {
        loop {
            let here = if self.data_next < self.pp {
                self.ram.byte(self.data_next)
            } else {
                0
            };
            if here == CODE_DATA || here == b',' {
                self.data_next += 1;
            } else {
                self.data_next = self.data_seek(self.data_next).ok_or(Error::OutOfData)?;
            }
            let next = self.assign_item(self.data_next)?.ok_or(Error::Data)?;
            self.data_next = next;
            if self.code() != b',' {
                return Ok(());
            }
            self.ip += 1;
        }
    }

    fn instr_restore(&mut self) -> Result<(), Error> {
        if self.code() == CODE_INTLIT {
            let n = self.ram.peek(self.ip + 1);
            self.ip += 3;
            let line = self.prog_find(n as i32)?;
            self.data_next = self.line_text(line);
        } else {
            self.data_next = self.pp0 + 4;
        }
        Ok(())
    }

    // ---- I/O statements ----------------------------------------------

    fn input_prompt(&mut self) -> Result<(), Error> {
        if self.code() == CODE_STRLIT {
            let s = self.ram.peek(self.ip + 1);
            let prompt = self.ram.cstr_string(s);
            self.console.write(&prompt);
            self.ip += 3;
            if self.code() != b',' && self.code() != b';' {
                return Err(Error::Syntax);
            }
            self.ip += 1;
        }
        Ok(())
    }

    fn instr_input(&mut self) -> Result<(), Error> {
        self.input_prompt()?;
        let ch = self.parse_channel()?;
        let line = match ch {
            None => self.console.read_line("?").ok_or(Error::IllegalInput)?,
            Some(c) => self.channel_read_line(c)?,
        };
        let buf = self.bufs[ch.unwrap_or(0)];
        self.load_buffer(buf, &line);
        let mut b = buf;
        loop {
            b = self.assign_item(b)?.ok_or(Error::IllegalInput)?;
            if self.code() != b',' {
                return Ok(());
            }
            self.ip += 1;
            // Separators in the text must match separators in the statement.
            if self.ram.byte(b) != b',' {
                return Err(Error::IllegalInput);
            }
            b += 1;
        }
    }

    fn instr_linput(&mut self) -> Result<(), Error> {
        self.input_prompt()?;
        let ch = self.parse_channel()?;
        let code = self.code();
        if code != CODE_IDN && code != CODE_IDNS {
            return Err(Error::Identifier);
        }
        let name = self.ram.peek(self.ip + 1);
        let v = self.var_insert(name, code == CODE_IDNS)?;
        let r = self.var_parse(v)?;
        if r.ty & VAR_STR == 0 {
            return Err(Error::StrVar);
        }
        let line = match ch {
            None => self.console.read_line("").ok_or(Error::IllegalInput)?,
            Some(c) => self.channel_read_line(c)?,
        };
        let (v, va) = self.var_locate(r)?;
        self.assign_string(v, va, line.as_bytes())
    }

    fn instr_print(&mut self) -> Result<(), Error> {
        let ch = self.parse_channel()?;
        let mut newline = true;
        loop {
            match self.code() {
                0 | b':' | b'\'' => break,
                b',' => {
                    match ch {
                        None => {
                            // Tab to the next 16-column boundary.
                            let col = self.console.col();
                            self.console.set_col(col + 16 - col % 16);
                        }
                        Some(c) => self.channel_write(c, "\t")?,
                    }
                    self.ip += 1;
                    newline = false;
                }
                b';' => {
                    self.ip += 1;
                    newline = false;
                }
                _ => {
                    self.expr()?;
                    let (n, s) = self.pop()?;
                    let text = if s == NIL {
                        eval::fmt_num(n)
                    } else {
                        self.ram.cstr_string(s)
                    };
                    match ch {
                        None => self.console.write(&text),
                        Some(c) => self.channel_write(c, &text)?,
                    }
                    newline = true;
                }
            }
        }
        if newline {
            match ch {
                None => self.console.write("\n"),
                Some(c) => self.channel_write(c, "\n")?,
            }
        }
        Ok(())
    }

    fn instr_open(&mut self) -> Result<(), Error> {
        self.expect(b'#', Error::Hash)?;
        let ch = self.expr_int()?;
        if !(1..CHANNELS as i32).contains(&ch) {
            return Err(Error::IllegalChannel);
        }
        if self.channels[ch as usize].is_some() {
            return Err(Error::ChannelBusy);
        }
        self.expect(b',', Error::Comma)?;
        let s = self.expr_str()?;
        let path = self.ram.cstr_string(s);
        self.expect(b',', Error::Comma)?;
        let mode = self.expr_int()?;
        let channel = match mode {
            0 => Channel::Read(BufReader::new(
                File::open(&path).map_err(|_| Error::File)?,
            )),
            1 => Channel::Write(File::create(&path).map_err(|_| Error::File)?),
            2 => Channel::Write(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&path)
                    .map_err(|_| Error::File)?,
            ),
            _ => return Err(Error::IllegalMode),
        };
        self.channels[ch as usize] = Some(channel);
        Ok(())
    }

    fn instr_close(&mut self) -> Result<(), Error> {
        self.expect(b'#', Error::Hash)?;
        let ch = self.expr_int()?;
        if !(1..CHANNELS as i32).contains(&ch) {
            return Err(Error::IllegalChannel);
        }
        if self.channels[ch as usize].is_none() {
            return Err(Error::ChannelClosed);
        }
        self.channels[ch as usize] = None;
        Ok(())
    }

    // ---- program management ------------------------------------------

    fn instr_save(&mut self) -> Result<(), Error> {
        let s = self.expr_str()?;
        let path = self.ram.cstr_string(s);
        fs::write(&path, self.list_program()).map_err(|_| Error::File)?;
        self.prog_changed = false;
        Ok(())
    }

    /// Feed a file through the editor/executor, line by line. Line-level
    /// errors are reported and do not abort the rest of the file.
    pub fn merge_feed(&mut self, path: &str) -> Result<(), Error> {
        use std::io::BufRead;
        let file = File::open(path).map_err(|_| Error::File)?;
        let reader = BufReader::new(file);
        for line in reader.lines() {
            let line = line.map_err(|_| Error::File)?;
            self.handle_line(&line);
            if self.bye {
                break;
            }
        }
        Ok(())
    }

    fn instr_merge(&mut self) -> Result<(), Error> {
        let s = self.expr_str()?;
        let path = self.ram.cstr_string(s);
        self.merge_feed(&path)?;
        self.prog_changed = false;
        // The feed overwrote the OBJ buffer; nothing left to execute here.
        self.ip = NIL;
        self.ipn = NIL;
        Ok(())
    }

    fn instr_load(&mut self) -> Result<(), Error> {
        if self.prog_check() {
            self.reset_full();
            self.instr_merge()
        } else {
            self.expr()?;
            self.pop_str()?;
            Ok(())
        }
    }

    fn instr_chain(&mut self) -> Result<(), Error> {
        let s = self.expr_str()?;
        let path = self.ram.cstr_string(s);
        let mut start = 0i32;
        if self.code() == b',' {
            self.ip += 1;
            start = self.expr_int()?;
        }
        self.pp = self.pp0;
        self.merge_feed(&path)?;
        self.prog_changed = false;
        self.reset_variables();
        if start == 0 {
            self.ip0 = self.pp0;
            self.instr_line();
        } else {
            self.instr_goto(start)?;
        }
        self.continue_exec();
        self.ip = NIL;
        self.ipn = NIL;
        Ok(())
    }

    fn instr_bye(&mut self) -> Result<(), Error> {
        if self.prog_check() {
            self.console.write("BYE.\n");
            self.bye = true;
            self.ip = NIL;
        }
        Ok(())
    }

    /// CLEAR [strings][,program]: rebase the pool/program boundary,
    /// discarding strings, program and variables.
    fn instr_clear(&mut self) -> Result<(), Error> {
        let mut str_size = (self.pp0 - self.csp0) as i32;
        let mut prog_size = (self.vp0 - self.pp0) as i32;
        if !matches!(self.code(), 0 | b':' | b'\'') {
            str_size = self.expr_int()?;
            if self.code() == b',' {
                self.ip += 1;
                prog_size = self.expr_int()?;
            }
        }
        if str_size < 16
            || prog_size < 16
            || self.csp0 as i32 + str_size + prog_size + 256 > self.sp0 as i32
        {
            return Err(Error::Domain);
        }
        self.pp0 = (self.csp0 as i32 + str_size) as Addr;
        self.vp0 = (self.pp0 as i32 + prog_size) as Addr;
        self.csp = self.csp0;
        self.tsp = self.csp0;
        self.pp = self.pp0;
        self.reset_variables();
        self.prog_changed = false;
        if self.in_program() {
            // The program is gone; there is nothing to come back to.
            self.ip = NIL;
            self.ipn = NIL;
        }
        Ok(())
    }

    fn instr_randomize(&mut self) -> Result<(), Error> {
        let seed = if matches!(self.code(), 0 | b':' | b'\'') {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        } else {
            self.expr_num()? as u64
        };
        self.rng = StdRng::seed_from_u64(seed);
        Ok(())
    }

    fn instr_attr(&mut self) -> Result<(), Error> {
        loop {
            self.expect(CODE_IDN, Error::IllegalAttribute)?;
            let prop = self.ram.cstr_string(self.ram.peek(self.ip));
            self.ip += 2;
            let mut value = 1u16;
            if self.code() == CODE_EQ {
                self.ip += 1;
                value = self.expr_num()? as u16;
            }
            if !self.console.attr(&prop, value) {
                return Err(Error::IllegalAttribute);
            }
            if self.code() != b',' {
                return Ok(());
            }
            self.ip += 1;
        }
    }

    fn dump(&mut self) {
        let mut out = String::from("MEMORY:\n");
        out.push_str(&format!(
            "  STRINGS   {:5} / {:5}\n",
            self.csp - self.csp0,
            self.pp0 - self.csp0
        ));
        out.push_str(&format!(
            "  PROGRAM   {:5} / {:5}\n",
            self.pp - self.pp0,
            self.vp0 - self.pp0
        ));
        out.push_str(&format!(
            "  VARIABLES {:5} / {:5}\n",
            self.vp - self.vp0,
            self.sp0 - self.vp0
        ));
        out.push_str(&format!(
            "  STACK     {:5} / {:5}\n",
            self.sp - self.sp0,
            STACK_SIZE
        ));
        out.push_str(&format!(
            "  RSTACK    {:5} / {:5}\n",
            self.rsp - self.rsp0,
            RSTACK_SIZE
        ));
        out.push_str("VARIABLES:\n");
        let mut v = self.vp0;
        while v < self.vp {
            let name = self.ram.cstr_string(self.var_name(v));
            let ty = self.var_type(v);
            let va = self.var_addr(v);
            if ty & VAR_VEC != 0 {
                out.push_str(&format!("  {}({})\n", name, self.ram.peek(va)));
            } else if ty & VAR_MAT != 0 {
                out.push_str(&format!(
                    "  {}({},{})\n",
                    name,
                    self.ram.peek(va),
                    self.ram.peek(va + 2)
                ));
            } else if ty == VAR_NUM {
                out.push_str(&format!("  {} = {}\n", name, eval::fmt_num(self.ram.peek_num(va))));
            } else if ty == VAR_FOR {
                out.push_str(&format!(
                    "  {} = {} TO {} STEP {}\n",
                    name,
                    eval::fmt_num(self.ram.peek_num(va)),
                    eval::fmt_num(self.ram.peek_num(va + 4)),
                    eval::fmt_num(self.ram.peek_num(va + 8))
                ));
            } else {
                out.push_str(&format!("  {} = \"{}\"\n", name, self.ram.cstr_string(va)));
            }
            v += self.var_size(v);
        }
        self.console.diag(&out);
    }

    // ---- user-defined functions --------------------------------------

    /// Resolve `name` against DEF statements, scanning the program from the
    /// first line. Actual parameters are evaluated at the call site and
    /// assigned to the formals, then the body expression is evaluated at the
    /// DEF site, leaving the result on the value stack. Returns false when
    /// no DEF with that name exists.
    pub fn fn_eval(&mut self, name: Addr) -> Result<bool, Error> {
        let (saved_ip0, saved_ip, saved_ipn) = (self.ip0, self.ip, self.ipn);
        self.ip0 = self.pp0;
        self.instr_line();
        let mut found = false;
        while self.instr_lookfor(CODE_DEF) != NIL {
            let c = self.code();
            if c != CODE_IDN && c != CODE_IDNS {
                return Err(Error::Identifier);
            }
            if self.ram.peek(self.ip + 1) != name {
                continue;
            }
            // Evaluate the actual parameters back at the call site while
            // def_ip walks the formal parameter list.
            let mut def_ip = self.ip + 3;
            self.ip = saved_ip + 3;
            if self.code() == b'(' {
                if self.ram.byte(def_ip) != b'(' {
                    return Err(Error::OpenedPar);
                }
                self.ip += 1;
                def_ip += 1;
                loop {
                    let fc = self.ram.byte(def_ip);
                    if fc != CODE_IDN && fc != CODE_IDNS {
                        return Err(Error::Identifier);
                    }
                    // Evaluate the actual before touching the formal's
                    // record: a nested call in the actual may shift it.
                    let formal = self.ram.peek(def_ip + 1);
                    if fc == CODE_IDN {
                        let n = self.expr_num()?;
                        let v = self.var_insert(formal, false)?;
                        let va = self.var_addr(v);
                        self.ram.poke_num(va, n);
                    } else {
                        let s = self.expr_str()?;
                        let bytes = self.ram.cstr(s).to_vec();
                        let v = self.var_insert(formal, true)?;
                        let va = self.var_addr(v);
                        self.assign_string(v, va, &bytes)?;
                    }
                    def_ip += 3;
                    if self.ram.byte(def_ip) != b',' {
                        break;
                    }
                    def_ip += 1;
                    self.expect(b',', Error::Comma)?;
                }
                self.expect(b')', Error::ClosedPar)?;
                if self.ram.byte(def_ip) != b')' {
                    return Err(Error::ClosedPar);
                }
                def_ip += 1;
            }
            // Evaluate the body at the DEF site, then come back.
            let resume = self.ip;
            self.ip = def_ip;
            self.expect(CODE_EQ, Error::Assignment)?;
            self.expr()?;
            self.ip = resume;
            found = true;
            break;
        }
        self.ip0 = saved_ip0;
        self.ipn = saved_ipn;
        if !found {
            self.ip = saved_ip;
        }
        Ok(found)
    }
}
