//! Program store: tokenized lines kept sorted by line number, plus the
//! listing writer that turns them back into text for LIST and SAVE.

use crate::error::Error;
use crate::eval;
use crate::ram::{Addr, NIL};
use crate::runtime::Runtime;
use crate::token::{self, *};

impl Runtime {
    /// Line number of the line whose size byte is at `a`.
    pub fn line_num(&self, a: Addr) -> u16 {
        self.ram.peek(a + 2)
    }

    pub fn line_next(&self, a: Addr) -> Addr {
        a + self.ram.byte(a) as Addr
    }

    /// Address of the first token of a stored line.
    pub fn line_text(&self, a: Addr) -> Addr {
        a + 4
    }

    /// Address of the first token of the line `ip0` points at; the transient
    /// OBJ line has no line-number header.
    pub fn line_first(&self, ip0: Addr) -> Addr {
        if ip0 == self.obj {
            ip0 + 1
        } else {
            self.line_text(ip0)
        }
    }

    /// Find a stored line by number.
    pub fn prog_find(&self, n: i32) -> Result<Addr, Error> {
        let mut a = self.pp0;
        while a < self.pp {
            let n1 = self.line_num(a) as i32;
            if n1 > n {
                break;
            }
            if n1 == n {
                return Ok(a);
            }
            a = self.line_next(a);
        }
        Err(Error::IllegalLineNumber)
    }

    /// Delete the line numbered `n`; true if no such line existed.
    pub fn prog_delete(&mut self, n: u16) -> bool {
        let mut a = self.pp0;
        while a < self.pp {
            let n1 = self.line_num(a);
            if n1 > n {
                break;
            }
            if n1 == n {
                let size = self.ram.byte(a) as Addr;
                self.ram.copy_within(a + size, a, self.pp - (a + size));
                self.pp -= size;
                self.prog_changed = true;
                return false;
            }
            a = self.line_next(a);
        }
        true
    }

    /// Insert the line staged at `from` (no line with its number may exist).
    pub fn prog_insert(&mut self, n: u16, from: Addr) -> Result<(), Error> {
        let mut at = self.pp0;
        while at < self.pp && self.line_num(at) < n {
            at = self.line_next(at);
        }
        let size = self.ram.byte(from) as Addr;
        if self.pp + size >= self.vp0 {
            return Err(Error::ProgramTooLong);
        }
        if at != self.pp {
            self.ram.copy_within(at, at + size, self.pp - at);
        }
        self.ram.copy_within(from, at, size);
        self.pp += size;
        self.prog_changed = true;
        Ok(())
    }

    /// Apply the edit staged in the OBJ buffer: replace, insert or (for an
    /// empty body) delete the numbered line.
    pub fn prog_edit(&mut self) -> Result<(), Error> {
        let n = self.ram.peek(self.obj + 2);
        if n == 0 || n > 9999 {
            return Err(Error::IllegalLineNumber);
        }
        if self.ram.byte(self.line_text(self.obj)) == 0 {
            if self.prog_delete(n) {
                self.console
                    .diag(&format!("LINE {} DOES NOT EXIST\n", n));
            }
        } else {
            self.prog_delete(n);
            self.prog_insert(n, self.obj)?;
        }
        Ok(())
    }

    /// Ask before discarding unsaved changes; true means go ahead.
    pub fn prog_check(&mut self) -> bool {
        if !self.prog_changed {
            return true;
        }
        match self
            .console
            .read_line("UNSAVED CHANGES IN CURRENT PROGRAM: DISCARD THEM (Y/N)? ")
        {
            Some(answer) => answer.trim().to_ascii_uppercase().starts_with('Y'),
            None => false,
        }
    }

    /// The whole program as text, one `<lineno> <tokens>` line per row.
    pub fn list_program(&self) -> String {
        let mut out = String::new();
        let mut a = self.pp0;
        while a < self.pp {
            out.push_str(&format!("{:4} ", self.line_num(a)));
            let mut t = self.line_text(a);
            let mut space = false;
            while self.ram.byte(t) != 0 {
                t = self.write_token(t, &mut out, &mut space);
            }
            out.push('\n');
            a = self.line_next(a);
        }
        out
    }

    /// Write the token at `a` back as text; returns the next token address.
    /// `space` carries the pending-separator state between tokens so the
    /// listing re-tokenizes to the same bytes.
    pub fn write_token(&self, a: Addr, out: &mut String, space: &mut bool) -> Addr {
        let b = self.ram.byte(a);
        match b {
            CODE_IDN | CODE_IDNS => {
                if *space {
                    out.push(' ');
                }
                out.push_str(&self.ram.cstr_string(self.ram.peek(a + 1)));
                *space = true;
                a + 3
            }
            CODE_INTLIT => {
                if *space {
                    out.push(' ');
                }
                out.push_str(&self.ram.peek(a + 1).to_string());
                *space = false;
                a + 3
            }
            CODE_NUMLIT => {
                if *space {
                    out.push(' ');
                }
                out.push_str(&eval::fmt_num(self.ram.peek_num(a + 1)));
                *space = false;
                a + 5
            }
            CODE_STRLIT => {
                if *space {
                    out.push(' ');
                }
                out.push('"');
                out.push_str(&self.ram.cstr_string(self.ram.peek(a + 1)));
                out.push('"');
                *space = false;
                a + 3
            }
            b'\'' => {
                if *space {
                    out.push(' ');
                }
                out.push_str(&self.ram.cstr_string(a));
                *space = false;
                a + self.ram.strlen(a)
            }
            CODE_DATA | CODE_REM => {
                if *space {
                    out.push(' ');
                }
                out.push_str(token::keyword_name(b));
                out.push_str(&self.ram.cstr_string(a + 1));
                *space = false;
                a + self.ram.strlen(a)
            }
            _ if token::is_keyword(b) => {
                if *space || b == CODE_TO || b == CODE_STEP || b == CODE_THEN {
                    out.push(' ');
                }
                out.push_str(token::keyword_name(b));
                *space = true;
                a + 1
            }
            _ if eval::is_operator(b) => {
                out.push(' ');
                out.push_str(eval::oper_name(b));
                *space = true;
                a + 1
            }
            b'(' | b')' => {
                out.push(b as char);
                *space = false;
                a + 1
            }
            b',' | b';' | b':' => {
                out.push(b as char);
                *space = true;
                a + 1
            }
            0 => a,
            _ => {
                if *space {
                    out.push(' ');
                }
                out.push(b as char);
                *space = false;
                a + 1
            }
        }
    }

    /// Jump support: derive `ip`/`ipn` after `ip0` was pointed at a stored
    /// line. Leaves `ip = NIL` when there is nothing to execute.
    pub fn instr_line(&mut self) {
        let text = self.line_text(self.ip0);
        if text >= self.pp {
            self.ip = NIL;
            self.ipn = NIL;
        } else {
            self.ip = text;
            self.ipn = self.line_next(self.ip0);
        }
    }

    /// Point `ip0`/`ipn` at a resumed line, which may be the transient one.
    pub fn set_line_from(&mut self, ip0: Addr) {
        self.ip0 = ip0;
        self.ipn = if ip0 == self.obj {
            NIL
        } else {
            self.line_next(ip0)
        };
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

    fn edit(rt: &mut Runtime, text: &str) {
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, text);
        rt.tokenize().unwrap();
        rt.prog_edit().unwrap();
    }

    fn numbers(rt: &Runtime) -> Vec<u16> {
        let mut out = Vec::new();
        let mut a = rt.pp0;
        while a < rt.pp {
            out.push(rt.line_num(a));
            a = rt.line_next(a);
        }
        out
    }

    #[test]
    fn test_insert_sorted() {
        let mut rt = runtime();
        edit(&mut rt, "30 print 3");
        edit(&mut rt, "10 print 1");
        edit(&mut rt, "20 print 2");
        assert_eq!(numbers(&rt), vec![10, 20, 30]);
        assert!(rt.prog_changed);
    }

    #[test]
    fn test_replace_line() {
        let mut rt = runtime();
        edit(&mut rt, "10 print 1");
        edit(&mut rt, "10 print 2");
        assert_eq!(numbers(&rt), vec![10]);
        // The sum of line sizes is exactly the used program region.
        let mut total = 0u16;
        let mut a = rt.pp0;
        while a < rt.pp {
            total += rt.ram.byte(a) as u16;
            a = rt.line_next(a);
        }
        assert_eq!(total, rt.pp - rt.pp0);
    }

    #[test]
    fn test_delete_by_empty_edit() {
        let mut rt = runtime();
        edit(&mut rt, "10 print 1");
        edit(&mut rt, "20 print 2");
        edit(&mut rt, "10");
        assert_eq!(numbers(&rt), vec![20]);
    }

    #[test]
    fn test_delete_missing_prints_notice() {
        let (con, _, diags) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        edit(&mut rt, "10");
        assert!(diags.borrow().contains("LINE 10 DOES NOT EXIST"));
    }

    #[test]
    fn test_find() {
        let mut rt = runtime();
        edit(&mut rt, "10 print 1");
        let a = rt.prog_find(10).unwrap();
        assert_eq!(rt.line_num(a), 10);
        assert!(matches!(rt.prog_find(99), Err(Error::IllegalLineNumber)));
    }

    #[test]
    fn test_line_number_bounds() {
        let mut rt = runtime();
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, "0 print 1");
        rt.tokenize().unwrap();
        assert!(matches!(rt.prog_edit(), Err(Error::IllegalLineNumber)));
        rt.load_buffer(buf0, "10000 print 1");
        rt.tokenize().unwrap();
        assert!(matches!(rt.prog_edit(), Err(Error::IllegalLineNumber)));
    }

    #[test]
    fn test_list_round_trip() {
        let mut rt = runtime();
        edit(&mut rt, "10 let x = 1 : print x; \"done\"");
        edit(&mut rt, "20 for i = 1 to 3 step 2 : next i");
        edit(&mut rt, "30 if x <= 2 then 10");
        edit(&mut rt, "40 data 1, HI, 2");
        edit(&mut rt, "50 rem notes");
        edit(&mut rt, "60 print 1.5; a(2)");
        let listing = rt.list_program();
        let before: Vec<u8> = (rt.pp0..rt.pp).map(|a| rt.ram.byte(a)).collect();
        for line in listing.lines() {
            edit(&mut rt, line);
        }
        let after: Vec<u8> = (rt.pp0..rt.pp).map(|a| rt.ram.byte(a)).collect();
        assert_eq!(before, after);
    }
}
