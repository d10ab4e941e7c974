//! Tokenizer: encode the text line in the terminal buffer into the OBJ
//! staging area.
//!
//! The output line is `[size, token..., 0]`; when the text starts with a line
//! number the first token is a `CODE_INTLIT`, which is what makes the REPL
//! treat it as a program edit.

use crate::error::Error;
use crate::eval;
use crate::ram::Addr;
use crate::runtime::Runtime;
use crate::token::*;

impl Runtime {
    /// Tokenize the contents of the terminal buffer into the OBJ buffer.
    pub fn tokenize(&mut self) -> Result<(), Error> {
        let mut p = self.bufs[0];
        let q0 = self.obj;
        let mut q = q0 + 1;
        // The size field is a single byte, so an encoded line caps at 255.
        let limit = q0 + 255;

        loop {
            let b = self.ram.byte(p);
            if b == 0 {
                break;
            }
            if b == b' ' || b == b'\t' {
                p += 1;
            } else if b < 32 {
                p += 1;
            } else if b > 127 {
                self.console
                    .diag(&format!("SKIP INVALID ASCII CODE {}\n", b));
                p += 1;
            } else if b.is_ascii_digit()
                || (b == b'.' && self.ram.byte(p + 1).is_ascii_digit())
            {
                p = self.scan_number(p, &mut q, limit)?;
            } else if b.is_ascii_alphabetic() {
                p = self.scan_word(p, &mut q, limit)?;
            } else if b == b'\'' {
                // Comment: the quote plus the rest of the line, verbatim.
                let len = self.ram.strlen(p);
                self.emit_raw(p, len, &mut q, limit)?;
                p += len;
            } else if b == b'"' {
                p = self.scan_string(p, &mut q, limit)?;
            } else {
                let two = [b, self.ram.byte(p + 1)];
                if let Some(code) = eval::lookup_operator(&two) {
                    self.emit(&mut q, limit, &[code])?;
                    p += 2;
                } else if let Some(code) = eval::lookup_operator(&[b]) {
                    self.emit(&mut q, limit, &[code])?;
                    p += 1;
                } else {
                    self.emit(&mut q, limit, &[b])?;
                    p += 1;
                }
            }
        }
        self.emit(&mut q, limit, &[0])?;
        self.ram.set_byte(q0, (q - q0) as u8);
        Ok(())
    }

    fn emit(&mut self, q: &mut Addr, limit: Addr, bytes: &[u8]) -> Result<(), Error> {
        if *q + bytes.len() as Addr > limit {
            return Err(Error::ProgramTooLong);
        }
        self.ram.write_bytes(*q, bytes);
        *q += bytes.len() as Addr;
        Ok(())
    }

    /// Copy `len` raw bytes out of the input buffer into the token stream.
    fn emit_raw(&mut self, from: Addr, len: u16, q: &mut Addr, limit: Addr) -> Result<(), Error> {
        let bytes = self.ram.cstr(from)[..len as usize].to_vec();
        self.emit(q, limit, &bytes)
    }

    /// Numbers: an integer that consumes the same span as the float parse and
    /// fits in 16 bits is encoded compactly, anything else as an f32.
    fn scan_number(&mut self, p: Addr, q: &mut Addr, limit: Addr) -> Result<Addr, Error> {
        let mut pi = p;
        while self.ram.byte(pi).is_ascii_digit() {
            pi += 1;
        }
        let pf = self.float_span(p);
        let int_text = self.ram.cstr(p)[..(pi - p) as usize].to_vec();
        if pi == pf && pi > p {
            if let Ok(i) = String::from_utf8_lossy(&int_text).parse::<i32>() {
                if i <= 32767 {
                    self.emit(q, limit, &[CODE_INTLIT, i as u8, (i >> 8) as u8])?;
                    return Ok(pi);
                }
            }
        }
        let mut text = String::from_utf8_lossy(&self.ram.cstr(p)[..(pf - p) as usize]).into_owned();
        if text.ends_with('.') {
            text.push('0');
        }
        let n: f32 = text.parse().unwrap_or(0.0);
        let mut bytes = [CODE_NUMLIT, 0, 0, 0, 0];
        bytes[1..5].copy_from_slice(&n.to_le_bytes());
        self.emit(q, limit, &bytes)?;
        Ok(pf)
    }

    /// End of the longest float literal starting at `p`:
    /// digits, optional fraction, optional exponent. Also used by the
    /// INPUT/READ item parser, which handles a leading sign itself.
    pub(crate) fn float_span(&self, p: Addr) -> Addr {
        let mut a = p;
        while self.ram.byte(a).is_ascii_digit() {
            a += 1;
        }
        if self.ram.byte(a) == b'.' {
            a += 1;
            while self.ram.byte(a).is_ascii_digit() {
                a += 1;
            }
        }
        if self.ram.byte(a) == b'e' || self.ram.byte(a) == b'E' {
            let mut e = a + 1;
            if self.ram.byte(e) == b'+' || self.ram.byte(e) == b'-' {
                e += 1;
            }
            if self.ram.byte(e).is_ascii_digit() {
                a = e;
                while self.ram.byte(a).is_ascii_digit() {
                    a += 1;
                }
            }
        }
        a
    }

    /// Identifiers fold to uppercase and take an optional `$` suffix. The
    /// operator table wins over the keyword table, so ABS or STR$ never
    /// become plain identifiers.
    fn scan_word(&mut self, p: Addr, q: &mut Addr, limit: Addr) -> Result<Addr, Error> {
        let mut name = Vec::new();
        let mut p = p;
        while self.ram.byte(p).is_ascii_alphanumeric() {
            name.push(self.ram.byte(p).to_ascii_uppercase());
            p += 1;
        }
        let mut code = CODE_IDN;
        if self.ram.byte(p) == b'$' {
            name.push(b'$');
            code = CODE_IDNS;
            p += 1;
        }
        if let Some(op) = eval::lookup_operator(&name) {
            self.emit(q, limit, &[op])?;
        } else if let Some(kw) = lookup_keyword(&name) {
            self.emit(q, limit, &[kw])?;
            if kw == CODE_DATA || kw == CODE_REM {
                // These capture the rest of the line verbatim.
                let len = self.ram.strlen(p);
                self.emit_raw(p, len, q, limit)?;
                p += len;
            }
        } else {
            let at = match self.cstr_find(&name) {
                Some(at) => at,
                None => self.cstr_add(&name)?,
            };
            self.emit(q, limit, &[code, at as u8, (at >> 8) as u8])?;
        }
        Ok(p)
    }

    fn scan_string(&mut self, p: Addr, q: &mut Addr, limit: Addr) -> Result<Addr, Error> {
        let mut end = p + 1;
        loop {
            match self.ram.byte(end) {
                0 => return Err(Error::EolInsideString),
                b'"' => break,
                _ => end += 1,
            }
        }
        let text = self.ram.cstr(p + 1)[..(end - p - 1) as usize].to_vec();
        let at = match self.cstr_find(&text) {
            Some(at) => at,
            None => self.cstr_add(&text)?,
        };
        self.emit(q, limit, &[CODE_STRLIT, at as u8, (at >> 8) as u8])?;
        Ok(end + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::TestConsole;
    use crate::ram::NIL;

    fn tokenized(text: &str) -> (Runtime, Vec<u8>) {
        let (con, _, _) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, text);
        rt.tokenize().unwrap();
        let size = rt.ram.byte(rt.obj) as u16;
        let bytes = (rt.obj..rt.obj + size)
            .map(|a| rt.ram.byte(a))
            .collect::<Vec<_>>();
        (rt, bytes)
    }

    #[test]
    fn test_intlit() {
        let (_, bytes) = tokenized("10");
        assert_eq!(bytes, vec![5, CODE_INTLIT, 10, 0, 0]);
    }

    #[test]
    fn test_intlit_boundary() {
        let (_, bytes) = tokenized("32767");
        assert_eq!(bytes[1], CODE_INTLIT);
        assert_eq!(bytes[2] as u16 + ((bytes[3] as u16) << 8), 32767);
        let (_, bytes) = tokenized("32768");
        assert_eq!(bytes[1], CODE_NUMLIT);
        let n = f32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        assert_eq!(n, 32768.0);
    }

    #[test]
    fn test_float_forms() {
        let (_, bytes) = tokenized("1.5");
        assert_eq!(bytes[1], CODE_NUMLIT);
        let (_, bytes) = tokenized(".5");
        assert_eq!(bytes[1], CODE_NUMLIT);
        let n = f32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        assert_eq!(n, 0.5);
        let (_, bytes) = tokenized("1e3");
        assert_eq!(bytes[1], CODE_NUMLIT);
    }

    #[test]
    fn test_keyword_and_identifier() {
        let (rt, bytes) = tokenized("print hello");
        assert_eq!(bytes[1], CODE_PRINT);
        assert_eq!(bytes[2], CODE_IDN);
        let name = rt.ram.peek(rt.obj + 3);
        assert_eq!(rt.ram.cstr(name), b"HELLO");
    }

    #[test]
    fn test_string_identifier() {
        let (rt, bytes) = tokenized("a$");
        assert_eq!(bytes[1], CODE_IDNS);
        let name = rt.ram.peek(rt.obj + 2);
        assert_eq!(rt.ram.cstr(name), b"A$");
    }

    #[test]
    fn test_operator_words_not_identifiers() {
        let (_, bytes) = tokenized("abs");
        assert_eq!(bytes[1], eval::lookup_operator(b"ABS").unwrap());
        let (_, bytes) = tokenized("str$");
        assert_eq!(bytes[1], eval::lookup_operator(b"STR$").unwrap());
    }

    #[test]
    fn test_two_char_comparisons() {
        let (_, bytes) = tokenized("<= <> >= <");
        assert_eq!(bytes[1], eval::lookup_operator(b"<=").unwrap());
        assert_eq!(bytes[2], eval::lookup_operator(b"<>").unwrap());
        assert_eq!(bytes[3], eval::lookup_operator(b">=").unwrap());
        assert_eq!(bytes[4], eval::lookup_operator(b"<").unwrap());
    }

    #[test]
    fn test_string_literal_interned_once() {
        let (rt, bytes) = tokenized("\"HI\" \"HI\"");
        assert_eq!(bytes[1], CODE_STRLIT);
        assert_eq!(bytes[4], CODE_STRLIT);
        assert_eq!(rt.ram.peek(rt.obj + 2), rt.ram.peek(rt.obj + 5));
    }

    #[test]
    fn test_unterminated_string() {
        let (con, _, _) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, "print \"oops");
        assert!(matches!(rt.tokenize(), Err(Error::EolInsideString)));
    }

    #[test]
    fn test_data_captures_tail() {
        let (rt, bytes) = tokenized("data 1, HI, 2");
        assert_eq!(bytes[1], CODE_DATA);
        assert_eq!(rt.ram.cstr_string(rt.obj + 2), " 1, HI, 2");
    }

    #[test]
    fn test_comment_captures_quote_and_tail() {
        let (rt, bytes) = tokenized("' note");
        assert_eq!(bytes[1], b'\'');
        assert_eq!(rt.ram.cstr_string(rt.obj + 1), "' note");
    }

    #[test]
    fn test_case_folding_identifiers_only() {
        let (rt, _) = tokenized("let x$ = \"mixed Case\"");
        assert!(rt.cstr_find(b"X$").is_some());
        assert!(rt.cstr_find(b"mixed Case").is_some());
    }

    #[test]
    fn test_punctuation_passthrough() {
        let (_, bytes) = tokenized("( ) , ; : #");
        assert_eq!(&bytes[1..7], b"(),;:#");
    }

    #[test]
    fn test_nil_never_a_token_payload() {
        let (rt, _) = tokenized("x");
        assert_ne!(rt.ram.peek(rt.obj + 2), NIL);
    }
}
