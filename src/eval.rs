//! Expression evaluator: an operator-precedence loop over two stacks.
//!
//! Operands go to the value stack; pending operators wait on the operator
//! stack until something with lower priority forces them to run, which
//! rewrites the expression into postfix order on the fly. Every invocation
//! pushes a 0-priority sentinel so nested evaluations cannot fire operators
//! that belong to an enclosing one.
//!
//! Unroll thresholds: infix operators use `>=` so equal-priority chains run
//! left to right (this makes `^` left-associative too); prefix operators use
//! a strict `>` so `- - X` and `NOT NOT X` nest instead of firing early.

use std::io::BufRead;

use rand::Rng;

use crate::error::Error;
use crate::ram::{Addr, NIL};
use crate::runtime::{Channel, Runtime, CHANNELS};
use crate::token::{CODE_IDN, CODE_IDNS, CODE_INTLIT, CODE_NUMLIT, CODE_STRLIT, CODE_TO};

type OperFn = fn(&mut Runtime) -> Result<(), Error>;

pub struct Oper {
    pub name: &'static str,
    routine: OperFn,
    pub arity: u8,
    pub infix: bool,
    pub priority: u8,
}

const fn oper(name: &'static str, routine: OperFn, arity: u8, infix: bool, priority: u8) -> Oper {
    Oper {
        name,
        routine,
        arity,
        infix,
        priority,
    }
}

pub const OPER_BASE: u8 = 176;

pub const CODE_MINUS: u8 = OPER_BASE + 2;
pub const CODE_NEG: u8 = OPER_BASE + 3;
pub const CODE_EQ: u8 = OPER_BASE + 8;
pub const CODE_SUBS: u8 = OPER_BASE + 40;

/// All operators, name-sorted; codes are `OPER_BASE` plus the index here.
/// `-` appears twice: infix binary subtraction and prefix negation.
pub static OPERATORS: [Oper; 46] = [
    oper("*", oper_mul, 2, true, 60),
    oper("+", oper_plus, 2, true, 50),
    oper("-", oper_minus, 2, true, 50),
    oper("-", oper_neg, 1, false, 70),
    oper("/", oper_div, 2, true, 60),
    oper("<", oper_lt, 2, true, 30),
    oper("<=", oper_leq, 2, true, 30),
    oper("<>", oper_neq, 2, true, 30),
    oper("=", oper_eq, 2, true, 30),
    oper(">", oper_gt, 2, true, 30),
    oper(">=", oper_geq, 2, true, 30),
    oper("ABS", oper_abs, 1, false, 100),
    oper("ACS", oper_acs, 1, false, 100),
    oper("AND", oper_and, 2, true, 10),
    oper("ASC", oper_asc, 1, false, 100),
    oper("ASN", oper_asn, 1, false, 100),
    oper("AT", oper_at, 2, false, 100),
    oper("ATN", oper_atn, 1, false, 100),
    oper("CHR$", oper_chrs, 1, false, 100),
    oper("COL", oper_col, 0, false, 100),
    oper("COS", oper_cos, 1, false, 100),
    oper("EOF", oper_eof, 1, false, 100),
    oper("ERR", oper_err, 0, false, 100),
    oper("EXP", oper_exp, 1, false, 100),
    oper("INKEY$", oper_inkeys, 0, false, 100),
    oper("INT", oper_int, 1, false, 100),
    oper("LEFT$", oper_lefts, 2, false, 100),
    oper("LEN", oper_len, 1, false, 100),
    oper("LOG", oper_log, 1, false, 100),
    oper("MID$", oper_mids, 3, false, 100),
    oper("MOD", oper_mod, 2, true, 60),
    oper("NOT", oper_not, 1, false, 20),
    oper("OR", oper_or, 2, true, 10),
    oper("RIGHT$", oper_rights, 2, false, 100),
    oper("RND", oper_rnd, 0, false, 100),
    oper("ROW", oper_row, 0, false, 100),
    oper("SGN", oper_sgn, 1, false, 100),
    oper("SIN", oper_sin, 1, false, 100),
    oper("SQR", oper_sqr, 1, false, 100),
    oper("STR$", oper_strs, 1, false, 100),
    oper("SUB$", oper_subs, 3, false, 100),
    oper("TAB", oper_tab, 1, false, 100),
    oper("TAN", oper_tan, 1, false, 100),
    oper("TIME", oper_time, 0, false, 100),
    oper("VAL", oper_val, 1, false, 100),
    oper("^", oper_pow, 2, true, 80),
];

pub fn is_operator(code: u8) -> bool {
    (OPER_BASE..OPER_BASE + OPERATORS.len() as u8).contains(&code)
}

pub fn oper_index(code: u8) -> usize {
    (code - OPER_BASE) as usize
}

pub fn oper_name(code: u8) -> &'static str {
    OPERATORS[oper_index(code)].name
}

/// Map a name to its operator code; the first match wins, so `-` resolves
/// to the infix entry and the tokenizer never emits the prefix twin.
pub fn lookup_operator(name: &[u8]) -> Option<u8> {
    OPERATORS
        .iter()
        .position(|o| o.name.as_bytes() == name)
        .map(|i| OPER_BASE + i as u8)
}

/// Canonical number formatting: the shortest decimal text that parses back
/// to the same f32, with no trailing `.0` on integers.
pub fn fmt_num(n: f32) -> String {
    format!("{}", n)
}

impl Runtime {
    /// Evaluate the expression at `ip`, leaving its value on the stack.
    pub fn expr(&mut self) -> Result<(), Error> {
        self.epush(None, 0)?;
        loop {
            let mut have_operand = false;
            // Prefix phase: unary operators and built-in functions.
            loop {
                let code = self.code();
                let code = if code == CODE_MINUS {
                    CODE_NEG
                } else if is_operator(code) && !OPERATORS[oper_index(code)].infix {
                    code
                } else {
                    break;
                };
                let op = &OPERATORS[oper_index(code)];
                match op.arity {
                    0 => {
                        self.ip += 1;
                        self.apply(code)?;
                        have_operand = true;
                        break;
                    }
                    1 => {
                        self.unroll_gt(op.priority)?;
                        self.epush(Some(code), op.priority)?;
                        self.ip += 1;
                    }
                    _ => {
                        self.unroll_gt(op.priority)?;
                        self.epush(Some(code), op.priority)?;
                        self.ip += 1;
                        self.expect(b'(', Error::OpenedPar)?;
                        for _ in 1..op.arity {
                            self.expr()?;
                            self.expect(b',', Error::Comma)?;
                        }
                        self.expr()?;
                        self.expect(b')', Error::ClosedPar)?;
                        have_operand = true;
                        break;
                    }
                }
            }
            if !have_operand {
                self.expr_operand()?;
            }
            self.expr_slice()?;
            let code = self.code();
            if is_operator(code) && OPERATORS[oper_index(code)].infix {
                let priority = OPERATORS[oper_index(code)].priority;
                self.unroll_ge(priority)?;
                self.epush(Some(code), priority)?;
                self.ip += 1;
                continue;
            }
            break;
        }
        self.unroll_ge(1)?;
        self.epop()?;
        Ok(())
    }

    pub fn expr_num(&mut self) -> Result<f32, Error> {
        self.expr()?;
        self.pop_num()
    }

    pub fn expr_str(&mut self) -> Result<Addr, Error> {
        self.expr()?;
        self.pop_str()
    }

    pub fn expr_int(&mut self) -> Result<i32, Error> {
        Ok(self.expr_num()? as i32)
    }

    fn apply(&mut self, code: u8) -> Result<(), Error> {
        (OPERATORS[oper_index(code)].routine)(self)
    }

    /// Pop and run pending operators with priority >= `p`.
    fn unroll_ge(&mut self, p: u8) -> Result<(), Error> {
        while let Some(top) = self.estack.last() {
            if top.priority < p {
                break;
            }
            match self.epop()? {
                Some(code) => self.apply(code)?,
                None => return Err(Error::Syntax),
            }
        }
        Ok(())
    }

    /// Pop and run pending operators with priority strictly above `p`.
    fn unroll_gt(&mut self, p: u8) -> Result<(), Error> {
        while let Some(top) = self.estack.last() {
            if top.priority <= p {
                break;
            }
            match self.epop()? {
                Some(code) => self.apply(code)?,
                None => return Err(Error::Syntax),
            }
        }
        Ok(())
    }

    fn expr_operand(&mut self) -> Result<(), Error> {
        match self.code() {
            b'(' => {
                self.ip += 1;
                self.expr()?;
                self.expect(b')', Error::ClosedPar)
            }
            code @ (CODE_IDN | CODE_IDNS) => {
                let name = self.ram.peek(self.ip + 1);
                match self.var_find(name) {
                    None => {
                        if self.fn_eval(name)? {
                            Ok(())
                        } else {
                            Err(Error::UndefinedVariable)
                        }
                    }
                    Some(v) => {
                        let (_, va) = self.var_address(v)?;
                        if code == CODE_IDN {
                            let n = self.ram.peek_num(va);
                            self.push_num(n)
                        } else {
                            // Copy the value out so the variable slot stays
                            // an lvalue while the copy lives on the stack.
                            let bytes = self.ram.cstr(va).to_vec();
                            self.push_temp(&bytes)
                        }
                    }
                }
            }
            CODE_INTLIT => {
                let n = self.ram.peek(self.ip + 1) as f32;
                self.ip += 3;
                self.push_num(n)
            }
            CODE_NUMLIT => {
                let n = self.ram.peek_num(self.ip + 1);
                self.ip += 5;
                self.push_num(n)
            }
            CODE_STRLIT => {
                let s = self.ram.peek(self.ip + 1);
                self.ip += 3;
                self.push_str(s)
            }
            _ => Err(Error::Value),
        }
    }

    /// Postfix string slice: `s(i TO j)`, `s(TO j)`, `s(i TO)`, `s(i)`.
    /// Lowers to the 3-argument SUB$ queued at function priority.
    fn expr_slice(&mut self) -> Result<(), Error> {
        if self.code() != b'(' {
            return Ok(());
        }
        if self.sp == self.sp0 || self.ram.peek(self.sp - 6) == NIL {
            return Ok(());
        }
        self.ip += 1;
        if self.code() == CODE_TO {
            // Missing start defaults to 1.
            self.push_num(1.0)?;
            self.ip += 1;
            self.expr()?;
        } else {
            let len = self.ram.strlen(self.ram.peek(self.sp - 6)) as f32;
            self.expr()?;
            if self.code() == b')' {
                // s(i) is s(i TO i).
                let i = self.ram.peek_num(self.tos_num()?);
                self.push_num(i)?;
            } else {
                self.expect(CODE_TO, Error::ToExpected)?;
                if self.code() != b')' {
                    self.expr()?;
                } else {
                    // Missing end defaults to the string length.
                    self.push_num(len)?;
                }
            }
        }
        self.expect(b')', Error::OpenParWithoutClosePar)?;
        self.epush(Some(CODE_SUBS), OPERATORS[oper_index(CODE_SUBS)].priority)
    }
}

// ---- routines --------------------------------------------------------

fn compare(rt: &mut Runtime) -> Result<std::cmp::Ordering, Error> {
    use std::cmp::Ordering;
    let (n2, s2) = rt.pop()?;
    let (n1, s1) = rt.pop()?;
    if (s1 == NIL) != (s2 == NIL) {
        return Err(Error::Type);
    }
    if s1 == NIL {
        Ok(if n1 > n2 {
            Ordering::Greater
        } else if n1 < n2 {
            Ordering::Less
        } else {
            Ordering::Equal
        })
    } else {
        Ok(rt.ram.cstr(s1).cmp(rt.ram.cstr(s2)))
    }
}

fn push_flag(rt: &mut Runtime, flag: bool) -> Result<(), Error> {
    rt.push_num(if flag { 1.0 } else { 0.0 })
}

fn oper_mul(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    let n1 = rt.pop_num()?;
    rt.push_num(n1 * n2)
}

/// Numeric addition or string concatenation, by operand type.
fn oper_plus(rt: &mut Runtime) -> Result<(), Error> {
    let (n2, s2) = rt.pop()?;
    let (n1, s1) = rt.pop()?;
    if s1 == NIL {
        if s2 != NIL {
            return Err(Error::Type);
        }
        rt.push_num(n1 + n2)
    } else {
        if s2 == NIL {
            return Err(Error::Type);
        }
        let mut bytes = rt.ram.cstr(s1).to_vec();
        bytes.extend_from_slice(rt.ram.cstr(s2));
        rt.push_temp(&bytes)
    }
}

fn oper_minus(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    let n1 = rt.pop_num()?;
    rt.push_num(n1 - n2)
}

fn oper_neg(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(-n)
}

fn oper_div(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    if n2 == 0.0 {
        return Err(Error::Zero);
    }
    let n1 = rt.pop_num()?;
    rt.push_num(n1 / n2)
}

fn oper_mod(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    if n2 == 0.0 {
        return Err(Error::Zero);
    }
    let n1 = rt.pop_num()?;
    rt.push_num(n1 % n2)
}

fn oper_pow(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    let n1 = rt.pop_num()?;
    if n1 == 0.0 && n2 <= 0.0 {
        return Err(Error::Domain);
    }
    let r = n1.powf(n2);
    if !r.is_finite() {
        return Err(Error::Domain);
    }
    rt.push_num(r)
}

fn oper_lt(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_lt())
}

fn oper_leq(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_le())
}

fn oper_neq(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_ne())
}

fn oper_eq(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_eq())
}

fn oper_gt(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_gt())
}

fn oper_geq(rt: &mut Runtime) -> Result<(), Error> {
    let c = compare(rt)?;
    push_flag(rt, c.is_ge())
}

fn oper_and(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    let n1 = rt.pop_num()?;
    push_flag(rt, n1 != 0.0 && n2 != 0.0)
}

fn oper_or(rt: &mut Runtime) -> Result<(), Error> {
    let n2 = rt.pop_num()?;
    let n1 = rt.pop_num()?;
    push_flag(rt, n1 != 0.0 || n2 != 0.0)
}

fn oper_not(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    push_flag(rt, n == 0.0)
}

fn oper_abs(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.abs())
}

fn oper_int(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.floor())
}

fn oper_sgn(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    })
}

fn oper_sin(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.sin())
}

fn oper_cos(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.cos())
}

fn oper_tan(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.tan())
}

fn oper_atn(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.atan())
}

fn oper_acs(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    if !(-1.0..=1.0).contains(&n) {
        return Err(Error::Domain);
    }
    rt.push_num(n.acos())
}

fn oper_asn(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    if !(-1.0..=1.0).contains(&n) {
        return Err(Error::Domain);
    }
    rt.push_num(n.asin())
}

fn oper_exp(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    rt.push_num(n.exp())
}

fn oper_log(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    if n <= 0.0 {
        return Err(Error::Domain);
    }
    rt.push_num(n.ln())
}

fn oper_sqr(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    if n < 0.0 {
        return Err(Error::Domain);
    }
    rt.push_num(n.sqrt())
}

fn oper_rnd(rt: &mut Runtime) -> Result<(), Error> {
    let n: f32 = rt.rng.gen();
    rt.push_num(n)
}

fn oper_time(rt: &mut Runtime) -> Result<(), Error> {
    let secs = rt.started.elapsed().as_secs() as f32;
    rt.push_num(secs)
}

fn oper_err(rt: &mut Runtime) -> Result<(), Error> {
    rt.push_num(rt.err as f32)
}

fn oper_col(rt: &mut Runtime) -> Result<(), Error> {
    let col = rt.console.col() as f32;
    rt.push_num(col)
}

fn oper_row(rt: &mut Runtime) -> Result<(), Error> {
    let row = rt.console.row() as f32;
    rt.push_num(row)
}

fn oper_eof(rt: &mut Runtime) -> Result<(), Error> {
    let ch = rt.pop_num()? as i32;
    if !(1..CHANNELS as i32).contains(&ch) {
        return Err(Error::IllegalChannel);
    }
    let eof = match rt.channels[ch as usize].as_mut() {
        None => return Err(Error::ChannelClosed),
        Some(Channel::Read(reader)) => reader.fill_buf().map(|b| b.is_empty()).unwrap_or(true),
        Some(Channel::Write(_)) => false,
    };
    push_flag(rt, eof)
}

fn oper_inkeys(rt: &mut Runtime) -> Result<(), Error> {
    let key = rt.console.inkey();
    rt.push_temp(&[key])
}

/// AT(row, col) positions the cursor and yields the empty string.
fn oper_at(rt: &mut Runtime) -> Result<(), Error> {
    let col = rt.pop_num()? as u16;
    let row = rt.pop_num()? as u16;
    rt.console.set_cursor(row, col);
    rt.push_empty()
}

/// TAB(col) moves the cursor and yields the empty string.
fn oper_tab(rt: &mut Runtime) -> Result<(), Error> {
    let col = rt.pop_num()? as u16;
    rt.console.set_col(col);
    rt.push_empty()
}

fn oper_len(rt: &mut Runtime) -> Result<(), Error> {
    let s = rt.pop_str()?;
    let len = rt.ram.strlen(s) as f32;
    rt.push_num(len)
}

fn oper_asc(rt: &mut Runtime) -> Result<(), Error> {
    let s = rt.pop_str()?;
    let b = rt.ram.byte(s) as f32;
    rt.push_num(b)
}

fn oper_chrs(rt: &mut Runtime) -> Result<(), Error> {
    let b = rt.pop_num()? as u8;
    rt.push_temp(&[b])
}

fn oper_val(rt: &mut Runtime) -> Result<(), Error> {
    let s = rt.pop_str()?;
    let mut p = s;
    while matches!(rt.ram.byte(p), b' ' | b'\t') {
        p += 1;
    }
    let mut end = p;
    if matches!(rt.ram.byte(end), b'+' | b'-') {
        end += 1;
    }
    let end = rt.float_span(end);
    let mut text = String::from_utf8_lossy(&rt.ram.cstr(p)[..(end - p) as usize]).into_owned();
    if text.ends_with('.') {
        text.push('0');
    }
    let n: f32 = text.parse().unwrap_or(0.0);
    rt.push_num(n)
}

fn oper_strs(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()?;
    let text = fmt_num(n);
    rt.push_temp(text.as_bytes())
}

fn oper_lefts(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()? as i32;
    let s = rt.pop_str()?;
    let len = rt.ram.strlen(s) as i32;
    if n < 0 || n > len {
        return Err(Error::SubscriptRange);
    }
    let bytes = rt.ram.cstr(s)[..n as usize].to_vec();
    rt.push_temp(&bytes)
}

fn oper_rights(rt: &mut Runtime) -> Result<(), Error> {
    let n = rt.pop_num()? as i32;
    let s = rt.pop_str()?;
    let len = rt.ram.strlen(s) as i32;
    if n < 0 || n > len {
        return Err(Error::SubscriptRange);
    }
    let bytes = rt.ram.cstr(s)[(len - n) as usize..].to_vec();
    rt.push_temp(&bytes)
}

fn oper_mids(rt: &mut Runtime) -> Result<(), Error> {
    let count = rt.pop_num()? as i32;
    let start = rt.pop_num()? as i32 - 1;
    let s = rt.pop_str()?;
    let len = rt.ram.strlen(s) as i32;
    if count < 0 || start < 0 || start >= len || start + count > len {
        return Err(Error::SubscriptRange);
    }
    let bytes = rt.ram.cstr(s)[start as usize..(start + count) as usize].to_vec();
    rt.push_temp(&bytes)
}

/// SUB$(s, i, j): characters i..j inclusive, 1-based. An inverted range is
/// the empty string; i below 1 or j past the end is out of range.
fn oper_subs(rt: &mut Runtime) -> Result<(), Error> {
    let j = rt.pop_num()? as i32;
    let i = rt.pop_num()? as i32;
    let s = rt.pop_str()?;
    let len = rt.ram.strlen(s) as i32;
    if i < 1 || j > len {
        return Err(Error::SubscriptRange);
    }
    if j < i {
        return rt.push_empty();
    }
    let bytes = rt.ram.cstr(s)[(i - 1) as usize..j as usize].to_vec();
    rt.push_temp(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::TestConsole;
    use crate::variables::VAR_NUM;

    fn eval(text: &str) -> Result<(f32, Addr, Runtime), Error> {
        let (con, _, _) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, text);
        rt.tokenize().unwrap();
        rt.ip0 = rt.obj;
        rt.ip = rt.obj + 1;
        rt.ipn = NIL;
        rt.expr()?;
        let (n, s) = rt.pop()?;
        Ok((n, s, rt))
    }

    fn eval_num(text: &str) -> f32 {
        let (n, s, _) = eval(text).unwrap();
        assert_eq!(s, NIL, "expected a number from {:?}", text);
        n
    }

    fn eval_str(text: &str) -> String {
        let (_, s, rt) = eval(text).unwrap();
        assert_ne!(s, NIL, "expected a string from {:?}", text);
        rt.ram.cstr_string(s)
    }

    fn eval_err(text: &str) -> Error {
        eval(text).unwrap_err()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_num("1 + 2 * 3"), 7.0);
        assert_eq!(eval_num("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_num("2 + 3 ^ 2"), 11.0);
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(eval_num("1 - 2 + 3"), 2.0);
        assert_eq!(eval_num("10 - 2 - 3"), 5.0);
        assert_eq!(eval_num("16 / 4 / 2"), 2.0);
        // ^ unrolls left to right as well.
        assert_eq!(eval_num("2 ^ 3 ^ 2"), 64.0);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval_num("-3"), -3.0);
        assert_eq!(eval_num("2 * -3"), -6.0);
        assert_eq!(eval_num("- - 4"), 4.0);
        // Negation binds below ^.
        assert_eq!(eval_num("-2 ^ 2"), -4.0);
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval_num("NOT 0"), 1.0);
        assert_eq!(eval_num("NOT 7"), 0.0);
        assert_eq!(eval_num("1 AND 0"), 0.0);
        assert_eq!(eval_num("1 OR 0"), 1.0);
        assert_eq!(eval_num("1 = 1 AND 2 = 2"), 1.0);
        assert_eq!(eval_num("NOT 1 = 2"), 1.0);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_num("2 > 1"), 1.0);
        assert_eq!(eval_num("2 <= 1"), 0.0);
        assert_eq!(eval_num("\"A\" < \"B\""), 1.0);
        assert_eq!(eval_num("\"AB\" = \"AB\""), 1.0);
        assert_eq!(eval_err("1 = \"A\""), Error::Type);
    }

    #[test]
    fn test_plus_concatenates_strings() {
        assert_eq!(eval_str("\"AB\" + \"CD\""), "ABCD");
        assert_eq!(eval_err("\"AB\" + 1"), Error::Type);
        assert_eq!(eval_err("1 + \"AB\""), Error::Type);
    }

    #[test]
    fn test_division_errors() {
        assert_eq!(eval_err("1 / 0"), Error::Zero);
        assert_eq!(eval_err("5 MOD 0"), Error::Zero);
        assert_eq!(eval_num("7 MOD 4"), 3.0);
    }

    #[test]
    fn test_domain_errors() {
        assert_eq!(eval_err("LOG 0"), Error::Domain);
        assert_eq!(eval_err("SQR(0 - 1)"), Error::Domain);
        assert_eq!(eval_err("ACS 2"), Error::Domain);
        assert_eq!(eval_err("0 ^ 0"), Error::Domain);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_num("ABS(0 - 5)"), 5.0);
        assert_eq!(eval_num("INT 2.7"), 2.0);
        assert_eq!(eval_num("SGN(0 - 3)"), -1.0);
        assert_eq!(eval_num("SQR 9"), 3.0);
        assert_eq!(eval_num("LEN \"ABC\""), 3.0);
        assert_eq!(eval_num("ASC \"A\""), 65.0);
        assert_eq!(eval_num("VAL \"3.5\""), 3.5);
        assert_eq!(eval_num("VAL \"-2\""), -2.0);
        assert_eq!(eval_str("CHR$ 65"), "A");
        assert_eq!(eval_str("STR$ 12"), "12");
        assert_eq!(eval_str("STR$ 1.5"), "1.5");
    }

    #[test]
    fn test_function_binds_tighter_than_infix() {
        assert_eq!(eval_num("LEN \"ABC\" + 1"), 4.0);
        assert_eq!(eval_num("ABS(0 - 2) * 3"), 6.0);
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval_str("LEFT$(\"HELLO\", 2)"), "HE");
        assert_eq!(eval_str("RIGHT$(\"HELLO\", 3)"), "LLO");
        assert_eq!(eval_str("MID$(\"HELLO\", 2, 3)"), "ELL");
        assert_eq!(eval_str("SUB$(\"HELLO\", 2, 4)"), "ELL");
        assert_eq!(eval_err("LEFT$(\"HELLO\", 9)"), Error::SubscriptRange);
    }

    #[test]
    fn test_slices() {
        assert_eq!(eval_str("\"HELLO\"(2 TO 3)"), "EL");
        assert_eq!(eval_str("\"HELLO\"(TO 2)"), "HE");
        assert_eq!(eval_str("\"HELLO\"(2 TO)"), "ELLO");
        assert_eq!(eval_str("\"HELLO\"(3)"), "L");
        assert_eq!(eval_str("\"HELLO\"(3 TO 2)"), "");
        assert_eq!(eval_err("\"HELLO\"(0 TO 2)"), Error::SubscriptRange);
        assert_eq!(eval_err("\"HELLO\"(1 TO 9)"), Error::SubscriptRange);
    }

    #[test]
    fn test_slice_composes_with_concat() {
        assert_eq!(eval_str("\"HELLO\"(1 TO 3) + \"P\""), "HELP");
    }

    #[test]
    fn test_variable_fetch() {
        let (con, _, _) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, "X + 1");
        rt.tokenize().unwrap();
        let name = rt.cstr_find(b"X").unwrap();
        let v = rt.var_create_scalar(name, VAR_NUM).unwrap();
        rt.ram.poke_num(rt.var_addr(v), 5.0);
        rt.ip0 = rt.obj;
        rt.ip = rt.obj + 1;
        rt.ipn = NIL;
        rt.expr().unwrap();
        assert_eq!(rt.pop_num().unwrap(), 6.0);
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(eval_err("Q + 1"), Error::UndefinedVariable);
    }

    #[test]
    fn test_missing_operand() {
        assert_eq!(eval_err("1 +"), Error::Value);
        assert_eq!(eval_err("* 2"), Error::Value);
    }

    #[test]
    fn test_parenthesis_mismatch() {
        assert_eq!(eval_err("(1 + 2"), Error::ClosedPar);
        assert_eq!(eval_err("MID$(\"A\" 1, 1)"), Error::Comma);
    }

    #[test]
    fn test_rnd_in_unit_interval() {
        for _ in 0..10 {
            let n = eval_num("RND");
            assert!((0.0..1.0).contains(&n));
        }
    }

    #[test]
    fn test_err_function() {
        let (con, _, _) = TestConsole::new(&[]);
        let mut rt = Runtime::new(Box::new(con));
        rt.err = 42;
        let buf0 = rt.bufs[0];
        rt.load_buffer(buf0, "ERR");
        rt.tokenize().unwrap();
        rt.ip0 = rt.obj;
        rt.ip = rt.obj + 1;
        rt.ipn = NIL;
        rt.expr().unwrap();
        assert_eq!(rt.pop_num().unwrap(), 42.0);
    }

    #[test]
    fn test_at_and_tab_yield_empty_string() {
        assert_eq!(eval_str("AT(2, 3)"), "");
        assert_eq!(eval_str("TAB(8)"), "");
    }

    #[test]
    fn test_fmt_num_round_trips() {
        for n in [0.0f32, 1.0, -1.5, 0.1, 12345.678, 3.0e-8] {
            assert_eq!(fmt_num(n).parse::<f32>().unwrap(), n);
        }
        assert_eq!(fmt_num(3.0), "3");
    }
}
