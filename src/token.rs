//! Token codes for the encoded program representation.
//!
//! A tokenized line is a flat byte sequence: literal and identifier tokens
//! carry a little-endian payload, keyword and operator tokens are a single
//! byte, and plain ASCII punctuation stands for itself. Keyword codes follow
//! the ordering of [`KEYWORDS`]; operator codes follow the ordering of the
//! operator table in `eval`.

use crate::ram::{Addr, Ram};

/// 16-bit integer literal: code, lo, hi.
pub const CODE_INTLIT: u8 = 128;
/// 32-bit float literal: code, 4 little-endian bytes.
pub const CODE_NUMLIT: u8 = 129;
/// String literal: code, 16-bit string-pool offset.
pub const CODE_STRLIT: u8 = 130;
/// Numeric identifier: code, 16-bit string-pool offset of the name.
pub const CODE_IDN: u8 = 131;
/// String identifier (`$` suffix): code, 16-bit string-pool offset.
pub const CODE_IDNS: u8 = 132;

pub const KEYWORD_BASE: u8 = 133;

pub const CODE_ATTR: u8 = 133;
pub const CODE_BYE: u8 = 134;
pub const CODE_CHAIN: u8 = 135;
pub const CODE_CLEAR: u8 = 136;
pub const CODE_CLOSE: u8 = 137;
pub const CODE_CLS: u8 = 138;
pub const CODE_CONTINUE: u8 = 139;
pub const CODE_DATA: u8 = 140;
pub const CODE_DEF: u8 = 141;
pub const CODE_DIM: u8 = 142;
pub const CODE_DUMP: u8 = 143;
pub const CODE_END: u8 = 144;
pub const CODE_ERROR: u8 = 145;
pub const CODE_FOR: u8 = 146;
pub const CODE_GOSUB: u8 = 147;
pub const CODE_GOTO: u8 = 148;
pub const CODE_IF: u8 = 149;
pub const CODE_INPUT: u8 = 150;
pub const CODE_LET: u8 = 151;
pub const CODE_LINPUT: u8 = 152;
pub const CODE_LIST: u8 = 153;
pub const CODE_LOAD: u8 = 154;
pub const CODE_MERGE: u8 = 155;
pub const CODE_NEW: u8 = 156;
pub const CODE_NEXT: u8 = 157;
pub const CODE_ON: u8 = 158;
pub const CODE_OPEN: u8 = 159;
pub const CODE_PRINT: u8 = 160;
pub const CODE_RANDOMIZE: u8 = 161;
pub const CODE_READ: u8 = 162;
pub const CODE_REM: u8 = 163;
pub const CODE_REPEAT: u8 = 164;
pub const CODE_RESTORE: u8 = 165;
pub const CODE_RETURN: u8 = 166;
pub const CODE_RUN: u8 = 167;
pub const CODE_SAVE: u8 = 168;
pub const CODE_SKIP: u8 = 169;
pub const CODE_STEP: u8 = 170;
pub const CODE_STOP: u8 = 171;
pub const CODE_SYS: u8 = 172;
pub const CODE_THEN: u8 = 173;
pub const CODE_TO: u8 = 174;
pub const CODE_TRACE: u8 = 175;

pub const KEYWORD_END: u8 = 176;

/// Keyword names, in code order.
pub const KEYWORDS: [&str; 43] = [
    "ATTR",
    "BYE",
    "CHAIN",
    "CLEAR",
    "CLOSE",
    "CLS",
    "CONTINUE",
    "DATA",
    "DEF",
    "DIM",
    "DUMP",
    "END",
    "ERROR",
    "FOR",
    "GOSUB",
    "GOTO",
    "IF",
    "INPUT",
    "LET",
    "LINPUT",
    "LIST",
    "LOAD",
    "MERGE",
    "NEW",
    "NEXT",
    "ON",
    "OPEN",
    "PRINT",
    "RANDOMIZE",
    "READ",
    "REM",
    "REPEAT",
    "RESTORE",
    "RETURN",
    "RUN",
    "SAVE",
    "SKIP",
    "STEP",
    "STOP",
    "SYS",
    "THEN",
    "TO",
    "TRACE",
];

pub fn is_keyword(code: u8) -> bool {
    (KEYWORD_BASE..KEYWORD_END).contains(&code)
}

pub fn keyword_name(code: u8) -> &'static str {
    KEYWORDS[(code - KEYWORD_BASE) as usize]
}

pub fn lookup_keyword(name: &[u8]) -> Option<u8> {
    KEYWORDS
        .iter()
        .position(|k| k.as_bytes() == name)
        .map(|i| KEYWORD_BASE + i as u8)
}

/// Address of the token following the one at `a`.
///
/// `DATA`, `REM` and `'` capture raw text up to the line terminator, so the
/// returned address is that of the final NUL.
pub fn token_skip(ram: &Ram, a: Addr) -> Addr {
    match ram.byte(a) {
        CODE_IDN | CODE_IDNS | CODE_INTLIT | CODE_STRLIT => a + 3,
        CODE_NUMLIT => a + 5,
        b'\'' | CODE_DATA | CODE_REM => a + ram.strlen(a),
        0 => a,
        _ => a + 1,
    }
}
