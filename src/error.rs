//! The closed set of runtime errors.
//!
//! Every error carries a stable numeric code: `ERR` reads the code captured
//! by an ON ERROR handler and the `ERROR n` statement raises by code, so the
//! mapping in both directions is part of the language surface.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("CANNOT OPEN FILE")]
    File,
    #[error("CHANNEL BUSY")]
    ChannelBusy,
    #[error("CHANNEL CLOSED")]
    ChannelClosed,
    #[error("\")\" EXPECTED")]
    ClosedPar,
    #[error("\"(\" EXPECTED")]
    OpenedPar,
    #[error("\"(\" WITHOUT \")\"")]
    OpenParWithoutClosePar,
    #[error("\",\" EXPECTED")]
    Comma,
    #[error("DOMAIN ERROR")]
    Domain,
    #[error("END OF LINE INSIDE STRING")]
    EolInsideString,
    #[error("\"=\" EXPECTED")]
    Assignment,
    #[error("FOR INDEX EXPECTED")]
    ForVar,
    #[error("FOR WITHOUT NEXT")]
    ForWithoutNext,
    #[error("\"#\" EXPECTED")]
    Hash,
    #[error("IDENTIFIER EXPECTED")]
    Identifier,
    #[error("ILLEGAL ATTRIBUTE")]
    IllegalAttribute,
    #[error("ILLEGAL CHANNEL")]
    IllegalChannel,
    #[error("ILLEGAL CONVERSION")]
    IllegalConversion,
    #[error("ILLEGAL INPUT")]
    IllegalInput,
    #[error("ILLEGAL INSTRUCTION")]
    IllegalInstruction,
    #[error("ILLEGAL INSTRUCTION OUTSIDE PROGRAM")]
    IllegalOutsideProgram,
    #[error("ILLEGAL LINE NUMBER")]
    IllegalLineNumber,
    #[error("ILLEGAL MODE")]
    IllegalMode,
    #[error("NUMERICAL VARIABLE EXPECTED")]
    NumVar,
    #[error("ON VALUE OUT OF LIST")]
    On,
    #[error("OUT OF DATA")]
    OutOfData,
    #[error("NO MORE ROOM FOR STRINGS")]
    OutOfStrings,
    #[error("NO MORE ROOM FOR VARIABLES")]
    OutOfVariables,
    #[error("PROGRAM STOPPED")]
    Stop,
    #[error("PROGRAM TOO LONG")]
    ProgramTooLong,
    #[error("RETURN WITHOUT GOSUB")]
    Return,
    #[error("EXPRESSION TOO LONG")]
    ExpressionTooLong,
    #[error("MISSING VALUE")]
    Value,
    #[error("STRING VARIABLE EXPECTED")]
    StrVar,
    #[error("SUBSCRIPT OUT OF RANGE")]
    SubscriptRange,
    #[error("MISSING SUBSCRIPT")]
    Subscript,
    #[error("SYNTAX ERROR")]
    Syntax,
    #[error("\"TO\" EXPECTED")]
    ToExpected,
    #[error("TOO MANY NESTED GOSUBS")]
    TooManyGosub,
    #[error("TYPE MISMATCH")]
    Type,
    #[error("UNDEFINED VARIABLE")]
    UndefinedVariable,
    #[error("VARIABLE ALREADY DEFINED")]
    VariableAlreadyDefined,
    #[error("DIVISION BY ZERO")]
    Zero,
    #[error("BREAK")]
    Break,
    #[error("BAD DATA ITEM")]
    Data,
    /// A code raised by `ERROR n` with no named counterpart.
    #[error("ERROR #{0}")]
    Other(u8),
}

impl Error {
    pub fn code(self) -> u8 {
        match self {
            Error::File => 1,
            Error::ChannelBusy => 2,
            Error::ChannelClosed => 3,
            Error::ClosedPar => 4,
            Error::OpenedPar => 5,
            Error::OpenParWithoutClosePar => 6,
            Error::Comma => 7,
            Error::Domain => 8,
            Error::EolInsideString => 9,
            Error::Assignment => 10,
            Error::ForVar => 11,
            Error::ForWithoutNext => 12,
            Error::Hash => 13,
            Error::Identifier => 14,
            Error::IllegalAttribute => 15,
            Error::IllegalChannel => 16,
            Error::IllegalConversion => 17,
            Error::IllegalInput => 18,
            Error::IllegalInstruction => 19,
            Error::IllegalOutsideProgram => 20,
            Error::IllegalLineNumber => 21,
            Error::IllegalMode => 22,
            Error::NumVar => 23,
            Error::On => 24,
            Error::OutOfData => 25,
            Error::OutOfStrings => 26,
            Error::OutOfVariables => 27,
            Error::Stop => 28,
            Error::ProgramTooLong => 29,
            Error::Return => 30,
            Error::ExpressionTooLong => 31,
            Error::Value => 32,
            Error::StrVar => 33,
            Error::SubscriptRange => 34,
            Error::Subscript => 35,
            Error::Syntax => 36,
            Error::ToExpected => 37,
            Error::TooManyGosub => 38,
            Error::Type => 39,
            Error::UndefinedVariable => 40,
            Error::VariableAlreadyDefined => 41,
            Error::Zero => 42,
            Error::Break => 43,
            Error::Data => 44,
            Error::Other(n) => n,
        }
    }

    pub fn from_code(code: u8) -> Error {
        match code {
            1 => Error::File,
            2 => Error::ChannelBusy,
            3 => Error::ChannelClosed,
            4 => Error::ClosedPar,
            5 => Error::OpenedPar,
            6 => Error::OpenParWithoutClosePar,
            7 => Error::Comma,
            8 => Error::Domain,
            9 => Error::EolInsideString,
            10 => Error::Assignment,
            11 => Error::ForVar,
            12 => Error::ForWithoutNext,
            13 => Error::Hash,
            14 => Error::Identifier,
            15 => Error::IllegalAttribute,
            16 => Error::IllegalChannel,
            17 => Error::IllegalConversion,
            18 => Error::IllegalInput,
            19 => Error::IllegalInstruction,
            20 => Error::IllegalOutsideProgram,
            21 => Error::IllegalLineNumber,
            22 => Error::IllegalMode,
            23 => Error::NumVar,
            24 => Error::On,
            25 => Error::OutOfData,
            26 => Error::OutOfStrings,
            27 => Error::OutOfVariables,
            28 => Error::Stop,
            29 => Error::ProgramTooLong,
            30 => Error::Return,
            31 => Error::ExpressionTooLong,
            32 => Error::Value,
            33 => Error::StrVar,
            34 => Error::SubscriptRange,
            35 => Error::Subscript,
            36 => Error::Syntax,
            37 => Error::ToExpected,
            38 => Error::TooManyGosub,
            39 => Error::Type,
            40 => Error::UndefinedVariable,
            41 => Error::VariableAlreadyDefined,
            42 => Error::Zero,
            43 => Error::Break,
            44 => Error::Data,
            n => Error::Other(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 1..=44u8 {
            assert_eq!(Error::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_code_message() {
        let e = Error::from_code(99);
        assert_eq!(e, Error::Other(99));
        assert_eq!(e.to_string(), "ERROR #99");
    }

    #[test]
    fn test_messages() {
        assert_eq!(Error::Type.to_string(), "TYPE MISMATCH");
        assert_eq!(Error::Return.to_string(), "RETURN WITHOUT GOSUB");
        assert_eq!(Error::Zero.to_string(), "DIVISION BY ZERO");
    }
}
