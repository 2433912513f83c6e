use thiserror::Error;

/// Everything that can go wrong while decoding a .class file. All of these
/// surface to the caller as a ClassFormatError with enough context (byte
/// offset or constant-pool index) to locate the damage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("invalid magic number: {0:#010x}")]
    InvalidMagicNumber(u32),
    #[error("unsupported class file version {0}.{1}")]
    UnsupportedVersion(u16, u16),
    #[error("unexpected end of class data at offset {0}")]
    UnexpectedEndOfData(usize),
    #[error("invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("constant pool entry {index} should be {expected}")]
    ConstantPoolTypeMismatch { index: u16, expected: &'static str },
    #[error("unsupported constant pool tag {0}")]
    UnsupportedConstantPoolTag(u8),
    #[error("invalid modified utf-8 data")]
    InvalidUtf8Data,
    #[error("invalid class data: {0}")]
    InvalidClassData(String),
}

pub type Result<T> = std::result::Result<T, ClassFileError>;
