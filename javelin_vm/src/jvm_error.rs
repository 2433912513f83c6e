use classfile::class_file_error::ClassFileError;
use thiserror::Error;

/// Host-level errors: conditions under which the interpreter cannot keep
/// running guest code. Guest-visible exceptions (ArithmeticException and
/// friends) are not represented here; they travel as thrown objects through
/// [`crate::java_exception::MethodCallError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("ClassFormatError: {0}")]
    ClassFormatError(String),
    #[error("NoClassDefFoundError: {0}")]
    NoClassDefFound(String),
    #[error("LinkageError: {0}")]
    LinkageError(String),
    #[error("method {0}{1} not found")]
    MethodNotFound(String, String),
    #[error("field {0} not found")]
    FieldNotFound(String),
    #[error("no native method bound for {0}")]
    NativeMethodNotFound(String),
    #[error("class path {0} does not exist")]
    ClassPathNotExist(String),
    #[error("jar file {0} does not exist")]
    JarFileNotExist(String),
    #[error("cannot read class bytes: {0}")]
    ReadClassBytesError(String),
    #[error("illegal class status transition for {class}: {from} -> {to}")]
    IllegalStatusTransition {
        class: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("operand stack overflow")]
    OperandStackOverflow,
    #[error("operand stack underflow")]
    OperandStackUnderflow,
    #[error("value type mismatch")]
    ValueTypeMismatch,
    #[error("local variable index {0} out of bounds")]
    LocalIndexOutOfBounds(usize),
    #[error("invalid opcode {opcode:#04x} at PC {pc}")]
    InvalidOpcode { opcode: u8, pc: usize },
    #[error("bytecode ran off the end of the method at PC {0}")]
    PcOutOfBounds(usize),
    #[error("execution error: {0}")]
    ExecuteCodeError(String),
}

pub type VmExecResult<T> = Result<T, VmError>;

impl From<ClassFileError> for VmError {
    fn from(value: ClassFileError) -> Self {
        VmError::ClassFormatError(value.to_string())
    }
}

/// Process exit codes, one per failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCode {
    Ok = 0,
    ApplicationException = 1,
    JvmException = 2,
    InternalError = 3,
}
