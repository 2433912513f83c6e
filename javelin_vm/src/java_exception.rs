use crate::jvm_error::VmError;
use crate::value::Value;

// Guest exception classes the core itself raises.
pub const ARITHMETIC_EXCEPTION: &str = "java/lang/ArithmeticException";
pub const NULL_POINTER_EXCEPTION: &str = "java/lang/NullPointerException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS: &str = "java/lang/ArrayIndexOutOfBoundsException";
pub const NEGATIVE_ARRAY_SIZE: &str = "java/lang/NegativeArraySizeException";
pub const CLASS_CAST_EXCEPTION: &str = "java/lang/ClassCastException";
pub const UNSUPPORTED_OPERATION: &str = "java/lang/UnsupportedOperationException";
pub const EXCEPTION_IN_INITIALIZER: &str = "java/lang/ExceptionInInitializerError";

/// How a method call goes wrong.
///
/// `Internal` is a host-level error: the interpreter stops and the process
/// shuts down. `JavaException` carries a guest throwable; it unwinds the
/// frame stack, and each frame gets a chance to catch it through its
/// exception table before it propagates further.
#[derive(Debug)]
pub enum MethodCallError {
    Internal(VmError),
    JavaException(Value),
}

impl From<VmError> for MethodCallError {
    fn from(value: VmError) -> Self {
        MethodCallError::Internal(value)
    }
}

/// A method either completes with an optional return value or fails.
pub type InvokeResult = Result<Option<Value>, MethodCallError>;
