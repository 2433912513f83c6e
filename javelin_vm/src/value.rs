use crate::jvm_error::{VmError, VmExecResult};
use crate::method_area::ClassId;
use crate::object::{JavaArray, Object};
use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub type InstanceRef = Rc<RefCell<Object>>;
pub type ArrayRef = Rc<RefCell<JavaArray>>;
pub type BytesRef = Rc<RefCell<Vec<u8>>>;

/// The uniform runtime value.
///
/// Everything with 32-bit integer semantics (byte, char, short, int,
/// boolean) is an `Int` held in a signed 64-bit word; arithmetic narrows
/// back to 32 bits explicitly. Java floats ride in `Float`'s f64 and are
/// narrowed at conversion boundaries. `Null` is a first-class reference
/// value, distinct from "absent". `Padding` fills the second slot of any
/// long or double on the operand stack and in locals so slot arithmetic
/// matches the JVM specification.
#[derive(Debug, Clone, Default)]
pub enum Value {
    Int(i64),
    Long(i64),
    Float(f64),
    /// Reference to an object instance.
    Ref(InstanceRef),
    /// Reference to a runtime-value array.
    Array(ArrayRef),
    /// Reference to raw byte storage; backs `[B` and string contents.
    Bytes(BytesRef),
    /// A class/method reference token, e.g. the result of `ldc` on a
    /// Class constant.
    Class(ClassId),
    #[default]
    Null,
    /// Upper slot of a two-slot value. Never an operand in its own right.
    Padding,
}

impl Value {
    pub fn int(&self) -> VmExecResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            _ => Err(VmError::ValueTypeMismatch),
        }
    }

    pub fn long(&self) -> VmExecResult<i64> {
        match self {
            Value::Long(v) => Ok(*v),
            _ => Err(VmError::ValueTypeMismatch),
        }
    }

    pub fn float(&self) -> VmExecResult<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            _ => Err(VmError::ValueTypeMismatch),
        }
    }

    pub fn instance(&self) -> VmExecResult<InstanceRef> {
        match self {
            Value::Ref(v) => Ok(v.clone()),
            _ => Err(VmError::ValueTypeMismatch),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Ref(_) | Value::Array(_) | Value::Bytes(_) | Value::Null
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Equality follows Java semantics: numeric values compare by value,
/// references by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Padding, Value::Padding) => true,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "int {v}"),
            Value::Long(v) => write!(f, "long {v}"),
            Value::Float(v) => write!(f, "float {v}"),
            Value::Ref(_) => write!(f, "objectref"),
            Value::Array(a) => write!(f, "arrayref (len {})", a.borrow().elements.len()),
            Value::Bytes(b) => write!(f, "bytearray (len {})", b.borrow().len()),
            Value::Class(id) => write!(f, "classref {id}"),
            Value::Null => write!(f, "null"),
            Value::Padding => write!(f, "padding"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn references_compare_by_identity() {
        let a = Rc::new(RefCell::new(Object {
            class: ClassId(0),
            fields: IndexMap::new(),
            monitor: Default::default(),
        }));
        let b = Rc::new(RefCell::new(Object {
            class: ClassId(0),
            fields: IndexMap::new(),
            monitor: Default::default(),
        }));
        assert_eq!(Value::Ref(a.clone()), Value::Ref(a.clone()));
        assert_ne!(Value::Ref(a), Value::Ref(b));
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, Value::Int(0));
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(Value::Int(-1), Value::Int(-1));
        assert_ne!(Value::Int(1), Value::Long(1));
        assert_eq!(Value::Float(2.5), Value::Float(2.5));
    }
}
