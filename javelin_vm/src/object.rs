use crate::jtypes;
use crate::jvm_error::{VmError, VmExecResult};
use crate::method_area::ClassId;
use crate::string_pool::StrId;
use crate::value::Value;
use indexmap::IndexMap;

/// Monitor bookkeeping slot. In the cooperative single-threaded model every
/// monitorenter/monitorexit pair is a no-op; the field exists so a future
/// multithreaded core has somewhere to hang real state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    pub entry_count: u32,
}

/// One named field of an object or of a class's statics: a descriptor tag
/// plus a value of the matching kind. Static fields carry an `X`-prefixed
/// tag (`XJ` is a static long).
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: String,
    pub value: Value,
}

impl Field {
    pub fn new(tag: &str, value: Value) -> Field {
        Field {
            tag: tag.to_string(),
            value,
        }
    }

    pub fn is_static(&self) -> bool {
        jtypes::is_static(&self.tag)
    }
}

/// An object instance: its class, a field table keyed by interned field
/// name, and a monitor placeholder.
#[derive(Debug)]
pub struct Object {
    pub class: ClassId,
    pub fields: IndexMap<StrId, Field>,
    pub monitor: Monitor,
}

impl Object {
    pub fn new(class: ClassId) -> Object {
        Object {
            class,
            fields: IndexMap::new(),
            monitor: Monitor::default(),
        }
    }

    pub fn field(&self, name: StrId) -> Option<&Field> {
        self.fields.get(&name)
    }

    pub fn set_field(&mut self, name: StrId, field: Field) {
        self.fields.insert(name, field);
    }

    /// Stores into an already-declared field, keeping its tag.
    pub fn put_value(&mut self, name: StrId, value: Value) -> VmExecResult<()> {
        match self.fields.get_mut(&name) {
            Some(field) => {
                field.value = value;
                Ok(())
            }
            None => Err(VmError::FieldNotFound(name.to_string())),
        }
    }
}

/// A one-dimensional array: contiguous runtime values homogeneous in the
/// element tag. Reference arrays store references; multi-dimensional arrays
/// are arrays of array references. Byte and boolean arrays are not stored
/// here at all; they use the dedicated byte-array value kind.
#[derive(Debug)]
pub struct JavaArray {
    /// Element descriptor, e.g. `I`, `J`, `Ljava/lang/String;`, `[I`.
    pub tag: String,
    pub elements: Vec<Value>,
}

impl JavaArray {
    pub fn new(element_tag: &str, length: usize) -> JavaArray {
        JavaArray {
            tag: element_tag.to_string(),
            elements: vec![default_value(element_tag); length],
        }
    }
}

/// The default (zero) value for a field or array slot of the given
/// descriptor: numeric zero, false, or the null reference.
pub fn default_value(tag: &str) -> Value {
    match jtypes::strip_static(tag) {
        "Z" | "B" | "C" | "S" | "I" => Value::Int(0),
        "J" => Value::Long(0),
        "F" | "D" => Value::Float(0.0),
        _ => Value::Null,
    }
}
