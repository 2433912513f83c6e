use crate::jvm_error::{VmError, VmExecResult};

// Type letters as they appear in field and method descriptors. The same
// letters are used as runtime field tags, extended with a few internal ones.

pub const BOOL: &str = "Z";
pub const BYTE: &str = "B";
pub const CHAR: &str = "C";
pub const DOUBLE: &str = "D";
pub const FLOAT: &str = "F";
pub const INT: &str = "I";
pub const LONG: &str = "J";
pub const REF: &str = "L";
pub const SHORT: &str = "S";
pub const VOID: &str = "V";

pub const ARRAY: &str = "[";
pub const BYTE_ARRAY: &str = "[B";

// Internal tags.
/// A string-pool index.
pub const STRING_INDEX: &str = "T";
/// A host-implemented method. Never used for string data.
pub const HOST_METHOD: &str = "G";
/// Prefix marking a static field tag, e.g. `XD` is a static double.
pub const STATIC: &str = "X";
pub const STATIC_DOUBLE: &str = "XD";
pub const STATIC_LONG: &str = "XJ";
/// Error sentinel produced when a type could not be determined.
pub const ERROR: &str = "0";
/// A structural (non-value) item returned from the constant pool.
pub const STRUCT: &str = "9";

pub fn is_integral(tag: &str) -> bool {
    matches!(tag, "B" | "C" | "I" | "J" | "S" | "Z")
}

pub fn is_floating_point(tag: &str) -> bool {
    matches!(tag, "F" | "D")
}

pub fn is_address(tag: &str) -> bool {
    tag.starts_with(REF) || tag.starts_with(ARRAY)
}

pub fn is_static(tag: &str) -> bool {
    tag.starts_with(STATIC)
}

/// Strips the static marker, giving the underlying field type.
pub fn strip_static(tag: &str) -> &str {
    tag.strip_prefix(STATIC).unwrap_or(tag)
}

/// Longs and doubles occupy two slots on the operand stack and in locals.
pub fn uses_two_slots(tag: &str) -> bool {
    matches!(tag, "J" | "D" | "XJ" | "XD")
}

pub fn slot_count(tag: &str) -> usize {
    if uses_two_slots(tag) {
        2
    } else {
        1
    }
}

/// A method descriptor split into parameter type strings and return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<String>,
    pub return_type: String,
}

impl MethodDescriptor {
    /// Number of operand-stack slots the parameters occupy (longs and
    /// doubles count twice; the receiver is not included).
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(|p| slot_count(p)).sum()
    }

    pub fn returns_value(&self) -> bool {
        self.return_type != VOID
    }
}

/// Parses a method descriptor such as `(I[Ljava/lang/String;J)V`.
pub fn parse_method_descriptor(descriptor: &str) -> VmExecResult<MethodDescriptor> {
    let bad = || VmError::ExecuteCodeError(format!("malformed method descriptor {descriptor}"));
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .ok_or_else(bad)?;
    let (args, return_type) = inner;

    let mut params = Vec::new();
    let bytes = args.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
            if i >= bytes.len() {
                return Err(bad());
            }
        }
        match bytes[i] {
            b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => i += 1,
            b'L' => {
                while i < bytes.len() && bytes[i] != b';' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(bad());
                }
                i += 1;
            }
            _ => return Err(bad()),
        }
        params.push(args[start..i].to_string());
    }

    if return_type.is_empty() {
        return Err(bad());
    }
    Ok(MethodDescriptor {
        params,
        return_type: return_type.to_string(),
    })
}
