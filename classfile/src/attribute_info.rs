use crate::byte_buffer::ByteBuffer;
use crate::class_file_error::{ClassFileError, Result};
use crate::constant_pool::{ConstantPool, CpEntry};
use indexmap::IndexMap;

/// A raw attribute: its resolved name plus the undecoded payload.
/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.7
///
/// Attributes the execution core interprets (Code, ConstantValue and the
/// tables nested inside Code) get dedicated decoders below; everything else
/// is captured verbatim for later consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub name: String,
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn read_from(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<AttributeInfo> {
        let name_index = buffer.read_u16()?;
        let name = cp.utf8(name_index)?.to_string();
        let length = buffer.read_u32()? as usize;
        let info = Vec::from(buffer.read_bytes(length)?);
        Ok(AttributeInfo { name, info })
    }
}

pub fn read_attribute_table(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<Vec<AttributeInfo>> {
    let count = buffer.read_u16()? as usize;
    (0..count)
        .map(|_| AttributeInfo::read_from(buffer, cp))
        .collect()
}

/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.7.2
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
}

impl ConstantValue {
    pub fn decode(info: &[u8], cp: &ConstantPool) -> Result<ConstantValue> {
        if info.len() != 2 {
            return Err(ClassFileError::InvalidClassData(
                "ConstantValue attribute should be two bytes".to_string(),
            ));
        }
        let index = u16::from_be_bytes(info.try_into().unwrap());
        match cp.get(index)? {
            CpEntry::Integer(v) => Ok(ConstantValue::Int(*v)),
            CpEntry::Float(v) => Ok(ConstantValue::Float(*v)),
            CpEntry::Long(v) => Ok(ConstantValue::Long(*v)),
            CpEntry::Double(v) => Ok(ConstantValue::Double(*v)),
            CpEntry::String { utf8_index } => Ok(ConstantValue::String(cp.utf8(*utf8_index)?.to_string())),
            _ => Err(ClassFileError::ConstantPoolTypeMismatch {
                index,
                expected: "loadable constant",
            }),
        }
    }
}

/// One row of the Code attribute's exception table. catch_type is resolved
/// to a class name; None means "catch anything" (a finally handler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: Option<String>,
}

impl ExceptionTableEntry {
    /// The covered range is [start_pc, end_pc) per the spec.
    pub fn covers(&self, pc: u16) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
}

/// The fully decoded Code attribute.
/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.7.3
///
/// ```c
/// Code_attribute {
///     u2 max_stack;
///     u2 max_locals;
///     u4 code_length;
///     u1 code[code_length];
///     u2 exception_table_length;
///     {   u2 start_pc;
///         u2 end_pc;
///         u2 handler_pc;
///         u2 catch_type;
///     } exception_table[exception_table_length];
///     u2 attributes_count;
///     attribute_info attributes[attributes_count];
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    /// start_pc -> source line
    pub line_number_table: IndexMap<u16, u16>,
    /// local slot -> variable description
    pub local_variable_table: IndexMap<u16, LocalVariableEntry>,
    /// StackMapTable and anything else nested in Code, kept verbatim for a
    /// future verifier.
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn decode(info: &[u8], cp: &ConstantPool) -> Result<CodeAttribute> {
        let mut buffer = ByteBuffer::new(info);
        let max_stack = buffer.read_u16()?;
        let max_locals = buffer.read_u16()?;
        let code_length = buffer.read_u32()? as usize;
        let code = Vec::from(buffer.read_bytes(code_length)?);

        let exception_table_length = buffer.read_u16()?;
        let mut exception_table = Vec::with_capacity(exception_table_length as usize);
        for _ in 0..exception_table_length {
            let start_pc = buffer.read_u16()?;
            let end_pc = buffer.read_u16()?;
            let handler_pc = buffer.read_u16()?;
            let catch_type_index = buffer.read_u16()?;
            let catch_type = if catch_type_index == 0 {
                None
            } else {
                Some(cp.class_name(catch_type_index)?.to_string())
            };
            exception_table.push(ExceptionTableEntry {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        let mut line_number_table = IndexMap::new();
        let mut local_variable_table = IndexMap::new();
        let mut attributes = Vec::new();
        let attribute_count = buffer.read_u16()?;
        for _ in 0..attribute_count {
            let attr = AttributeInfo::read_from(&mut buffer, cp)?;
            match attr.name.as_str() {
                "LineNumberTable" => {
                    let mut reader = ByteBuffer::new(&attr.info);
                    let entries = reader.read_u16()?;
                    for _ in 0..entries {
                        let start_pc = reader.read_u16()?;
                        let line = reader.read_u16()?;
                        line_number_table.insert(start_pc, line);
                    }
                }
                "LocalVariableTable" => {
                    let mut reader = ByteBuffer::new(&attr.info);
                    let entries = reader.read_u16()?;
                    for _ in 0..entries {
                        let start_pc = reader.read_u16()?;
                        let length = reader.read_u16()?;
                        let name = cp.utf8(reader.read_u16()?)?.to_string();
                        let descriptor = cp.utf8(reader.read_u16()?)?.to_string();
                        let slot = reader.read_u16()?;
                        local_variable_table.insert(
                            slot,
                            LocalVariableEntry {
                                start_pc,
                                length,
                                name,
                                descriptor,
                            },
                        );
                    }
                }
                _ => attributes.push(attr),
            }
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            line_number_table,
            local_variable_table,
            attributes,
        })
    }
}
