use crate::byte_buffer::ByteBuffer;
use crate::class_file_error::{ClassFileError, Result};
use std::fmt::{Display, Formatter};

pub type CpIndex = u16;

/// One decoded constant-pool entry.
/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.4
///
/// | Tag | Entry |
/// | --- | ----- |
/// | 1   | Utf8 |
/// | 3/4 | Integer / Float |
/// | 5/6 | Long / Double (occupy two logical slots) |
/// | 7   | Class |
/// | 8   | String |
/// | 9/10/11 | FieldRef / MethodRef / InterfaceMethodRef |
/// | 12  | NameAndType |
/// | 15  | MethodHandle |
/// | 16  | MethodType |
/// | 18  | InvokeDynamic |
#[derive(Debug, Clone, PartialEq)]
pub enum CpEntry {
    /// Slot 0 and the slot following a Long or Double. Structurally present,
    /// never legal to reference.
    Unused,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: CpIndex },
    String { utf8_index: CpIndex },
    FieldRef { class_index: CpIndex, name_and_type_index: CpIndex },
    MethodRef { class_index: CpIndex, name_and_type_index: CpIndex },
    InterfaceMethodRef { class_index: CpIndex, name_and_type_index: CpIndex },
    NameAndType { name_index: CpIndex, descriptor_index: CpIndex },
    MethodHandle { reference_kind: u8, reference_index: CpIndex },
    MethodType { descriptor_index: CpIndex },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: CpIndex },
}

impl CpEntry {
    pub fn read_from(buffer: &mut ByteBuffer) -> Result<CpEntry> {
        let tag = buffer.read_u8()?;
        let entry = match tag {
            1 => {
                let len = buffer.read_u16()? as usize;
                CpEntry::Utf8(buffer.read_utf8(len)?)
            }
            3 => CpEntry::Integer(buffer.read_i32()?),
            4 => CpEntry::Float(buffer.read_f32()?),
            5 => CpEntry::Long(buffer.read_i64()?),
            6 => CpEntry::Double(buffer.read_f64()?),
            7 => CpEntry::Class {
                name_index: buffer.read_u16()?,
            },
            8 => CpEntry::String {
                utf8_index: buffer.read_u16()?,
            },
            9 => CpEntry::FieldRef {
                class_index: buffer.read_u16()?,
                name_and_type_index: buffer.read_u16()?,
            },
            10 => CpEntry::MethodRef {
                class_index: buffer.read_u16()?,
                name_and_type_index: buffer.read_u16()?,
            },
            11 => CpEntry::InterfaceMethodRef {
                class_index: buffer.read_u16()?,
                name_and_type_index: buffer.read_u16()?,
            },
            12 => CpEntry::NameAndType {
                name_index: buffer.read_u16()?,
                descriptor_index: buffer.read_u16()?,
            },
            15 => CpEntry::MethodHandle {
                reference_kind: buffer.read_u8()?,
                reference_index: buffer.read_u16()?,
            },
            16 => CpEntry::MethodType {
                descriptor_index: buffer.read_u16()?,
            },
            18 => CpEntry::InvokeDynamic {
                bootstrap_method_attr_index: buffer.read_u16()?,
                name_and_type_index: buffer.read_u16()?,
            },
            t => return Err(ClassFileError::UnsupportedConstantPoolTag(t)),
        };
        Ok(entry)
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, CpEntry::Long(_) | CpEntry::Double(_))
    }
}

/// The constant pool of one class. Index 0 is an unused placeholder, so
/// entries are addressed with the 1-based indices the bytecode uses.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![CpEntry::Unused],
        }
    }

    /// Number of logical slots including the unused slot 0; this is the
    /// `constant_pool_count` the class file declares.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, entry: CpEntry) {
        let wide = entry.is_wide();
        self.entries.push(entry);
        if wide {
            self.entries.push(CpEntry::Unused);
        }
    }

    pub fn get(&self, index: CpIndex) -> Result<&CpEntry> {
        match self.entries.get(index as usize) {
            Some(CpEntry::Unused) | None => Err(ClassFileError::InvalidConstantPoolIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: CpIndex) -> Result<&str> {
        if let CpEntry::Utf8(text) = self.get(index)? {
            Ok(text)
        } else {
            Err(ClassFileError::ConstantPoolTypeMismatch {
                index,
                expected: "Utf8",
            })
        }
    }

    pub fn class_name(&self, index: CpIndex) -> Result<&str> {
        if let CpEntry::Class { name_index } = self.get(index)? {
            self.utf8(*name_index)
        } else {
            Err(ClassFileError::ConstantPoolTypeMismatch {
                index,
                expected: "Class",
            })
        }
    }

    pub fn name_and_type(&self, index: CpIndex) -> Result<(&str, &str)> {
        if let CpEntry::NameAndType {
            name_index,
            descriptor_index,
        } = self.get(index)?
        {
            Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?))
        } else {
            Err(ClassFileError::ConstantPoolTypeMismatch {
                index,
                expected: "NameAndType",
            })
        }
    }

    /// Checks every cross-reference after the whole pool is decoded: indices
    /// in range, referent tag as expected, and nothing pointing at the unused
    /// slot after a Long/Double. Violations are fatal ClassFormatErrors
    /// naming the offending entry.
    pub fn validate(&self) -> Result<()> {
        for (raw_index, entry) in self.entries.iter().enumerate() {
            let index = raw_index as CpIndex;
            match entry {
                CpEntry::Unused
                | CpEntry::Utf8(_)
                | CpEntry::Integer(_)
                | CpEntry::Float(_)
                | CpEntry::Long(_)
                | CpEntry::Double(_) => {}
                CpEntry::Class { name_index } => {
                    self.expect_utf8(*name_index, index)?;
                }
                CpEntry::String { utf8_index } => {
                    self.expect_utf8(*utf8_index, index)?;
                }
                CpEntry::FieldRef {
                    class_index,
                    name_and_type_index,
                }
                | CpEntry::MethodRef {
                    class_index,
                    name_and_type_index,
                }
                | CpEntry::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    self.expect_class(*class_index, index)?;
                    self.expect_name_and_type(*name_and_type_index, index)?;
                }
                CpEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    self.expect_utf8(*name_index, index)?;
                    self.expect_utf8(*descriptor_index, index)?;
                }
                CpEntry::MethodHandle {
                    reference_index, ..
                } => {
                    // the referent must be one of the three member-ref shapes
                    match self.get(*reference_index) {
                        Ok(CpEntry::FieldRef { .. })
                        | Ok(CpEntry::MethodRef { .. })
                        | Ok(CpEntry::InterfaceMethodRef { .. }) => {}
                        _ => {
                            return Err(ClassFileError::InvalidClassData(format!(
                                "constant pool entry {index}: method handle referent is not a member reference"
                            )))
                        }
                    }
                }
                CpEntry::MethodType { descriptor_index } => {
                    self.expect_utf8(*descriptor_index, index)?;
                }
                CpEntry::InvokeDynamic {
                    name_and_type_index,
                    ..
                } => {
                    self.expect_name_and_type(*name_and_type_index, index)?;
                }
            }
        }
        Ok(())
    }

    fn expect_utf8(&self, target: CpIndex, from: CpIndex) -> Result<()> {
        match self.get(target) {
            Ok(CpEntry::Utf8(_)) => Ok(()),
            _ => Err(ClassFileError::InvalidClassData(format!(
                "constant pool entry {from}: index {target} should be Utf8"
            ))),
        }
    }

    fn expect_class(&self, target: CpIndex, from: CpIndex) -> Result<()> {
        match self.get(target) {
            Ok(CpEntry::Class { .. }) => Ok(()),
            _ => Err(ClassFileError::InvalidClassData(format!(
                "constant pool entry {from}: index {target} should be Class"
            ))),
        }
    }

    fn expect_name_and_type(&self, target: CpIndex, from: CpIndex) -> Result<()> {
        match self.get(target) {
            Ok(CpEntry::NameAndType { .. }) => Ok(()),
            _ => Err(ClassFileError::InvalidClassData(format!(
                "constant pool entry {from}: index {target} should be NameAndType"
            ))),
        }
    }
}

impl Display for ConstantPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Constant pool: ({} slots)", self.entries.len())?;
        for (index, entry) in self.entries.iter().enumerate() {
            writeln!(f, "  #{index} = {entry:?}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_entries_occupy_two_slots() {
        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Utf8("hey".to_string()));
        cp.add(CpEntry::Long(123));
        cp.add(CpEntry::Integer(7));

        assert_eq!(5, cp.count());
        assert_eq!(&CpEntry::Long(123), cp.get(2).unwrap());
        // the slot shadowed by the Long is structurally present but unusable
        assert_eq!(Err(ClassFileError::InvalidConstantPoolIndex(3)), cp.get(3));
        assert_eq!(&CpEntry::Integer(7), cp.get(4).unwrap());
    }

    #[test]
    fn slot_zero_is_never_addressable() {
        let cp = ConstantPool::new();
        assert_eq!(Err(ClassFileError::InvalidConstantPoolIndex(0)), cp.get(0));
    }

    #[test]
    fn validate_rejects_reference_into_wide_shadow() {
        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Double(1.5));
        cp.add(CpEntry::Class { name_index: 2 });
        let err = cp.validate().unwrap_err();
        assert!(err.to_string().contains("entry 3"));
    }

    #[test]
    fn validate_rejects_tag_mismatch() {
        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Integer(1));
        cp.add(CpEntry::String { utf8_index: 1 });
        assert!(cp.validate().is_err());

        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Utf8("java/lang/Object".to_string()));
        cp.add(CpEntry::Class { name_index: 1 });
        cp.add(CpEntry::NameAndType {
            name_index: 1,
            descriptor_index: 1,
        });
        cp.add(CpEntry::MethodRef {
            class_index: 2,
            name_and_type_index: 3,
        });
        assert!(cp.validate().is_ok());
    }

    #[test]
    fn accessors_resolve_through_class_entries() {
        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Utf8("java/lang/String".to_string()));
        cp.add(CpEntry::Class { name_index: 1 });
        assert_eq!("java/lang/String", cp.class_name(2).unwrap());
        assert_eq!(
            Err(ClassFileError::ConstantPoolTypeMismatch {
                index: 1,
                expected: "Class"
            }),
            cp.class_name(1).map(|_| ())
        );
    }
}
