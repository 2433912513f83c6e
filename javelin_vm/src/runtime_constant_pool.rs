use crate::jvm_error::{VmError, VmExecResult};
use crate::string_pool::{StrId, StringPool};
use classfile::constant_pool::{ConstantPool, CpEntry};

/// A symbolic member reference: declaring class, member name, descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef {
    pub class_name: StrId,
    pub name: StrId,
    pub descriptor: StrId,
}

/// One entry of the runtime constant pool. All names have been chased down
/// to interned strings so resolution opcodes never walk Utf8 indirections,
/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-5.html#jvms-5.1
#[derive(Debug, Clone, PartialEq)]
pub enum RtCpEntry {
    /// Slot 0 and the shadow slot after a Long/Double.
    Unused,
    Utf8(StrId),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    ClassRef(StrId),
    StringRef(StrId),
    FieldRef(MemberRef),
    MethodRef(MemberRef),
    InterfaceMethodRef(MemberRef),
    NameAndType { name: StrId, descriptor: StrId },
    MethodHandle { reference_kind: u8, member: MemberRef },
    MethodType(StrId),
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name: StrId,
        descriptor: StrId,
    },
}

#[derive(Debug, Default)]
pub struct RuntimeConstantPool {
    entries: Vec<RtCpEntry>,
}

impl RuntimeConstantPool {
    /// Resolves a parsed constant pool into runtime form, interning every
    /// name through the string pool.
    pub fn resolve(cp: &ConstantPool, pool: &mut StringPool) -> VmExecResult<RuntimeConstantPool> {
        let mut entries = Vec::with_capacity(cp.count());
        for index in 0..cp.count() as u16 {
            let entry = match cp.get(index) {
                Err(_) => RtCpEntry::Unused,
                Ok(raw) => Self::resolve_entry(cp, raw, pool)?,
            };
            entries.push(entry);
        }
        Ok(RuntimeConstantPool { entries })
    }

    fn resolve_entry(
        cp: &ConstantPool,
        raw: &CpEntry,
        pool: &mut StringPool,
    ) -> VmExecResult<RtCpEntry> {
        let entry = match raw {
            CpEntry::Unused => RtCpEntry::Unused,
            CpEntry::Utf8(text) => RtCpEntry::Utf8(pool.intern(text)),
            CpEntry::Integer(v) => RtCpEntry::Integer(*v),
            CpEntry::Float(v) => RtCpEntry::Float(*v),
            CpEntry::Long(v) => RtCpEntry::Long(*v),
            CpEntry::Double(v) => RtCpEntry::Double(*v),
            CpEntry::Class { name_index } => RtCpEntry::ClassRef(pool.intern(cp.utf8(*name_index)?)),
            CpEntry::String { utf8_index } => RtCpEntry::StringRef(pool.intern(cp.utf8(*utf8_index)?)),
            CpEntry::FieldRef {
                class_index,
                name_and_type_index,
            } => RtCpEntry::FieldRef(Self::member(cp, *class_index, *name_and_type_index, pool)?),
            CpEntry::MethodRef {
                class_index,
                name_and_type_index,
            } => RtCpEntry::MethodRef(Self::member(cp, *class_index, *name_and_type_index, pool)?),
            CpEntry::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => RtCpEntry::InterfaceMethodRef(Self::member(
                cp,
                *class_index,
                *name_and_type_index,
                pool,
            )?),
            CpEntry::NameAndType {
                name_index,
                descriptor_index,
            } => RtCpEntry::NameAndType {
                name: pool.intern(cp.utf8(*name_index)?),
                descriptor: pool.intern(cp.utf8(*descriptor_index)?),
            },
            CpEntry::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let (class_index, name_and_type_index) = match cp.get(*reference_index)? {
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
                    } => (*class_index, *name_and_type_index),
                    _ => {
                        return Err(VmError::ClassFormatError(
                            "method handle referent is not a member reference".to_string(),
                        ))
                    }
                };
                RtCpEntry::MethodHandle {
                    reference_kind: *reference_kind,
                    member: Self::member(cp, class_index, name_and_type_index, pool)?,
                }
            }
            CpEntry::MethodType { descriptor_index } => {
                RtCpEntry::MethodType(pool.intern(cp.utf8(*descriptor_index)?))
            }
            CpEntry::InvokeDynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (name, descriptor) = cp.name_and_type(*name_and_type_index)?;
                RtCpEntry::InvokeDynamic {
                    bootstrap_method_attr_index: *bootstrap_method_attr_index,
                    name: pool.intern(name),
                    descriptor: pool.intern(descriptor),
                }
            }
        };
        Ok(entry)
    }

    fn member(
        cp: &ConstantPool,
        class_index: u16,
        name_and_type_index: u16,
        pool: &mut StringPool,
    ) -> VmExecResult<MemberRef> {
        let class_name = cp.class_name(class_index)?;
        let (name, descriptor) = cp.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class_name: pool.intern(class_name),
            name: pool.intern(name),
            descriptor: pool.intern(descriptor),
        })
    }

    pub fn get(&self, index: u16) -> VmExecResult<&RtCpEntry> {
        match self.entries.get(index as usize) {
            Some(RtCpEntry::Unused) | None => Err(VmError::ExecuteCodeError(format!(
                "invalid constant pool index {index}"
            ))),
            Some(entry) => Ok(entry),
        }
    }

    pub fn class_ref(&self, index: u16) -> VmExecResult<StrId> {
        match self.get(index)? {
            RtCpEntry::ClassRef(name) => Ok(*name),
            _ => Err(VmError::ExecuteCodeError(format!(
                "constant pool entry {index} should be a Class reference"
            ))),
        }
    }

    pub fn field_ref(&self, index: u16) -> VmExecResult<MemberRef> {
        match self.get(index)? {
            RtCpEntry::FieldRef(member) => Ok(*member),
            _ => Err(VmError::ExecuteCodeError(format!(
                "constant pool entry {index} should be a Field reference"
            ))),
        }
    }

    /// invokevirtual and friends accept both Method and InterfaceMethod refs.
    pub fn method_ref(&self, index: u16) -> VmExecResult<MemberRef> {
        match self.get(index)? {
            RtCpEntry::MethodRef(member) | RtCpEntry::InterfaceMethodRef(member) => Ok(*member),
            _ => Err(VmError::ExecuteCodeError(format!(
                "constant pool entry {index} should be a Method reference"
            ))),
        }
    }

    /// Iterates the class names this pool references; the loader uses this
    /// to pull in dependencies.
    pub fn referenced_classes(&self) -> impl Iterator<Item = StrId> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            RtCpEntry::ClassRef(name) => Some(*name),
            _ => None,
        })
    }
}
