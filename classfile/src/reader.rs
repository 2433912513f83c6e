use crate::attribute_info::read_attribute_table;
use crate::byte_buffer::ByteBuffer;
use crate::class_file::{ClassAccessFlags, ClassFile};
use crate::class_file_error::{ClassFileError, Result};
use crate::class_file_version::ClassFileVersion;
use crate::constant_pool::{ConstantPool, CpEntry};
use crate::field_info::{FieldAccessFlags, FieldInfo};
use crate::method_info::{MethodAccessFlags, MethodInfo};

/// Decodes one class file from a byte buffer, in the strict stream order of
/// JVMS chapter 4:
///
/// ```c
/// ClassFile {
///     u4             magic;
///     u2             minor_version;
///     u2             major_version;
///     u2             constant_pool_count;
///     cp_info        constant_pool[constant_pool_count-1];
///     u2             access_flags;
///     u2             this_class;
///     u2             super_class;
///     u2             interfaces_count;
///     u2             interfaces[interfaces_count];
///     u2             fields_count;
///     field_info     fields[fields_count];
///     u2             methods_count;
///     method_info    methods[methods_count];
///     u2             attributes_count;
///     attribute_info attributes[attributes_count];
/// }
/// ```
///
/// `max_major` is the highest class-file major version the host accepts.
/// The parser owns no global state; a failure leaves nothing behind.
pub fn read_class(buf: &[u8], max_major: u16) -> Result<ClassFile> {
    let mut buffer = ByteBuffer::new(buf);
    check_magic_number(&mut buffer)?;
    let version = read_version(&mut buffer, max_major)?;
    let constant_pool = read_constant_pool(&mut buffer)?;
    constant_pool.validate()?;

    let access_flags = read_access_flags(&mut buffer)?;
    let this_class = buffer.read_u16()?;
    let this_class_name = constant_pool.class_name(this_class)?.to_string();

    let super_class = buffer.read_u16()?;
    let super_class_name = if super_class == 0 {
        if this_class_name != "java/lang/Object" {
            return Err(ClassFileError::InvalidClassData(format!(
                "class {this_class_name} has no superclass"
            )));
        }
        None
    } else {
        Some(constant_pool.class_name(super_class)?.to_string())
    };

    let interface_names = read_interfaces(&mut buffer, &constant_pool)?;
    let fields = read_fields(&mut buffer, &constant_pool)?;
    let methods = read_methods(&mut buffer, &constant_pool)?;
    let attributes = read_attribute_table(&mut buffer, &constant_pool)?;

    if buffer.has_more_data() {
        return Err(ClassFileError::InvalidClassData(format!(
            "trailing bytes after class structure at offset {}",
            buffer.position
        )));
    }
    Ok(ClassFile {
        version,
        constant_pool,
        access_flags,
        this_class_name,
        super_class_name,
        interface_names,
        fields,
        methods,
        attributes,
    })
}

fn check_magic_number(buffer: &mut ByteBuffer) -> Result<()> {
    match buffer.read_u32() {
        Ok(0xCAFEBABE) => Ok(()),
        Ok(n) => Err(ClassFileError::InvalidMagicNumber(n)),
        Err(err) => Err(err),
    }
}

fn read_version(buffer: &mut ByteBuffer, max_major: u16) -> Result<ClassFileVersion> {
    let minor = buffer.read_u16()?;
    let major = buffer.read_u16()?;
    ClassFileVersion::new(major, minor, max_major)
}

fn read_constant_pool(buffer: &mut ByteBuffer) -> Result<ConstantPool> {
    let count = buffer.read_u16()? as usize;
    if count < 2 {
        return Err(ClassFileError::InvalidClassData(format!(
            "constant pool count {count} is too small"
        )));
    }
    let mut constant_pool = ConstantPool::new();
    // count includes the unused slot 0; wide entries claim their own shadow
    // slot inside add()
    while constant_pool.count() < count {
        constant_pool.add(CpEntry::read_from(buffer)?);
    }
    Ok(constant_pool)
}

fn read_access_flags(buffer: &mut ByteBuffer) -> Result<ClassAccessFlags> {
    let bits = buffer.read_u16()?;
    ClassAccessFlags::from_bits(bits)
        .ok_or_else(|| ClassFileError::InvalidClassData(format!("invalid class flags: {bits:#06x}")))
}

fn read_interfaces(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<Vec<String>> {
    let count = buffer.read_u16()? as usize;
    (0..count)
        .map(|_| {
            let index = buffer.read_u16()?;
            cp.class_name(index).map(str::to_string)
        })
        .collect()
}

fn read_fields(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<Vec<FieldInfo>> {
    let count = buffer.read_u16()? as usize;
    (0..count).map(|_| read_one_field(buffer, cp)).collect()
}

/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.5
fn read_one_field(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<FieldInfo> {
    let bits = buffer.read_u16()?;
    let access_flags = FieldAccessFlags::from_bits(bits)
        .ok_or_else(|| ClassFileError::InvalidClassData(format!("invalid field flags: {bits:#06x}")))?;
    let name = cp.utf8(buffer.read_u16()?)?.to_string();
    let descriptor = cp.utf8(buffer.read_u16()?)?.to_string();
    let attributes = read_attribute_table(buffer, cp)?;
    Ok(FieldInfo {
        access_flags,
        name,
        descriptor,
        attributes,
    })
}

fn read_methods(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<Vec<MethodInfo>> {
    let count = buffer.read_u16()? as usize;
    (0..count).map(|_| read_one_method(buffer, cp)).collect()
}

/// https://docs.oracle.com/javase/specs/jvms/se21/html/jvms-4.html#jvms-4.6
fn read_one_method(buffer: &mut ByteBuffer, cp: &ConstantPool) -> Result<MethodInfo> {
    let bits = buffer.read_u16()?;
    let access_flags = MethodAccessFlags::from_bits(bits)
        .ok_or_else(|| ClassFileError::InvalidClassData(format!("invalid method flags: {bits:#06x}")))?;
    let name = cp.utf8(buffer.read_u16()?)?.to_string();
    let descriptor = cp.utf8(buffer.read_u16()?)?.to_string();
    let attributes = read_attribute_table(buffer, cp)?;
    Ok(MethodInfo {
        access_flags,
        name,
        descriptor,
        attributes,
    })
}
