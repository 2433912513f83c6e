use crate::jtypes;
use crate::jvm_error::VmExecResult;
use crate::object::Field;
use crate::runtime_constant_pool::RuntimeConstantPool;
use crate::string_pool::{StrId, StringPool};
use classfile::attribute_info::{AttributeInfo, CodeAttribute, ConstantValue};
use classfile::class_file::{ClassAccessFlags, ClassFile};
use classfile::field_info::{FieldAccessFlags, FieldInfo};
use classfile::method_info::{MethodAccessFlags, MethodInfo};
use indexmap::IndexMap;
use std::rc::Rc;

/// Lifecycle of a loaded class. Transitions only move forward, or laterally
/// to Errored; Initialized is reached exactly once, by running <clinit>.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    Parsed,
    Linked,
    Prepared,
    Initialized,
    Errored,
}

impl ClassStatus {
    pub fn rank(self) -> u8 {
        match self {
            ClassStatus::Parsed => 0,
            ClassStatus::Linked => 1,
            ClassStatus::Prepared => 2,
            ClassStatus::Initialized => 3,
            ClassStatus::Errored => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ClassStatus::Parsed => "Parsed",
            ClassStatus::Linked => "Linked",
            ClassStatus::Prepared => "Prepared",
            ClassStatus::Initialized => "Initialized",
            ClassStatus::Errored => "Errored",
        }
    }
}

/// Loader identity. The two concrete loaders differ by identity only; both
/// run the same loading algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Bootstrap,
    Application(StrId),
}

/// Where the class bytes came from, for -verbose:class tracing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassOrigin {
    Directory(String),
    Jar(String),
    /// Synthesized base class whose methods are host-implemented.
    BuiltIn,
}

/// A declared field, static or instance.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub access_flags: FieldAccessFlags,
    pub name: StrId,
    pub descriptor: StrId,
    /// Runtime field tag: the descriptor, `X`-prefixed when static.
    pub tag: String,
    pub constant_value: Option<ConstantValue>,
}

impl FieldDef {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    fn resolve(info: &FieldInfo, cf: &ClassFile, pool: &mut StringPool) -> VmExecResult<FieldDef> {
        let mut constant_value = None;
        for attr in &info.attributes {
            if attr.name == "ConstantValue" {
                constant_value = Some(ConstantValue::decode(&attr.info, &cf.constant_pool)?);
            }
        }
        let tag = if info.is_static() {
            format!("{}{}", jtypes::STATIC, info.descriptor)
        } else {
            info.descriptor.clone()
        };
        Ok(FieldDef {
            access_flags: info.access_flags,
            name: pool.intern(&info.name),
            descriptor: pool.intern(&info.descriptor),
            tag,
            constant_value,
        })
    }
}

/// A method: bytecode-backed when it has a Code attribute, native-backed
/// otherwise (the body is then found through the native-method table).
#[derive(Debug, Clone)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: StrId,
    pub descriptor: StrId,
    /// Operand-stack slots the declared parameters occupy (receiver not
    /// included; longs and doubles count twice).
    pub param_slots: usize,
    pub return_type: String,
    pub code: Option<Rc<CodeAttribute>>,
}

impl Method {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::NATIVE) || self.code.is_none()
    }

    pub fn returns_value(&self) -> bool {
        self.return_type != jtypes::VOID
    }

    fn resolve(info: &MethodInfo, cf: &ClassFile, pool: &mut StringPool) -> VmExecResult<Method> {
        let mut code = None;
        for attr in &info.attributes {
            if attr.name == "Code" {
                code = Some(Rc::new(CodeAttribute::decode(&attr.info, &cf.constant_pool)?));
            }
        }
        let descriptor = jtypes::parse_method_descriptor(&info.descriptor)?;
        Ok(Method {
            access_flags: info.access_flags,
            name: pool.intern(&info.name),
            descriptor: pool.intern(&info.descriptor),
            param_slots: descriptor.param_slots(),
            return_type: descriptor.return_type,
            code,
        })
    }
}

/// A parsed-and-linked class as the method area owns it.
#[derive(Debug)]
pub struct Class {
    pub name: StrId,
    /// None only for java/lang/Object.
    pub super_name: Option<StrId>,
    pub interfaces: Vec<StrId>,
    pub access_flags: ClassAccessFlags,
    pub constant_pool: RuntimeConstantPool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<Method>,
    /// Static field storage, populated at preparation.
    pub statics: IndexMap<StrId, Field>,
    pub attributes: Vec<AttributeInfo>,
    pub source_file: Option<String>,
    pub loader: LoaderKind,
    pub origin: ClassOrigin,
    pub status: ClassStatus,
}

impl Class {
    /// Converts a decoded class file into its runtime shape, interning all
    /// names and resolving the constant pool.
    pub fn resolve(
        cf: ClassFile,
        loader: LoaderKind,
        origin: ClassOrigin,
        pool: &mut StringPool,
    ) -> VmExecResult<Class> {
        let constant_pool = RuntimeConstantPool::resolve(&cf.constant_pool, pool)?;
        let fields = cf
            .fields
            .iter()
            .map(|f| FieldDef::resolve(f, &cf, pool))
            .collect::<VmExecResult<Vec<_>>>()?;
        let methods = cf
            .methods
            .iter()
            .map(|m| Method::resolve(m, &cf, pool))
            .collect::<VmExecResult<Vec<_>>>()?;
        let source_file = cf.attributes.iter().find_map(|attr| {
            if attr.name == "SourceFile" && attr.info.len() == 2 {
                let index = u16::from_be_bytes([attr.info[0], attr.info[1]]);
                cf.constant_pool.utf8(index).ok().map(str::to_string)
            } else {
                None
            }
        });
        Ok(Class {
            name: pool.intern(&cf.this_class_name),
            super_name: cf.super_class_name.as_deref().map(|n| pool.intern(n)),
            interfaces: cf.interface_names.iter().map(|n| pool.intern(n)).collect(),
            access_flags: cf.access_flags,
            constant_pool,
            fields,
            methods,
            statics: IndexMap::new(),
            attributes: cf.attributes,
            source_file,
            loader,
            origin,
            status: ClassStatus::Parsed,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn find_method(&self, name: StrId, descriptor: StrId) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_static())
    }

    pub fn static_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_static())
    }
}
