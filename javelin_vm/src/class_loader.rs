use crate::frame::CallStack;
use crate::interpreter;
use crate::java_exception::{InvokeResult, MethodCallError, EXCEPTION_IN_INITIALIZER};
use crate::jtypes;
use crate::jvm_error::{VmError, VmExecResult};
use crate::loaded_class::{Class, ClassOrigin, ClassStatus, FieldDef, LoaderKind, Method};
use crate::method_area::ClassId;
use crate::object::{default_value, Field};
use crate::string_pool::StrId;
use crate::value::Value;
use crate::vm::VirtualMachine;
use classfile::attribute_info::ConstantValue;
use classfile::field_info::FieldAccessFlags;
use classfile::method_info::MethodAccessFlags;
use classfile::reader::read_class;
use indexmap::IndexMap;
use log::{debug, info};

/// Classes the interpreter must always be able to find. They are loaded at
/// startup, from the class path when present, otherwise synthesized as
/// built-in class records whose methods are host-implemented.
pub const BASE_CLASSES: &[&str] = &[
    "java/lang/Object",
    "java/lang/String",
    "java/lang/Boolean",
    "java/lang/Byte",
    "java/lang/Character",
    "java/lang/Short",
    "java/lang/Integer",
    "java/lang/Long",
    "java/lang/Float",
    "java/lang/Double",
    "java/lang/Throwable",
    "java/lang/Exception",
    "java/lang/RuntimeException",
    "java/lang/Error",
    "java/lang/ArithmeticException",
    "java/lang/NullPointerException",
    "java/lang/IndexOutOfBoundsException",
    "java/lang/ArrayIndexOutOfBoundsException",
    "java/lang/NegativeArraySizeException",
    "java/lang/ClassCastException",
    "java/lang/UnsupportedOperationException",
    "java/lang/ExceptionInInitializerError",
    "java/lang/StackTraceElement",
    "java/lang/System",
    "java/io/PrintStream",
];

impl VirtualMachine {
    /// The core load algorithm: consult the method area, locate bytes on
    /// the search path, parse, register as Parsed, recursively load every
    /// class the constant pool references, then advance to Linked.
    pub fn load_class(&mut self, name: &str) -> VmExecResult<ClassId> {
        let name_id = self.intern(name);
        if let Some(id) = self.method_area.fetch(name_id) {
            return Ok(id);
        }

        // Array classes have no binary representation; loading one means
        // loading its element class. The array value itself answers type
        // tests, so the handle we hand back is java/lang/Object's.
        if let Some(element) = name.strip_prefix('[') {
            let element = element.trim_start_matches('[');
            if let Some(class_name) = element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
                let class_name = class_name.to_string();
                self.load_class(&class_name)?;
            }
            return self.load_class("java/lang/Object");
        }

        if let Some((bytes, origin)) = self.finder.find_class(name)? {
            return self.register_parsed_class(name, &bytes, origin);
        }
        if let Some(id) = self.synthesize_builtin(name)? {
            info!("[class] built-in {name}");
            return Ok(id);
        }
        Err(VmError::NoClassDefFound(name.to_string()))
    }

    pub fn load_class_id(&mut self, name: StrId) -> VmExecResult<ClassId> {
        if let Some(id) = self.method_area.fetch(name) {
            return Ok(id);
        }
        let name = self.text(name).to_string();
        self.load_class(&name)
    }

    fn register_parsed_class(
        &mut self,
        name: &str,
        bytes: &[u8],
        origin: String,
    ) -> VmExecResult<ClassId> {
        let class_file = read_class(bytes, self.max_class_major)?;
        if class_file.this_class_name != name {
            return Err(VmError::LinkageError(format!(
                "{name} resolved to a class file declaring {}",
                class_file.this_class_name
            )));
        }
        let origin_kind = if origin.ends_with(".jar") {
            ClassOrigin::Jar(origin.clone())
        } else {
            ClassOrigin::Directory(origin.clone())
        };
        let class = Class::resolve(
            class_file,
            LoaderKind::Bootstrap,
            origin_kind,
            &mut self.string_pool,
        )?;
        let id = self.method_area.insert(class)?;
        info!("[class] loaded {name} from {origin}");

        // Pull in everything this class refers to. A referenced class
        // already present in the method area, at any status, counts as
        // satisfied; that is what breaks reference cycles.
        let referenced: Vec<StrId> = self
            .method_area
            .get(id)
            .constant_pool
            .referenced_classes()
            .collect();
        for class_name in referenced {
            let class_name = self.text(class_name).to_string();
            if class_name == name {
                continue;
            }
            if let Err(err) = self.load_class(&class_name) {
                self.method_area.transition(id, ClassStatus::Errored)?;
                return Err(err);
            }
        }
        self.method_area.transition(id, ClassStatus::Linked)?;
        Ok(id)
    }

    /// Loads the well-known startup list and wires java/lang/System.out to
    /// a PrintStream bound to the configured output stream.
    pub fn load_base_classes(&mut self) -> VmExecResult<()> {
        for name in BASE_CLASSES {
            self.load_class(name)?;
        }
        let system_id = self.load_class("java/lang/System")?;
        match self.ensure_initialized(system_id) {
            Ok(_) => {}
            Err(MethodCallError::Internal(err)) => return Err(err),
            Err(MethodCallError::JavaException(_)) => {
                return Err(VmError::ExecuteCodeError(
                    "java/lang/System failed to initialize".to_string(),
                ))
            }
        }
        let print_stream = self.new_object_by_name("java/io/PrintStream")?;
        let out_key = self.intern("out");
        self.method_area.get_mut(system_id).statics.insert(
            out_key,
            Field::new("XLjava/io/PrintStream;", print_stream),
        );
        Ok(())
    }

    /// First active use of a class: prepare its statics, run <clinit> in a
    /// fresh frame stack, and advance to Initialized. A <clinit> failure
    /// moves the class to Errored and surfaces
    /// ExceptionInInitializerError. Reentrant calls during initialization
    /// see Prepared and return immediately.
    pub fn ensure_initialized(&mut self, id: ClassId) -> Result<ClassId, MethodCallError> {
        match self.method_area.get(id).status {
            ClassStatus::Initialized | ClassStatus::Prepared => return Ok(id),
            ClassStatus::Errored => {
                let name = self.text(self.method_area.get(id).name).to_string();
                return Err(VmError::NoClassDefFound(name).into());
            }
            ClassStatus::Parsed | ClassStatus::Linked => {}
        }

        // superclass first
        if let Some(super_name) = self.method_area.get(id).super_name {
            let super_id = self.load_class_id(super_name).map_err(MethodCallError::from)?;
            self.ensure_initialized(super_id)?;
        }

        self.prepare_statics(id)?;

        let clinit_name = self.intern("<clinit>");
        let clinit_descriptor = self.intern("()V");
        let clinit = self
            .method_area
            .get(id)
            .find_method(clinit_name, clinit_descriptor)
            .cloned();
        if let Some(method) = clinit {
            debug!(
                "running <clinit> of {}",
                self.text(self.method_area.get(id).name)
            );
            if let Err(err) = self.call_on_fresh_stack(id, &method, Vec::new()) {
                self.method_area
                    .transition(id, ClassStatus::Errored)
                    .map_err(MethodCallError::from)?;
                return Err(match err {
                    MethodCallError::JavaException(_) => {
                        let class_name = self.text(self.method_area.get(id).name).to_string();
                        let stack = CallStack::new();
                        self.make_throwable(
                            &stack,
                            EXCEPTION_IN_INITIALIZER,
                            &format!("static initializer of {class_name} failed"),
                        )
                    }
                    internal => internal,
                });
            }
        }
        self.method_area
            .transition(id, ClassStatus::Initialized)
            .map_err(MethodCallError::from)?;
        Ok(id)
    }

    /// Default-initializes every declared static field, honoring
    /// ConstantValue attributes.
    fn prepare_statics(&mut self, id: ClassId) -> Result<(), MethodCallError> {
        self.method_area
            .transition(id, ClassStatus::Prepared)
            .map_err(MethodCallError::from)?;
        let defs: Vec<FieldDef> = self
            .method_area
            .get(id)
            .static_fields()
            .cloned()
            .collect();
        let mut statics = IndexMap::new();
        for def in defs {
            let value = match &def.constant_value {
                Some(ConstantValue::Int(v)) => Value::Int(*v as i64),
                Some(ConstantValue::Float(v)) => Value::Float(*v as f64),
                Some(ConstantValue::Long(v)) => Value::Long(*v),
                Some(ConstantValue::Double(v)) => Value::Float(*v),
                Some(ConstantValue::String(text)) => {
                    let text_id = self.intern(text);
                    self.string_literal(text_id)?
                }
                None => default_value(&def.tag),
            };
            statics.insert(def.name, Field::new(&def.tag, value));
        }
        self.method_area.get_mut(id).statics = statics;
        Ok(())
    }

    /// Runs a method to completion on its own frame stack. Used for
    /// <clinit> and for the program entry point.
    pub fn call_on_fresh_stack(
        &mut self,
        class_id: ClassId,
        method: &Method,
        args: Vec<Value>,
    ) -> InvokeResult {
        let mut stack = CallStack::new();
        let frame = self.build_frame(class_id, method, args)?;
        stack.push(frame).map_err(MethodCallError::from)?;
        interpreter::run(self, &mut stack)
    }

    /// Loads and initializes the starting class, builds the String[] of
    /// application arguments, and invokes `main`.
    pub fn run_main(&mut self, class_name: &str, app_args: &[String]) -> InvokeResult {
        let class_id = self.load_class(class_name).map_err(MethodCallError::from)?;
        self.ensure_initialized(class_id)?;

        let main_name = self.intern("main");
        let main_descriptor = self.intern("([Ljava/lang/String;)V");
        let (declaring, method) = self
            .resolve_method(class_id, main_name, main_descriptor)
            .ok_or_else(|| {
                VmError::MethodNotFound("main".to_string(), "([Ljava/lang/String;)V".to_string())
            })?;

        let args_array = self.new_reference_array("java/lang/String", app_args.len());
        if let Value::Array(array) = &args_array {
            for (index, arg) in app_args.iter().enumerate() {
                let element = self.new_string(arg)?;
                array.borrow_mut().elements[index] = element;
            }
        }
        self.call_on_fresh_stack(declaring, &method, vec![args_array])
    }

    // ------------------------------------------------------------------
    // Built-in base classes
    // ------------------------------------------------------------------

    /// Synthesizes a built-in class record when `name` is on the
    /// well-known list. Field descriptors prefixed with `X` declare
    /// statics; methods are all native-backed.
    fn synthesize_builtin(&mut self, name: &str) -> VmExecResult<Option<ClassId>> {
        let object_methods: &[(&str, &str, bool)] = &[
            ("<init>", "()V", false),
            ("hashCode", "()I", false),
            ("toString", "()Ljava/lang/String;", false),
            ("getClass", "()Ljava/lang/Class;", false),
        ];
        let throwable_methods: &[(&str, &str, bool)] = &[
            ("<init>", "()V", false),
            ("<init>", "(Ljava/lang/String;)V", false),
            ("getMessage", "()Ljava/lang/String;", false),
        ];
        let id = match name {
            "java/lang/Object" => self.define_builtin(name, None, &[], object_methods)?,
            "java/lang/String" => self.define_builtin(
                name,
                Some("java/lang/Object"),
                &[("value", "[B")],
                &[
                    ("length", "()I", false),
                    ("concat", "(Ljava/lang/String;)Ljava/lang/String;", false),
                ],
            )?,
            "java/lang/Boolean" => self.wrapper_builtin(name, "Z")?,
            "java/lang/Byte" => self.wrapper_builtin(name, "B")?,
            "java/lang/Character" => self.wrapper_builtin(name, "C")?,
            "java/lang/Short" => self.wrapper_builtin(name, "S")?,
            "java/lang/Integer" => self.wrapper_builtin(name, "I")?,
            "java/lang/Long" => self.wrapper_builtin(name, "J")?,
            "java/lang/Float" => self.wrapper_builtin(name, "F")?,
            "java/lang/Double" => self.wrapper_builtin(name, "D")?,
            "java/lang/Throwable" => self.define_builtin(
                name,
                Some("java/lang/Object"),
                &[
                    ("detailMessage", "Ljava/lang/String;"),
                    ("stackTrace", "[Ljava/lang/StackTraceElement;"),
                ],
                throwable_methods,
            )?,
            "java/lang/Exception" => self.exception_builtin(name, "java/lang/Throwable")?,
            "java/lang/RuntimeException" => self.exception_builtin(name, "java/lang/Exception")?,
            "java/lang/Error" => self.exception_builtin(name, "java/lang/Throwable")?,
            "java/lang/ArithmeticException"
            | "java/lang/NullPointerException"
            | "java/lang/NegativeArraySizeException"
            | "java/lang/ClassCastException"
            | "java/lang/UnsupportedOperationException"
            | "java/lang/IllegalArgumentException"
            | "java/lang/IndexOutOfBoundsException" => {
                self.exception_builtin(name, "java/lang/RuntimeException")?
            }
            "java/lang/NumberFormatException" => {
                self.exception_builtin(name, "java/lang/IllegalArgumentException")?
            }
            "java/lang/ArrayIndexOutOfBoundsException" => {
                self.exception_builtin(name, "java/lang/IndexOutOfBoundsException")?
            }
            "java/lang/ExceptionInInitializerError" => {
                self.exception_builtin(name, "java/lang/Error")?
            }
            "java/lang/StackTraceElement" => self.define_builtin(
                name,
                Some("java/lang/Object"),
                &[
                    ("declaringClass", "Ljava/lang/String;"),
                    ("methodName", "Ljava/lang/String;"),
                    ("pc", "I"),
                ],
                &[],
            )?,
            "java/lang/System" => self.define_builtin(
                name,
                Some("java/lang/Object"),
                &[("out", "XLjava/io/PrintStream;")],
                &[(
                    "arraycopy",
                    "(Ljava/lang/Object;ILjava/lang/Object;II)V",
                    true,
                )],
            )?,
            "java/io/PrintStream" => self.define_builtin(
                name,
                Some("java/lang/Object"),
                &[],
                &[
                    ("println", "()V", false),
                    ("println", "(Ljava/lang/String;)V", false),
                    ("println", "(Ljava/lang/Object;)V", false),
                    ("println", "(C)V", false),
                    ("println", "(I)V", false),
                    ("println", "(Z)V", false),
                    ("println", "(J)V", false),
                    ("println", "(F)V", false),
                    ("println", "(D)V", false),
                    ("print", "(Ljava/lang/String;)V", false),
                    ("print", "(C)V", false),
                    ("print", "(I)V", false),
                    ("print", "(Z)V", false),
                    ("print", "(J)V", false),
                    ("print", "(F)V", false),
                    ("print", "(D)V", false),
                ],
            )?,
            _ => return Ok(None),
        };
        Ok(Some(id))
    }

    fn wrapper_builtin(&mut self, name: &str, tag: &str) -> VmExecResult<ClassId> {
        let value_descriptor = tag.to_string();
        let value_of = format!("({tag})L{name};");
        let methods: Vec<(String, String, bool)> = vec![
            ("valueOf".to_string(), value_of, true),
            ("<init>".to_string(), format!("({tag})V"), false),
        ];
        let method_refs: Vec<(&str, &str, bool)> = methods
            .iter()
            .map(|(n, d, s)| (n.as_str(), d.as_str(), *s))
            .collect();
        self.define_builtin(
            name,
            Some("java/lang/Object"),
            &[("value", value_descriptor.as_str())],
            &method_refs,
        )
    }

    fn exception_builtin(&mut self, name: &str, super_name: &str) -> VmExecResult<ClassId> {
        self.define_builtin(
            name,
            Some(super_name),
            &[],
            &[
                ("<init>", "()V", false),
                ("<init>", "(Ljava/lang/String;)V", false),
                ("getMessage", "()Ljava/lang/String;", false),
            ],
        )
    }

    fn define_builtin(
        &mut self,
        name: &str,
        super_name: Option<&str>,
        fields: &[(&str, &str)],
        methods: &[(&str, &str, bool)],
    ) -> VmExecResult<ClassId> {
        if let Some(super_name) = super_name {
            self.load_class(super_name)?;
        }
        let mut field_defs = Vec::with_capacity(fields.len());
        for (field_name, tag) in fields {
            let descriptor = jtypes::strip_static(tag);
            let access = if jtypes::is_static(tag) {
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC
            } else {
                FieldAccessFlags::PUBLIC
            };
            field_defs.push(FieldDef {
                access_flags: access,
                name: self.intern(field_name),
                descriptor: self.intern(descriptor),
                tag: tag.to_string(),
                constant_value: None,
            });
        }
        let mut method_defs = Vec::with_capacity(methods.len());
        for (method_name, descriptor, is_static) in methods {
            let parsed = jtypes::parse_method_descriptor(descriptor)?;
            let mut access = MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE;
            if *is_static {
                access |= MethodAccessFlags::STATIC;
            }
            method_defs.push(Method {
                access_flags: access,
                name: self.intern(method_name),
                descriptor: self.intern(descriptor),
                param_slots: parsed.param_slots(),
                return_type: parsed.return_type,
                code: None,
            });
        }
        let class = Class {
            name: self.intern(name),
            super_name: super_name.map(|n| self.intern(n)),
            interfaces: Vec::new(),
            access_flags: Default::default(),
            constant_pool: Default::default(),
            fields: field_defs,
            methods: method_defs,
            statics: IndexMap::new(),
            attributes: Vec::new(),
            source_file: None,
            loader: LoaderKind::Bootstrap,
            origin: ClassOrigin::BuiltIn,
            status: ClassStatus::Linked,
        };
        self.method_area.insert(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VirtualMachine;

    #[test]
    fn base_classes_synthesize_when_no_class_path_has_them() {
        let mut vm = VirtualMachine::new();
        vm.load_base_classes().unwrap();
        for name in BASE_CLASSES {
            let id = vm.load_class(name).unwrap();
            assert_eq!(ClassOrigin::BuiltIn, vm.method_area.get(id).origin);
        }
        let system = vm.load_class("java/lang/System").unwrap();
        assert_eq!(ClassStatus::Initialized, vm.method_area.get(system).status);
        let out = vm.intern("out");
        assert!(vm.method_area.get(system).statics.contains_key(&out));
    }

    #[test]
    fn missing_class_is_no_class_def_found() {
        let mut vm = VirtualMachine::new();
        assert!(matches!(
            vm.load_class("does/not/Exist"),
            Err(VmError::NoClassDefFound(_))
        ));
    }

    #[test]
    fn array_names_resolve_to_object_after_loading_the_element() {
        let mut vm = VirtualMachine::new();
        vm.load_base_classes().unwrap();
        let id = vm.load_class("[Ljava/lang/String;").unwrap();
        let object = vm.load_class("java/lang/Object").unwrap();
        assert_eq!(object, id);
    }

    #[test]
    fn exception_hierarchy_is_assignable_to_throwable() {
        let mut vm = VirtualMachine::new();
        vm.load_base_classes().unwrap();
        let bounds = vm
            .load_class("java/lang/ArrayIndexOutOfBoundsException")
            .unwrap();
        let throwable = vm.intern("java/lang/Throwable");
        let runtime = vm.intern("java/lang/RuntimeException");
        assert!(vm.is_assignable(bounds, throwable));
        assert!(vm.is_assignable(bounds, runtime));

        let string = vm.load_class("java/lang/String").unwrap();
        assert!(!vm.is_assignable(string, throwable));
    }

    /// Minimal but complete class bytes for
    /// `public class Probe extends java/lang/Object {}`.
    fn probe_class_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        let push_utf8 = |bytes: &mut Vec<u8>, text: &str| {
            bytes.push(1);
            bytes.extend_from_slice(&(text.len() as u16).to_be_bytes());
            bytes.extend_from_slice(text.as_bytes());
        };
        bytes.extend_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);
        bytes.extend_from_slice(&0u16.to_be_bytes()); // minor
        bytes.extend_from_slice(&55u16.to_be_bytes()); // major
        bytes.extend_from_slice(&5u16.to_be_bytes()); // cp count
        push_utf8(&mut bytes, "Probe"); // 1
        bytes.push(7); // 2: Class #1
        bytes.extend_from_slice(&1u16.to_be_bytes());
        push_utf8(&mut bytes, "java/lang/Object"); // 3
        bytes.push(7); // 4: Class #3
        bytes.extend_from_slice(&3u16.to_be_bytes());
        bytes.extend_from_slice(&0x0021u16.to_be_bytes()); // public super
        bytes.extend_from_slice(&2u16.to_be_bytes()); // this_class
        bytes.extend_from_slice(&4u16.to_be_bytes()); // super_class
        bytes.extend_from_slice(&0u16.to_be_bytes()); // interfaces
        bytes.extend_from_slice(&0u16.to_be_bytes()); // fields
        bytes.extend_from_slice(&0u16.to_be_bytes()); // methods
        bytes.extend_from_slice(&0u16.to_be_bytes()); // attributes
        bytes
    }

    #[test]
    fn loads_and_links_a_class_from_the_file_system() {
        let dir = std::env::temp_dir().join("javelin-loader-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Probe.class"), probe_class_bytes()).unwrap();

        let mut vm = VirtualMachine::new();
        vm.add_class_path(Box::new(
            crate::class_finder::FileSystemClassPath::new(dir.to_str().unwrap()).unwrap(),
        ));
        vm.load_base_classes().unwrap();

        let id = vm.load_class("Probe").unwrap();
        let class = vm.method_area.get(id);
        assert_eq!(ClassStatus::Linked, class.status);
        assert_eq!("Probe", vm.text(class.name));
        assert!(matches!(class.origin, ClassOrigin::Directory(_)));
        // its Object reference was pulled in during the CP walk
        assert!(vm.method_area.fetch(vm.string_pool.find("java/lang/Object").unwrap()).is_some());

        // same name again hands back the same handle
        assert_eq!(id, vm.load_class("Probe").unwrap());
    }
}
