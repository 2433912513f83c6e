use classfile::attribute_info::CodeAttribute;
use classfile::constant_pool::{ConstantPool, CpEntry};
use classfile::field_info::FieldAccessFlags;
use classfile::method_info::MethodAccessFlags;
use indexmap::IndexMap;
use javelin_vm::java_exception::MethodCallError;
use javelin_vm::jtypes;
use javelin_vm::loaded_class::{Class, ClassOrigin, ClassStatus, FieldDef, LoaderKind, Method};
use javelin_vm::method_area::ClassId;
use javelin_vm::opcodes::*;
use javelin_vm::runtime_constant_pool::RuntimeConstantPool;
use javelin_vm::value::Value;
use javelin_vm::vm::VirtualMachine;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// An output sink the test can read back after the VM wrote to it.
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

fn fresh_vm() -> (VirtualMachine, SharedBuffer) {
    let mut vm = VirtualMachine::new();
    let buffer = SharedBuffer::default();
    vm.out = Box::new(buffer.clone());
    vm.load_base_classes().unwrap();
    (vm, buffer)
}

struct MethodSpec {
    name: &'static str,
    descriptor: &'static str,
    is_static: bool,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
}

/// Registers a class assembled in memory: a resolved constant pool plus
/// bytecode-backed methods.
fn install_class(
    vm: &mut VirtualMachine,
    name: &str,
    cp: ConstantPool,
    fields: Vec<(&str, &str)>,
    methods: Vec<MethodSpec>,
) -> ClassId {
    let constant_pool = RuntimeConstantPool::resolve(&cp, &mut vm.string_pool).unwrap();
    let field_defs = fields
        .into_iter()
        .map(|(field_name, tag)| FieldDef {
            access_flags: if jtypes::is_static(tag) {
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC
            } else {
                FieldAccessFlags::PUBLIC
            },
            name: vm.string_pool.intern(field_name),
            descriptor: vm.string_pool.intern(jtypes::strip_static(tag)),
            tag: tag.to_string(),
            constant_value: None,
        })
        .collect();
    let method_defs = methods
        .into_iter()
        .map(|spec| {
            let parsed = jtypes::parse_method_descriptor(spec.descriptor).unwrap();
            let mut access = MethodAccessFlags::PUBLIC;
            if spec.is_static {
                access |= MethodAccessFlags::STATIC;
            }
            Method {
                access_flags: access,
                name: vm.string_pool.intern(spec.name),
                descriptor: vm.string_pool.intern(spec.descriptor),
                param_slots: parsed.param_slots(),
                return_type: parsed.return_type,
                code: Some(Rc::new(CodeAttribute {
                    max_stack: spec.max_stack,
                    max_locals: spec.max_locals,
                    code: spec.code,
                    ..CodeAttribute::default()
                })),
            }
        })
        .collect();
    let class = Class {
        name: vm.string_pool.intern(name),
        super_name: Some(vm.string_pool.intern("java/lang/Object")),
        interfaces: Vec::new(),
        access_flags: Default::default(),
        constant_pool,
        fields: field_defs,
        methods: method_defs,
        statics: IndexMap::new(),
        attributes: Vec::new(),
        source_file: None,
        loader: LoaderKind::Bootstrap,
        origin: ClassOrigin::BuiltIn,
        status: ClassStatus::Linked,
    };
    vm.method_area.insert(class).unwrap()
}

/// The constant pool for a class whose main calls
/// System.out.println("Hello").
fn hello_constant_pool() -> ConstantPool {
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("java/lang/System".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("out".to_string())); // 3
    cp.add(CpEntry::Utf8("Ljava/io/PrintStream;".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::FieldRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    cp.add(CpEntry::Utf8("Hello".to_string())); // 7
    cp.add(CpEntry::String { utf8_index: 7 }); // 8
    cp.add(CpEntry::Utf8("java/io/PrintStream".to_string())); // 9
    cp.add(CpEntry::Class { name_index: 9 }); // 10
    cp.add(CpEntry::Utf8("println".to_string())); // 11
    cp.add(CpEntry::Utf8("(Ljava/lang/String;)V".to_string())); // 12
    cp.add(CpEntry::NameAndType {
        name_index: 11,
        descriptor_index: 12,
    }); // 13
    cp.add(CpEntry::MethodRef {
        class_index: 10,
        name_and_type_index: 13,
    }); // 14
    cp
}

#[test]
fn hello_world_prints_through_the_configured_stream() {
    let (mut vm, buffer) = fresh_vm();
    install_class(
        &mut vm,
        "Hello",
        hello_constant_pool(),
        Vec::new(),
        vec![MethodSpec {
            name: "main",
            descriptor: "([Ljava/lang/String;)V",
            is_static: true,
            max_stack: 2,
            max_locals: 1,
            code: vec![
                GETSTATIC, 0, 6, // System.out
                LDC, 8, // "Hello"
                INVOKEVIRTUAL, 0, 14, // println(String)
                RETURN,
            ],
        }],
    );
    let result = vm.run_main("Hello", &[]);
    assert!(result.is_ok(), "{result:?}");
    assert_eq!("Hello\n", buffer.contents());
}

#[test]
fn string_literals_intern_to_one_object() {
    let (mut vm, _buffer) = fresh_vm();
    // two ldc of the same literal push the identical reference
    install_class(
        &mut vm,
        "Interned",
        hello_constant_pool(),
        Vec::new(),
        vec![MethodSpec {
            name: "same",
            descriptor: "()I",
            is_static: true,
            max_stack: 2,
            max_locals: 0,
            code: vec![
                LDC, 8, LDC, 8, IF_ACMPEQ, 0, 5, ICONST_0, IRETURN, ICONST_1, IRETURN,
            ],
        }],
    );
    let class_id = vm.load_class("Interned").unwrap();
    let name = vm.string_pool.intern("same");
    let descriptor = vm.string_pool.intern("()I");
    let (declaring, method) = vm.resolve_method(class_id, name, descriptor).unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, Vec::new())
        .unwrap();
    assert_eq!(Some(Value::Int(1)), result);
}

#[test]
fn static_initializer_runs_once_on_first_use() {
    let (mut vm, _buffer) = fresh_vm();
    // class Counter { static int seed; static { seed = 42; } }
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("Counter".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("seed".to_string())); // 3
    cp.add(CpEntry::Utf8("I".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::FieldRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    let class_id = install_class(
        &mut vm,
        "Counter",
        cp,
        vec![("seed", "XI")],
        vec![
            MethodSpec {
                name: "<clinit>",
                descriptor: "()V",
                is_static: true,
                max_stack: 1,
                max_locals: 0,
                code: vec![BIPUSH, 42, PUTSTATIC, 0, 6, RETURN],
            },
            MethodSpec {
                name: "seed",
                descriptor: "()I",
                is_static: true,
                max_stack: 1,
                max_locals: 0,
                code: vec![GETSTATIC, 0, 6, IRETURN],
            },
        ],
    );

    assert_eq!(ClassStatus::Linked, vm.method_area.get(class_id).status);
    vm.ensure_initialized(class_id).unwrap();
    assert_eq!(ClassStatus::Initialized, vm.method_area.get(class_id).status);

    let name = vm.string_pool.intern("seed");
    let descriptor = vm.string_pool.intern("()I");
    let (declaring, method) = vm.resolve_method(class_id, name, descriptor).unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, Vec::new())
        .unwrap();
    assert_eq!(Some(Value::Int(42)), result);

    // already initialized: a second request is a no-op
    vm.ensure_initialized(class_id).unwrap();
    assert_eq!(ClassStatus::Initialized, vm.method_area.get(class_id).status);
}

#[test]
fn invokestatic_pushes_a_frame_and_returns_through_it() {
    let (mut vm, _buffer) = fresh_vm();
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("Adder".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("add".to_string())); // 3
    cp.add(CpEntry::Utf8("(II)I".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::MethodRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    let class_id = install_class(
        &mut vm,
        "Adder",
        cp,
        Vec::new(),
        vec![
            MethodSpec {
                name: "add",
                descriptor: "(II)I",
                is_static: true,
                max_stack: 2,
                max_locals: 2,
                code: vec![ILOAD_0, ILOAD_1, IADD, IRETURN],
            },
            MethodSpec {
                name: "compute",
                descriptor: "()I",
                is_static: true,
                max_stack: 2,
                max_locals: 0,
                code: vec![ICONST_2, ICONST_3, INVOKESTATIC, 0, 6, IRETURN],
            },
        ],
    );
    let name = vm.string_pool.intern("compute");
    let descriptor = vm.string_pool.intern("()I");
    let (declaring, method) = vm.resolve_method(class_id, name, descriptor).unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, Vec::new())
        .unwrap();
    assert_eq!(Some(Value::Int(5)), result);
}

#[test]
fn objects_get_default_fields_and_putfield_getfield_round_trip() {
    let (mut vm, _buffer) = fresh_vm();
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("Point".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("x".to_string())); // 3
    cp.add(CpEntry::Utf8("I".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::FieldRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    let class_id = install_class(
        &mut vm,
        "Point",
        cp,
        vec![("x", "I")],
        vec![MethodSpec {
            name: "probe",
            descriptor: "()I",
            is_static: true,
            max_stack: 3,
            max_locals: 1,
            code: vec![
                NEW, 0, 2, ASTORE_0, // Point p = new Point();
                ALOAD_0, BIPUSH, 17, PUTFIELD, 0, 6, // p.x = 17;
                ALOAD_0, GETFIELD, 0, 6, IRETURN, // return p.x;
            ],
        }],
    );
    let name = vm.string_pool.intern("probe");
    let descriptor = vm.string_pool.intern("()I");
    let (declaring, method) = vm.resolve_method(class_id, name, descriptor).unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, Vec::new())
        .unwrap();
    assert_eq!(Some(Value::Int(17)), result);

    // a fresh instance starts from the default value
    let object = vm.new_object(class_id);
    let x = vm.string_pool.intern("x");
    if let Value::Ref(object) = object {
        assert_eq!(Value::Int(0), object.borrow().field(x).unwrap().value);
    } else {
        panic!("expected an object");
    }
}

#[test]
fn uncaught_guest_exception_formats_like_java() {
    let (mut vm, _buffer) = fresh_vm();
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("java/lang/ArithmeticException".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("<init>".to_string())); // 3
    cp.add(CpEntry::Utf8("(Ljava/lang/String;)V".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::MethodRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    cp.add(CpEntry::Utf8("boom".to_string())); // 7
    cp.add(CpEntry::String { utf8_index: 7 }); // 8
    install_class(
        &mut vm,
        "Thrower",
        cp,
        Vec::new(),
        vec![MethodSpec {
            name: "main",
            descriptor: "([Ljava/lang/String;)V",
            is_static: true,
            max_stack: 3,
            max_locals: 1,
            code: vec![
                NEW, 0, 2, DUP, LDC, 8, INVOKESPECIAL, 0, 6, ATHROW,
            ],
        }],
    );
    match vm.run_main("Thrower", &[]) {
        Err(MethodCallError::JavaException(throwable)) => {
            let text = vm.format_uncaught(&throwable);
            assert!(
                text.starts_with("Exception in thread \"main\" java.lang.ArithmeticException: boom"),
                "{text}"
            );
            assert!(text.contains("at Thrower.main"), "{text}");
        }
        other => panic!("expected the exception to surface, got {other:?}"),
    }
}

#[test]
fn null_receiver_invocation_raises_npe() {
    let (mut vm, _buffer) = fresh_vm();
    install_class(
        &mut vm,
        "NullCall",
        hello_constant_pool(),
        Vec::new(),
        vec![MethodSpec {
            name: "main",
            descriptor: "([Ljava/lang/String;)V",
            is_static: true,
            max_stack: 2,
            max_locals: 1,
            code: vec![ACONST_NULL, LDC, 8, INVOKEVIRTUAL, 0, 14, RETURN],
        }],
    );
    match vm.run_main("NullCall", &[]) {
        Err(MethodCallError::JavaException(throwable)) => {
            let text = vm.format_uncaught(&throwable);
            assert!(text.contains("NullPointerException"), "{text}");
        }
        other => panic!("expected NullPointerException, got {other:?}"),
    }
}

#[test]
fn app_args_arrive_as_a_string_array() {
    let (mut vm, buffer) = fresh_vm();
    // prints args[1]
    install_class(
        &mut vm,
        "Echo",
        hello_constant_pool(),
        Vec::new(),
        vec![MethodSpec {
            name: "main",
            descriptor: "([Ljava/lang/String;)V",
            is_static: true,
            max_stack: 3,
            max_locals: 1,
            code: vec![
                GETSTATIC, 0, 6, ALOAD_0, ICONST_1, AALOAD, INVOKEVIRTUAL, 0, 14, RETURN,
            ],
        }],
    );
    vm.run_main("Echo", &["first".to_string(), "second".to_string()])
        .unwrap();
    assert_eq!("second\n", buffer.contents());
}

#[test]
fn wrapper_objects_carry_their_value_field() {
    let (mut vm, _buffer) = fresh_vm();
    let wrapper = vm
        .new_primitive_wrapper("java/lang/Integer", "I", Value::Int(7))
        .unwrap();
    let value_key = vm.string_pool.intern("value");
    match wrapper {
        Value::Ref(object) => {
            let object = object.borrow();
            let field = object.field(value_key).unwrap();
            assert_eq!("I", field.tag);
            assert_eq!(Value::Int(7), field.value);
        }
        other => panic!("expected a wrapper object, got {other}"),
    }
}

#[test]
fn duplicate_class_definition_is_rejected() {
    let (mut vm, _buffer) = fresh_vm();
    install_class(&mut vm, "Dup", ConstantPool::new(), Vec::new(), Vec::new());
    let again = Class {
        name: vm.string_pool.intern("Dup"),
        super_name: Some(vm.string_pool.intern("java/lang/Object")),
        interfaces: Vec::new(),
        access_flags: Default::default(),
        constant_pool: Default::default(),
        fields: Vec::new(),
        methods: Vec::new(),
        statics: IndexMap::new(),
        attributes: Vec::new(),
        source_file: None,
        loader: LoaderKind::Bootstrap,
        origin: ClassOrigin::BuiltIn,
        status: ClassStatus::Parsed,
    };
    assert!(vm.method_area.insert(again).is_err());
}

#[test]
fn get_class_answers_with_the_receiver_class_token() {
    let (mut vm, _buffer) = fresh_vm();
    let mut cp = ConstantPool::new();
    cp.add(CpEntry::Utf8("java/lang/Object".to_string())); // 1
    cp.add(CpEntry::Class { name_index: 1 }); // 2
    cp.add(CpEntry::Utf8("getClass".to_string())); // 3
    cp.add(CpEntry::Utf8("()Ljava/lang/Class;".to_string())); // 4
    cp.add(CpEntry::NameAndType {
        name_index: 3,
        descriptor_index: 4,
    }); // 5
    cp.add(CpEntry::MethodRef {
        class_index: 2,
        name_and_type_index: 5,
    }); // 6
    let class_id = install_class(
        &mut vm,
        "Mirror",
        cp,
        Vec::new(),
        vec![MethodSpec {
            name: "probe",
            descriptor: "()Ljava/lang/Class;",
            is_static: true,
            max_stack: 1,
            max_locals: 1,
            code: vec![ALOAD_0, INVOKEVIRTUAL, 0, 6, ARETURN],
        }],
    );

    let name = vm.string_pool.intern("probe");
    let descriptor = vm.string_pool.intern("()Ljava/lang/Class;");
    let (declaring, method) = vm.resolve_method(class_id, name, descriptor).unwrap();

    // getClass is declared on Object but answers with the receiver's
    // actual class
    let string = vm.new_string("mirror me").unwrap();
    let string_class = vm.load_class("java/lang/String").unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, vec![string])
        .unwrap();
    assert_eq!(Some(Value::Class(string_class)), result);

    // arrays have no registry entry of their own; they answer with
    // java/lang/Object's
    let array = vm.new_reference_array("java/lang/String", 2);
    let object_class = vm.load_class("java/lang/Object").unwrap();
    let result = vm
        .call_on_fresh_stack(declaring, &method, vec![array])
        .unwrap();
    assert_eq!(Some(Value::Class(object_class)), result);
}
