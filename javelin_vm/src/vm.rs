use crate::class_finder::{ClassFinder, ClassPath};
use crate::frame::{CallStack, Frame};
use crate::java_exception::MethodCallError;
use crate::jtypes;
use crate::jvm_error::{VmError, VmExecResult};
use crate::loaded_class::Method;
use crate::method_area::{ClassId, MethodArea};
use crate::native::NativeMethodTable;
use crate::object::{Field, JavaArray, Object};
use crate::stack_trace_element::StackTraceElement;
use crate::string_pool::{StrId, StringPool};
use crate::value::Value;
use classfile::class_file_version::DEFAULT_MAX_MAJOR;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

/// The execution context: method area, string pool, class-path search,
/// native-method table and the output stream guest code prints to. Tests
/// build a fresh one per case; nothing lives in process globals.
pub struct VirtualMachine {
    pub method_area: MethodArea,
    pub string_pool: StringPool,
    pub finder: ClassFinder,
    pub natives: NativeMethodTable,
    /// String objects for interned literals, keyed by pool index. Built
    /// lazily the first time an `ldc` loads the literal.
    string_literals: HashMap<StrId, Value>,
    /// Where java/lang/System.out ends up writing.
    pub out: Box<dyn Write>,
    pub max_class_major: u16,
}

impl VirtualMachine {
    pub fn new() -> VirtualMachine {
        VirtualMachine {
            method_area: MethodArea::new(),
            string_pool: StringPool::new(),
            finder: ClassFinder::new(),
            natives: NativeMethodTable::with_default_library(),
            string_literals: HashMap::new(),
            out: Box::new(std::io::stdout()),
            max_class_major: DEFAULT_MAX_MAJOR,
        }
    }

    pub fn add_class_path(&mut self, class_path: Box<dyn ClassPath>) {
        self.finder.class_paths.push(class_path);
    }

    pub fn intern(&mut self, text: &str) -> StrId {
        self.string_pool.intern(text)
    }

    pub fn text(&self, id: StrId) -> &str {
        self.string_pool.lookup(id)
    }

    // ------------------------------------------------------------------
    // Object model
    // ------------------------------------------------------------------

    /// Allocates a fresh instance of the class, with every declared
    /// instance field (own and inherited) present at its default value.
    pub fn new_object(&mut self, class_id: ClassId) -> Value {
        let mut fields = IndexMap::new();
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.method_area.get(id);
            for field_def in class.instance_fields() {
                fields
                    .entry(field_def.name)
                    .or_insert_with(|| Field::new(&field_def.tag, crate::object::default_value(&field_def.tag)));
            }
            cursor = class.super_name.and_then(|name| self.method_area.fetch(name));
        }
        let mut object = Object::new(class_id);
        object.fields = fields;
        Value::Ref(Rc::new(RefCell::new(object)))
    }

    pub fn new_object_by_name(&mut self, class_name: &str) -> VmExecResult<Value> {
        let class_id = self.load_class(class_name)?;
        Ok(self.new_object(class_id))
    }

    /// Allocates a primitive-wrapper instance (Integer, Long, Double, ...)
    /// carrying `value` under the field name "value".
    pub fn new_primitive_wrapper(
        &mut self,
        class_name: &str,
        tag: &str,
        value: Value,
    ) -> VmExecResult<Value> {
        let wrapper = self.new_object_by_name(class_name)?;
        let name = self.intern("value");
        if let Value::Ref(object) = &wrapper {
            object.borrow_mut().set_field(name, Field::new(tag, value));
        }
        Ok(wrapper)
    }

    /// Builds a java/lang/String whose `value` field holds the UTF-8 bytes.
    pub fn new_string(&mut self, text: &str) -> VmExecResult<Value> {
        let string = self.new_object_by_name("java/lang/String")?;
        let name = self.intern("value");
        if let Value::Ref(object) = &string {
            let bytes = Rc::new(RefCell::new(text.as_bytes().to_vec()));
            object
                .borrow_mut()
                .set_field(name, Field::new(jtypes::BYTE_ARRAY, Value::Bytes(bytes)));
        }
        Ok(string)
    }

    /// The cached String object for an interned literal; constructed on
    /// first use, identical reference afterwards.
    pub fn string_literal(&mut self, id: StrId) -> VmExecResult<Value> {
        if let Some(cached) = self.string_literals.get(&id) {
            return Ok(cached.clone());
        }
        let text = self.string_pool.lookup(id).to_string();
        let string = self.new_string(&text)?;
        self.string_literals.insert(id, string.clone());
        Ok(string)
    }

    /// Reads the text out of a java/lang/String object.
    pub fn string_text(&mut self, value: &Value) -> VmExecResult<String> {
        let object = value.instance()?;
        let name = self.intern("value");
        let object = object.borrow();
        match object.field(name).map(|f| &f.value) {
            Some(Value::Bytes(bytes)) => Ok(String::from_utf8_lossy(&bytes.borrow()).into_owned()),
            _ => Err(VmError::ValueTypeMismatch),
        }
    }

    /// Zero-initialized one-dimensional array of references to
    /// `element_class`.
    pub fn new_reference_array(&mut self, element_class: &str, length: usize) -> Value {
        let tag = format!("L{element_class};");
        Value::Array(Rc::new(RefCell::new(JavaArray::new(&tag, length))))
    }

    /// Zero-initialized one-dimensional primitive array. Byte and boolean
    /// arrays use the dedicated byte-array representation.
    pub fn new_primitive_array(&mut self, tag: &str, length: usize) -> Value {
        if tag == jtypes::BYTE || tag == jtypes::BOOL {
            Value::Bytes(Rc::new(RefCell::new(vec![0u8; length])))
        } else {
            Value::Array(Rc::new(RefCell::new(JavaArray::new(tag, length))))
        }
    }

    // ------------------------------------------------------------------
    // Statics
    // ------------------------------------------------------------------

    /// Finds the class in the chain starting at `class_id` that declares
    /// the named static field.
    pub fn resolve_static(&self, class_id: ClassId, field_name: StrId) -> Option<ClassId> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.method_area.get(id);
            if class.statics.contains_key(&field_name) {
                return Some(id);
            }
            cursor = class.super_name.and_then(|name| self.method_area.fetch(name));
        }
        None
    }

    // ------------------------------------------------------------------
    // Type tests
    // ------------------------------------------------------------------

    /// Is a value of class `class_id` assignment-compatible with the class
    /// or interface named `target`? Walks the superclass chain and every
    /// implemented interface, transitively.
    pub fn is_assignable(&self, class_id: ClassId, target: StrId) -> bool {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let class = self.method_area.get(id);
            if class.name == target {
                return true;
            }
            for interface in &class.interfaces {
                if *interface == target {
                    return true;
                }
                if let Some(interface_id) = self.method_area.fetch(*interface) {
                    if self.is_assignable(interface_id, target) {
                        return true;
                    }
                }
            }
            cursor = class.super_name.and_then(|name| self.method_area.fetch(name));
        }
        false
    }

    /// The instanceof test. Null (and only null) is never an instance of
    /// anything; arrays match java/lang/Object and their exact element
    /// shape.
    pub fn instance_of(&mut self, value: &Value, target_name: &str) -> VmExecResult<bool> {
        let result = match value {
            Value::Null => false,
            Value::Ref(object) => {
                let class_id = object.borrow().class;
                let target = self.intern(target_name);
                self.is_assignable(class_id, target)
            }
            Value::Array(array) => {
                target_name == "java/lang/Object"
                    || target_name
                        .strip_prefix('[')
                        .is_some_and(|elem| array.borrow().tag == elem)
            }
            Value::Bytes(_) => target_name == "java/lang/Object" || target_name == jtypes::BYTE_ARRAY,
            _ => false,
        };
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Method resolution
    // ------------------------------------------------------------------

    /// Walks up the superclass chain from `start` for a method matching
    /// name and descriptor.
    pub fn resolve_method(
        &self,
        start: ClassId,
        name: StrId,
        descriptor: StrId,
    ) -> Option<(ClassId, Method)> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let class = self.method_area.get(id);
            if let Some(method) = class.find_method(name, descriptor) {
                return Some((id, method.clone()));
            }
            cursor = class.super_name.and_then(|n| self.method_area.fetch(n));
        }
        None
    }

    /// The native-table key for a method: `class.name(descriptor)`.
    pub fn native_key(&self, class_name: StrId, name: StrId, descriptor: StrId) -> String {
        format!(
            "{}.{}{}",
            self.string_pool.lookup(class_name),
            self.string_pool.lookup(name),
            self.string_pool.lookup(descriptor)
        )
    }

    /// Builds the callee frame for a bytecode-backed method. `args` must
    /// already contain padding slots after wide values, receiver first for
    /// instance methods.
    pub fn build_frame(
        &self,
        class_id: ClassId,
        method: &Method,
        args: Vec<Value>,
    ) -> VmExecResult<Frame> {
        let code = method.code.clone().ok_or_else(|| {
            VmError::ExecuteCodeError(format!(
                "method {}{} has no bytecode",
                self.string_pool.lookup(method.name),
                self.string_pool.lookup(method.descriptor)
            ))
        })?;
        Ok(Frame::new(
            class_id,
            self.method_area.get(class_id).name,
            method.name,
            method.descriptor,
            code,
            args,
        ))
    }

    // ------------------------------------------------------------------
    // Guest throwables
    // ------------------------------------------------------------------

    /// Constructs a guest throwable of the given class, fills in
    /// detailMessage and a stackTrace snapshot of the frame stack, and
    /// wraps it for unwinding. Any failure while building the throwable
    /// degrades to a host-level error.
    pub fn make_throwable(
        &mut self,
        stack: &CallStack,
        class_name: &str,
        message: &str,
    ) -> MethodCallError {
        match self.try_make_throwable(stack, class_name, message) {
            Ok(value) => MethodCallError::JavaException(value),
            Err(err) => MethodCallError::Internal(err),
        }
    }

    fn try_make_throwable(
        &mut self,
        stack: &CallStack,
        class_name: &str,
        message: &str,
    ) -> VmExecResult<Value> {
        let throwable = self.new_object_by_name(class_name)?;
        let message_value = self.new_string(message)?;
        let detail_message = self.intern("detailMessage");
        let stack_trace = self.intern("stackTrace");

        let elements = self.snapshot_stack_trace(stack)?;
        let trace_array = Rc::new(RefCell::new(JavaArray {
            tag: "Ljava/lang/StackTraceElement;".to_string(),
            elements,
        }));

        if let Value::Ref(object) = &throwable {
            let mut object = object.borrow_mut();
            object.set_field(
                detail_message,
                Field::new("Ljava/lang/String;", message_value),
            );
            object.set_field(
                stack_trace,
                Field::new("[Ljava/lang/StackTraceElement;", Value::Array(trace_array)),
            );
        }
        Ok(throwable)
    }

    /// The stackTrace array value for a throwable being constructed on
    /// `stack`.
    pub fn stack_trace_array(&mut self, stack: &CallStack) -> VmExecResult<Value> {
        let elements = self.snapshot_stack_trace(stack)?;
        Ok(Value::Array(Rc::new(RefCell::new(JavaArray {
            tag: "Ljava/lang/StackTraceElement;".to_string(),
            elements,
        }))))
    }

    /// One StackTraceElement object per live frame, top of stack first.
    fn snapshot_stack_trace(&mut self, stack: &CallStack) -> VmExecResult<Vec<Value>> {
        let mut elements = Vec::new();
        for (class_name, method_name, pc) in stack.snapshot() {
            let element = self.new_object_by_name("java/lang/StackTraceElement")?;
            let declaring = self.string_literal(class_name)?;
            let method = self.string_literal(method_name)?;
            let declaring_key = self.intern("declaringClass");
            let method_key = self.intern("methodName");
            let pc_key = self.intern("pc");
            if let Value::Ref(object) = &element {
                let mut object = object.borrow_mut();
                object.set_field(declaring_key, Field::new("Ljava/lang/String;", declaring));
                object.set_field(method_key, Field::new("Ljava/lang/String;", method));
                object.set_field(pc_key, Field::new("I", Value::Int(pc as i64)));
            }
            elements.push(element);
        }
        Ok(elements)
    }

    /// Renders an uncaught throwable in the standard
    /// "Exception in thread ... at ..." form.
    pub fn format_uncaught(&mut self, throwable: &Value) -> String {
        let mut text = String::from("Exception in thread \"main\" ");
        let object = match throwable {
            Value::Ref(object) => object.clone(),
            other => return format!("{text}{other}"),
        };
        let class_name = self.method_area.get(object.borrow().class).name;
        text.push_str(&self.string_pool.lookup(class_name).replace('/', "."));

        let detail_key = self.intern("detailMessage");
        let message = object.borrow().field(detail_key).map(|f| f.value.clone());
        if let Some(message) = message {
            if !message.is_null() {
                if let Ok(message_text) = self.string_text(&message) {
                    text.push_str(": ");
                    text.push_str(&message_text);
                }
            }
        }

        let trace_key = self.intern("stackTrace");
        let trace = object.borrow().field(trace_key).map(|f| f.value.clone());
        if let Some(Value::Array(array)) = trace {
            let elements = array.borrow().elements.clone();
            for element in elements {
                if let Some(line) = self.trace_element_line(&element) {
                    text.push_str("\n\t");
                    text.push_str(&line);
                }
            }
        }
        text
    }

    fn trace_element_line(&mut self, element: &Value) -> Option<String> {
        let object = match element {
            Value::Ref(object) => object.clone(),
            _ => return None,
        };
        let declaring_key = self.intern("declaringClass");
        let method_key = self.intern("methodName");
        let pc_key = self.intern("pc");
        let (declaring, method, pc) = {
            let object = object.borrow();
            (
                object.field(declaring_key).map(|f| f.value.clone()),
                object.field(method_key).map(|f| f.value.clone()),
                object
                    .field(pc_key)
                    .and_then(|f| f.value.int().ok())
                    .unwrap_or(0),
            )
        };
        let declaring = declaring.and_then(|v| self.string_text(&v).ok())?;
        let method = method.and_then(|v| self.string_text(&v).ok())?;
        Some(
            StackTraceElement {
                declaring_class: declaring,
                method_name: method,
                pc: pc as usize,
                file_name: None,
                line_number: None,
            }
            .to_string(),
        )
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        VirtualMachine::new()
    }
}
