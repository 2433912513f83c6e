use crate::frame::CallStack;
use crate::java_exception::{InvokeResult, ARRAY_INDEX_OUT_OF_BOUNDS};
use crate::jvm_error::VmError;
use crate::native::{just_return, NativeMethodTable};
use crate::value::Value;
use crate::vm::VirtualMachine;
use std::rc::Rc;

pub fn load(table: &mut NativeMethodTable) {
    table.register("java/lang/Object.<init>()V", 0, just_return);
    table.register("java/lang/Object.hashCode()I", 0, object_hash_code);
    table.register(
        "java/lang/Object.toString()Ljava/lang/String;",
        0,
        object_to_string,
    );
    table.register(
        "java/lang/Object.getClass()Ljava/lang/Class;",
        0,
        object_get_class,
    );

    table.register("java/lang/String.length()I", 0, string_length);
    table.register(
        "java/lang/String.concat(Ljava/lang/String;)Ljava/lang/String;",
        1,
        string_concat,
    );

    table.register(
        "java/lang/Boolean.valueOf(Z)Ljava/lang/Boolean;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Boolean", "Z", args),
    );
    table.register(
        "java/lang/Byte.valueOf(B)Ljava/lang/Byte;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Byte", "B", args),
    );
    table.register(
        "java/lang/Character.valueOf(C)Ljava/lang/Character;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Character", "C", args),
    );
    table.register(
        "java/lang/Short.valueOf(S)Ljava/lang/Short;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Short", "S", args),
    );
    table.register(
        "java/lang/Integer.valueOf(I)Ljava/lang/Integer;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Integer", "I", args),
    );
    table.register(
        "java/lang/Long.valueOf(J)Ljava/lang/Long;",
        2,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Long", "J", args),
    );
    table.register(
        "java/lang/Float.valueOf(F)Ljava/lang/Float;",
        1,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Float", "F", args),
    );
    table.register(
        "java/lang/Double.valueOf(D)Ljava/lang/Double;",
        2,
        |vm, _, args| wrapper_value_of(vm, "java/lang/Double", "D", args),
    );
    table.register(
        "java/lang/Integer.parseInt(Ljava/lang/String;)I",
        1,
        integer_parse_int,
    );
    for wrapper in [
        "java/lang/Boolean.<init>(Z)V",
        "java/lang/Byte.<init>(B)V",
        "java/lang/Character.<init>(C)V",
        "java/lang/Short.<init>(S)V",
        "java/lang/Integer.<init>(I)V",
        "java/lang/Float.<init>(F)V",
    ] {
        table.register(wrapper, 1, wrapper_init);
    }
    table.register("java/lang/Long.<init>(J)V", 2, wrapper_init);
    table.register("java/lang/Double.<init>(D)V", 2, wrapper_init);

    table.register(
        "java/lang/System.arraycopy(Ljava/lang/Object;ILjava/lang/Object;II)V",
        5,
        system_arraycopy,
    );

    // Throwable constructors snapshot the caller's frame stack.
    for class in [
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
        "java/lang/IllegalArgumentException",
        "java/lang/NumberFormatException",
        "java/lang/ExceptionInInitializerError",
    ] {
        table.register_with_context(&format!("{class}.<init>()V"), 0, throwable_init);
        table.register_with_context(
            &format!("{class}.<init>(Ljava/lang/String;)V"),
            1,
            throwable_init,
        );
        table.register(
            &format!("{class}.getMessage()Ljava/lang/String;"),
            0,
            throwable_get_message,
        );
    }
}

fn receiver(args: &[Value]) -> Result<&Value, VmError> {
    args.first().ok_or(VmError::ValueTypeMismatch)
}

/// Identity hash: the stable address of the allocation.
fn object_hash_code(
    _vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let hash = match receiver(&args)? {
        Value::Ref(object) => Rc::as_ptr(object) as i32 as i64,
        Value::Array(array) => Rc::as_ptr(array) as i32 as i64,
        Value::Bytes(bytes) => Rc::as_ptr(bytes) as i32 as i64,
        _ => -1,
    };
    Ok(Some(Value::Int(hash)))
}

/// Identifies the receiver's class by name, as a class reference token.
/// Arrays have no registry entry of their own and answer with
/// java/lang/Object's.
fn object_get_class(
    vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let class_id = match receiver(&args)? {
        Value::Ref(object) => object.borrow().class,
        Value::Array(_) | Value::Bytes(_) => vm.load_class("java/lang/Object")?,
        _ => return Err(VmError::ValueTypeMismatch.into()),
    };
    Ok(Some(Value::Class(class_id)))
}

fn object_to_string(
    vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let text = match receiver(&args)? {
        Value::Ref(object) => {
            let class_name = vm.method_area.get(object.borrow().class).name;
            format!(
                "{}@{:x}",
                vm.text(class_name),
                Rc::as_ptr(object) as usize as u32
            )
        }
        other => other.to_string(),
    };
    let string = vm.new_string(&text)?;
    Ok(Some(string))
}

/// String length in UTF-16 code units, as Java counts it.
fn string_length(
    vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let text = vm.string_text(receiver(&args)?)?;
    Ok(Some(Value::Int(text.encode_utf16().count() as i64)))
}

fn string_concat(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let prefix = vm.string_text(receiver(&args)?)?;
    let suffix = match args.get(1) {
        Some(Value::Null) | None => {
            return Err(vm.make_throwable(
                stack,
                crate::java_exception::NULL_POINTER_EXCEPTION,
                "String.concat on null argument",
            ))
        }
        Some(value) => vm.string_text(value)?,
    };
    let string = vm.new_string(&format!("{prefix}{suffix}"))?;
    Ok(Some(string))
}

fn wrapper_value_of(
    vm: &mut VirtualMachine,
    class_name: &str,
    tag: &str,
    mut args: Vec<Value>,
) -> InvokeResult {
    let value = args.drain(..).next().ok_or(VmError::ValueTypeMismatch)?;
    let wrapper = vm.new_primitive_wrapper(class_name, tag, value)?;
    Ok(Some(wrapper))
}

/// Shared wrapper constructor: store the argument under `value`. The field
/// already exists with the declared tag, so staticness and width are right.
fn wrapper_init(
    vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let object = receiver(&args)?.instance()?;
    let value_key = vm.intern("value");
    let value = args.get(1).cloned().ok_or(VmError::ValueTypeMismatch)?;
    object.borrow_mut().put_value(value_key, value)?;
    Ok(None)
}

fn integer_parse_int(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let text = vm.string_text(receiver(&args)?)?;
    match text.trim().parse::<i32>() {
        Ok(value) => Ok(Some(Value::Int(value as i64))),
        Err(_) => Err(vm.make_throwable(
            stack,
            "java/lang/NumberFormatException",
            &format!("for input string: \"{text}\""),
        )),
    }
}

fn throwable_init(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let object = receiver(&args)?.instance()?;
    let detail_key = vm.intern("detailMessage");
    let trace_key = vm.intern("stackTrace");
    if let Some(message) = args.get(1) {
        object.borrow_mut().put_value(detail_key, message.clone())?;
    }
    let trace = vm.stack_trace_array(stack)?;
    object.borrow_mut().put_value(trace_key, trace)?;
    Ok(None)
}

fn throwable_get_message(
    vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    let object = receiver(&args)?.instance()?;
    let detail_key = vm.intern("detailMessage");
    let message = object
        .borrow()
        .field(detail_key)
        .map(|f| f.value.clone())
        .unwrap_or(Value::Null);
    Ok(Some(message))
}

fn system_arraycopy(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    args: Vec<Value>,
) -> InvokeResult {
    if args.len() != 5 {
        return Err(VmError::ValueTypeMismatch.into());
    }
    let src_pos = args[1].int()? as usize;
    let dest_pos = args[3].int()? as usize;
    let length = args[4].int()? as usize;
    let oob = |vm: &mut VirtualMachine, stack: &CallStack| {
        vm.make_throwable(stack, ARRAY_INDEX_OUT_OF_BOUNDS, "arraycopy out of range")
    };
    match (&args[0], &args[2]) {
        (Value::Array(src), Value::Array(dest)) => {
            let window: Vec<Value> = {
                let src = src.borrow();
                if src_pos + length > src.elements.len() {
                    return Err(oob(vm, stack));
                }
                src.elements[src_pos..src_pos + length].to_vec()
            };
            let mut dest = dest.borrow_mut();
            if dest_pos + length > dest.elements.len() {
                return Err(oob(vm, stack));
            }
            dest.elements[dest_pos..dest_pos + length].clone_from_slice(&window);
            Ok(None)
        }
        (Value::Bytes(src), Value::Bytes(dest)) => {
            let window: Vec<u8> = {
                let src = src.borrow();
                if src_pos + length > src.len() {
                    return Err(oob(vm, stack));
                }
                src[src_pos..src_pos + length].to_vec()
            };
            let mut dest = dest.borrow_mut();
            if dest_pos + length > dest.len() {
                return Err(oob(vm, stack));
            }
            dest[dest_pos..dest_pos + length].copy_from_slice(&window);
            Ok(None)
        }
        _ => Err(VmError::ValueTypeMismatch.into()),
    }
}
