use crate::frame::CallStack;
use crate::java_exception::InvokeResult;
use crate::jvm_error::VmError;
use crate::native::NativeMethodTable;
use crate::value::Value;
use crate::vm::VirtualMachine;
use std::io::Write;
use std::rc::Rc;

/// The PrintStream family. Every body writes to the VM's configured output
/// stream; args[0] is the stream object the guest called through.
pub fn load(table: &mut NativeMethodTable) {
    table.register("java/io/PrintStream.println()V", 0, |vm, _, _| {
        write_text(vm, "\n")
    });
    table.register(
        "java/io/PrintStream.println(Ljava/lang/String;)V",
        1,
        |vm, _, args| print_string(vm, args, true),
    );
    table.register(
        "java/io/PrintStream.print(Ljava/lang/String;)V",
        1,
        |vm, _, args| print_string(vm, args, false),
    );
    table.register(
        "java/io/PrintStream.println(Ljava/lang/Object;)V",
        1,
        |vm, _, args| print_object(vm, args, true),
    );
    table.register("java/io/PrintStream.println(C)V", 1, |vm, _, args| {
        print_char(vm, args, true)
    });
    table.register("java/io/PrintStream.print(C)V", 1, |vm, _, args| {
        print_char(vm, args, false)
    });
    // byte, short, int and boolean all arrive as one int slot
    table.register("java/io/PrintStream.println(I)V", 1, |vm, _, args| {
        print_int(vm, args, true)
    });
    table.register("java/io/PrintStream.print(I)V", 1, |vm, _, args| {
        print_int(vm, args, false)
    });
    table.register("java/io/PrintStream.println(Z)V", 1, |vm, _, args| {
        print_boolean(vm, args, true)
    });
    table.register("java/io/PrintStream.print(Z)V", 1, |vm, _, args| {
        print_boolean(vm, args, false)
    });
    table.register("java/io/PrintStream.println(J)V", 2, |vm, _, args| {
        print_long(vm, args, true)
    });
    table.register("java/io/PrintStream.print(J)V", 2, |vm, _, args| {
        print_long(vm, args, false)
    });
    table.register("java/io/PrintStream.println(F)V", 1, |vm, _, args| {
        print_double(vm, args, true)
    });
    table.register("java/io/PrintStream.print(F)V", 1, |vm, _, args| {
        print_double(vm, args, false)
    });
    table.register("java/io/PrintStream.println(D)V", 2, |vm, _, args| {
        print_double(vm, args, true)
    });
    table.register("java/io/PrintStream.print(D)V", 2, |vm, _, args| {
        print_double(vm, args, false)
    });
}

fn write_text(vm: &mut VirtualMachine, text: &str) -> InvokeResult {
    vm.out
        .write_all(text.as_bytes())
        .and_then(|_| vm.out.flush())
        .map_err(|e| VmError::ExecuteCodeError(format!("output stream failure: {e}")))?;
    Ok(None)
}

fn finish(vm: &mut VirtualMachine, mut text: String, newline: bool) -> InvokeResult {
    if newline {
        text.push('\n');
    }
    write_text(vm, &text)
}

fn print_string(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let text = match args.get(1) {
        Some(Value::Null) | None => "null".to_string(),
        Some(value) => vm.string_text(value)?,
    };
    finish(vm, text, newline)
}

fn print_object(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let text = match args.get(1) {
        Some(Value::Null) | None => "null".to_string(),
        Some(value @ Value::Ref(object)) => {
            // strings print as their contents, everything else in the
            // ClassName@hash form
            if let Ok(text) = vm.string_text(value) {
                text
            } else {
                let class_name = vm.method_area.get(object.borrow().class).name;
                format!(
                    "{}@{:x}",
                    vm.text(class_name),
                    Rc::as_ptr(object) as usize as u32
                )
            }
        }
        Some(other) => other.to_string(),
    };
    finish(vm, text, newline)
}

fn print_char(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let code = args.get(1).ok_or(VmError::ValueTypeMismatch)?.int()?;
    let character = char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
    finish(vm, character.to_string(), newline)
}

fn print_int(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let value = args.get(1).ok_or(VmError::ValueTypeMismatch)?.int()?;
    finish(vm, value.to_string(), newline)
}

fn print_boolean(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let value = args.get(1).ok_or(VmError::ValueTypeMismatch)?.int()?;
    let text = if value == 0 { "false" } else { "true" };
    finish(vm, text.to_string(), newline)
}

fn print_long(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let value = args.get(1).ok_or(VmError::ValueTypeMismatch)?.long()?;
    finish(vm, value.to_string(), newline)
}

fn print_double(vm: &mut VirtualMachine, args: Vec<Value>, newline: bool) -> InvokeResult {
    let value = args.get(1).ok_or(VmError::ValueTypeMismatch)?.float()?;
    finish(vm, format_double(value), newline)
}

/// Java renders whole doubles with a trailing ".0" and spells the
/// infinities out.
fn format_double(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        };
    }
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
