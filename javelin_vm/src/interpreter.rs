use crate::frame::CallStack;
use crate::java_exception::{
    InvokeResult, MethodCallError, ARITHMETIC_EXCEPTION, ARRAY_INDEX_OUT_OF_BOUNDS,
    CLASS_CAST_EXCEPTION, NEGATIVE_ARRAY_SIZE, NULL_POINTER_EXCEPTION,
};
use crate::jtypes;
use crate::jvm_error::{VmError, VmExecResult};
use crate::method_area::ClassId;
use crate::object::JavaArray;
use crate::opcodes::*;
use crate::runtime_constant_pool::RtCpEntry;
use crate::value::Value;
use crate::vm::VirtualMachine;
use log::{error, log_enabled, trace, Level};
use std::cell::RefCell;
use std::rc::Rc;

/// What one dispatched instruction did to the frame stack.
enum Control {
    /// PC already advanced; keep dispatching.
    Continue,
    /// Pop the top frame and hand `value` to the caller (two slots when
    /// `wide`).
    Return { value: Option<Value>, wide: bool },
}

/// Narrows to Java int semantics: two's-complement mod 2^32, sign-extended
/// back into the 64-bit word.
fn jint(x: i64) -> i64 {
    x as i32 as i64
}

/// The dispatch loop. Runs the top frame of `stack` until the stack is
/// empty (normal exit, returning the bottom frame's result) or an error or
/// uncaught guest exception propagates past the bottom frame.
pub fn run(vm: &mut VirtualMachine, stack: &mut CallStack) -> InvokeResult {
    loop {
        if stack.is_empty() {
            return Ok(None);
        }
        let step = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            execute_instruction(vm, stack)
        }))
        .unwrap_or_else(|cause| {
            let cause = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "cause unknown".to_string());
            error!("panic in the dispatch loop: {cause}");
            Err(VmError::ExecuteCodeError(format!("dispatch loop panic: {cause}")).into())
        });
        match step {
            Ok(Control::Continue) => {}
            Ok(Control::Return { value, wide }) => {
                stack.pop();
                match stack.top_mut() {
                    None => return Ok(value),
                    Some(caller) => {
                        // the caller is still parked on its invoke opcode
                        caller.pc += match caller.operand_u8(0) {
                            Ok(INVOKEINTERFACE) => 5,
                            _ => 3,
                        };
                        if let Some(value) = value {
                            let pushed = if wide {
                                caller.stack.push_wide(value)
                            } else {
                                caller.stack.push(value)
                            };
                            if let Err(fault) = pushed {
                                handle_stack_fault(stack, fault)?;
                            }
                        }
                    }
                }
            }
            Err(MethodCallError::Internal(
                fault @ (VmError::OperandStackOverflow | VmError::OperandStackUnderflow),
            )) => handle_stack_fault(stack, fault)?,
            Err(MethodCallError::JavaException(exception)) => unwind(vm, stack, exception)?,
            Err(other) => {
                if let MethodCallError::Internal(cause) = &other {
                    error!("{cause}");
                    dump_frame_stack(vm, stack);
                }
                return Err(other);
            }
        }
    }
}

/// Logs class, method and PC for every live frame, top first. Runs when a
/// host-level error or a caught panic ends execution.
fn dump_frame_stack(vm: &VirtualMachine, stack: &CallStack) {
    for (class_name, method_name, pc) in stack.snapshot() {
        error!(
            "Method: {}.{:<30} PC: {pc:03}",
            vm.string_pool.lookup(class_name),
            vm.string_pool.lookup(method_name),
        );
    }
}

/// Operand-stack faults reroute through IMPDEP2: the frame's code is
/// swapped for an error stub carrying the fault code and faulting PC, and
/// dispatch continues so the stub is the next thing fetched.
fn handle_stack_fault(stack: &mut CallStack, fault: VmError) -> Result<(), MethodCallError> {
    let code = match fault {
        VmError::OperandStackOverflow => FAULT_STACK_OVERFLOW,
        VmError::OperandStackUnderflow => FAULT_STACK_UNDERFLOW,
        other => return Err(other.into()),
    };
    match stack.top_mut() {
        Some(frame) => {
            frame.trap_stack_fault(code);
            Ok(())
        }
        None => {
            let fault = if code == FAULT_STACK_OVERFLOW {
                VmError::OperandStackOverflow
            } else {
                VmError::OperandStackUnderflow
            };
            Err(fault.into())
        }
    }
}

/// Walks the frame stack looking for an exception-table entry covering the
/// current PC whose catch type matches the thrown object. A match clears
/// the operand stack, pushes the throwable, and resumes at the handler;
/// otherwise the frame dies and the search moves to the caller.
fn unwind(vm: &mut VirtualMachine, stack: &mut CallStack, exception: Value) -> Result<(), MethodCallError> {
    let exception_class: Option<ClassId> = match &exception {
        Value::Ref(object) => Some(object.borrow().class),
        _ => None,
    };
    loop {
        let (code, pc) = match stack.top_mut() {
            None => return Err(MethodCallError::JavaException(exception)),
            Some(frame) => (frame.code.clone(), frame.pc as u16),
        };
        let mut handler_pc = None;
        for entry in &code.exception_table {
            if !entry.covers(pc) {
                continue;
            }
            let matches = match (&entry.catch_type, exception_class) {
                (None, _) => true,
                (Some(catch_name), Some(class_id)) => {
                    let target = vm.intern(catch_name);
                    vm.is_assignable(class_id, target)
                }
                (Some(_), None) => false,
            };
            if matches {
                handler_pc = Some(entry.handler_pc as usize);
                break;
            }
        }
        match handler_pc {
            Some(target) => {
                let frame = stack.top_mut().expect("frame checked above");
                frame.stack.clear();
                frame.stack.push(exception).map_err(MethodCallError::from)?;
                frame.pc = target;
                return Ok(());
            }
            None => {
                stack.pop();
            }
        }
    }
}

fn top<'a>(stack: &'a mut CallStack) -> Result<&'a mut crate::frame::Frame, MethodCallError> {
    stack
        .top_mut()
        .ok_or_else(|| VmError::ExecuteCodeError("no frame on the stack".to_string()).into())
}

type Step = Result<Control, MethodCallError>;

fn step_ok() -> Step {
    Ok(Control::Continue)
}

// ---------------------------------------------------------------------
// Small handler families
// ---------------------------------------------------------------------

fn push_const(stack: &mut CallStack, value: Value, wide: bool) -> Step {
    let frame = top(stack)?;
    if wide {
        frame.stack.push_wide(value)?;
    } else {
        frame.stack.push(value)?;
    }
    frame.pc += 1;
    step_ok()
}

fn int_binop(stack: &mut CallStack, op: impl FnOnce(i64, i64) -> i64) -> Step {
    let frame = top(stack)?;
    let b = frame.stack.pop()?.int()?;
    let a = frame.stack.pop()?.int()?;
    frame.stack.push(Value::Int(jint(op(a, b))))?;
    frame.pc += 1;
    step_ok()
}

fn long_binop(stack: &mut CallStack, op: impl FnOnce(i64, i64) -> i64) -> Step {
    let frame = top(stack)?;
    let b = frame.stack.pop_wide()?.long()?;
    let a = frame.stack.pop_wide()?.long()?;
    frame.stack.push_wide(Value::Long(op(a, b)))?;
    frame.pc += 1;
    step_ok()
}

/// Long shifts take an int shift count, not a long.
fn long_shift(stack: &mut CallStack, op: impl FnOnce(i64, i64) -> i64) -> Step {
    let frame = top(stack)?;
    let count = frame.stack.pop()?.int()?;
    let value = frame.stack.pop_wide()?.long()?;
    frame.stack.push_wide(Value::Long(op(value, count)))?;
    frame.pc += 1;
    step_ok()
}

/// Float ops run at f32 precision and widen back.
fn float_binop(stack: &mut CallStack, op: impl FnOnce(f32, f32) -> f32) -> Step {
    let frame = top(stack)?;
    let b = frame.stack.pop()?.float()? as f32;
    let a = frame.stack.pop()?.float()? as f32;
    frame.stack.push(Value::Float(op(a, b) as f64))?;
    frame.pc += 1;
    step_ok()
}

fn double_binop(stack: &mut CallStack, op: impl FnOnce(f64, f64) -> f64) -> Step {
    let frame = top(stack)?;
    let b = frame.stack.pop_wide()?.float()?;
    let a = frame.stack.pop_wide()?.float()?;
    frame.stack.push_wide(Value::Float(op(a, b)))?;
    frame.pc += 1;
    step_ok()
}

/// Integral division and remainder trap on a zero divisor with a guest
/// ArithmeticException.
fn int_div_rem(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    remainder: bool,
) -> Step {
    let (a, b) = {
        let frame = top(stack)?;
        let b = frame.stack.pop()?.int()?;
        let a = frame.stack.pop()?.int()?;
        (a as i32, b as i32)
    };
    if b == 0 {
        return Err(vm.make_throwable(stack, ARITHMETIC_EXCEPTION, "divide by zero"));
    }
    let result = if remainder {
        a.wrapping_rem(b)
    } else {
        a.wrapping_div(b)
    };
    let frame = top(stack)?;
    frame.stack.push(Value::Int(result as i64))?;
    frame.pc += 1;
    step_ok()
}

fn long_div_rem(
    vm: &mut VirtualMachine,
    stack: &mut CallStack,
    remainder: bool,
) -> Step {
    let (a, b) = {
        let frame = top(stack)?;
        let b = frame.stack.pop_wide()?.long()?;
        let a = frame.stack.pop_wide()?.long()?;
        (a, b)
    };
    if b == 0 {
        return Err(vm.make_throwable(stack, ARITHMETIC_EXCEPTION, "divide by zero"));
    }
    let result = if remainder {
        a.wrapping_rem(b)
    } else {
        a.wrapping_div(b)
    };
    let frame = top(stack)?;
    frame.stack.push_wide(Value::Long(result))?;
    frame.pc += 1;
    step_ok()
}

fn load_local(stack: &mut CallStack, index: usize, wide: bool, advance: usize) -> Step {
    let frame = top(stack)?;
    let value = frame.local(index)?;
    if wide {
        frame.stack.push_wide(value)?;
    } else {
        frame.stack.push(value)?;
    }
    frame.pc += advance;
    step_ok()
}

fn store_local(stack: &mut CallStack, index: usize, wide: bool, advance: usize) -> Step {
    let frame = top(stack)?;
    if wide {
        let value = frame.stack.pop_wide()?;
        frame.set_local_wide(index, value)?;
    } else {
        let value = frame.stack.pop()?;
        frame.set_local(index, value)?;
    }
    frame.pc += advance;
    step_ok()
}

fn branch_if(stack: &mut CallStack, taken: bool) -> Step {
    let frame = top(stack)?;
    if taken {
        let offset = frame.operand_i16(1)? as i64;
        frame.pc = (frame.pc as i64 + offset) as usize;
    } else {
        frame.pc += 3;
    }
    step_ok()
}

fn if_int(stack: &mut CallStack, cond: impl FnOnce(i64) -> bool) -> Step {
    let taken = {
        let frame = top(stack)?;
        cond(frame.stack.pop()?.int()?)
    };
    branch_if(stack, taken)
}

fn if_icmp(stack: &mut CallStack, cond: impl FnOnce(i64, i64) -> bool) -> Step {
    let taken = {
        let frame = top(stack)?;
        let b = frame.stack.pop()?.int()?;
        let a = frame.stack.pop()?.int()?;
        cond(a, b)
    };
    branch_if(stack, taken)
}

/// fcmpl/fcmpg/dcmpl/dcmpg: `on_nan` is what NaN compares as.
fn float_cmp(stack: &mut CallStack, wide: bool, on_nan: i64) -> Step {
    let frame = top(stack)?;
    let (b, a) = if wide {
        (
            frame.stack.pop_wide()?.float()?,
            frame.stack.pop_wide()?.float()?,
        )
    } else {
        (frame.stack.pop()?.float()?, frame.stack.pop()?.float()?)
    };
    let result = if a.is_nan() || b.is_nan() {
        on_nan
    } else if a > b {
        1
    } else if a < b {
        -1
    } else {
        0
    };
    frame.stack.push(Value::Int(result))?;
    frame.pc += 1;
    step_ok()
}

// ---------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------

fn check_index(
    vm: &mut VirtualMachine,
    stack: &CallStack,
    index: i64,
    length: usize,
) -> Result<usize, MethodCallError> {
    if index < 0 || index as usize >= length {
        Err(vm.make_throwable(
            stack,
            ARRAY_INDEX_OUT_OF_BOUNDS,
            &format!("Index {index} out of bounds for length {length}"),
        ))
    } else {
        Ok(index as usize)
    }
}

fn null_pointer(vm: &mut VirtualMachine, stack: &CallStack, what: &str) -> MethodCallError {
    vm.make_throwable(stack, NULL_POINTER_EXCEPTION, what)
}

/// Array element kinds for the load/store family.
#[derive(Clone, Copy, PartialEq)]
enum ElementKind {
    Int,
    Long,
    Float,
    Double,
    Byte,
    Char,
    Short,
    Reference,
}

fn array_load(vm: &mut VirtualMachine, stack: &mut CallStack, kind: ElementKind) -> Step {
    let (array_value, index) = {
        let frame = top(stack)?;
        let index = frame.stack.pop()?.int()?;
        (frame.stack.pop()?, index)
    };
    let value = match (&array_value, kind) {
        (Value::Null, _) => return Err(null_pointer(vm, stack, "array load through null")),
        (Value::Bytes(bytes), ElementKind::Byte) => {
            let bytes = bytes.borrow();
            let index = check_index(vm, stack, index, bytes.len())?;
            Value::Int(bytes[index] as i8 as i64)
        }
        (Value::Array(array), _) => {
            let array = array.borrow();
            let index = check_index(vm, stack, index, array.elements.len())?;
            array.elements[index].clone()
        }
        _ => return Err(VmError::ValueTypeMismatch.into()),
    };
    let frame = top(stack)?;
    match kind {
        ElementKind::Long | ElementKind::Double => frame.stack.push_wide(value)?,
        _ => frame.stack.push(value)?,
    }
    frame.pc += 1;
    step_ok()
}

fn array_store(vm: &mut VirtualMachine, stack: &mut CallStack, kind: ElementKind) -> Step {
    let (array_value, index, value) = {
        let frame = top(stack)?;
        let value = match kind {
            ElementKind::Long | ElementKind::Double => frame.stack.pop_wide()?,
            _ => frame.stack.pop()?,
        };
        let index = frame.stack.pop()?.int()?;
        (frame.stack.pop()?, index, value)
    };
    // store-time narrowing keeps array slots in their element range
    let value = match kind {
        ElementKind::Int => Value::Int(jint(value.int()?)),
        ElementKind::Char => Value::Int(value.int()? as u16 as i64),
        ElementKind::Short => Value::Int(value.int()? as i16 as i64),
        ElementKind::Byte | ElementKind::Long | ElementKind::Float | ElementKind::Double => value,
        ElementKind::Reference => {
            if !value.is_reference() {
                return Err(VmError::ValueTypeMismatch.into());
            }
            value
        }
    };
    match (&array_value, kind) {
        (Value::Null, _) => return Err(null_pointer(vm, stack, "array store through null")),
        (Value::Bytes(bytes), ElementKind::Byte) => {
            let length = bytes.borrow().len();
            let index = check_index(vm, stack, index, length)?;
            bytes.borrow_mut()[index] = value.int()? as u8;
        }
        (Value::Array(array), _) => {
            let length = array.borrow().elements.len();
            let index = check_index(vm, stack, index, length)?;
            array.borrow_mut().elements[index] = value;
        }
        _ => return Err(VmError::ValueTypeMismatch.into()),
    }
    let frame = top(stack)?;
    frame.pc += 1;
    step_ok()
}

fn newarray_tag(atype: u8) -> VmExecResult<&'static str> {
    Ok(match atype {
        T_BOOLEAN => "Z",
        T_CHAR => "C",
        T_FLOAT => "F",
        T_DOUBLE => "D",
        T_BYTE => "B",
        T_SHORT => "S",
        T_INT => "I",
        T_LONG => "J",
        other => {
            return Err(VmError::ExecuteCodeError(format!(
                "invalid newarray element type {other}"
            )))
        }
    })
}

/// Builds one level of a multianewarray allocation. `descriptor` still has
/// one leading `[` per remaining dimension.
fn build_multi_array(
    vm: &mut VirtualMachine,
    descriptor: &str,
    counts: &[i64],
) -> VmExecResult<Value> {
    let element = descriptor
        .strip_prefix('[')
        .ok_or_else(|| VmError::ExecuteCodeError(format!("bad array descriptor {descriptor}")))?;
    let length = counts[0] as usize;
    if counts.len() == 1 {
        return Ok(match element.chars().next() {
            Some('L') | Some('[') => Value::Array(Rc::new(RefCell::new(JavaArray::new(element, length)))),
            _ => vm.new_primitive_array(element, length),
        });
    }
    let mut elements = Vec::with_capacity(length);
    for _ in 0..length {
        elements.push(build_multi_array(vm, element, &counts[1..])?);
    }
    Ok(Value::Array(Rc::new(RefCell::new(JavaArray {
        tag: element.to_string(),
        elements,
    }))))
}

// ---------------------------------------------------------------------
// Constant pool loads
// ---------------------------------------------------------------------

fn exec_ldc(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16, advance: usize) -> Step {
    let class_id = top(stack)?.class_id;
    let entry = vm.method_area.get(class_id).constant_pool.get(index)?.clone();
    let value = match entry {
        RtCpEntry::Integer(v) => Value::Int(v as i64),
        RtCpEntry::Float(v) => Value::Float(v as f64),
        RtCpEntry::StringRef(id) => vm.string_literal(id)?,
        RtCpEntry::ClassRef(name) => Value::Class(vm.load_class_id(name)?),
        _ => {
            return Err(VmError::ExecuteCodeError(format!(
                "ldc cannot load constant pool entry {index}"
            ))
            .into())
        }
    };
    let frame = top(stack)?;
    frame.stack.push(value)?;
    frame.pc += advance;
    step_ok()
}

fn exec_ldc2(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16) -> Step {
    let class_id = top(stack)?.class_id;
    let entry = vm.method_area.get(class_id).constant_pool.get(index)?.clone();
    let value = match entry {
        RtCpEntry::Long(v) => Value::Long(v),
        RtCpEntry::Double(v) => Value::Float(v),
        _ => {
            return Err(VmError::ExecuteCodeError(format!(
                "ldc2_w cannot load constant pool entry {index}"
            ))
            .into())
        }
    };
    let frame = top(stack)?;
    frame.stack.push_wide(value)?;
    frame.pc += 3;
    step_ok()
}

// ---------------------------------------------------------------------
// Fields and statics
// ---------------------------------------------------------------------

fn exec_getstatic(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16) -> Step {
    let class_id = top(stack)?.class_id;
    let member = vm.method_area.get(class_id).constant_pool.field_ref(index)?;
    let declaring = vm.load_class_id(member.class_name).map_err(MethodCallError::from)?;
    vm.ensure_initialized(declaring)?;
    let holder = vm
        .resolve_static(declaring, member.name)
        .ok_or_else(|| VmError::FieldNotFound(vm.text(member.name).to_string()))?;
    let field = vm.method_area.get(holder).statics[&member.name].clone();
    if !field.is_static() {
        return Err(VmError::ExecuteCodeError(format!(
            "getstatic on non-static field {}",
            vm.text(member.name)
        ))
        .into());
    }
    let wide = jtypes::uses_two_slots(&field.tag);
    let frame = top(stack)?;
    if wide {
        frame.stack.push_wide(field.value)?;
    } else {
        frame.stack.push(field.value)?;
    }
    frame.pc += 3;
    step_ok()
}

fn exec_putstatic(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16) -> Step {
    let class_id = top(stack)?.class_id;
    let member = vm.method_area.get(class_id).constant_pool.field_ref(index)?;
    let declaring = vm.load_class_id(member.class_name).map_err(MethodCallError::from)?;
    vm.ensure_initialized(declaring)?;
    let holder = vm
        .resolve_static(declaring, member.name)
        .ok_or_else(|| VmError::FieldNotFound(vm.text(member.name).to_string()))?;
    let wide = jtypes::uses_two_slots(vm.text(member.descriptor));
    let value = {
        let frame = top(stack)?;
        if wide {
            frame.stack.pop_wide()?
        } else {
            frame.stack.pop()?
        }
    };
    let class = vm.method_area.get_mut(holder);
    match class.statics.get_mut(&member.name) {
        Some(field) if field.is_static() => field.value = value,
        Some(_) => {
            return Err(VmError::ExecuteCodeError(
                "putstatic on non-static field".to_string(),
            )
            .into())
        }
        None => unreachable!("resolve_static found the holder"),
    }
    let frame = top(stack)?;
    frame.pc += 3;
    step_ok()
}

fn exec_getfield(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16) -> Step {
    let class_id = top(stack)?.class_id;
    let member = vm.method_area.get(class_id).constant_pool.field_ref(index)?;
    let object_value = top(stack)?.stack.pop()?;
    let object = match &object_value {
        Value::Null => return Err(null_pointer(vm, stack, "getfield through null")),
        Value::Ref(object) => object.clone(),
        _ => return Err(VmError::ValueTypeMismatch.into()),
    };
    let field = object
        .borrow()
        .field(member.name)
        .cloned()
        .ok_or_else(|| VmError::FieldNotFound(vm.text(member.name).to_string()))?;
    if field.is_static() {
        return Err(VmError::ExecuteCodeError(format!(
            "getfield on static field {}",
            vm.text(member.name)
        ))
        .into());
    }
    let frame = top(stack)?;
    if jtypes::uses_two_slots(&field.tag) {
        frame.stack.push_wide(field.value)?;
    } else {
        frame.stack.push(field.value)?;
    }
    frame.pc += 3;
    step_ok()
}

fn exec_putfield(vm: &mut VirtualMachine, stack: &mut CallStack, index: u16) -> Step {
    let class_id = top(stack)?.class_id;
    let member = vm.method_area.get(class_id).constant_pool.field_ref(index)?;
    let wide = jtypes::uses_two_slots(vm.text(member.descriptor));
    let (object_value, value) = {
        let frame = top(stack)?;
        let value = if wide {
            frame.stack.pop_wide()?
        } else {
            frame.stack.pop()?
        };
        (frame.stack.pop()?, value)
    };
    let object = match &object_value {
        Value::Null => return Err(null_pointer(vm, stack, "putfield through null")),
        Value::Ref(object) => object.clone(),
        _ => return Err(VmError::ValueTypeMismatch.into()),
    };
    {
        let mut object = object.borrow_mut();
        match object.fields.get_mut(&member.name) {
            None => return Err(VmError::FieldNotFound(vm.text(member.name).to_string()).into()),
            Some(field) if field.is_static() => {
                return Err(VmError::ExecuteCodeError(format!(
                    "putfield on static field {}",
                    vm.text(member.name)
                ))
                .into())
            }
            Some(field) => field.value = value,
        }
    }
    let frame = top(stack)?;
    frame.pc += 3;
    step_ok()
}

// ---------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum InvokeKind {
    Static,
    Special,
    Virtual,
    Interface,
}

fn exec_invoke(vm: &mut VirtualMachine, stack: &mut CallStack, kind: InvokeKind) -> Step {
    let advance = if kind == InvokeKind::Interface { 5 } else { 3 };
    let (caller_class, index) = {
        let frame = top(stack)?;
        (frame.class_id, frame.operand_u16(1)?)
    };
    let member = vm
        .method_area
        .get(caller_class)
        .constant_pool
        .method_ref(index)?;
    let declaring = vm.load_class_id(member.class_name).map_err(MethodCallError::from)?;
    if kind == InvokeKind::Static {
        vm.ensure_initialized(declaring)?;
    }

    let descriptor = jtypes::parse_method_descriptor(vm.text(member.descriptor))?;
    let args = {
        let frame = top(stack)?;
        frame.stack.pop_slots(descriptor.param_slots())?
    };
    let receiver = if kind == InvokeKind::Static {
        None
    } else {
        let value = top(stack)?.stack.pop()?;
        if value.is_null() {
            let what = format!(
                "invoking {}.{} on a null receiver",
                vm.text(member.class_name),
                vm.text(member.name)
            );
            return Err(null_pointer(vm, stack, &what));
        }
        Some(value)
    };

    // Select the target: declared method for static/special, receiver-class
    // walk for virtual/interface.
    let lookup_start = match (kind, &receiver) {
        (InvokeKind::Static, _) | (InvokeKind::Special, _) => declaring,
        (_, Some(Value::Ref(object))) => object.borrow().class,
        (_, Some(_)) => vm.load_class("java/lang/Object").map_err(MethodCallError::from)?,
        (_, None) => unreachable!("instance invoke always has a receiver"),
    };
    let (target_class, method) = vm
        .resolve_method(lookup_start, member.name, member.descriptor)
        .or_else(|| vm.resolve_method(declaring, member.name, member.descriptor))
        .ok_or_else(|| {
            VmError::MethodNotFound(
                vm.text(member.name).to_string(),
                vm.text(member.descriptor).to_string(),
            )
        })?;

    if method.is_native() {
        let key = vm.native_key(
            vm.method_area.get(target_class).name,
            member.name,
            member.descriptor,
        );
        let gmeth = vm
            .natives
            .get(&key)
            .ok_or(VmError::NativeMethodNotFound(key))?;
        if gmeth.param_slots != method.param_slots {
            return Err(VmError::ExecuteCodeError(format!(
                "native method slot count disagrees with descriptor for {}",
                vm.text(member.name)
            ))
            .into());
        }
        // padding slots collapse; the receiver (or stream) rides in front
        let mut call_args: Vec<Value> = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = receiver {
            call_args.push(receiver);
        }
        call_args.extend(args.into_iter().filter(|v| !matches!(v, Value::Padding)));
        let result = (gmeth.func)(vm, stack, call_args)?;
        let frame = top(stack)?;
        if let Some(value) = result {
            if jtypes::uses_two_slots(&descriptor.return_type) {
                frame.stack.push_wide(value)?;
            } else {
                frame.stack.push(value)?;
            }
        }
        frame.pc += advance;
        return step_ok();
    }

    // Bytecode-backed: the caller's PC stays on the invoke while the callee
    // runs (exception handlers match against it); the return path advances
    // it once the callee is done.
    let mut locals: Vec<Value> = Vec::with_capacity(args.len() + 1);
    if let Some(receiver) = receiver {
        locals.push(receiver);
    }
    locals.extend(args);
    let callee = vm.build_frame(target_class, &method, locals)?;
    stack.push(callee).map_err(MethodCallError::from)?;
    step_ok()
}

// ---------------------------------------------------------------------
// Switches
// ---------------------------------------------------------------------

fn exec_tableswitch(stack: &mut CallStack) -> Step {
    let frame = top(stack)?;
    let pc = frame.pc;
    // operands are 4-byte aligned relative to the method start
    let base = (pc + 4) & !3usize;
    let default = frame.operand_i32(base - pc)? as i64;
    let low = frame.operand_i32(base - pc + 4)? as i64;
    let high = frame.operand_i32(base - pc + 8)? as i64;
    let index = frame.stack.pop()?.int()?;
    let offset = if index < low || index > high {
        default
    } else {
        let slot = (index - low) as usize;
        frame.operand_i32(base - pc + 12 + 4 * slot)? as i64
    };
    frame.pc = (pc as i64 + offset) as usize;
    step_ok()
}

fn exec_lookupswitch(stack: &mut CallStack) -> Step {
    let frame = top(stack)?;
    let pc = frame.pc;
    let base = (pc + 4) & !3usize;
    let default = frame.operand_i32(base - pc)? as i64;
    let npairs = frame.operand_i32(base - pc + 4)?;
    let key = frame.stack.pop()?.int()?;
    let mut offset = default;
    for pair in 0..npairs as usize {
        let match_value = frame.operand_i32(base - pc + 8 + 8 * pair)? as i64;
        if match_value == key {
            offset = frame.operand_i32(base - pc + 12 + 8 * pair)? as i64;
            break;
        }
    }
    frame.pc = (pc as i64 + offset) as usize;
    step_ok()
}

// ---------------------------------------------------------------------
// The dispatch switch
// ---------------------------------------------------------------------

fn execute_instruction(vm: &mut VirtualMachine, stack: &mut CallStack) -> Step {
    let depth = stack.depth();
    let (opcode, pc, operand_depth) = {
        let frame = top(stack)?;
        (frame.operand_u8(0)?, frame.pc, frame.stack.depth())
    };
    if log_enabled!(Level::Trace) {
        trace!(
            "{}pc={pc:04} opcode={opcode:#04x} stack_depth={operand_depth}",
            "\t".repeat(depth.saturating_sub(1)),
        );
    }

    match opcode {
        NOP => {
            let frame = top(stack)?;
            frame.pc += 1;
            step_ok()
        }
        ACONST_NULL => push_const(stack, Value::Null, false),
        ICONST_M1 => push_const(stack, Value::Int(-1), false),
        ICONST_0 => push_const(stack, Value::Int(0), false),
        ICONST_1 => push_const(stack, Value::Int(1), false),
        ICONST_2 => push_const(stack, Value::Int(2), false),
        ICONST_3 => push_const(stack, Value::Int(3), false),
        ICONST_4 => push_const(stack, Value::Int(4), false),
        ICONST_5 => push_const(stack, Value::Int(5), false),
        LCONST_0 => push_const(stack, Value::Long(0), true),
        LCONST_1 => push_const(stack, Value::Long(1), true),
        FCONST_0 => push_const(stack, Value::Float(0.0), false),
        FCONST_1 => push_const(stack, Value::Float(1.0), false),
        FCONST_2 => push_const(stack, Value::Float(2.0), false),
        DCONST_0 => push_const(stack, Value::Float(0.0), true),
        DCONST_1 => push_const(stack, Value::Float(1.0), true),
        BIPUSH => {
            let frame = top(stack)?;
            let value = frame.operand_i8(1)? as i64;
            frame.stack.push(Value::Int(value))?;
            frame.pc += 2;
            step_ok()
        }
        SIPUSH => {
            let frame = top(stack)?;
            let value = frame.operand_i16(1)? as i64;
            frame.stack.push(Value::Int(value))?;
            frame.pc += 3;
            step_ok()
        }
        LDC => {
            let index = top(stack)?.operand_u8(1)? as u16;
            exec_ldc(vm, stack, index, 2)
        }
        LDC_W => {
            let index = top(stack)?.operand_u16(1)?;
            exec_ldc(vm, stack, index, 3)
        }
        LDC2_W => {
            let index = top(stack)?.operand_u16(1)?;
            exec_ldc2(vm, stack, index)
        }
        ILOAD | FLOAD | ALOAD => {
            let index = top(stack)?.operand_u8(1)? as usize;
            load_local(stack, index, false, 2)
        }
        LLOAD | DLOAD => {
            let index = top(stack)?.operand_u8(1)? as usize;
            load_local(stack, index, true, 2)
        }
        ILOAD_0 | FLOAD_0 | ALOAD_0 => load_local(stack, 0, false, 1),
        ILOAD_1 | FLOAD_1 | ALOAD_1 => load_local(stack, 1, false, 1),
        ILOAD_2 | FLOAD_2 | ALOAD_2 => load_local(stack, 2, false, 1),
        ILOAD_3 | FLOAD_3 | ALOAD_3 => load_local(stack, 3, false, 1),
        LLOAD_0 | DLOAD_0 => load_local(stack, 0, true, 1),
        LLOAD_1 | DLOAD_1 => load_local(stack, 1, true, 1),
        LLOAD_2 | DLOAD_2 => load_local(stack, 2, true, 1),
        LLOAD_3 | DLOAD_3 => load_local(stack, 3, true, 1),
        IALOAD => array_load(vm, stack, ElementKind::Int),
        LALOAD => array_load(vm, stack, ElementKind::Long),
        FALOAD => array_load(vm, stack, ElementKind::Float),
        DALOAD => array_load(vm, stack, ElementKind::Double),
        AALOAD => array_load(vm, stack, ElementKind::Reference),
        BALOAD => array_load(vm, stack, ElementKind::Byte),
        CALOAD => array_load(vm, stack, ElementKind::Char),
        SALOAD => array_load(vm, stack, ElementKind::Short),
        ISTORE | FSTORE | ASTORE => {
            let index = top(stack)?.operand_u8(1)? as usize;
            store_local(stack, index, false, 2)
        }
        LSTORE | DSTORE => {
            let index = top(stack)?.operand_u8(1)? as usize;
            store_local(stack, index, true, 2)
        }
        ISTORE_0 | FSTORE_0 | ASTORE_0 => store_local(stack, 0, false, 1),
        ISTORE_1 | FSTORE_1 | ASTORE_1 => store_local(stack, 1, false, 1),
        ISTORE_2 | FSTORE_2 | ASTORE_2 => store_local(stack, 2, false, 1),
        ISTORE_3 | FSTORE_3 | ASTORE_3 => store_local(stack, 3, false, 1),
        LSTORE_0 | DSTORE_0 => store_local(stack, 0, true, 1),
        LSTORE_1 | DSTORE_1 => store_local(stack, 1, true, 1),
        LSTORE_2 | DSTORE_2 => store_local(stack, 2, true, 1),
        LSTORE_3 | DSTORE_3 => store_local(stack, 3, true, 1),
        IASTORE => array_store(vm, stack, ElementKind::Int),
        LASTORE => array_store(vm, stack, ElementKind::Long),
        FASTORE => array_store(vm, stack, ElementKind::Float),
        DASTORE => array_store(vm, stack, ElementKind::Double),
        AASTORE => array_store(vm, stack, ElementKind::Reference),
        BASTORE => array_store(vm, stack, ElementKind::Byte),
        CASTORE => array_store(vm, stack, ElementKind::Char),
        SASTORE => array_store(vm, stack, ElementKind::Short),
        POP => {
            let frame = top(stack)?;
            frame.stack.pop()?;
            frame.pc += 1;
            step_ok()
        }
        POP2 => {
            let frame = top(stack)?;
            frame.stack.pop()?;
            frame.stack.pop()?;
            frame.pc += 1;
            step_ok()
        }
        DUP => {
            let frame = top(stack)?;
            frame.stack.dup()?;
            frame.pc += 1;
            step_ok()
        }
        DUP_X1 => {
            let frame = top(stack)?;
            frame.stack.dup_x1()?;
            frame.pc += 1;
            step_ok()
        }
        DUP_X2 => {
            let frame = top(stack)?;
            frame.stack.dup_x2()?;
            frame.pc += 1;
            step_ok()
        }
        DUP2 => {
            let frame = top(stack)?;
            frame.stack.dup2()?;
            frame.pc += 1;
            step_ok()
        }
        DUP2_X1 => {
            let frame = top(stack)?;
            frame.stack.dup2_x1()?;
            frame.pc += 1;
            step_ok()
        }
        DUP2_X2 => {
            let frame = top(stack)?;
            frame.stack.dup2_x2()?;
            frame.pc += 1;
            step_ok()
        }
        SWAP => {
            let frame = top(stack)?;
            frame.stack.swap()?;
            frame.pc += 1;
            step_ok()
        }
        IADD => int_binop(stack, |a, b| a.wrapping_add(b)),
        ISUB => int_binop(stack, |a, b| a.wrapping_sub(b)),
        IMUL => int_binop(stack, |a, b| a.wrapping_mul(b)),
        IAND => int_binop(stack, |a, b| a & b),
        IOR => int_binop(stack, |a, b| a | b),
        IXOR => int_binop(stack, |a, b| a ^ b),
        ISHL => int_binop(stack, |a, b| ((a as i32).wrapping_shl((b & 0x1f) as u32)) as i64),
        ISHR => int_binop(stack, |a, b| ((a as i32) >> (b & 0x1f)) as i64),
        IUSHR => int_binop(stack, |a, b| (((a as u32) >> (b & 0x1f)) as u32) as i64),
        LADD => long_binop(stack, |a, b| a.wrapping_add(b)),
        LSUB => long_binop(stack, |a, b| a.wrapping_sub(b)),
        LMUL => long_binop(stack, |a, b| a.wrapping_mul(b)),
        LAND => long_binop(stack, |a, b| a & b),
        LOR => long_binop(stack, |a, b| a | b),
        LXOR => long_binop(stack, |a, b| a ^ b),
        LSHL => long_shift(stack, |a, b| a.wrapping_shl((b & 0x3f) as u32)),
        LSHR => long_shift(stack, |a, b| a >> (b & 0x3f)),
        LUSHR => long_shift(stack, |a, b| ((a as u64) >> (b & 0x3f)) as i64),
        FADD => float_binop(stack, |a, b| a + b),
        FSUB => float_binop(stack, |a, b| a - b),
        FMUL => float_binop(stack, |a, b| a * b),
        FDIV => float_binop(stack, |a, b| a / b),
        FREM => float_binop(stack, |a, b| a % b),
        DADD => double_binop(stack, |a, b| a + b),
        DSUB => double_binop(stack, |a, b| a - b),
        DMUL => double_binop(stack, |a, b| a * b),
        DDIV => double_binop(stack, |a, b| a / b),
        DREM => double_binop(stack, |a, b| a % b),
        IDIV => int_div_rem(vm, stack, false),
        IREM => int_div_rem(vm, stack, true),
        LDIV => long_div_rem(vm, stack, false),
        LREM => long_div_rem(vm, stack, true),
        INEG => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push(Value::Int(jint((value as i32).wrapping_neg() as i64)))?;
            frame.pc += 1;
            step_ok()
        }
        LNEG => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.long()?;
            frame.stack.push_wide(Value::Long(value.wrapping_neg()))?;
            frame.pc += 1;
            step_ok()
        }
        FNEG => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.float()?;
            frame.stack.push(Value::Float(-value))?;
            frame.pc += 1;
            step_ok()
        }
        DNEG => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.float()?;
            frame.stack.push_wide(Value::Float(-value))?;
            frame.pc += 1;
            step_ok()
        }
        IINC => {
            let frame = top(stack)?;
            let index = frame.operand_u8(1)? as usize;
            let delta = frame.operand_i8(2)? as i64;
            let value = frame.local(index)?.int()?;
            frame.set_local(index, Value::Int(jint(value + delta)))?;
            frame.pc += 3;
            step_ok()
        }
        I2L => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push_wide(Value::Long(value))?;
            frame.pc += 1;
            step_ok()
        }
        I2F => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push(Value::Float((value as i32 as f32) as f64))?;
            frame.pc += 1;
            step_ok()
        }
        I2D => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push_wide(Value::Float(value as f64))?;
            frame.pc += 1;
            step_ok()
        }
        L2I => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.long()?;
            frame.stack.push(Value::Int(jint(value)))?;
            frame.pc += 1;
            step_ok()
        }
        L2F => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.long()?;
            frame.stack.push(Value::Float((value as f32) as f64))?;
            frame.pc += 1;
            step_ok()
        }
        L2D => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.long()?;
            frame.stack.push_wide(Value::Float(value as f64))?;
            frame.pc += 1;
            step_ok()
        }
        F2I | D2I => {
            let frame = top(stack)?;
            let value = if opcode == F2I {
                frame.stack.pop()?.float()?
            } else {
                frame.stack.pop_wide()?.float()?
            };
            frame.stack.push(Value::Int(value as i32 as i64))?;
            frame.pc += 1;
            step_ok()
        }
        F2L | D2L => {
            let frame = top(stack)?;
            let value = if opcode == F2L {
                frame.stack.pop()?.float()?
            } else {
                frame.stack.pop_wide()?.float()?
            };
            frame.stack.push_wide(Value::Long(value as i64))?;
            frame.pc += 1;
            step_ok()
        }
        F2D => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.float()?;
            frame.stack.push_wide(Value::Float(value))?;
            frame.pc += 1;
            step_ok()
        }
        D2F => {
            let frame = top(stack)?;
            let value = frame.stack.pop_wide()?.float()?;
            frame.stack.push(Value::Float((value as f32) as f64))?;
            frame.pc += 1;
            step_ok()
        }
        I2B => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push(Value::Int(value as i8 as i64))?;
            frame.pc += 1;
            step_ok()
        }
        I2C => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push(Value::Int(value as u16 as i64))?;
            frame.pc += 1;
            step_ok()
        }
        I2S => {
            let frame = top(stack)?;
            let value = frame.stack.pop()?.int()?;
            frame.stack.push(Value::Int(value as i16 as i64))?;
            frame.pc += 1;
            step_ok()
        }
        LCMP => {
            let frame = top(stack)?;
            let b = frame.stack.pop_wide()?.long()?;
            let a = frame.stack.pop_wide()?.long()?;
            frame.stack.push(Value::Int(match a.cmp(&b) {
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
            }))?;
            frame.pc += 1;
            step_ok()
        }
        FCMPL => float_cmp(stack, false, -1),
        FCMPG => float_cmp(stack, false, 1),
        DCMPL => float_cmp(stack, true, -1),
        DCMPG => float_cmp(stack, true, 1),
        IFEQ => if_int(stack, |v| v == 0),
        IFNE => if_int(stack, |v| v != 0),
        IFLT => if_int(stack, |v| v < 0),
        IFGE => if_int(stack, |v| v >= 0),
        IFGT => if_int(stack, |v| v > 0),
        IFLE => if_int(stack, |v| v <= 0),
        IF_ICMPEQ => if_icmp(stack, |a, b| a == b),
        IF_ICMPNE => if_icmp(stack, |a, b| a != b),
        IF_ICMPLT => if_icmp(stack, |a, b| a < b),
        IF_ICMPGE => if_icmp(stack, |a, b| a >= b),
        IF_ICMPGT => if_icmp(stack, |a, b| a > b),
        IF_ICMPLE => if_icmp(stack, |a, b| a <= b),
        IF_ACMPEQ | IF_ACMPNE => {
            let taken = {
                let frame = top(stack)?;
                let b = frame.stack.pop()?;
                let a = frame.stack.pop()?;
                if !a.is_reference() || !b.is_reference() {
                    return Err(VmError::ValueTypeMismatch.into());
                }
                if opcode == IF_ACMPEQ {
                    a == b
                } else {
                    a != b
                }
            };
            branch_if(stack, taken)
        }
        IFNULL | IFNONNULL => {
            let taken = {
                let frame = top(stack)?;
                let value = frame.stack.pop()?;
                if !value.is_reference() {
                    return Err(VmError::ValueTypeMismatch.into());
                }
                value.is_null() == (opcode == IFNULL)
            };
            branch_if(stack, taken)
        }
        GOTO => {
            let frame = top(stack)?;
            let offset = frame.operand_i16(1)? as i64;
            frame.pc = (frame.pc as i64 + offset) as usize;
            step_ok()
        }
        GOTO_W => {
            let frame = top(stack)?;
            let offset = frame.operand_i32(1)? as i64;
            frame.pc = (frame.pc as i64 + offset) as usize;
            step_ok()
        }
        JSR => {
            let frame = top(stack)?;
            let offset = frame.operand_i16(1)? as i64;
            // the return address is an int value; ret reads it back
            frame.stack.push(Value::Int((frame.pc + 3) as i64))?;
            frame.pc = (frame.pc as i64 + offset) as usize;
            step_ok()
        }
        JSR_W => {
            let frame = top(stack)?;
            let offset = frame.operand_i32(1)? as i64;
            frame.stack.push(Value::Int((frame.pc + 5) as i64))?;
            frame.pc = (frame.pc as i64 + offset) as usize;
            step_ok()
        }
        RET => {
            let frame = top(stack)?;
            let index = frame.operand_u8(1)? as usize;
            frame.pc = frame.local(index)?.int()? as usize;
            step_ok()
        }
        TABLESWITCH => exec_tableswitch(stack),
        LOOKUPSWITCH => exec_lookupswitch(stack),
        IRETURN => {
            let value = top(stack)?.stack.pop()?;
            value.int()?;
            Ok(Control::Return {
                value: Some(value),
                wide: false,
            })
        }
        FRETURN => {
            let value = top(stack)?.stack.pop()?;
            value.float()?;
            Ok(Control::Return {
                value: Some(value),
                wide: false,
            })
        }
        LRETURN => {
            let value = top(stack)?.stack.pop_wide()?;
            value.long()?;
            Ok(Control::Return {
                value: Some(value),
                wide: true,
            })
        }
        DRETURN => {
            let value = top(stack)?.stack.pop_wide()?;
            value.float()?;
            Ok(Control::Return {
                value: Some(value),
                wide: true,
            })
        }
        ARETURN => {
            let value = top(stack)?.stack.pop()?;
            if !value.is_reference() && !matches!(value, Value::Class(_)) {
                return Err(VmError::ValueTypeMismatch.into());
            }
            Ok(Control::Return {
                value: Some(value),
                wide: false,
            })
        }
        RETURN => Ok(Control::Return {
            value: None,
            wide: false,
        }),
        GETSTATIC => {
            let index = top(stack)?.operand_u16(1)?;
            exec_getstatic(vm, stack, index)
        }
        PUTSTATIC => {
            let index = top(stack)?.operand_u16(1)?;
            exec_putstatic(vm, stack, index)
        }
        GETFIELD => {
            let index = top(stack)?.operand_u16(1)?;
            exec_getfield(vm, stack, index)
        }
        PUTFIELD => {
            let index = top(stack)?.operand_u16(1)?;
            exec_putfield(vm, stack, index)
        }
        INVOKEVIRTUAL => exec_invoke(vm, stack, InvokeKind::Virtual),
        INVOKESPECIAL => exec_invoke(vm, stack, InvokeKind::Special),
        INVOKESTATIC => exec_invoke(vm, stack, InvokeKind::Static),
        INVOKEINTERFACE => exec_invoke(vm, stack, InvokeKind::Interface),
        INVOKEDYNAMIC => Err(VmError::ExecuteCodeError(
            "invokedynamic is not supported".to_string(),
        )
        .into()),
        NEW => {
            let index = top(stack)?.operand_u16(1)?;
            let class_id = top(stack)?.class_id;
            let name = vm.method_area.get(class_id).constant_pool.class_ref(index)?;
            let target = vm.load_class_id(name).map_err(MethodCallError::from)?;
            vm.ensure_initialized(target)?;
            let object = vm.new_object(target);
            let frame = top(stack)?;
            frame.stack.push(object)?;
            frame.pc += 3;
            step_ok()
        }
        NEWARRAY => {
            let atype = top(stack)?.operand_u8(1)?;
            let count = top(stack)?.stack.pop()?.int()?;
            if count < 0 {
                return Err(vm.make_throwable(stack, NEGATIVE_ARRAY_SIZE, &count.to_string()));
            }
            let tag = newarray_tag(atype)?;
            let array = vm.new_primitive_array(tag, count as usize);
            let frame = top(stack)?;
            frame.stack.push(array)?;
            frame.pc += 2;
            step_ok()
        }
        ANEWARRAY => {
            let index = top(stack)?.operand_u16(1)?;
            let class_id = top(stack)?.class_id;
            let name = vm.method_area.get(class_id).constant_pool.class_ref(index)?;
            let count = top(stack)?.stack.pop()?.int()?;
            if count < 0 {
                return Err(vm.make_throwable(stack, NEGATIVE_ARRAY_SIZE, &count.to_string()));
            }
            let element_name = vm.text(name).to_string();
            vm.load_class(&element_name).map_err(MethodCallError::from)?;
            let array = if element_name.starts_with('[') {
                Value::Array(Rc::new(RefCell::new(JavaArray::new(
                    &element_name,
                    count as usize,
                ))))
            } else {
                vm.new_reference_array(&element_name, count as usize)
            };
            let frame = top(stack)?;
            frame.stack.push(array)?;
            frame.pc += 3;
            step_ok()
        }
        MULTIANEWARRAY => {
            let (index, dimensions) = {
                let frame = top(stack)?;
                (frame.operand_u16(1)?, frame.operand_u8(3)? as usize)
            };
            let class_id = top(stack)?.class_id;
            let name = vm.method_area.get(class_id).constant_pool.class_ref(index)?;
            let descriptor = vm.text(name).to_string();
            let counts = {
                let frame = top(stack)?;
                let mut counts = frame.stack.pop_slots(dimensions)?;
                counts
                    .drain(..)
                    .map(|v| v.int())
                    .collect::<VmExecResult<Vec<i64>>>()?
            };
            if let Some(count) = counts.iter().find(|c| **c < 0) {
                return Err(vm.make_throwable(stack, NEGATIVE_ARRAY_SIZE, &count.to_string()));
            }
            let array = build_multi_array(vm, &descriptor, &counts)?;
            let frame = top(stack)?;
            frame.stack.push(array)?;
            frame.pc += 4;
            step_ok()
        }
        ARRAYLENGTH => {
            let value = top(stack)?.stack.pop()?;
            let length = match &value {
                Value::Null => return Err(null_pointer(vm, stack, "arraylength on null")),
                Value::Array(array) => array.borrow().elements.len(),
                Value::Bytes(bytes) => bytes.borrow().len(),
                _ => return Err(VmError::ValueTypeMismatch.into()),
            };
            let frame = top(stack)?;
            frame.stack.push(Value::Int(length as i64))?;
            frame.pc += 1;
            step_ok()
        }
        ATHROW => {
            let value = top(stack)?.stack.pop()?;
            match value {
                Value::Null => Err(null_pointer(vm, stack, "athrow on null")),
                value @ Value::Ref(_) => Err(MethodCallError::JavaException(value)),
                _ => Err(VmError::ValueTypeMismatch.into()),
            }
        }
        CHECKCAST => {
            let index = top(stack)?.operand_u16(1)?;
            let class_id = top(stack)?.class_id;
            let name = vm.method_area.get(class_id).constant_pool.class_ref(index)?;
            let target_name = vm.text(name).to_string();
            let value = top(stack)?.stack.pop()?;
            // null always passes checkcast
            if !value.is_null() && !vm.instance_of(&value, &target_name)? {
                let what = format!("value cannot be cast to {target_name}");
                return Err(vm.make_throwable(stack, CLASS_CAST_EXCEPTION, &what));
            }
            let frame = top(stack)?;
            frame.stack.push(value)?;
            frame.pc += 3;
            step_ok()
        }
        INSTANCEOF => {
            let index = top(stack)?.operand_u16(1)?;
            let class_id = top(stack)?.class_id;
            let name = vm.method_area.get(class_id).constant_pool.class_ref(index)?;
            let target_name = vm.text(name).to_string();
            let value = top(stack)?.stack.pop()?;
            let result = vm.instance_of(&value, &target_name)?;
            let frame = top(stack)?;
            frame.stack.push(Value::Int(result as i64))?;
            frame.pc += 3;
            step_ok()
        }
        MONITORENTER | MONITOREXIT => {
            // single-threaded cooperative model: the pop is the whole story
            let frame = top(stack)?;
            let value = frame.stack.pop()?;
            if !value.is_reference() {
                return Err(VmError::ValueTypeMismatch.into());
            }
            frame.pc += 1;
            step_ok()
        }
        WIDE => {
            let (widened, index, wide_pc) = {
                let frame = top(stack)?;
                (frame.operand_u8(1)?, frame.operand_u16(2)? as usize, frame.pc)
            };
            match widened {
                ILOAD | FLOAD | ALOAD => load_local(stack, index, false, 4),
                LLOAD | DLOAD => load_local(stack, index, true, 4),
                ISTORE | FSTORE | ASTORE => store_local(stack, index, false, 4),
                LSTORE | DSTORE => store_local(stack, index, true, 4),
                IINC => {
                    let frame = top(stack)?;
                    let delta = frame.operand_i16(4)? as i64;
                    let value = frame.local(index)?.int()?;
                    frame.set_local(index, Value::Int(jint(value + delta)))?;
                    frame.pc += 6;
                    step_ok()
                }
                RET => {
                    let frame = top(stack)?;
                    frame.pc = frame.local(index)?.int()? as usize;
                    step_ok()
                }
                other => Err(VmError::InvalidOpcode {
                    opcode: other,
                    pc: wide_pc,
                }
                .into()),
            }
        }
        IMPDEP2 => {
            let frame = top(stack)?;
            let fault = frame.operand_u8(1)?;
            let at = frame.operand_u16(2)?;
            let what = match fault {
                FAULT_STACK_OVERFLOW => "stack overflow",
                FAULT_STACK_UNDERFLOW => "stack underflow",
                _ => "unknown internal fault",
            };
            let message = format!("{what} occurred at PC {at:03}");
            error!("{message}");
            Err(VmError::ExecuteCodeError(message).into())
        }
        other => {
            let pc = top(stack)?.pc;
            Err(VmError::InvalidOpcode { opcode: other, pc }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::loaded_class::{Class, ClassOrigin, ClassStatus, LoaderKind};
    use crate::runtime_constant_pool::RuntimeConstantPool;
    use classfile::attribute_info::{CodeAttribute, ExceptionTableEntry};
    use classfile::constant_pool::{ConstantPool, CpEntry};
    use indexmap::IndexMap;

    fn test_vm() -> VirtualMachine {
        let mut vm = VirtualMachine::new();
        vm.load_base_classes().unwrap();
        vm
    }

    /// Pushes a frame running `code` against java/lang/Object's (empty)
    /// constant pool. Wide locals must include their padding slot.
    fn push_frame(
        vm: &mut VirtualMachine,
        stack: &mut CallStack,
        class_id: ClassId,
        code: Vec<u8>,
        max_stack: u16,
        locals: Vec<Value>,
        handlers: Vec<ExceptionTableEntry>,
    ) {
        let method_name = vm.intern("probe");
        let descriptor = vm.intern("()V");
        let code = Rc::new(CodeAttribute {
            max_stack,
            max_locals: locals.len() as u16,
            code,
            exception_table: handlers,
            ..CodeAttribute::default()
        });
        let class_name = vm.method_area.get(class_id).name;
        let frame = Frame::new(class_id, class_name, method_name, descriptor, code, locals);
        stack.push(frame).unwrap();
    }

    fn run_code_in(
        vm: &mut VirtualMachine,
        code: Vec<u8>,
        max_stack: u16,
        locals: Vec<Value>,
        handlers: Vec<ExceptionTableEntry>,
    ) -> InvokeResult {
        let class_id = vm.load_class("java/lang/Object").unwrap();
        let mut stack = CallStack::new();
        push_frame(vm, &mut stack, class_id, code, max_stack, locals, handlers);
        run(vm, &mut stack)
    }

    fn run_code(code: Vec<u8>, max_stack: u16, locals: Vec<Value>) -> InvokeResult {
        let mut vm = test_vm();
        run_code_in(&mut vm, code, max_stack, locals, Vec::new())
    }

    fn int_result(result: InvokeResult) -> i64 {
        match result {
            Ok(Some(Value::Int(v))) => v,
            other => panic!("expected an int result, got {other:?}"),
        }
    }

    #[test]
    fn sipush_builds_258_from_two_bytes() {
        let result = run_code(vec![SIPUSH, 0x01, 0x02, IRETURN], 1, Vec::new());
        assert_eq!(258, int_result(result));
    }

    #[test]
    fn bipush_sign_extends() {
        let result = run_code(vec![BIPUSH, 0xFF, IRETURN], 1, Vec::new());
        assert_eq!(-1, int_result(result));
    }

    #[test]
    fn irem_by_zero_raises_arithmetic_exception() {
        let mut vm = test_vm();
        let result = run_code_in(
            &mut vm,
            vec![BIPUSH, 6, ICONST_0, IREM, IRETURN],
            2,
            Vec::new(),
            Vec::new(),
        );
        match result {
            Err(MethodCallError::JavaException(throwable)) => {
                let text = vm.format_uncaught(&throwable);
                assert!(text.contains("java.lang.ArithmeticException"), "{text}");
                assert!(text.contains("divide by zero"), "{text}");
            }
            other => panic!("expected a guest exception, got {other:?}"),
        }
    }

    #[test]
    fn idiv_by_zero_raises_ldiv_too() {
        let mut vm = test_vm();
        let int_div = run_code_in(
            &mut vm,
            vec![BIPUSH, 6, ICONST_0, IDIV, IRETURN],
            2,
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(int_div, Err(MethodCallError::JavaException(_))));
        let long_div = run_code_in(
            &mut vm,
            vec![LLOAD_0, LCONST_0, LDIV, LRETURN],
            4,
            vec![Value::Long(6), Value::Padding],
            Vec::new(),
        );
        assert!(matches!(long_div, Err(MethodCallError::JavaException(_))));
    }

    #[test]
    fn iushr_is_a_logical_shift() {
        let result = run_code(
            vec![SIPUSH, 0xFF, 0x38, ICONST_3, IUSHR, IRETURN],
            2,
            Vec::new(),
        );
        // -200 >>> 3 zero-fills from the left: 0x1FFFFFE7
        assert_eq!(536870887, int_result(result));
    }

    #[test]
    fn iushr_by_zero_is_identity() {
        for x in [0i64, 1, -1, -200, i32::MAX as i64, i32::MIN as i64] {
            let result = run_code(
                vec![ILOAD_0, ICONST_0, IUSHR, IRETURN],
                2,
                vec![Value::Int(x)],
            );
            assert_eq!(x, int_result(result));
        }
    }

    #[test]
    fn ishl_and_ishr_are_arithmetic() {
        let shl = run_code(vec![BIPUSH, 22, ICONST_3, ISHL, IRETURN], 2, Vec::new());
        assert_eq!(176, int_result(shl));
        let shr = run_code(
            vec![SIPUSH, 0xFF, 0x38, ICONST_3, ISHR, IRETURN],
            2,
            Vec::new(),
        );
        assert_eq!(-25, int_result(shr));
    }

    #[test]
    fn shift_counts_are_masked() {
        // shifting an int by 33 behaves like shifting by 1
        let result = run_code(
            vec![ICONST_1, BIPUSH, 33, ISHL, IRETURN],
            2,
            Vec::new(),
        );
        assert_eq!(2, int_result(result));
        // long shifts mask to six bits: 65 behaves like 1
        let result = run_code(
            vec![LCONST_1, BIPUSH, 65, LSHL, LRETURN],
            3,
            Vec::new(),
        );
        assert_eq!(Ok(Some(Value::Long(2))), result.map_err(|_| ()));
    }

    #[test]
    fn ineg_twice_is_identity() {
        for x in [0i64, 1, -1, 42, i32::MAX as i64, i32::MIN as i64] {
            let result = run_code(
                vec![ILOAD_0, INEG, INEG, IRETURN],
                1,
                vec![Value::Int(x)],
            );
            assert_eq!(x, int_result(result));
        }
    }

    #[test]
    fn iadd_commutes_and_isub_cancels_mod_2_32() {
        let pairs = [
            (1i64, 2i64),
            (-5, 7),
            (i32::MAX as i64, 1),
            (i32::MIN as i64, -1),
            (123456789, 987654321),
        ];
        for (x, y) in pairs {
            let a = run_code(
                vec![ILOAD_0, ILOAD_1, IADD, IRETURN],
                2,
                vec![Value::Int(x), Value::Int(y)],
            );
            let b = run_code(
                vec![ILOAD_1, ILOAD_0, IADD, IRETURN],
                2,
                vec![Value::Int(x), Value::Int(y)],
            );
            assert_eq!(int_result(a), int_result(b));

            let cancelled = run_code(
                vec![ILOAD_0, ILOAD_1, IADD, ILOAD_1, ISUB, IRETURN],
                2,
                vec![Value::Int(x), Value::Int(y)],
            );
            assert_eq!(x, int_result(cancelled));
        }
    }

    #[test]
    fn iadd_wraps_two_complement() {
        let result = run_code(
            vec![ILOAD_0, ICONST_1, IADD, IRETURN],
            2,
            vec![Value::Int(i32::MAX as i64)],
        );
        assert_eq!(i32::MIN as i64, int_result(result));
    }

    #[test]
    fn lshl_then_lshr_round_trips_non_negative_longs() {
        for v in [0i64, 1, 255, 1 << 40] {
            for shift in [0u8, 1, 7, 20] {
                let result = run_code(
                    vec![LLOAD_0, BIPUSH, shift, LSHL, BIPUSH, shift, LSHR, LRETURN],
                    3,
                    vec![Value::Long(v), Value::Padding],
                );
                assert_eq!(Ok(Some(Value::Long(v))), result.map_err(|_| ()), "v={v} shift={shift}");
            }
        }
    }

    #[test]
    fn narrowing_conversions_truncate() {
        let i2b = run_code(
            vec![SIPUSH, 0x01, 0x80, I2B, IRETURN],
            1,
            Vec::new(),
        );
        assert_eq!(-128, int_result(i2b));
        let i2c = run_code(vec![ICONST_M1, I2C, IRETURN], 1, Vec::new());
        assert_eq!(0xFFFF, int_result(i2c));
        // 0x7FFF + 1 narrows to the most negative short
        let i2s = run_code(
            vec![SIPUSH, 0x7F, 0xFF, ICONST_1, IADD, I2S, IRETURN],
            2,
            Vec::new(),
        );
        assert_eq!(-32768, int_result(i2s));
    }

    #[test]
    fn lcmp_yields_sign() {
        for (a, b, expected) in [(1i64, 2i64, -1i64), (2, 1, 1), (5, 5, 0)] {
            let result = run_code(
                vec![LLOAD_0, LLOAD_2, LCMP, IRETURN],
                4,
                vec![Value::Long(a), Value::Padding, Value::Long(b), Value::Padding],
            );
            assert_eq!(expected, int_result(result), "a={a} b={b}");
        }
    }

    #[test]
    fn float_compare_treats_nan_by_suffix() {
        let fcmpg = run_code(
            vec![FLOAD_0, FLOAD_1, FCMPG, IRETURN],
            2,
            vec![Value::Float(f64::NAN), Value::Float(1.0)],
        );
        assert_eq!(1, int_result(fcmpg));
        let fcmpl = run_code(
            vec![FLOAD_0, FLOAD_1, FCMPL, IRETURN],
            2,
            vec![Value::Float(f64::NAN), Value::Float(1.0)],
        );
        assert_eq!(-1, int_result(fcmpl));
        let dcmpg = run_code(
            vec![DLOAD_0, DLOAD_2, DCMPG, IRETURN],
            4,
            vec![
                Value::Float(2.5),
                Value::Padding,
                Value::Float(2.5),
                Value::Padding,
            ],
        );
        assert_eq!(0, int_result(dcmpg));
    }

    #[test]
    fn if_icmplt_branches_by_signed_offset() {
        let code = vec![
            ILOAD_0, ILOAD_1, IF_ICMPLT, 0x00, 0x05, ICONST_0, IRETURN, ICONST_1, IRETURN,
        ];
        let less = run_code(code.clone(), 2, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(1, int_result(less));
        let not_less = run_code(code, 2, vec![Value::Int(3), Value::Int(2)]);
        assert_eq!(0, int_result(not_less));
    }

    #[test]
    fn goto_can_branch_backwards() {
        // count local 0 down to zero, then return it
        let code = vec![
            ILOAD_0, IFLE, 0x00, 0x09, IINC, 0, 0xFF, GOTO, 0xFF, 0xF9, ILOAD_0, IRETURN,
        ];
        let result = run_code(code, 1, vec![Value::Int(3)]);
        assert_eq!(0, int_result(result));
    }

    #[test]
    fn tableswitch_selects_by_index() {
        let mut code = vec![ILOAD_0, TABLESWITCH, 0, 0];
        let put = |code: &mut Vec<u8>, v: i32| code.extend_from_slice(&v.to_be_bytes());
        put(&mut code, 27); // default -> pc 28
        put(&mut code, 0); // low
        put(&mut code, 1); // high
        put(&mut code, 23); // case 0 -> pc 24
        put(&mut code, 25); // case 1 -> pc 26
        code.extend_from_slice(&[ICONST_0, IRETURN, ICONST_1, IRETURN, ICONST_M1, IRETURN]);
        for (input, expected) in [(0i64, 0i64), (1, 1), (7, -1), (-3, -1)] {
            let result = run_code(code.clone(), 1, vec![Value::Int(input)]);
            assert_eq!(expected, int_result(result), "input {input}");
        }
    }

    #[test]
    fn lookupswitch_matches_sparse_keys() {
        let mut code = vec![ILOAD_0, LOOKUPSWITCH, 0, 0];
        let put = |code: &mut Vec<u8>, v: i32| code.extend_from_slice(&v.to_be_bytes());
        put(&mut code, 19); // default -> pc 20
        put(&mut code, 1); // npairs
        put(&mut code, 1000); // key
        put(&mut code, 21); // -> pc 22
        code.extend_from_slice(&[ICONST_0, IRETURN, ICONST_1, IRETURN]);
        assert_eq!(1, int_result(run_code(code.clone(), 1, vec![Value::Int(1000)])));
        assert_eq!(0, int_result(run_code(code, 1, vec![Value::Int(-7)])));
    }

    #[test]
    fn operand_stack_overflow_reports_through_impdep2() {
        // max_stack is 1; the second push faults at PC 001
        let result = run_code(vec![ICONST_0, ICONST_0, POP, POP, RETURN], 1, Vec::new());
        match result {
            Err(MethodCallError::Internal(VmError::ExecuteCodeError(message))) => {
                assert!(message.contains("stack overflow"), "{message}");
                assert!(message.contains("001"), "{message}");
            }
            other => panic!("expected an internal fault, got {other:?}"),
        }
    }

    #[test]
    fn operand_stack_underflow_reports_through_impdep2() {
        let result = run_code(vec![POP, RETURN], 1, Vec::new());
        match result {
            Err(MethodCallError::Internal(VmError::ExecuteCodeError(message))) => {
                assert!(message.contains("stack underflow"), "{message}");
                assert!(message.contains("000"), "{message}");
            }
            other => panic!("expected an internal fault, got {other:?}"),
        }
    }

    #[test]
    fn invalid_opcode_is_fatal_and_names_the_byte() {
        let result = run_code(vec![0xEB], 1, Vec::new());
        match result {
            Err(MethodCallError::Internal(VmError::InvalidOpcode { opcode, pc })) => {
                assert_eq!(0xEB, opcode);
                assert_eq!(0, pc);
            }
            other => panic!("expected invalid opcode, got {other:?}"),
        }
    }

    #[test]
    fn exception_table_catches_matching_guest_exception() {
        // try { return 6 % 0; } catch (ArithmeticException e) { return 2; }
        let code = vec![BIPUSH, 6, ICONST_0, IREM, IRETURN, POP, ICONST_2, IRETURN];
        let handlers = vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 5,
            handler_pc: 5,
            catch_type: Some("java/lang/ArithmeticException".to_string()),
        }];
        let mut vm = test_vm();
        let result = run_code_in(&mut vm, code, 2, Vec::new(), handlers);
        assert_eq!(2, int_result(result));
    }

    #[test]
    fn unmatched_catch_type_keeps_unwinding() {
        let code = vec![BIPUSH, 6, ICONST_0, IREM, IRETURN, POP, ICONST_2, IRETURN];
        let handlers = vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 5,
            handler_pc: 5,
            catch_type: Some("java/lang/ClassCastException".to_string()),
        }];
        let mut vm = test_vm();
        let result = run_code_in(&mut vm, code, 2, Vec::new(), handlers);
        assert!(matches!(result, Err(MethodCallError::JavaException(_))));
    }

    #[test]
    fn catch_all_entry_handles_anything() {
        let code = vec![BIPUSH, 6, ICONST_0, IDIV, IRETURN, POP, ICONST_3, IRETURN];
        let handlers = vec![ExceptionTableEntry {
            start_pc: 0,
            end_pc: 5,
            handler_pc: 5,
            catch_type: None,
        }];
        let mut vm = test_vm();
        let result = run_code_in(&mut vm, code, 2, Vec::new(), handlers);
        assert_eq!(3, int_result(result));
    }

    /// A scratch class whose pool holds a Class entry for
    /// java/lang/String at index 2.
    fn class_with_string_constant(vm: &mut VirtualMachine) -> ClassId {
        let mut cp = ConstantPool::new();
        cp.add(CpEntry::Utf8("java/lang/String".to_string()));
        cp.add(CpEntry::Class { name_index: 1 });
        let constant_pool = RuntimeConstantPool::resolve(&cp, &mut vm.string_pool).unwrap();
        let class = Class {
            name: vm.intern("Probe"),
            super_name: Some(vm.intern("java/lang/Object")),
            interfaces: Vec::new(),
            access_flags: Default::default(),
            constant_pool,
            fields: Vec::new(),
            methods: Vec::new(),
            statics: IndexMap::new(),
            attributes: Vec::new(),
            source_file: None,
            loader: LoaderKind::Bootstrap,
            origin: ClassOrigin::BuiltIn,
            status: ClassStatus::Linked,
        };
        vm.method_area.insert(class).unwrap()
    }

    #[test]
    fn instanceof_is_zero_for_null_and_one_for_strings() {
        let mut vm = test_vm();
        let class_id = class_with_string_constant(&mut vm);
        let code = vec![ALOAD_0, INSTANCEOF, 0x00, 0x02, IRETURN];

        let mut stack = CallStack::new();
        push_frame(
            &mut vm,
            &mut stack,
            class_id,
            code.clone(),
            1,
            vec![Value::Null],
            Vec::new(),
        );
        assert_eq!(0, int_result(run(&mut vm, &mut stack)));

        let string = vm.new_string("howdy").unwrap();
        let mut stack = CallStack::new();
        push_frame(
            &mut vm,
            &mut stack,
            class_id,
            code,
            1,
            vec![string],
            Vec::new(),
        );
        assert_eq!(1, int_result(run(&mut vm, &mut stack)));
    }

    #[test]
    fn checkcast_passes_null_and_throws_on_mismatch() {
        let mut vm = test_vm();
        let class_id = class_with_string_constant(&mut vm);
        let code = vec![ALOAD_0, CHECKCAST, 0x00, 0x02, ARETURN];

        let mut stack = CallStack::new();
        push_frame(
            &mut vm,
            &mut stack,
            class_id,
            code.clone(),
            1,
            vec![Value::Null],
            Vec::new(),
        );
        assert_eq!(Ok(Some(Value::Null)), run(&mut vm, &mut stack).map_err(|_| ()));

        let not_a_string = vm.new_object_by_name("java/lang/Integer").unwrap();
        let mut stack = CallStack::new();
        push_frame(
            &mut vm,
            &mut stack,
            class_id,
            code,
            1,
            vec![not_a_string],
            Vec::new(),
        );
        match run(&mut vm, &mut stack) {
            Err(MethodCallError::JavaException(throwable)) => {
                let text = vm.format_uncaught(&throwable);
                assert!(text.contains("ClassCastException"), "{text}");
            }
            other => panic!("expected ClassCastException, got {other:?}"),
        }
    }

    #[test]
    fn arrays_allocate_load_store_and_bound_check() {
        // int[] a = new int[3]; a[1] = 41; return a[1] + a.length;
        let code = vec![
            ICONST_3, NEWARRAY, T_INT, ASTORE_0, ALOAD_0, ICONST_1, BIPUSH, 41, IASTORE, ALOAD_0,
            ICONST_1, IALOAD, ALOAD_0, ARRAYLENGTH, IADD, IRETURN,
        ];
        assert_eq!(44, int_result(run_code(code, 3, vec![Value::Null])));

        // byte arrays go through the byte-array representation and
        // sign-extend on load
        let code = vec![
            ICONST_2, NEWARRAY, T_BYTE, ASTORE_0, ALOAD_0, ICONST_0, SIPUSH, 0x00, 0xFF, BASTORE,
            ALOAD_0, ICONST_0, BALOAD, IRETURN,
        ];
        assert_eq!(-1, int_result(run_code(code, 3, vec![Value::Null])));

        // out-of-bounds store raises the guest exception
        let code = vec![
            ICONST_1, NEWARRAY, T_INT, ASTORE_0, ALOAD_0, ICONST_5, ICONST_0, IASTORE, RETURN,
        ];
        let mut vm = test_vm();
        match run_code_in(&mut vm, code, 3, vec![Value::Null], Vec::new()) {
            Err(MethodCallError::JavaException(throwable)) => {
                let text = vm.format_uncaught(&throwable);
                assert!(text.contains("ArrayIndexOutOfBoundsException"), "{text}");
                assert!(text.contains("Index 5 out of bounds for length 1"), "{text}");
            }
            other => panic!("expected bounds failure, got {other:?}"),
        }
    }

    #[test]
    fn negative_array_size_is_a_guest_exception() {
        let mut vm = test_vm();
        let code = vec![ICONST_M1, NEWARRAY, T_INT, RETURN];
        match run_code_in(&mut vm, code, 1, Vec::new(), Vec::new()) {
            Err(MethodCallError::JavaException(throwable)) => {
                let text = vm.format_uncaught(&throwable);
                assert!(text.contains("NegativeArraySizeException"), "{text}");
            }
            other => panic!("expected NegativeArraySizeException, got {other:?}"),
        }
    }

    #[test]
    fn wide_forms_address_big_local_indices() {
        let mut locals = vec![Value::Int(0); 300];
        locals[260] = Value::Int(9);
        let code = vec![
            WIDE, ILOAD, 0x01, 0x04, // iload 260
            WIDE, ISTORE, 0x01, 0x05, // istore 261
            WIDE, IINC, 0x01, 0x05, 0x00, 0x02, // iinc 261 += 2
            WIDE, ILOAD, 0x01, 0x05, IRETURN,
        ];
        assert_eq!(11, int_result(run_code(code, 1, locals)));
    }

    #[test]
    fn dup_and_swap_rearrange_slots() {
        let code = vec![ICONST_1, ICONST_2, SWAP, ISUB, IRETURN];
        assert_eq!(1, int_result(run_code(code, 2, Vec::new())));
        let code = vec![ICONST_2, DUP, IMUL, IRETURN];
        assert_eq!(4, int_result(run_code(code, 2, Vec::new())));
    }

    #[test]
    fn float_arithmetic_runs_at_f32_precision() {
        let code = vec![FLOAD_0, FLOAD_1, FADD, FRETURN];
        let result = run_code(
            code,
            2,
            vec![Value::Float(0.5), Value::Float(0.25)],
        );
        assert_eq!(Ok(Some(Value::Float(0.75))), result.map_err(|_| ()));

        // double division follows IEEE: 1.0 / 0.0 is infinite
        let code = vec![DLOAD_0, DLOAD_2, DDIV, DRETURN];
        let result = run_code(
            code,
            4,
            vec![
                Value::Float(1.0),
                Value::Padding,
                Value::Float(0.0),
                Value::Padding,
            ],
        );
        match result {
            Ok(Some(Value::Float(v))) => assert!(v.is_infinite()),
            other => panic!("expected a double, got {other:?}"),
        }
    }

    #[test]
    fn monitor_opcodes_pop_their_reference() {
        let mut vm = test_vm();
        let object = vm.new_object_by_name("java/lang/Object").unwrap();
        let code = vec![ALOAD_0, MONITORENTER, ALOAD_0, MONITOREXIT, ICONST_0, IRETURN];
        let result = run_code_in(&mut vm, code, 1, vec![object], Vec::new());
        assert_eq!(0, int_result(result));
    }

    #[test]
    fn jsr_and_ret_round_trip() {
        // jsr pushes the return address; the subroutine stores it and rets
        let code = vec![
            JSR, 0x00, 0x05, ICONST_1, IRETURN, ASTORE_0, ICONST_0, POP, RET, 0,
        ];
        // astore_0 accepts the int return address value
        let result = run_code(code, 2, vec![Value::Null]);
        assert_eq!(1, int_result(result));
    }
}
