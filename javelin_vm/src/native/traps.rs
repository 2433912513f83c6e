use crate::frame::CallStack;
use crate::java_exception::{InvokeResult, UNSUPPORTED_OPERATION};
use crate::native::NativeMethodTable;
use crate::vm::VirtualMachine;

/// Traps: table entries for JDK surface the runtime deliberately does not
/// implement. Each one raises UnsupportedOperationException naming the
/// trapped class, so a guest program fails loudly instead of mysteriously.
pub fn load(table: &mut NativeMethodTable) {
    table.register_with_context(
        "java/io/DefaultFileSystem.getFileSystem()Ljava/io/FileSystem;",
        0,
        |vm, stack, _| trap(vm, stack, "java/io/FileSystem"),
    );
    table.register_with_context("java/io/FileSystem.<clinit>()V", 0, |vm, stack, _| {
        trap(vm, stack, "java/io/FileSystem")
    });
    table.register_with_context(
        "java/nio/charset/Charset.<clinit>()V",
        0,
        |vm, stack, _| trap(vm, stack, "java/nio/charset/Charset"),
    );
    table.register_with_context("java/io/BufferedReader.<clinit>()V", 0, |vm, stack, _| {
        trap(vm, stack, "java/io/BufferedReader")
    });
    table.register_with_context(
        "java/lang/Thread.start()V",
        0,
        |vm, stack, _| trap(vm, stack, "java/lang/Thread"),
    );
    table.register_with_context(
        "java/lang/invoke/MethodHandle.invoke([Ljava/lang/Object;)Ljava/lang/Object;",
        1,
        |vm, stack, _| trap(vm, stack, "java/lang/invoke/MethodHandle"),
    );
}

fn trap(vm: &mut VirtualMachine, stack: &mut CallStack, trapped: &str) -> InvokeResult {
    Err(vm.make_throwable(
        stack,
        UNSUPPORTED_OPERATION,
        &format!("{trapped} is not supported by this runtime"),
    ))
}
