use crate::frame::CallStack;
use crate::java_exception::InvokeResult;
use crate::value::Value;
use crate::vm::VirtualMachine;
use log::error;
use std::collections::HashMap;

mod java_io;
mod java_lang;
mod traps;

/// A host-implemented method body. `args` holds one entry per parameter in
/// declaration order with padding slots already collapsed; for instance
/// methods the receiver (or the stream being written) rides in args[0].
pub type GFunction = fn(&mut VirtualMachine, &mut CallStack, Vec<Value>) -> InvokeResult;

/// Table entry for a host-implemented method.
#[derive(Clone, Copy)]
pub struct GMeth {
    /// Operand-stack slots the declared parameters occupy (longs and
    /// doubles count twice; the receiver is not included).
    pub param_slots: usize,
    pub func: GFunction,
    /// Whether the function needs to see the caller's frame stack.
    pub needs_context: bool,
}

/// Signature-keyed registry of host-implemented methods. Keys take the
/// form `class/name.method(args)return`, e.g.
/// `java/io/PrintStream.println(Ljava/lang/String;)V`.
pub struct NativeMethodTable {
    methods: HashMap<String, GMeth>,
}

fn key_is_well_formed(key: &str) -> bool {
    key.contains('.') && key.contains('(') && key.contains(')') && !key.ends_with(')')
}

impl NativeMethodTable {
    pub fn new() -> NativeMethodTable {
        NativeMethodTable {
            methods: HashMap::new(),
        }
    }

    pub fn with_default_library() -> NativeMethodTable {
        let mut table = NativeMethodTable::new();
        java_lang::load(&mut table);
        java_io::load(&mut table);
        traps::load(&mut table);
        table
    }

    pub fn register(&mut self, key: &str, param_slots: usize, func: GFunction) {
        self.register_entry(
            key,
            GMeth {
                param_slots,
                func,
                needs_context: false,
            },
        );
    }

    pub fn register_with_context(&mut self, key: &str, param_slots: usize, func: GFunction) {
        self.register_entry(
            key,
            GMeth {
                param_slots,
                func,
                needs_context: true,
            },
        );
    }

    fn register_entry(&mut self, key: &str, entry: GMeth) {
        if !key_is_well_formed(key) {
            error!("rejecting malformed native method key {key}");
            return;
        }
        self.methods.insert(key.to_string(), entry);
    }

    pub fn get(&self, key: &str) -> Option<GMeth> {
        self.methods.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Default for NativeMethodTable {
    fn default() -> Self {
        NativeMethodTable::with_default_library()
    }
}

/// Shared do-nothing body for methods that only exist to satisfy callers.
pub fn just_return(
    _vm: &mut VirtualMachine,
    _stack: &mut CallStack,
    _args: Vec<Value>,
) -> InvokeResult {
    Ok(None)
}
