use crate::jvm_error::{VmError, VmExecResult};
use crate::loaded_class::{Class, ClassStatus};
use crate::string_pool::StrId;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Stable handle to a loaded class. Handles index the method area's arena
/// and never dangle; everything outside the method area refers to classes
/// by handle or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub usize);

impl Display for ClassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// The process-wide registry of loaded classes, keyed by fully qualified
/// slash-form name. Inserts are append-only; status transitions are
/// write-once per stage.
#[derive(Debug, Default)]
pub struct MethodArea {
    classes: Vec<Class>,
    by_name: HashMap<StrId, ClassId>,
}

impl MethodArea {
    pub fn new() -> MethodArea {
        MethodArea::default()
    }

    /// Registers a class under its name. A second insert for a name whose
    /// existing class is not Errored is a LinkageError; an Errored class
    /// may be replaced.
    pub fn insert(&mut self, class: Class) -> VmExecResult<ClassId> {
        if let Some(existing) = self.by_name.get(&class.name) {
            let slot = existing.0;
            if self.classes[slot].status != ClassStatus::Errored {
                return Err(VmError::LinkageError(format!(
                    "duplicate class definition for {}",
                    class.name
                )));
            }
            self.classes[slot] = class;
            return Ok(ClassId(slot));
        }
        let id = ClassId(self.classes.len());
        self.by_name.insert(class.name, id);
        self.classes.push(class);
        Ok(id)
    }

    pub fn fetch(&self, name: StrId) -> Option<ClassId> {
        self.by_name.get(&name).copied()
    }

    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0]
    }

    /// Advances a class's status. Only forward transitions are permitted,
    /// plus the lateral move to Errored; anything else is fatal.
    pub fn transition(&mut self, id: ClassId, new_status: ClassStatus) -> VmExecResult<()> {
        let class = &mut self.classes[id.0];
        let old_status = class.status;
        let legal = match new_status {
            ClassStatus::Errored => old_status != ClassStatus::Errored,
            _ => old_status != ClassStatus::Errored && new_status.rank() > old_status.rank(),
        };
        if !legal {
            return Err(VmError::IllegalStatusTransition {
                class: class.name.to_string(),
                from: old_status.name(),
                to: new_status.name(),
            });
        }
        class.status = new_status;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loaded_class::{ClassOrigin, LoaderKind};
    use crate::string_pool::StringPool;
    use indexmap::IndexMap;

    fn test_class(pool: &mut StringPool, name: &str) -> Class {
        Class {
            name: pool.intern(name),
            super_name: Some(pool.intern("java/lang/Object")),
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
        }
    }

    #[test]
    fn duplicate_insert_is_a_linkage_error() {
        let mut pool = StringPool::new();
        let mut area = MethodArea::new();
        let id = area.insert(test_class(&mut pool, "Foo")).unwrap();
        assert_eq!(Some(id), area.fetch(pool.intern("Foo")));

        let err = area.insert(test_class(&mut pool, "Foo")).unwrap_err();
        assert!(matches!(err, VmError::LinkageError(_)));

        // an Errored class may be redefined under the same handle
        area.transition(id, ClassStatus::Errored).unwrap();
        let replaced = area.insert(test_class(&mut pool, "Foo")).unwrap();
        assert_eq!(id, replaced);
        assert_eq!(ClassStatus::Parsed, area.get(id).status);
    }

    #[test]
    fn transitions_only_move_forward() {
        let mut pool = StringPool::new();
        let mut area = MethodArea::new();
        let id = area.insert(test_class(&mut pool, "Foo")).unwrap();

        area.transition(id, ClassStatus::Linked).unwrap();
        area.transition(id, ClassStatus::Prepared).unwrap();
        area.transition(id, ClassStatus::Initialized).unwrap();
        assert!(area.transition(id, ClassStatus::Linked).is_err());
        assert!(area.transition(id, ClassStatus::Initialized).is_err());
    }

    #[test]
    fn errored_is_reachable_laterally_and_terminal() {
        let mut pool = StringPool::new();
        let mut area = MethodArea::new();
        let id = area.insert(test_class(&mut pool, "Foo")).unwrap();
        area.transition(id, ClassStatus::Linked).unwrap();
        area.transition(id, ClassStatus::Errored).unwrap();
        assert!(area.transition(id, ClassStatus::Prepared).is_err());
        assert!(area.transition(id, ClassStatus::Errored).is_err());
    }
}
