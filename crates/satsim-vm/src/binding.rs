//! Id-keyed routing of host imports back to the runtime that owns an instance.

use crate::engine::{HostFunction, InstanceId};
use crate::error::VmError;
use satsim_types::Address;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Weak;

/// The five host imports a module can raise, implemented by a contract runtime.
///
/// Every buffer is encoded with the calldata protocol.
pub trait HostCallbacks {
    fn load(&self, data: &[u8]) -> Result<Vec<u8>, VmError>;
    fn store(&self, data: &[u8]) -> Result<Vec<u8>, VmError>;
    fn call(&self, data: &[u8]) -> Result<Vec<u8>, VmError>;
    fn deploy(&self, data: &[u8]) -> Result<Vec<u8>, VmError>;
    fn log(&self, data: &[u8]) -> Result<(), VmError>;
}

struct Binding {
    owner: Address,
    callbacks: Weak<dyn HostCallbacks>,
}

/// Maps instance ids to the callbacks of their owning runtime.
/// At most one binding exists per id.
#[derive(Default)]
pub struct BindingTable {
    bindings: RefCell<HashMap<InstanceId, Binding>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(
        &self,
        id: InstanceId,
        owner: Address,
        callbacks: Weak<dyn HostCallbacks>,
    ) -> Result<(), VmError> {
        let mut bindings = self.bindings.borrow_mut();
        if let Some(existing) = bindings.get(&id) {
            return Err(VmError::Protocol(format!(
                "instance {id} already bound to {}",
                existing.owner
            )));
        }
        bindings.insert(id, Binding { owner, callbacks });
        Ok(())
    }

    /// Remove the binding for `id`. Returns whether one existed.
    pub fn unbind(&self, id: InstanceId) -> bool {
        self.bindings.borrow_mut().remove(&id).is_some()
    }

    pub fn owner(&self, id: InstanceId) -> Option<Address> {
        self.bindings.borrow().get(&id).map(|b| b.owner)
    }

    pub fn is_bound(&self, id: InstanceId) -> bool {
        self.bindings.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.bindings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.bindings.borrow_mut().clear();
    }

    /// Route a host import to the owner of `id`.
    ///
    /// The table is not borrowed while the callback runs, so callbacks may
    /// bind and unbind other instances.
    pub fn dispatch(
        &self,
        id: InstanceId,
        function: HostFunction,
        data: &[u8],
    ) -> Result<Vec<u8>, VmError> {
        let callbacks = self
            .bindings
            .borrow()
            .get(&id)
            .map(|b| b.callbacks.clone())
            .ok_or_else(|| VmError::NotFound(format!("binding for instance {id}")))?;
        let callbacks = callbacks
            .upgrade()
            .ok_or_else(|| VmError::NotFound(format!("owner of instance {id} was dropped")))?;

        match function {
            HostFunction::Load => callbacks.load(data),
            HostFunction::Store => callbacks.store(data),
            HostFunction::Call => callbacks.call(data),
            HostFunction::Deploy => callbacks.deploy(data),
            HostFunction::Log => callbacks.log(data).map(|()| Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Counter {
        hits: Cell<u32>,
    }

    impl HostCallbacks for Counter {
        fn load(&self, data: &[u8]) -> Result<Vec<u8>, VmError> {
            self.hits.set(self.hits.get() + 1);
            Ok(data.to_vec())
        }
        fn store(&self, _data: &[u8]) -> Result<Vec<u8>, VmError> {
            Ok(vec![1])
        }
        fn call(&self, _data: &[u8]) -> Result<Vec<u8>, VmError> {
            Err(VmError::Execution("no calls".into()))
        }
        fn deploy(&self, _data: &[u8]) -> Result<Vec<u8>, VmError> {
            Ok(Vec::new())
        }
        fn log(&self, _data: &[u8]) -> Result<(), VmError> {
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_routes_by_id() {
        let table = BindingTable::new();
        let counter = Rc::new(Counter::default());
        let weak: Weak<dyn HostCallbacks> = Rc::downgrade(&counter) as Weak<dyn HostCallbacks>;
        table.bind(7, Address::ZERO, weak).unwrap();

        assert_eq!(table.dispatch(7, HostFunction::Load, &[1, 2]).unwrap(), vec![1, 2]);
        assert_eq!(counter.hits.get(), 1);
        assert!(matches!(
            table.dispatch(8, HostFunction::Load, &[]),
            Err(VmError::NotFound(_))
        ));
    }

    #[test]
    fn test_single_binding_per_id() {
        let table = BindingTable::new();
        let counter = Rc::new(Counter::default());
        let weak: Weak<dyn HostCallbacks> = Rc::downgrade(&counter) as Weak<dyn HostCallbacks>;
        table.bind(1, Address::ZERO, weak.clone()).unwrap();
        assert!(matches!(
            table.bind(1, Address::ZERO, weak),
            Err(VmError::Protocol(_))
        ));
        assert!(table.unbind(1));
        assert!(!table.unbind(1));
        assert!(table.is_empty());
    }

    #[test]
    fn test_dropped_owner() {
        let table = BindingTable::new();
        let counter = Rc::new(Counter::default());
        let weak: Weak<dyn HostCallbacks> = Rc::downgrade(&counter) as Weak<dyn HostCallbacks>;
        table.bind(3, Address::ZERO, weak).unwrap();
        drop(counter);
        assert!(matches!(
            table.dispatch(3, HostFunction::Log, &[]),
            Err(VmError::NotFound(_))
        ));
    }
}
