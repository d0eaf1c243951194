#![forbid(unsafe_code)]

//! Typed service registry passed through the execution context.
//!
//! Services are keyed by their concrete type. The container is assembled once
//! at the composition root and then shared; cloning it is a pointer copy.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::OperationError;

/// Registry of shared services, looked up by type.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    services: Rc<HashMap<TypeId, Entry>>,
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    value: Rc<dyn Any>,
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.values().map(|e| e.name).collect();
        names.sort_unstable();
        f.debug_struct("ServiceContainer")
            .field("services", &names)
            .finish()
    }
}

impl ServiceContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    #[must_use]
    pub fn with<T: 'static>(self, service: T) -> Self {
        self.with_shared(Rc::new(service))
    }

    /// Register an already shared service.
    #[must_use]
    pub fn with_shared<T: 'static>(self, service: Rc<T>) -> Self {
        let mut services = Rc::unwrap_or_clone(self.services);
        services.insert(
            TypeId::of::<T>(),
            Entry {
                name: type_name::<T>(),
                value: service,
            },
        );
        Self {
            services: Rc::new(services),
        }
    }

    /// Look up a service by type.
    #[must_use]
    pub fn resolve<T: 'static>(&self) -> Option<Rc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| Rc::clone(&entry.value).downcast::<T>().ok())
    }

    /// Look up a service that must exist.
    pub fn require<T: 'static>(&self) -> Result<Rc<T>, OperationError> {
        self.resolve::<T>()
            .ok_or(OperationError::MissingService(type_name::<T>()))
    }

    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
