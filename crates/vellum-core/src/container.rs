//! Dependency injection container.
//!
//! The container is a registry of service descriptors keyed by [`ServiceId`].
//! Resolving a service first resolves its declared dependencies in list
//! order and hands them positionally to the service factory.
//!
//! Instances are shared according to their [`Lifecycle`]:
//! - `Singleton` instances are cached on the descriptor
//! - `Scoped` instances are cached until [`Container::clear_scope`]
//! - `Transient` instances are built on every resolve
//!
//! Services currently being resolved are tracked per thread so that mutually
//! dependent registrations fail with [`ContainerError::CircularDependency`]
//! instead of recursing forever, while unrelated threads may resolve the same
//! service at the same time.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(Dependencies) -> anyhow::Result<Instance> + Send + Sync>;

/// Key under which a service is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// A free-form name.
    Name(String),
    /// A Rust type, used as its own key.
    Type { id: TypeId, name: &'static str },
}

impl ServiceId {
    /// Key a service by its Rust type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        ServiceId::Type {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key a service by name.
    pub fn named(name: impl Into<String>) -> Self {
        ServiceId::Name(name.into())
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Name(name) => write!(f, "{}", name),
            ServiceId::Type { name, .. } => write!(f, "{}", name),
        }
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        ServiceId::Name(name.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(name: String) -> Self {
        ServiceId::Name(name)
    }
}

/// Sharing policy for resolved instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// One instance for the lifetime of the container.
    #[default]
    Singleton,
    /// A new instance on every resolve.
    Transient,
    /// One instance per scope, dropped by `clear_scope`.
    Scoped,
}

/// Container errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("Service not registered: {0}")]
    NotRegistered(String),

    #[error("Circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    #[error("Service '{id}' is not of type {expected}")]
    TypeMismatch { id: String, expected: &'static str },

    #[error("Dependency #{index} was not declared by the service")]
    MissingDependency { index: usize },

    #[error("Failed to construct service '{id}': {source}")]
    FactoryFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Resolved dependencies handed to a factory, in declaration order.
pub struct Dependencies {
    ids: Vec<ServiceId>,
    instances: Vec<Instance>,
}

impl Dependencies {
    /// Number of resolved dependencies.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the service declared no dependencies.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Get the dependency at `index`, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, ContainerError> {
        let instance = self
            .instances
            .get(index)
            .cloned()
            .ok_or(ContainerError::MissingDependency { index })?;

        instance
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                id: self.ids[index].to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Get the dependency at `index` without downcasting.
    pub fn raw(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }
}

#[derive(Clone)]
struct ServiceDescriptor {
    factory: Factory,
    lifecycle: Lifecycle,
    dependencies: Vec<ServiceId>,
    instance: Option<Instance>,
}

/// Dependency injection container.
pub struct Container {
    services: RwLock<HashMap<ServiceId, ServiceDescriptor>>,
    scoped: Mutex<HashMap<ServiceId, Instance>>,
    /// Resolution stack of each thread currently inside `resolve_instance`.
    resolving: Mutex<HashMap<ThreadId, Vec<ServiceId>>>,
}

impl Container {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            scoped: Mutex::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
        }
    }

    /// Register a type-erased factory.
    ///
    /// Registering an id twice overwrites the previous descriptor, including
    /// any cached singleton.
    pub fn register<F>(
        &self,
        id: impl Into<ServiceId>,
        factory: F,
        lifecycle: Lifecycle,
        dependencies: Vec<ServiceId>,
    ) -> &Self
    where
        F: Fn(Dependencies) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        self.services.write().insert(
            id.into(),
            ServiceDescriptor {
                factory: Arc::new(factory),
                lifecycle,
                dependencies,
                instance: None,
            },
        );
        self
    }

    /// Register a typed factory with the given lifecycle.
    pub fn register_typed<T, F>(
        &self,
        id: impl Into<ServiceId>,
        factory: F,
        lifecycle: Lifecycle,
        dependencies: Vec<ServiceId>,
    ) -> &Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(
            id,
            move |deps| Ok(Arc::new(factory(deps)?) as Instance),
            lifecycle,
            dependencies,
        )
    }

    /// Register a singleton service.
    pub fn register_singleton<T, F>(
        &self,
        id: impl Into<ServiceId>,
        factory: F,
        dependencies: Vec<ServiceId>,
    ) -> &Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_typed(id, factory, Lifecycle::Singleton, dependencies)
    }

    /// Register a transient service.
    pub fn register_transient<T, F>(
        &self,
        id: impl Into<ServiceId>,
        factory: F,
        dependencies: Vec<ServiceId>,
    ) -> &Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_typed(id, factory, Lifecycle::Transient, dependencies)
    }

    /// Register a scoped service.
    pub fn register_scoped<T, F>(
        &self,
        id: impl Into<ServiceId>,
        factory: F,
        dependencies: Vec<ServiceId>,
    ) -> &Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register_typed(id, factory, Lifecycle::Scoped, dependencies)
    }

    /// Register an already constructed singleton.
    pub fn register_instance<T: Send + Sync + 'static>(
        &self,
        id: impl Into<ServiceId>,
        value: T,
    ) -> &Self {
        let instance: Instance = Arc::new(value);
        let cached = instance.clone();
        self.services.write().insert(
            id.into(),
            ServiceDescriptor {
                factory: Arc::new(move |_| Ok(instance.clone())),
                lifecycle: Lifecycle::Singleton,
                dependencies: Vec::new(),
                instance: Some(cached),
            },
        );
        self
    }

    /// Resolve a service and downcast it to `T`.
    pub fn resolve<T: Send + Sync + 'static>(&self, id: &ServiceId) -> Result<Arc<T>, ContainerError> {
        self.resolve_instance(id)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                id: id.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Resolve a service registered under its own type.
    pub fn resolve_type<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ContainerError> {
        self.resolve(&ServiceId::of::<T>())
    }

    /// Resolve a service without downcasting.
    ///
    /// Cycles are detected against the calling thread's resolution stack
    /// only. Two threads resolving the same singleton for the first time may
    /// both run its factory; the first instance stored is kept and returned
    /// to both.
    pub fn resolve_instance(&self, id: &ServiceId) -> Result<Instance, ContainerError> {
        let thread = thread::current().id();
        let descriptor = self
            .services
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ContainerError::NotRegistered(id.to_string()))?;

        {
            let resolving = self.resolving.lock();
            let stack = resolving.get(&thread).map(Vec::as_slice).unwrap_or_default();
            if stack.contains(id) {
                let chain = stack
                    .iter()
                    .chain(std::iter::once(id))
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(ContainerError::CircularDependency { chain });
            }
        }

        match descriptor.lifecycle {
            Lifecycle::Singleton => {
                if let Some(instance) = &descriptor.instance {
                    return Ok(instance.clone());
                }
            }
            Lifecycle::Scoped => {
                if let Some(instance) = self.scoped.lock().get(id) {
                    return Ok(instance.clone());
                }
            }
            Lifecycle::Transient => {}
        }

        self.resolving.lock().entry(thread).or_default().push(id.clone());
        let _resolving = scopeguard::guard((), |_| {
            let mut resolving = self.resolving.lock();
            if let Some(stack) = resolving.get_mut(&thread) {
                stack.retain(|r| r != id);
                if stack.is_empty() {
                    resolving.remove(&thread);
                }
            }
        });

        let mut instances = Vec::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            instances.push(self.resolve_instance(dependency)?);
        }

        let deps = Dependencies {
            ids: descriptor.dependencies.clone(),
            instances,
        };
        let instance = (descriptor.factory)(deps).map_err(|source| ContainerError::FactoryFailed {
            id: id.to_string(),
            source,
        })?;

        match descriptor.lifecycle {
            Lifecycle::Singleton => {
                if let Some(stored) = self.services.write().get_mut(id) {
                    let kept = stored.instance.get_or_insert(instance).clone();
                    tracing::debug!(service = %id, lifecycle = ?descriptor.lifecycle, "Service resolved");
                    return Ok(kept);
                }
            }
            Lifecycle::Scoped => {
                self.scoped.lock().insert(id.clone(), instance.clone());
            }
            Lifecycle::Transient => {}
        }

        tracing::debug!(service = %id, lifecycle = ?descriptor.lifecycle, "Service resolved");
        Ok(instance)
    }

    /// Whether an id is registered.
    pub fn is_registered(&self, id: &ServiceId) -> bool {
        self.services.read().contains_key(id)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Drop every scoped instance.
    pub fn clear_scope(&self) {
        self.scoped.lock().clear();
    }

    /// Remove every descriptor, scoped instance and in-flight resolution.
    pub fn clear(&self) {
        self.services.write().clear();
        self.scoped.lock().clear();
        self.resolving.lock().clear();
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("services", &self.len())
            .field("scoped", &self.scoped.lock().len())
            .finish()
    }
}
