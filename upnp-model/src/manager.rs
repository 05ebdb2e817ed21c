//! Serialized access to service implementations and evented state
//! publication.
//!
//! A [`ServiceManager`] owns a service implementation. Every access goes
//! through [`ServiceManager::execute`], which holds the implementation lock
//! for the duration of a command, so the implementation itself never has to
//! be thread-safe. The same manager publishes evented state snapshots to
//! registered [`PropertyChangeListener`]s before the lock is released, so
//! listeners see snapshots in the order the commands ran.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::ExecutionError;
use crate::meta::{LocalService, Service};
use crate::state::{StateVariableAccessor, StateVariableValue};

/// Default time to wait for the implementation lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Receives evented state snapshots of a service.
///
/// Called with the implementation lock held; a listener must not run
/// commands on the same manager.
pub trait PropertyChangeListener: Send + Sync {
    fn evented_state_changed(&self, values: &[StateVariableValue]);
}

/// Handle returned when a listener is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The evented side of a service manager, independent of the
/// implementation type.
pub trait StateEventSource: Send + Sync {
    /// The service whose state is published.
    fn service(&self) -> &Arc<LocalService>;

    /// Current values of all evented state variables.
    fn current_state(&self) -> Result<Vec<StateVariableValue>, ExecutionError>;

    fn add_listener(&self, listener: Arc<dyn PropertyChangeListener>) -> ListenerId;

    /// Returns false if the listener was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Serialized command execution against an implementation of type `T`.
pub trait ServiceManager<T>: StateEventSource {
    fn execute(
        &self,
        command: &mut dyn FnMut(&mut T) -> Result<(), ExecutionError>,
    ) -> Result<(), ExecutionError>;

    /// Accessor registered for a state variable, if any.
    fn state_variable_accessor(&self, name: &str) -> Option<StateVariableAccessor<T>>;
}

/// Lets an implementation report state changes from inside a command.
///
/// Changed names are collected and published when the current command
/// completes, or immediately by [`DefaultServiceManager::notify_changed`]
/// when no command is running.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    pending: Arc<Mutex<Vec<String>>>,
}

impl ChangeNotifier {
    pub fn changed(&self, name: impl Into<String>) {
        let name = name.into();
        let mut pending = self.pending.lock();
        if !pending.contains(&name) {
            pending.push(name);
        }
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.pending.lock())
    }
}

type Factory<T> = Box<dyn Fn(ChangeNotifier) -> Result<T, ExecutionError> + Send + Sync>;

/// Manager that builds its implementation lazily and reads evented state
/// through registered accessors.
pub struct DefaultServiceManager<T> {
    service: Arc<LocalService>,
    factory: Factory<T>,
    implementation: Mutex<Option<T>>,
    accessors: HashMap<String, StateVariableAccessor<T>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn PropertyChangeListener>)>>,
    next_listener_id: AtomicU64,
    notifier: ChangeNotifier,
    lock_timeout: Duration,
}

impl<T: Send + 'static> DefaultServiceManager<T> {
    pub fn new<F>(service: Arc<LocalService>, factory: F) -> Self
    where
        F: Fn(ChangeNotifier) -> Result<T, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            service,
            factory: Box::new(factory),
            implementation: Mutex::new(None),
            accessors: HashMap::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            notifier: ChangeNotifier::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_accessor(mut self, name: impl Into<String>, accessor: StateVariableAccessor<T>) -> Self {
        self.accessors.insert(name.into(), accessor);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn change_notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    /// Run a command returning a value while holding the implementation lock.
    pub fn execute_with<R>(
        &self,
        command: impl FnOnce(&mut T) -> Result<R, ExecutionError>,
    ) -> Result<R, ExecutionError> {
        let mut guard = self.lock()?;
        let implementation = self.instance(&mut guard)?;
        let result = command(&mut *implementation);
        let changed = self.read_pending(implementation);
        self.fire(changed);
        result
    }

    /// Read the named variables and publish them to listeners.
    pub fn notify_changed(&self, names: &[&str]) -> Result<(), ExecutionError> {
        for name in names {
            self.notifier.changed(*name);
        }
        let mut guard = self.lock()?;
        let implementation = self.instance(&mut guard)?;
        let changed = self.read_pending(implementation);
        self.fire(changed);
        Ok(())
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Option<T>>, ExecutionError> {
        trace!("Trying to obtain lock with timeout milliseconds '{}'", self.lock_timeout.as_millis());
        self.implementation
            .try_lock_for(self.lock_timeout)
            .ok_or(ExecutionError::LockTimeout(self.lock_timeout.as_millis() as u64))
    }

    fn instance<'a>(&self, guard: &'a mut Option<T>) -> Result<&'a mut T, ExecutionError> {
        if guard.is_none() {
            debug!("Creating implementation of service {}", self.service.service_id());
            *guard = Some((self.factory)(self.notifier.clone())?);
        }
        guard
            .as_mut()
            .ok_or_else(|| ExecutionError::msg("Service implementation is not available"))
    }

    fn read_pending(&self, implementation: &T) -> Result<Vec<StateVariableValue>, ExecutionError> {
        let names = self.notifier.take();
        self.read_values(implementation, names.iter().map(String::as_str))
    }

    fn read_values<'n>(
        &self,
        implementation: &T,
        names: impl Iterator<Item = &'n str>,
    ) -> Result<Vec<StateVariableValue>, ExecutionError> {
        let mut values = Vec::new();
        for name in names {
            let Some(state_variable) = self.service.state_variable(name) else {
                warn!("Ignoring change of unknown state variable '{}'", name);
                continue;
            };
            if !state_variable.event_details().send_events {
                continue;
            }
            let Some(accessor) = self.accessors.get(name) else {
                warn!("No accessor registered for evented state variable '{}'", name);
                continue;
            };
            values.push(StateVariableValue::new(name, accessor.read(implementation)?));
        }
        Ok(values)
    }

    fn fire(&self, changed: Result<Vec<StateVariableValue>, ExecutionError>) {
        let values = match changed {
            Ok(values) if values.is_empty() => return,
            Ok(values) => values,
            Err(e) => {
                warn!("Failed to read changed state variables: {}", e);
                return;
            }
        };
        let listeners: Vec<_> = self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        trace!("Notifying {} listeners of {} changed values", listeners.len(), values.len());
        for listener in listeners {
            listener.evented_state_changed(&values);
        }
    }
}

impl<T: Send + 'static> StateEventSource for DefaultServiceManager<T> {
    fn service(&self) -> &Arc<LocalService> {
        &self.service
    }

    fn current_state(&self) -> Result<Vec<StateVariableValue>, ExecutionError> {
        let mut guard = self.lock()?;
        let implementation = self.instance(&mut guard)?;
        let names = self
            .service
            .state_variables()
            .iter()
            .filter(|sv| sv.event_details().send_events)
            .map(|sv| sv.name());
        self.read_values(implementation, names)
    }

    fn add_listener(&self, listener: Arc<dyn PropertyChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        debug!("Added property change listener {:?}", id);
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }
}

impl<T: Send + 'static> ServiceManager<T> for DefaultServiceManager<T> {
    fn execute(
        &self,
        command: &mut dyn FnMut(&mut T) -> Result<(), ExecutionError>,
    ) -> Result<(), ExecutionError> {
        self.execute_with(|implementation| command(implementation))
    }

    fn state_variable_accessor(&self, name: &str) -> Option<StateVariableAccessor<T>> {
        self.accessors.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ServiceId, ServiceType, StateVariable, StateVariableEventDetails, StateVariableTypeDetails, Udn};
    use crate::types::{Datatype, Value};
    use std::thread;

    struct SwitchPower {
        status: bool,
        notifier: ChangeNotifier,
    }

    impl SwitchPower {
        fn set_target(&mut self, value: bool) {
            self.status = value;
            self.notifier.changed("Status");
        }
    }

    fn service() -> Arc<LocalService> {
        Arc::new(
            LocalService::new(
                Udn::new("uuid:switch"),
                ServiceType::upnp("SwitchPower", 1),
                ServiceId::upnp("SwitchPower"),
                vec![
                    StateVariable::new("Status", StateVariableTypeDetails::new(Datatype::Boolean)),
                    StateVariable::new("Target", StateVariableTypeDetails::new(Datatype::Boolean))
                        .with_event_details(StateVariableEventDetails::not_evented()),
                ],
                vec![],
            )
            .unwrap(),
        )
    }

    fn manager() -> DefaultServiceManager<SwitchPower> {
        DefaultServiceManager::new(service(), |notifier| {
            Ok(SwitchPower {
                status: false,
                notifier,
            })
        })
        .with_accessor("Status", StateVariableAccessor::getter(|s: &SwitchPower| s.status))
        .with_accessor("Target", StateVariableAccessor::getter(|s: &SwitchPower| s.status))
    }

    struct Recorder(Mutex<Vec<Vec<StateVariableValue>>>);

    impl PropertyChangeListener for Recorder {
        fn evented_state_changed(&self, values: &[StateVariableValue]) {
            self.0.lock().push(values.to_vec());
        }
    }

    #[test]
    fn test_current_state_reads_evented_variables_only() {
        let manager = manager();
        let state = manager.current_state().unwrap();
        assert_eq!(state, vec![StateVariableValue::new("Status", Some(Value::Boolean(false)))]);
    }

    #[test]
    fn test_changes_published_after_command() {
        let manager = manager();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = manager.add_listener(recorder.clone());

        manager.execute_with(|s| {
            s.set_target(true);
            Ok(())
        })
        .unwrap();

        let events = recorder.0.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], vec![StateVariableValue::new("Status", Some(Value::Boolean(true)))]);

        assert!(manager.remove_listener(id));
        assert!(!manager.remove_listener(id));
    }

    #[test]
    fn test_notify_changed_ignores_unevented() {
        let manager = manager();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        manager.add_listener(recorder.clone());
        manager.notify_changed(&["Target"]).unwrap();
        assert!(recorder.0.lock().is_empty());
    }

    /// Holds its first delivery until released.
    struct Gate {
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
        release: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
        delivered: Mutex<Vec<Vec<StateVariableValue>>>,
    }

    impl PropertyChangeListener for Gate {
        fn evented_state_changed(&self, values: &[StateVariableValue]) {
            let entered = self.entered.lock().take();
            if let Some(entered) = entered {
                let release = self.release.lock().take();
                entered.send(()).unwrap();
                if let Some(release) = release {
                    release.recv().unwrap();
                }
            }
            self.delivered.lock().push(values.to_vec());
        }
    }

    #[test]
    fn test_concurrent_commands_publish_in_command_order() {
        let manager = Arc::new(manager().with_lock_timeout(Duration::from_secs(5)));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let gate = Arc::new(Gate {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
            delivered: Mutex::new(Vec::new()),
        });
        manager.add_listener(gate.clone());

        let first = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.execute_with(|s| {
                    s.set_target(true);
                    Ok(())
                })
            })
        };
        entered_rx.recv().unwrap();

        let second = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.execute_with(|s| {
                    s.set_target(false);
                    Ok(())
                })
            })
        };
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();

        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();

        let current = manager.current_state().unwrap();
        let delivered = gate.delivered.lock().clone();
        assert_eq!(
            delivered,
            vec![
                vec![StateVariableValue::new("Status", Some(Value::Boolean(true)))],
                vec![StateVariableValue::new("Status", Some(Value::Boolean(false)))],
            ]
        );
        assert_eq!(delivered.last(), Some(&current));
    }

    #[test]
    fn test_lock_timeout() {
        let manager = Arc::new(manager().with_lock_timeout(Duration::from_millis(20)));
        let blocker = Arc::clone(&manager);
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let handle = thread::spawn(move || {
            blocker
                .execute_with(|_| {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                })
                .unwrap();
        });
        started_rx.recv().unwrap();
        let result = manager.execute_with(|_| Ok(()));
        assert!(matches!(result, Err(ExecutionError::LockTimeout(20))));
        handle.join().unwrap();
    }

    #[test]
    fn test_factory_failure_propagates() {
        let manager: DefaultServiceManager<SwitchPower> =
            DefaultServiceManager::new(service(), |_| Err(ExecutionError::msg("no hardware")));
        let err = manager.execute_with(|_| Ok(())).unwrap_err();
        assert_eq!(err.root_cause_message(), "no hardware");
    }
}
