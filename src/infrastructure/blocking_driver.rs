use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

/// Platform capability that keeps the selected apps closed.
///
/// The driver is a singleton resource shared by the event coordinator and the
/// standalone session timer. `start` while already active replaces the active
/// session; `stop` is unconditional.
pub trait BlockingDriver: Send + Sync {
    fn has_permission(&self) -> Result<bool, InfraError>;
    fn open_permission_settings(&self) -> Result<(), InfraError>;
    fn start(&self, duration_seconds: u64, app_ids: &[String]) -> Result<bool, InfraError>;
    fn stop(&self) -> Result<(), InfraError>;
    fn is_active(&self) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSession {
    pub duration_seconds: u64,
    pub app_ids: Vec<String>,
}

/// Driver that only tracks what it was asked to do. Used by hosts without a
/// native blocking backend and by tests.
#[derive(Debug)]
pub struct InMemoryBlockingDriver {
    permission_granted: bool,
    session: Mutex<Option<DriverSession>>,
}

impl InMemoryBlockingDriver {
    pub fn new(permission_granted: bool) -> Self {
        Self {
            permission_granted,
            session: Mutex::new(None),
        }
    }

    pub fn active_session(&self) -> Result<Option<DriverSession>, InfraError> {
        let session = self
            .session
            .lock()
            .map_err(|error| InfraError::poisoned("blocking driver", error))?;
        Ok(session.clone())
    }
}

impl Default for InMemoryBlockingDriver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BlockingDriver for InMemoryBlockingDriver {
    fn has_permission(&self) -> Result<bool, InfraError> {
        Ok(self.permission_granted)
    }

    fn open_permission_settings(&self) -> Result<(), InfraError> {
        tracing::info!("permission settings requested; nothing to open for in-memory driver");
        Ok(())
    }

    fn start(&self, duration_seconds: u64, app_ids: &[String]) -> Result<bool, InfraError> {
        if !self.permission_granted {
            return Err(InfraError::Driver("blocking permission not granted".to_string()));
        }
        if app_ids.is_empty() || duration_seconds == 0 {
            return Ok(false);
        }
        let mut session = self
            .session
            .lock()
            .map_err(|error| InfraError::poisoned("blocking driver", error))?;
        *session = Some(DriverSession {
            duration_seconds,
            app_ids: app_ids.to_vec(),
        });
        Ok(true)
    }

    fn stop(&self) -> Result<(), InfraError> {
        let mut session = self
            .session
            .lock()
            .map_err(|error| InfraError::poisoned("blocking driver", error))?;
        *session = None;
        Ok(())
    }

    fn is_active(&self) -> Result<bool, InfraError> {
        Ok(self.active_session()?.is_some())
    }
}
