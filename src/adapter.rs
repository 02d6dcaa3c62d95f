use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::{AdapterSession, Error, Result};

/// The controller-facing status of one adapter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterState {
    /// The transport link to the controller is open
    pub open: bool,
    /// The controller is scanning for advertisements
    pub scanning: bool,
    /// The local GATT server is being advertised
    pub advertising: bool,
}

/// Keeps the sessions of every physical adapter known to the host.
///
/// Each [`AdapterSession`] has its own registry, connections and transport; the factory only maps adapter ids to
/// sessions.
#[derive(Debug, Default)]
pub struct AdapterFactory {
    sessions: HashMap<String, AdapterSession>,
}

impl AdapterFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` under `id`.
    ///
    /// Fails with [`InvalidParameter`][ErrorKind::InvalidParameter] if `id` is already taken.
    pub fn add(&mut self, id: impl Into<String>, session: AdapterSession) -> Result<()> {
        let id = id.into();
        if self.sessions.contains_key(&id) {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                None,
                format!("adapter {id} is already registered"),
            ));
        }
        self.sessions.insert(id, session);
        Ok(())
    }

    /// The session registered under `id`.
    pub fn get(&self, id: &str) -> Option<AdapterSession> {
        self.sessions.get(id).cloned()
    }

    /// Unregisters the session under `id` and returns it.
    ///
    /// The session is not closed; call [`AdapterSession::close`] to release its connections.
    pub fn remove(&mut self, id: &str) -> Option<AdapterSession> {
        self.sessions.remove(id)
    }

    /// Registered adapter ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}
