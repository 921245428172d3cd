use axum::extract::FromRef;
use std::{
    net::IpAddr,
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio_util::sync::CancellationToken;

use crate::engine::ProxyEngine;
use crate::wallclock::WallClock;

pub struct InnerWebContext {
    pub(crate) engine: Mutex<ProxyEngine>,
    pub(crate) controller_allow: Vec<IpAddr>,
    pub(crate) wallclock: WallClock,
    pub(crate) precision: f64,
    pub(crate) max_freq_error: f64,
    pub(crate) shutdown: CancellationToken,
}

#[derive(Clone, FromRef)]
pub struct WebContext(pub(crate) Arc<InnerWebContext>);

impl Deref for WebContext {
    type Target = InnerWebContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(
        engine: ProxyEngine,
        controller_allow: Vec<IpAddr>,
        wallclock: WallClock,
        precision: f64,
        max_freq_error: f64,
        shutdown: CancellationToken,
    ) -> Self {
        Self(Arc::new(InnerWebContext {
            engine: Mutex::new(engine),
            controller_allow,
            wallclock,
            precision,
            max_freq_error,
            shutdown,
        }))
    }

    /// The one engine lock: every protocol event runs to completion under it.
    pub(crate) fn engine(&self) -> MutexGuard<'_, ProxyEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn controller_allowed(&self, remote: &IpAddr) -> bool {
        self.controller_allow.contains(remote)
    }
}
