// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Security Manager: the registry of authentication policy sets and the
//! per-session security contexts they operate on.

/// Per-session security state.
pub mod context;
/// The null authentication policy.
pub mod none;
/// The password challenge-response policy.
pub mod password;
/// The policy-set capability and its value types.
pub mod policy;
/// The SSH2-style ephemeral Diffie-Hellman policy.
pub mod ssh2;
/// Shared deadline timers.
pub mod timer;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    datapath::{CryptoDirection, Datapath},
    errors::{ControlError, ControlResult},
    events::{EventSubscriber, InternalEvent},
    models::cdap::{CdapMessage, RibDaemon},
    security::{
        context::SecurityContext,
        none::AuthNonePolicySet,
        password::AuthPasswordPolicySet,
        policy::{
            AUTH_NONE, AUTH_PASSWORD, AUTH_SSH2, AuthPolicySet, AuthStatus,
        },
        ssh2::AuthSsh2PolicySet,
        timer::DeadlineTimer,
    },
};

/// Session-scoped state shared by the manager and every policy set: the
/// context map, the timer wheel and the outward interfaces. One mutex-backed
/// map guards the contexts; critical sections stay O(1).
pub struct SecurityCore {
    contexts: DashMap<u32, SecurityContext>,
    pub timer: Arc<DeadlineTimer>,
    pub ribd: Arc<dyn RibDaemon>,
    pub datapath: Arc<dyn Datapath>,
}

impl SecurityCore {
    pub fn new(
        timer: Arc<DeadlineTimer>,
        ribd: Arc<dyn RibDaemon>,
        datapath: Arc<dyn Datapath>,
    ) -> Arc<Self> {
        Arc::new(Self {
            contexts: DashMap::new(),
            timer,
            ribd,
            datapath,
        })
    }

    /// Install a context. At most one context per session id may exist; a
    /// second install for a live session is refused.
    pub fn add_security_context(&self, ctx: SecurityContext) -> ControlResult<()> {
        let session_id = ctx.session_id;
        match self.contexts.entry(session_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ControlError::wrong_state(
                    "add_security_context",
                    format!("session {session_id} already has a context"),
                ))
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ctx);
                Ok(())
            },
        }
    }

    pub fn has_security_context(&self, session_id: u32) -> bool {
        self.contexts.contains_key(&session_id)
    }

    /// Run `f` against the context of `session_id`, if it exists. The map
    /// shard stays locked for the duration of `f`; callers keep `f` short
    /// and never re-enter the map from inside it.
    pub fn with_context<R>(
        &self,
        session_id: u32,
        f: impl FnOnce(&mut SecurityContext) -> R,
    ) -> Option<R> {
        self.contexts.get_mut(&session_id).map(|mut ctx| f(&mut ctx))
    }

    /// Remove and return the context, leaving its timer alone.
    pub fn remove_security_context(
        &self,
        session_id: u32,
    ) -> Option<SecurityContext> {
        self.contexts.remove(&session_id).map(|(_, ctx)| ctx)
    }

    /// Remove the context and release everything it holds. A no-op when the
    /// session has no context.
    pub fn destroy_security_context(&self, session_id: u32) {
        if let Some(ctx) = self.remove_security_context(session_id) {
            if let Some(handle) = ctx.timer {
                self.timer.cancel(handle);
            }
            debug!(session_id, state = %ctx.state, "security context destroyed");
        }
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Teardown path: discard every live context.
    pub fn destroy_all(&self) {
        let sessions: Vec<u32> = self.contexts.iter().map(|e| *e.key()).collect();
        for session_id in sessions {
            self.destroy_security_context(session_id);
        }
    }
}

/// The process-wide security manager.
pub struct SecurityManager {
    core: Arc<SecurityCore>,
    policy_sets: DashMap<String, Arc<dyn AuthPolicySet>>,
}

impl SecurityManager {
    pub fn new(core: Arc<SecurityCore>) -> Arc<Self> {
        Arc::new(Self {
            core,
            policy_sets: DashMap::new(),
        })
    }

    pub fn core(&self) -> &Arc<SecurityCore> {
        &self.core
    }

    /// Register the policy set named `auth_type`. Idempotent: re-adding an
    /// existing type logs and succeeds.
    pub fn add_policy_set(&self, auth_type: &str) -> ControlResult<()> {
        if self.policy_sets.contains_key(auth_type) {
            info!(auth_type, "authentication policy set already registered");
            return Ok(());
        }

        let candidate: Arc<dyn AuthPolicySet> = match auth_type {
            AUTH_NONE => Arc::new(AuthNonePolicySet::new(Arc::clone(&self.core))),
            AUTH_PASSWORD => {
                Arc::new(AuthPasswordPolicySet::new(Arc::clone(&self.core)))
            },
            AUTH_SSH2 => Arc::new(AuthSsh2PolicySet::new(Arc::clone(&self.core))?),
            other => return Err(ControlError::UnknownPolicy(other.to_string())),
        };

        self.policy_sets.insert(auth_type.to_string(), candidate);
        info!(auth_type, "authentication policy set registered");
        Ok(())
    }

    pub fn get_policy_set(
        &self,
        auth_type: &str,
    ) -> ControlResult<Arc<dyn AuthPolicySet>> {
        self.policy_sets
            .get(auth_type)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ControlError::UnknownPolicy(auth_type.to_string()))
    }

    /// Route a parameter write. An empty `path` addresses the manager
    /// itself, which has no parameters; any other path must be a registered
    /// policy-type name.
    pub fn set_policy_set_param(
        &self,
        path: &str,
        name: &str,
        value: &str,
    ) -> ControlResult<()> {
        if path.is_empty() {
            return Err(ControlError::UnknownPolicy(format!(
                "the security manager has no parameter '{name}'"
            )));
        }
        self.get_policy_set(path)?.set_param(name, value)
    }

    /// Snapshot of the session's context, if one exists.
    pub fn get_security_context(&self, session_id: u32) -> Option<SecurityContext> {
        self.core.with_context(session_id, |ctx| ctx.clone())
    }

    pub fn get_security_context_state(&self, session_id: u32) -> Option<String> {
        self.core
            .with_context(session_id, |ctx| ctx.state.to_string())
    }

    pub fn remove_security_context(
        &self,
        session_id: u32,
    ) -> Option<SecurityContext> {
        self.core.remove_security_context(session_id)
    }

    pub fn destroy_security_context(&self, session_id: u32) {
        self.core.destroy_security_context(session_id)
    }

    /// Feed an incoming authentication CDAP message to the policy driving
    /// the session. A session without a context is `WrongState` (it timed
    /// out, finished, or never existed).
    pub fn process_incoming(
        &self,
        msg: &CdapMessage,
        session_id: u32,
    ) -> ControlResult<AuthStatus> {
        let policy_type = self
            .core
            .with_context(session_id, |ctx| ctx.policy_type)
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "process_incoming",
                    format!("no security context for session {session_id}"),
                )
            })?;
        self.get_policy_set(policy_type)?.process_incoming(msg, session_id)
    }

    /// Completion of an asynchronous datapath crypto enablement.
    pub fn crypto_enable_completed(
        &self,
        session_id: u32,
        direction: CryptoDirection,
        result: i32,
    ) -> ControlResult<AuthStatus> {
        let policy_type = self
            .core
            .with_context(session_id, |ctx| ctx.policy_type)
            .ok_or_else(|| {
                ControlError::wrong_state(
                    "crypto_enable_completed",
                    format!("no security context for session {session_id}"),
                )
            })?;
        if result < 0 {
            warn!(session_id, result, "datapath refused crypto enablement");
            self.core.destroy_security_context(session_id);
            return Ok(AuthStatus::Failed);
        }
        self.get_policy_set(policy_type)?
            .crypto_enable_completed(session_id, direction)
    }
}

impl EventSubscriber for SecurityManager {
    fn event_happened(&self, event: &InternalEvent) {
        let InternalEvent::NMinusOneFlowDeallocated { port_id } = event;
        debug!(port_id, "N-1 flow gone, discarding its security context");
        self.core.destroy_security_context(*port_id);
    }
}
