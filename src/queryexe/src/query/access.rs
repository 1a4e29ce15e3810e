use crate::context::ExecutionContext;
use common::{AccessType, EngineError};
use std::collections::HashSet;
use std::sync::RwLock;

/// Consulted before an operator touching a database object is built.
pub trait AccessGate: Send + Sync {
    /// Fails with an authorization error when the access is not allowed.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the compilation asking for access.
    /// * `object` - Name of the database or table.
    /// * `access` - Kind of access requested.
    fn check_access(
        &self,
        ctx: &ExecutionContext,
        object: &str,
        access: AccessType,
    ) -> Result<(), EngineError>;
}

/// Allows everything.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AccessGate for AllowAll {
    fn check_access(
        &self,
        _ctx: &ExecutionContext,
        _object: &str,
        _access: AccessType,
    ) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Denies the listed (object, access) pairs and allows the rest. Object names
/// are matched case insensitively.
#[derive(Debug, Default)]
pub struct DenyList {
    denied: RwLock<HashSet<(String, AccessType)>>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, object: &str, access: AccessType) {
        let mut denied = self.denied.write().unwrap_or_else(|e| e.into_inner());
        denied.insert((object.to_lowercase(), access));
    }

    pub fn allow(&self, object: &str, access: AccessType) {
        let mut denied = self.denied.write().unwrap_or_else(|e| e.into_inner());
        denied.remove(&(object.to_lowercase(), access));
    }
}

impl AccessGate for DenyList {
    fn check_access(
        &self,
        ctx: &ExecutionContext,
        object: &str,
        access: AccessType,
    ) -> Result<(), EngineError> {
        let denied = self.denied.read().unwrap_or_else(|e| e.into_inner());
        if denied.contains(&(object.to_lowercase(), access)) {
            debug!("denied {} access to {} in {}", access, object, ctx.database());
            return Err(EngineError::AccessDenied {
                object: object.to_string(),
                access,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ExecEnv;
    use common::config::Config;
    use std::sync::Arc;

    #[test]
    fn test_deny_list() {
        let ctx = ExecutionContext::new(Arc::new(ExecEnv::in_memory(1, Config::default())), "db");
        let gate = DenyList::new();
        gate.check_access(&ctx, "t", AccessType::Read).unwrap();

        gate.deny("T", AccessType::Read);
        match gate.check_access(&ctx, "t", AccessType::Read) {
            Err(EngineError::AccessDenied { object, access }) => {
                assert_eq!("t", object);
                assert_eq!(AccessType::Read, access);
            }
            other => panic!("unexpected result {:?}", other),
        }
        gate.check_access(&ctx, "t", AccessType::Write).unwrap();
        gate.check_access(&ctx, "u", AccessType::Read).unwrap();

        gate.allow("t", AccessType::Read);
        gate.check_access(&ctx, "t", AccessType::Read).unwrap();
        AllowAll.check_access(&ctx, "t", AccessType::Drop).unwrap();
    }
}
