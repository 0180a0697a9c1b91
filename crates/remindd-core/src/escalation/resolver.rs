//! Escalation target resolution.
//!
//! One resolver capability per target kind. Unresolvable targets report
//! not-found; resolution never fails with an error.

use std::collections::HashMap;

use crate::model::EscalationTarget;

pub trait TargetResolver: Send + Sync {
    /// Resolve a target descriptor to a recipient identity.
    fn resolve(&self, target: &EscalationTarget) -> Option<String>;
}

/// Resolves only direct user targets. Everything else is not-found.
#[derive(Default)]
pub struct DirectResolver;

impl TargetResolver for DirectResolver {
    fn resolve(&self, target: &EscalationTarget) -> Option<String> {
        match target {
            EscalationTarget::User { id } => Some(id.clone()),
            _ => None,
        }
    }
}

/// Map-backed directory lookup for the organizational target kinds.
#[derive(Default)]
pub struct DirectoryResolver {
    managers: HashMap<String, String>,
    team_leads: HashMap<String, String>,
    executives: HashMap<String, String>,
}

impl DirectoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manager(mut self, of: impl Into<String>, manager: impl Into<String>) -> Self {
        self.managers.insert(of.into(), manager.into());
        self
    }

    pub fn with_team_lead(mut self, team: impl Into<String>, lead: impl Into<String>) -> Self {
        self.team_leads.insert(team.into(), lead.into());
        self
    }

    pub fn with_executive(mut self, org: impl Into<String>, executive: impl Into<String>) -> Self {
        self.executives.insert(org.into(), executive.into());
        self
    }
}

impl TargetResolver for DirectoryResolver {
    fn resolve(&self, target: &EscalationTarget) -> Option<String> {
        match target {
            EscalationTarget::User { id } => Some(id.clone()),
            EscalationTarget::Manager { of } => self.managers.get(of).cloned(),
            EscalationTarget::TeamLead { team } => self.team_leads.get(team).cloned(),
            EscalationTarget::Executive { org } => self.executives.get(org).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_resolver_handles_only_users() {
        let resolver = DirectResolver;
        assert_eq!(
            resolver.resolve(&EscalationTarget::User {
                id: "u2".to_string()
            }),
            Some("u2".to_string())
        );
        assert_eq!(
            resolver.resolve(&EscalationTarget::Manager {
                of: "u1".to_string()
            }),
            None
        );
    }

    #[test]
    fn directory_resolver_looks_up_org_kinds() {
        let resolver = DirectoryResolver::new()
            .with_manager("u1", "mgr-1")
            .with_team_lead("platform", "lead-1")
            .with_executive("acme", "ceo");

        assert_eq!(
            resolver.resolve(&EscalationTarget::Manager {
                of: "u1".to_string()
            }),
            Some("mgr-1".to_string())
        );
        assert_eq!(
            resolver.resolve(&EscalationTarget::TeamLead {
                team: "platform".to_string()
            }),
            Some("lead-1".to_string())
        );
        assert_eq!(
            resolver.resolve(&EscalationTarget::Executive {
                org: "acme".to_string()
            }),
            Some("ceo".to_string())
        );
        assert_eq!(
            resolver.resolve(&EscalationTarget::Manager {
                of: "unknown".to_string()
            }),
            None
        );
    }
}
