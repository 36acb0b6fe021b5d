//! Authorization
//!
//! Two actions need authorization: a framework registering to receive
//! offers for a role, and a task being launched as a system user. The
//! local authorizer evaluates a fixed ACL list: the first ACL whose
//! subject and object both match decides; with no match the
//! `permissive` default applies.

use crate::eventual::Eventual;
use serde::{Deserialize, Serialize};

/// Subject or object of an ACL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Any,
    None,
    Some(Vec<String>),
}

impl Entity {
    /// Whether a request entity falls under an ACL entity.
    ///
    /// NONE only matches NONE; ANY matches ANY or NONE; SOME matches
    /// ANY, NONE, or a SOME superset of its values.
    fn matches(request: &Entity, acl: &Entity) -> bool {
        match request {
            Entity::None => matches!(acl, Entity::None),
            Entity::Any => matches!(acl, Entity::Any | Entity::None),
            Entity::Some(values) => match acl {
                Entity::Any | Entity::None => true,
                Entity::Some(allowed) => values.iter().all(|v| allowed.contains(v)),
            },
        }
    }

    /// Whether a matching ACL entity permits the request.
    fn allows(request: &Entity, acl: &Entity) -> bool {
        match request {
            Entity::None => matches!(acl, Entity::None),
            Entity::Any => matches!(acl, Entity::Any),
            Entity::Some(values) => match acl {
                Entity::Any => true,
                Entity::None => false,
                Entity::Some(allowed) => values.iter().all(|v| allowed.contains(v)),
            },
        }
    }

    fn principal(principal: Option<&str>) -> Entity {
        match principal {
            Some(p) => Entity::Some(vec![p.to_string()]),
            None => Entity::Any,
        }
    }
}

/// Which principals may register frameworks for which roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterFrameworkAcl {
    pub principals: Entity,
    pub roles: Entity,
}

/// Which principals may run tasks as which system users.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunTaskAcl {
    pub principals: Entity,
    pub users: Entity,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Acls {
    #[serde(default)]
    pub register_frameworks: Vec<RegisterFrameworkAcl>,
    #[serde(default)]
    pub run_tasks: Vec<RunTaskAcl>,
    /// Decision when no ACL matches. Defaults to allow.
    #[serde(default = "default_permissive")]
    pub permissive: bool,
}

fn default_permissive() -> bool {
    true
}

pub trait Authorizer: Send + Sync {
    fn authorize_register_framework(
        &self,
        principal: Option<&str>,
        role: &str,
    ) -> Eventual<bool>;

    fn authorize_run_task(&self, principal: Option<&str>, user: &str) -> Eventual<bool>;
}

pub struct LocalAuthorizer {
    acls: Acls,
}

impl LocalAuthorizer {
    pub fn new(acls: Acls) -> Self {
        LocalAuthorizer { acls }
    }
}

impl Authorizer for LocalAuthorizer {
    fn authorize_register_framework(
        &self,
        principal: Option<&str>,
        role: &str,
    ) -> Eventual<bool> {
        let subject = Entity::principal(principal);
        let object = Entity::Some(vec![role.to_string()]);

        for acl in &self.acls.register_frameworks {
            if Entity::matches(&subject, &acl.principals) && Entity::matches(&object, &acl.roles)
            {
                return Eventual::ready(
                    Entity::allows(&subject, &acl.principals)
                        && Entity::allows(&object, &acl.roles),
                );
            }
        }
        Eventual::ready(self.acls.permissive)
    }

    fn authorize_run_task(&self, principal: Option<&str>, user: &str) -> Eventual<bool> {
        let subject = Entity::principal(principal);
        let object = Entity::Some(vec![user.to_string()]);

        for acl in &self.acls.run_tasks {
            if Entity::matches(&subject, &acl.principals) && Entity::matches(&object, &acl.users) {
                return Eventual::ready(
                    Entity::allows(&subject, &acl.principals)
                        && Entity::allows(&object, &acl.users),
                );
            }
        }
        Eventual::ready(self.acls.permissive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[&str]) -> Entity {
        Entity::Some(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn test_first_matching_acl_decides() {
        let authorizer = LocalAuthorizer::new(Acls {
            register_frameworks: vec![
                RegisterFrameworkAcl {
                    principals: some(&["ops"]),
                    roles: Entity::Any,
                },
                RegisterFrameworkAcl {
                    principals: Entity::Any,
                    roles: some(&["prod"]),
                },
            ],
            run_tasks: Vec::new(),
            permissive: true,
        });

        // ops may use any role.
        assert_eq!(
            authorizer
                .authorize_register_framework(Some("ops"), "prod")
                .get(),
            Some(true)
        );
        // Everyone else only prod.
        assert_eq!(
            authorizer
                .authorize_register_framework(Some("dev"), "prod")
                .get(),
            Some(true)
        );
    }

    #[test]
    fn test_none_entity_denies() {
        let authorizer = LocalAuthorizer::new(Acls {
            register_frameworks: Vec::new(),
            run_tasks: vec![RunTaskAcl {
                principals: some(&["batch"]),
                users: Entity::None,
            }],
            permissive: true,
        });

        assert_eq!(
            authorizer.authorize_run_task(Some("batch"), "root").get(),
            Some(false)
        );
        // Unmatched principals fall through to permissive.
        assert_eq!(
            authorizer.authorize_run_task(Some("other"), "root").get(),
            Some(true)
        );
    }

    #[test]
    fn test_non_permissive_default_denies() {
        let authorizer = LocalAuthorizer::new(Acls {
            register_frameworks: Vec::new(),
            run_tasks: Vec::new(),
            permissive: false,
        });

        assert_eq!(
            authorizer
                .authorize_register_framework(Some("anyone"), "*")
                .get(),
            Some(false)
        );
    }
}
