use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, Subject};

use crate::rbac::{rules_allow, Attributes};
use crate::store::Store;

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
pub const USER_KIND: &str = "User";
pub const GROUP_KIND: &str = "Group";
pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";

/// The group every apiserver superuser belongs to.
pub const SYSTEM_MASTERS_GROUP: &str = "system:masters";

/// Locates the subjects allowed to perform a request.
pub trait SubjectLocator: Send + Sync {
    /// Returns every subject granted the attributes, plus the messages of any
    /// lookup failures hit along the way. Failures never abort the scan; a
    /// missing role simply contributes nothing.
    fn allowed_subjects(&self, attrs: &Attributes) -> (Vec<Subject>, Vec<String>);
}

pub struct SubjectAccessEvaluator {
    super_user: Option<String>,
    cluster_roles: Arc<Store<ClusterRole>>,
    cluster_role_bindings: Arc<Store<ClusterRoleBinding>>,
}

impl SubjectAccessEvaluator {
    pub fn new(
        cluster_roles: Arc<Store<ClusterRole>>,
        cluster_role_bindings: Arc<Store<ClusterRoleBinding>>,
        super_user: Option<String>,
    ) -> Self {
        Self {
            super_user,
            cluster_roles,
            cluster_role_bindings,
        }
    }

    fn rules_for_role(&self, role_name: &str) -> Result<Vec<PolicyRule>, String> {
        match self.cluster_roles.get(role_name) {
            Some(role) => Ok(role.rules.clone().unwrap_or_default()),
            None => Err(format!("clusterrole {:?} not found", role_name)),
        }
    }
}

impl SubjectLocator for SubjectAccessEvaluator {
    fn allowed_subjects(&self, attrs: &Attributes) -> (Vec<Subject>, Vec<String>) {
        // seed subjects that hold access no matter what policy says
        let mut subjects = vec![Subject {
            api_group: Some(RBAC_API_GROUP.to_string()),
            kind: GROUP_KIND.to_string(),
            name: SYSTEM_MASTERS_GROUP.to_string(),
            namespace: None,
        }];
        if let Some(super_user) = &self.super_user {
            subjects.push(Subject {
                api_group: Some(RBAC_API_GROUP.to_string()),
                kind: USER_KIND.to_string(),
                name: super_user.clone(),
                namespace: None,
            });
        }

        let mut errors = Vec::new();
        for binding in self.cluster_role_bindings.list() {
            let rules = match self.rules_for_role(&binding.role_ref.name) {
                Ok(rules) => rules,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            if rules_allow(attrs, &rules) {
                subjects.extend(binding.subjects.clone().unwrap_or_default());
            }
        }

        (subjects, errors)
    }
}
