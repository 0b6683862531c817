use std::sync::Arc;

use k8s_openapi::api::rbac::v1::Subject;

use crate::rbac::Attributes;
use crate::subject_locator::{
    SubjectLocator, GROUP_KIND, RBAC_API_GROUP, SERVICE_ACCOUNT_KIND, USER_KIND,
};

pub const SERVICE_ACCOUNTS_GROUP: &str = "system:serviceaccounts";

/// The outcome of one access review: the users and groups that may `get` a
/// named resource. A non-empty evaluation error means the lists are partial
/// truth, which beats discarding them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Review {
    users: Vec<String>,
    groups: Vec<String>,
    evaluation_error: Option<String>,
}

impl Review {
    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn evaluation_error(&self) -> Option<&str> {
        self.evaluation_error.as_deref()
    }
}

/// Performs access reviews for a resource by name.
pub trait Reviewer: Send + Sync {
    fn review(&self, group: &str, resource: &str, name: &str) -> Review;
}

pub struct SubjectAccessReviewer {
    subject_locator: Arc<dyn SubjectLocator>,
}

impl SubjectAccessReviewer {
    pub fn new(subject_locator: Arc<dyn SubjectLocator>) -> Self {
        Self { subject_locator }
    }
}

impl Reviewer for SubjectAccessReviewer {
    fn review(&self, group: &str, resource: &str, name: &str) -> Review {
        let attrs = Attributes::get_resource(group, resource, name);
        let (subjects, errors) = self.subject_locator.allowed_subjects(&attrs);
        let (users, groups) = subjects_to_users_and_groups(&subjects);
        Review {
            users,
            groups,
            evaluation_error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }
}

/// Flattens RBAC subjects into user and group name lists.
///
/// A ServiceAccount subject becomes the synthetic user
/// `system:serviceaccount:<ns>:<name>` and contributes the serviceaccount
/// groups for its namespace.
pub fn subjects_to_users_and_groups(subjects: &[Subject]) -> (Vec<String>, Vec<String>) {
    let mut users = Vec::new();
    let mut groups = Vec::new();

    for subject in subjects {
        let api_group = subject.api_group.as_deref().unwrap_or_default();
        match subject.kind.as_str() {
            USER_KIND if api_group == RBAC_API_GROUP => users.push(subject.name.clone()),
            GROUP_KIND if api_group == RBAC_API_GROUP => groups.push(subject.name.clone()),
            SERVICE_ACCOUNT_KIND if api_group.is_empty() => {
                let Some(namespace) = subject.namespace.as_deref().filter(|ns| !ns.is_empty())
                else {
                    continue;
                };
                users.push(format!(
                    "system:serviceaccount:{}:{}",
                    namespace, subject.name
                ));
                groups.push(SERVICE_ACCOUNTS_GROUP.to_string());
                groups.push(format!("{}:{}", SERVICE_ACCOUNTS_GROUP, namespace));
            }
            _ => {}
        }
    }

    (users, groups)
}
