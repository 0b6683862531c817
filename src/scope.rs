use std::collections::HashSet;

use anyhow::{anyhow, Result};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};

use crate::rbac::{self, Attributes};
use crate::store::Store;

/// The user-extra key under which token scopes arrive on a request.
pub const SCOPES_KEY: &str = "scopes.authorization.openshift.io";

/// Wildcard entry meaning "no further name filtering".
pub const ALL_NAMESPACES: &str = "*";

const USER_INDICATOR: &str = "user:";
const CLUSTER_ROLE_INDICATOR: &str = "role:";

pub const USER_INFO: &str = "user:info";
pub const USER_ACCESS_CHECK: &str = "user:check-access";
pub const USER_LIST_SCOPED_PROJECTS: &str = "user:list-scoped-projects";
pub const USER_LIST_ALL_PROJECTS: &str = "user:list-projects";
pub const USER_FULL: &str = "user:full";

/// A parsed scope string. Scopes only ever narrow access; evaluation maps
/// each one to the set of names the token may see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    /// `user:<tag>`
    User(String),
    /// `role:<clusterrole>:<namespace|*>` with an optional `:!` suffix that
    /// marks the scope as escalating
    ClusterRole {
        name: String,
        namespace: String,
        escalating: bool,
    },
}

pub fn parse_scope(scope: &str) -> Result<Scope> {
    if scope.starts_with(USER_INDICATOR) {
        return Ok(Scope::User(scope[USER_INDICATOR.len()..].to_string()));
    }
    if scope.starts_with(CLUSTER_ROLE_INDICATOR) {
        let parts: Vec<&str> = scope.split(':').collect();
        match parts.len() {
            3 => {
                return Ok(Scope::ClusterRole {
                    name: parts[1].to_string(),
                    namespace: parts[2].to_string(),
                    escalating: false,
                })
            }
            4 if parts[3] == "!" => {
                return Ok(Scope::ClusterRole {
                    name: parts[1].to_string(),
                    namespace: parts[2].to_string(),
                    escalating: true,
                })
            }
            _ => return Err(anyhow!("bad format for scope {:?}", scope)),
        }
    }
    Err(anyhow!("no scope evaluator found for {:?}", scope))
}

/// Resources a scope-constrained token must never reach through a role, since
/// access to them is equivalent to broader credentials.
const ESCALATING_SCOPE_RESOURCES: &[(&str, &str)] = &[
    ("", "secrets"),
    ("image.openshift.io", "imagestreams/secrets"),
    ("oauth.openshift.io", "oauthauthorizetokens"),
    ("oauth.openshift.io", "oauthaccesstokens"),
    ("authorization.openshift.io", "roles"),
    ("authorization.openshift.io", "rolebindings"),
    ("authorization.openshift.io", "clusterroles"),
    ("authorization.openshift.io", "clusterrolebindings"),
    // used in Service admission to create a service with an external IP
    // outside the allowed range
    ("network.openshift.io", "service/externalips"),
    ("", "imagestreams/secrets"),
    ("", "oauthauthorizetokens"),
    ("", "oauthaccesstokens"),
    ("", "roles"),
    ("", "rolebindings"),
    ("", "clusterroles"),
    ("", "clusterrolebindings"),
];

fn has(set: Option<&Vec<String>>, value: &str) -> bool {
    set.map(|s| s.iter().any(|e| e == value)).unwrap_or(false)
}

/// Strips references to escalating resources out of a rule. Coarse on
/// purpose: the whole resource string is removed from the rule rather than
/// splitting the rule per verb or group.
fn remove_escalating_resources(rule: &PolicyRule) -> PolicyRule {
    let mut out = rule.clone();
    for (group, resource) in ESCALATING_SCOPE_RESOURCES {
        if !(has(rule.api_groups.as_ref(), group) && has(rule.resources.as_ref(), resource)) {
            continue;
        }
        if let Some(resources) = out.resources.as_mut() {
            resources.retain(|r| r != resource);
        }
    }
    out
}

fn resolve_role_rules(
    role_name: &str,
    escalating: bool,
    cluster_roles: &Store<ClusterRole>,
) -> Vec<PolicyRule> {
    let Some(role) = cluster_roles.get(role_name) else {
        return Vec::new();
    };

    let mut rules = Vec::new();
    for rule in role.rules.as_deref().unwrap_or_default() {
        if escalating {
            rules.push(rule.clone());
            continue;
        }

        // rules with unbounded access have no place in a scope
        if rule.verbs.iter().any(|v| v == rbac::VERB_ALL)
            || has(rule.resources.as_ref(), rbac::RESOURCE_ALL)
            || has(rule.api_groups.as_ref(), rbac::API_GROUP_ALL)
        {
            continue;
        }
        rules.push(remove_escalating_resources(rule));
    }
    rules
}

fn resolve_gettable_namespaces(scope: &Scope, cluster_roles: &Store<ClusterRole>) -> Vec<String> {
    match scope {
        Scope::User(tag) => match format!("{}{}", USER_INDICATOR, tag).as_str() {
            USER_FULL | USER_LIST_ALL_PROJECTS => vec![ALL_NAMESPACES.to_string()],
            _ => Vec::new(),
        },
        Scope::ClusterRole {
            name,
            namespace,
            escalating,
        } => {
            let rules = resolve_role_rules(name, *escalating, cluster_roles);
            let attrs = Attributes {
                verb: "get".to_string(),
                resource: "namespaces".to_string(),
                resource_request: true,
                ..Default::default()
            };
            if rbac::rules_allow(&attrs, &rules) {
                vec![namespace.clone()]
            } else {
                Vec::new()
            }
        }
    }
}

/// Returns the set of names the provided scopes have `get` access to.
///
/// An empty scope list means the token is unscoped and sees everything. Parse
/// failures are collected and returned next to the best-effort set so one
/// malformed scope cannot hide a well-formed one.
pub fn scopes_to_visible_namespaces(
    scopes: &[String],
    cluster_roles: &Store<ClusterRole>,
    ignore_unhandled: bool,
) -> (HashSet<String>, Vec<String>) {
    if scopes.is_empty() {
        return (
            HashSet::from([ALL_NAMESPACES.to_string()]),
            Vec::new(),
        );
    }

    let mut visible = HashSet::new();
    let mut errors = Vec::new();
    for raw in scopes {
        match parse_scope(raw) {
            Ok(scope) => {
                visible.extend(resolve_gettable_namespaces(&scope, cluster_roles));
            }
            Err(err) => {
                let unhandled = !raw.starts_with(USER_INDICATOR)
                    && !raw.starts_with(CLUSTER_ROLE_INDICATOR);
                if unhandled && ignore_unhandled {
                    continue;
                }
                errors.push(err.to_string());
            }
        }
    }

    (visible, errors)
}
