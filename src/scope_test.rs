use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::scope::{parse_scope, scopes_to_visible_namespaces, Scope};
use crate::store::Store;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn rule(verbs: &[&str], api_groups: &[&str], resources: &[&str]) -> PolicyRule {
    PolicyRule {
        verbs: strings(verbs),
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        resource_names: None,
        non_resource_urls: None,
    }
}

fn role_store(roles: Vec<(&str, Vec<PolicyRule>)>) -> Arc<Store<ClusterRole>> {
    let store = Arc::new(Store::new());
    for (name, rules) in roles {
        store.apply(
            name.to_string(),
            ClusterRole {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                rules: Some(rules),
                ..Default::default()
            },
            Some("1".to_string()),
        );
    }
    store
}

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[test]
fn test_parse_scope() {
    struct TestCase {
        name: &'static str,
        scope: &'static str,
        expected: Option<Scope>,
    }

    let test_cases = vec![
        TestCase {
            name: "user scope",
            scope: "user:full",
            expected: Some(Scope::User("full".to_string())),
        },
        TestCase {
            name: "role scope",
            scope: "role:cluster-reader:hub",
            expected: Some(Scope::ClusterRole {
                name: "cluster-reader".to_string(),
                namespace: "hub".to_string(),
                escalating: false,
            }),
        },
        TestCase {
            name: "role scope with wildcard namespace",
            scope: "role:cluster-reader:*",
            expected: Some(Scope::ClusterRole {
                name: "cluster-reader".to_string(),
                namespace: "*".to_string(),
                escalating: false,
            }),
        },
        TestCase {
            name: "escalating role scope",
            scope: "role:cluster-reader:*:!",
            expected: Some(Scope::ClusterRole {
                name: "cluster-reader".to_string(),
                namespace: "*".to_string(),
                escalating: true,
            }),
        },
        TestCase {
            name: "role scope with bad suffix",
            scope: "role:cluster-reader:*:?",
            expected: None,
        },
        TestCase {
            name: "role scope with missing namespace",
            scope: "role:cluster-reader",
            expected: None,
        },
        TestCase {
            name: "unknown indicator",
            scope: "cluster:get:pods",
            expected: None,
        },
    ];

    for tc in test_cases {
        match (&tc.expected, parse_scope(tc.scope)) {
            (Some(expected), Ok(parsed)) => {
                assert_eq!(&parsed, expected, "test case: {}", tc.name)
            }
            (None, Err(_)) => {}
            (expected, got) => panic!(
                "test case {}: expected {:?}, got {:?}",
                tc.name, expected, got
            ),
        }
    }
}

#[test]
fn test_empty_scopes_see_everything() {
    let roles = role_store(vec![]);
    let (visible, errors) = scopes_to_visible_namespaces(&[], &roles, true);
    assert!(errors.is_empty());
    assert_eq!(visible, set(&["*"]));
}

#[test]
fn test_user_scopes() {
    let roles = role_store(vec![]);

    for scope in ["user:full", "user:list-projects"] {
        let (visible, errors) =
            scopes_to_visible_namespaces(&[scope.to_string()], &roles, true);
        assert!(errors.is_empty());
        assert_eq!(visible, set(&["*"]), "scope: {}", scope);
    }

    for scope in ["user:info", "user:check-access", "user:list-scoped-projects"] {
        let (visible, errors) =
            scopes_to_visible_namespaces(&[scope.to_string()], &roles, true);
        assert!(errors.is_empty());
        assert!(visible.is_empty(), "scope: {}", scope);
    }
}

#[test]
fn test_role_scope_resolves_namespace() {
    let roles = role_store(vec![(
        "ns-reader",
        vec![rule(&["get"], &[""], &["namespaces"])],
    )]);

    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:ns-reader:hub".to_string()], &roles, true);
    assert!(errors.is_empty());
    assert_eq!(visible, set(&["hub"]));

    let (visible, _) =
        scopes_to_visible_namespaces(&["role:ns-reader:*".to_string()], &roles, true);
    assert_eq!(visible, set(&["*"]));
}

#[test]
fn test_role_scope_without_namespace_grant_contributes_nothing() {
    let roles = role_store(vec![(
        "pod-reader",
        vec![rule(&["get"], &[""], &["pods"])],
    )]);

    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:pod-reader:*".to_string()], &roles, true);
    assert!(errors.is_empty());
    assert!(visible.is_empty());
}

#[test]
fn test_wildcard_rules_are_dropped() {
    // a rule with unbounded verbs would match, but scope evaluation scrubs it
    let roles = role_store(vec![(
        "too-broad",
        vec![rule(&["*"], &[""], &["namespaces"])],
    )]);

    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:too-broad:*".to_string()], &roles, true);
    assert!(errors.is_empty());
    assert!(visible.is_empty());
}

#[test]
fn test_escalating_scope_keeps_wildcard_rules() {
    let roles = role_store(vec![(
        "too-broad",
        vec![rule(&["*"], &[""], &["namespaces"])],
    )]);

    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:too-broad:*:!".to_string()], &roles, true);
    assert!(errors.is_empty());
    assert_eq!(visible, set(&["*"]));
}

#[test]
fn test_escalating_resources_scrubbed_from_rules() {
    // the rule grants get on namespaces and secrets together; scrubbing
    // removes secrets but the namespace grant survives
    let roles = role_store(vec![(
        "mixed",
        vec![rule(&["get"], &[""], &["namespaces", "secrets"])],
    )]);

    let (visible, _) =
        scopes_to_visible_namespaces(&["role:mixed:hub".to_string()], &roles, true);
    assert_eq!(visible, set(&["hub"]));

    // a rule granting only secrets is scrubbed into nothing
    let roles = role_store(vec![("secrets-only", vec![rule(&["get"], &[""], &["secrets"])])]);
    let (visible, _) =
        scopes_to_visible_namespaces(&["role:secrets-only:hub".to_string()], &roles, true);
    assert!(visible.is_empty());
}

#[test]
fn test_missing_role_contributes_nothing() {
    let roles = role_store(vec![]);
    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:gone:hub".to_string()], &roles, true);
    assert!(errors.is_empty());
    assert!(visible.is_empty());
}

#[test]
fn test_unknown_scopes() {
    let roles = role_store(vec![(
        "ns-reader",
        vec![rule(&["get"], &[""], &["namespaces"])],
    )]);
    let scopes = vec![
        "cluster:get:pods".to_string(),
        "role:ns-reader:hub".to_string(),
    ];

    // ignored when asked to, and the well-formed scope still resolves
    let (visible, errors) = scopes_to_visible_namespaces(&scopes, &roles, true);
    assert!(errors.is_empty());
    assert_eq!(visible, set(&["hub"]));

    // otherwise reported, still alongside the best-effort set
    let (visible, errors) = scopes_to_visible_namespaces(&scopes, &roles, false);
    assert_eq!(errors.len(), 1);
    assert_eq!(visible, set(&["hub"]));
}

#[test]
fn test_malformed_role_scope_is_always_an_error() {
    let roles = role_store(vec![]);
    let (visible, errors) =
        scopes_to_visible_namespaces(&["role:only-name".to_string()], &roles, true);
    assert_eq!(errors.len(), 1);
    assert!(visible.is_empty());
}
