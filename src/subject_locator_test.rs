use std::sync::Arc;

use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::rbac::Attributes;
use crate::store::Store;
use crate::subject_locator::{
    SubjectAccessEvaluator, SubjectLocator, GROUP_KIND, RBAC_API_GROUP, SYSTEM_MASTERS_GROUP,
    USER_KIND,
};

const CLUSTER_GROUP: &str = "cluster.open-cluster-management.io";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn get_clusters_rule(names: &[&str]) -> PolicyRule {
    PolicyRule {
        verbs: strings(&["get"]),
        api_groups: Some(strings(&[CLUSTER_GROUP])),
        resources: Some(strings(&["managedclusters"])),
        resource_names: if names.is_empty() {
            None
        } else {
            Some(strings(names))
        },
        non_resource_urls: None,
    }
}

fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

fn user_subject(name: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_API_GROUP.to_string()),
        kind: USER_KIND.to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

fn binding(name: &str, role: &str, subjects: Vec<Subject>) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(subjects),
    }
}

fn stores(
    roles: Vec<ClusterRole>,
    bindings: Vec<ClusterRoleBinding>,
) -> (Arc<Store<ClusterRole>>, Arc<Store<ClusterRoleBinding>>) {
    let role_store = Arc::new(Store::new());
    for role in roles {
        let name = role.metadata.name.clone().unwrap();
        role_store.apply(name, role, Some("1".to_string()));
    }
    let binding_store = Arc::new(Store::new());
    for b in bindings {
        let name = b.metadata.name.clone().unwrap();
        binding_store.apply(name, b, Some("1".to_string()));
    }
    (role_store, binding_store)
}

#[test]
fn test_seed_subjects_always_present() {
    let (roles, bindings) = stores(vec![], vec![]);
    let evaluator = SubjectAccessEvaluator::new(roles, bindings, None);

    let attrs = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-a");
    let (subjects, errors) = evaluator.allowed_subjects(&attrs);

    assert!(errors.is_empty());
    assert_eq!(subjects.len(), 1);
    assert_eq!(subjects[0].kind, GROUP_KIND);
    assert_eq!(subjects[0].name, SYSTEM_MASTERS_GROUP);
}

#[test]
fn test_super_user_seeded_when_configured() {
    let (roles, bindings) = stores(vec![], vec![]);
    let evaluator = SubjectAccessEvaluator::new(roles, bindings, Some("admin".to_string()));

    let attrs = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-a");
    let (subjects, _) = evaluator.allowed_subjects(&attrs);

    assert_eq!(subjects.len(), 2);
    assert_eq!(subjects[1].kind, USER_KIND);
    assert_eq!(subjects[1].name, "admin");
}

#[test]
fn test_binding_subjects_collected_when_role_allows() {
    let (roles, bindings) = stores(
        vec![
            cluster_role("cluster-reader", vec![get_clusters_rule(&[])]),
            cluster_role("pod-reader", vec![]),
        ],
        vec![
            binding("crb1", "cluster-reader", vec![user_subject("alice")]),
            binding("crb2", "pod-reader", vec![user_subject("bob")]),
        ],
    );
    let evaluator = SubjectAccessEvaluator::new(roles, bindings, None);

    let attrs = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-a");
    let (subjects, errors) = evaluator.allowed_subjects(&attrs);

    assert!(errors.is_empty());
    let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"alice"));
    assert!(!names.contains(&"bob"));
}

#[test]
fn test_missing_role_is_an_error_but_does_not_abort() {
    let (roles, bindings) = stores(
        vec![cluster_role("cluster-reader", vec![get_clusters_rule(&[])])],
        vec![
            binding("crb-bad", "no-such-role", vec![user_subject("mallory")]),
            binding("crb1", "cluster-reader", vec![user_subject("alice")]),
        ],
    );
    let evaluator = SubjectAccessEvaluator::new(roles, bindings, None);

    let attrs = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-a");
    let (subjects, errors) = evaluator.allowed_subjects(&attrs);

    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("no-such-role"));

    let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"alice"));
    assert!(!names.contains(&"mallory"));
}

#[test]
fn test_name_restricted_role_only_matches_named_resource() {
    let (roles, bindings) = stores(
        vec![cluster_role("one-cluster", vec![get_clusters_rule(&["mc-b"])])],
        vec![binding("crb1", "one-cluster", vec![user_subject("bob")])],
    );
    let evaluator = SubjectAccessEvaluator::new(roles, bindings, None);

    let allowed = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-b");
    let (subjects, _) = evaluator.allowed_subjects(&allowed);
    assert!(subjects.iter().any(|s| s.name == "bob"));

    let denied = Attributes::get_resource(CLUSTER_GROUP, "managedclusters", "mc-a");
    let (subjects, _) = evaluator.allowed_subjects(&denied);
    assert!(!subjects.iter().any(|s| s.name == "bob"));
}
