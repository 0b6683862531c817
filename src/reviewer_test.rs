use std::sync::Arc;

use k8s_openapi::api::rbac::v1::Subject;

use crate::rbac::Attributes;
use crate::reviewer::{subjects_to_users_and_groups, Review, Reviewer, SubjectAccessReviewer};
use crate::subject_locator::{
    SubjectLocator, GROUP_KIND, RBAC_API_GROUP, SERVICE_ACCOUNT_KIND, USER_KIND,
};

fn subject(kind: &str, api_group: &str, name: &str, namespace: Option<&str>) -> Subject {
    Subject {
        api_group: if api_group.is_empty() {
            None
        } else {
            Some(api_group.to_string())
        },
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: namespace.map(|ns| ns.to_string()),
    }
}

#[test]
fn test_subjects_to_users_and_groups() {
    struct TestCase {
        name: &'static str,
        subjects: Vec<Subject>,
        expected_users: Vec<&'static str>,
        expected_groups: Vec<&'static str>,
    }

    let test_cases = vec![
        TestCase {
            name: "users and groups pass through",
            subjects: vec![
                subject(USER_KIND, RBAC_API_GROUP, "alice", None),
                subject(GROUP_KIND, RBAC_API_GROUP, "devs", None),
            ],
            expected_users: vec!["alice"],
            expected_groups: vec!["devs"],
        },
        TestCase {
            name: "service account becomes synthetic user with groups",
            subjects: vec![subject(SERVICE_ACCOUNT_KIND, "", "agent", Some("hub"))],
            expected_users: vec!["system:serviceaccount:hub:agent"],
            expected_groups: vec!["system:serviceaccounts", "system:serviceaccounts:hub"],
        },
        TestCase {
            name: "service account without namespace is skipped",
            subjects: vec![subject(SERVICE_ACCOUNT_KIND, "", "agent", None)],
            expected_users: vec![],
            expected_groups: vec![],
        },
        TestCase {
            name: "unrecognized api group is ignored",
            subjects: vec![subject(USER_KIND, "example.io", "impostor", None)],
            expected_users: vec![],
            expected_groups: vec![],
        },
        TestCase {
            name: "duplicates are preserved for the caller to dedup",
            subjects: vec![
                subject(USER_KIND, RBAC_API_GROUP, "alice", None),
                subject(USER_KIND, RBAC_API_GROUP, "alice", None),
            ],
            expected_users: vec!["alice", "alice"],
            expected_groups: vec![],
        },
    ];

    for tc in test_cases {
        let (users, groups) = subjects_to_users_and_groups(&tc.subjects);
        assert_eq!(users, tc.expected_users, "test case: {}", tc.name);
        assert_eq!(groups, tc.expected_groups, "test case: {}", tc.name);
    }
}

struct FakeLocator {
    subjects: Vec<Subject>,
    errors: Vec<String>,
}

impl SubjectLocator for FakeLocator {
    fn allowed_subjects(&self, _attrs: &Attributes) -> (Vec<Subject>, Vec<String>) {
        (self.subjects.clone(), self.errors.clone())
    }
}

#[test]
fn test_review_partitions_subjects() {
    let reviewer = SubjectAccessReviewer::new(Arc::new(FakeLocator {
        subjects: vec![
            subject(USER_KIND, RBAC_API_GROUP, "alice", None),
            subject(GROUP_KIND, RBAC_API_GROUP, "system:masters", None),
        ],
        errors: vec![],
    }));

    let review = reviewer.review("cluster.open-cluster-management.io", "managedclusters", "mc-a");
    assert_eq!(review.users(), &["alice".to_string()]);
    assert_eq!(review.groups(), &["system:masters".to_string()]);
    assert!(review.evaluation_error().is_none());
}

#[test]
fn test_review_keeps_partial_result_on_error() {
    let reviewer = SubjectAccessReviewer::new(Arc::new(FakeLocator {
        subjects: vec![subject(USER_KIND, RBAC_API_GROUP, "alice", None)],
        errors: vec!["clusterrole \"gone\" not found".to_string()],
    }));

    let review = reviewer.review("cluster.open-cluster-management.io", "managedclusters", "mc-a");
    assert_eq!(review.users(), &["alice".to_string()]);
    assert!(review
        .evaluation_error()
        .unwrap()
        .contains("gone"));
}

#[test]
fn test_empty_review() {
    let review = Review::default();
    assert!(review.users().is_empty());
    assert!(review.groups().is_empty());
    assert!(review.evaluation_error().is_none());
}
