use k8s_openapi::api::rbac::v1::PolicyRule;

pub const VERB_ALL: &str = "*";
pub const API_GROUP_ALL: &str = "*";
pub const RESOURCE_ALL: &str = "*";

/// The attributes of a single authorization check, mirroring the fields an
/// authorizer would pull off an incoming request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    pub verb: String,
    pub api_group: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub resource_request: bool,
    pub path: String,
}

impl Attributes {
    /// Attributes for a `get` on a named cluster-scoped resource
    pub fn get_resource(api_group: &str, resource: &str, name: &str) -> Self {
        Self {
            verb: "get".to_string(),
            api_group: api_group.to_string(),
            resource: resource.to_string(),
            name: name.to_string(),
            resource_request: true,
            ..Default::default()
        }
    }
}

pub fn verb_matches(rule: &PolicyRule, verb: &str) -> bool {
    rule.verbs.iter().any(|v| v == VERB_ALL || v == verb)
}

pub fn api_group_matches(rule: &PolicyRule, group: &str) -> bool {
    rule.api_groups
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|g| g == API_GROUP_ALL || g == group)
}

/// Matches `*`, the exact resource, or the `resource/subresource` form when a
/// subresource was requested.
pub fn resource_matches(rule: &PolicyRule, resource: &str, subresource: &str) -> bool {
    let resources = rule.resources.as_deref().unwrap_or_default();
    if resources.iter().any(|r| r == RESOURCE_ALL) {
        return true;
    }

    let combined = if subresource.is_empty() {
        resource.to_string()
    } else {
        format!("{}/{}", resource, subresource)
    };
    if resources.iter().any(|r| *r == combined) {
        return true;
    }

    // a rule may grant a subresource across all parent resources
    if !subresource.is_empty() {
        let any_parent = format!("*/{}", subresource);
        return resources.iter().any(|r| *r == any_parent);
    }

    false
}

/// An empty resourceNames list matches every name.
pub fn resource_name_matches(rule: &PolicyRule, name: &str) -> bool {
    match rule.resource_names.as_deref() {
        None => true,
        Some(names) if names.is_empty() => true,
        Some(names) => names.iter().any(|n| n == name),
    }
}

pub fn non_resource_url_matches(rule: &PolicyRule, path: &str) -> bool {
    rule.non_resource_urls
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|url| {
            url == "*"
                || url == path
                || (url.ends_with('*') && path.starts_with(url.trim_end_matches('*')))
        })
}

pub fn rule_allows(attrs: &Attributes, rule: &PolicyRule) -> bool {
    if attrs.resource_request {
        return verb_matches(rule, &attrs.verb)
            && api_group_matches(rule, &attrs.api_group)
            && resource_matches(rule, &attrs.resource, &attrs.subresource)
            && resource_name_matches(rule, &attrs.name);
    }

    verb_matches(rule, &attrs.verb) && non_resource_url_matches(rule, &attrs.path)
}

/// Returns true if any rule grants the requested access.
pub fn rules_allow(attrs: &Attributes, rules: &[PolicyRule]) -> bool {
    rules.iter().any(|rule| rule_allows(attrs, rule))
}
