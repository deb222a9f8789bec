//! EKS admin roles assumable from GitHub Actions via OIDC
//!
//! Each `org/repo` gets a role trusted through a policy template, copies of
//! the AWS managed EKS policies scoped down to the cluster, and an inline
//! policy rendered from a second template.

use crate::aws::account::AccountId;
use crate::aws::error::{ignore_already_exists, ignore_not_found};
use crate::aws::iam::{IamRoles, managed_policy_arn};
use anyhow::{Context, Result};
use aws_sdk_iam::types::PolicyScopeType;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Managed policies copied and scoped for each admin role
pub const SCOPED_MANAGED_POLICIES: &[&str] = &[
    "AmazonEKSClusterPolicy",
    "AmazonEKSServicePolicy",
    "AmazonEC2ContainerRegistryReadOnly",
];

pub fn admin_role_name(cluster_name: &str, org: &str, repo: &str) -> String {
    format!("{cluster_name}-{org}-{repo}-admin-role")
}

pub fn scoped_policy_name(cluster_name: &str, org: &str, repo: &str, managed: &str) -> String {
    format!("{cluster_name}-{org}-{repo}-scoped-{managed}")
}

pub fn inline_policy_name(cluster_name: &str, org: &str, repo: &str) -> String {
    format!("{cluster_name}-{org}-{repo}-custom-inline-policy")
}

/// Whether a local policy belongs to the admin role of `repo`.
///
/// Matches both `<cluster>-<repo>-scoped-*` and the org-qualified names
/// [`scoped_policy_name`] produces.
pub fn is_scoped_policy(policy_name: &str, cluster_name: &str, org: &str, repo: &str) -> bool {
    [
        format!("{cluster_name}-{repo}-scoped-"),
        format!("{cluster_name}-{org}-{repo}-scoped-"),
    ]
    .iter()
    .any(|prefix| policy_name.starts_with(prefix.as_str()))
}

/// Resource ARN pattern covering every EKS resource of a cluster
pub fn cluster_resource_arn(account_id: &str, cluster_name: &str) -> String {
    format!("arn:aws:eks:*:{account_id}:*/{cluster_name}*")
}

/// Replace `${KEY}` placeholders in every string of a JSON document.
pub fn substitute_placeholders(value: Value, substitutions: &[(&str, &str)]) -> Value {
    match value {
        Value::String(s) => Value::String(substitutions.iter().fold(s, |acc, (key, val)| {
            acc.replace(&format!("${{{key}}}"), val)
        })),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| substitute_placeholders(v, substitutions))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_placeholders(v, substitutions)))
                .collect(),
        ),
        other => other,
    }
}

/// Load a JSON policy template and substitute its placeholders.
pub fn load_policy_template(path: &Path, substitutions: &[(&str, &str)]) -> Result<Value> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy template {}", path.display()))?;
    let template: Value = serde_json::from_str(&data)
        .with_context(|| format!("Invalid JSON in policy template {}", path.display()))?;
    Ok(substitute_placeholders(template, substitutions))
}

fn scope_resource(value: Value, resource_arn: &str) -> Value {
    match value {
        Value::String(s) if s.trim() == "*" => Value::String(resource_arn.to_string()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| scope_resource(v, resource_arn))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, scope_resource(v, resource_arn)))
                .collect(),
        ),
        other => other,
    }
}

/// Rewrite every `"*"` under a statement's `Resource` to `resource_arn`.
///
/// Other fields (`Action`, `Condition`, ...) are left untouched.
pub fn scope_policy_resources(mut document: Value, resource_arn: &str) -> Value {
    let statements: &mut [Value] = match document.get_mut("Statement") {
        Some(Value::Array(statements)) => statements.as_mut_slice(),
        Some(statement) if statement.is_object() => std::slice::from_mut(statement),
        _ => &mut [],
    };

    for statement in statements.iter_mut() {
        if let Some(resource) = statement.get_mut("Resource") {
            *resource = scope_resource(resource.take(), resource_arn);
        }
    }
    document
}

/// Decode a policy document as returned by `GetPolicyVersion`.
///
/// IAM returns documents URL-encoded (RFC 3986).
pub fn decode_policy_document(encoded: &str) -> Result<Value> {
    let text = urlencoding::decode(encoded).context("Policy document is not UTF-8")?;
    serde_json::from_str(&text).context("Policy document is not valid JSON")
}

/// Inputs for creating one admin role
#[derive(Debug, Clone)]
pub struct AdminRoleRequest<'a> {
    pub cluster_name: &'a str,
    pub org: &'a str,
    pub repo: &'a str,
    pub account_id: &'a AccountId,
    pub trust_template: &'a Path,
    pub inline_template: &'a Path,
}

impl IamRoles {
    /// Default version of a managed policy, decoded
    async fn managed_policy_document(&self, policy_arn: &str) -> Result<Value> {
        let policy = self
            .client()
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await
            .with_context(|| format!("Failed to get policy {policy_arn}"))?;
        let version = policy
            .policy()
            .and_then(|p| p.default_version_id())
            .with_context(|| format!("Policy {policy_arn} has no default version"))?;

        let response = self
            .client()
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version)
            .send()
            .await
            .with_context(|| format!("Failed to get version {version} of {policy_arn}"))?;
        let document = response
            .policy_version()
            .and_then(|v| v.document())
            .with_context(|| format!("Policy {policy_arn} version {version} has no document"))?;

        decode_policy_document(document)
    }

    /// Create the admin role for one repository.
    pub async fn create_admin_role(&self, request: &AdminRoleRequest<'_>) -> Result<String> {
        let AdminRoleRequest {
            cluster_name,
            org,
            repo,
            account_id,
            ..
        } = *request;
        let role_name = admin_role_name(cluster_name, org, repo);

        let trust_policy = load_policy_template(
            request.trust_template,
            &[
                ("ACCOUNT_ID", account_id.as_str()),
                ("ORG_NAME", org),
                ("REPO_NAME", repo),
            ],
        )?;
        let role_arn = self
            .ensure_role(
                &role_name,
                &trust_policy,
                &format!("Admin role for cluster {cluster_name} and repo {repo}"),
            )
            .await?;

        let resource_arn = cluster_resource_arn(account_id, cluster_name);
        for managed in SCOPED_MANAGED_POLICIES {
            let managed_arn = managed_policy_arn(managed);
            let document =
                scope_policy_resources(self.managed_policy_document(&managed_arn).await?, &resource_arn);
            let policy_name = scoped_policy_name(cluster_name, org, repo, managed);

            let result = self
                .client()
                .create_policy()
                .policy_name(&policy_name)
                .policy_document(document.to_string())
                .description(format!(
                    "Scoped policy derived from {managed_arn} for cluster {cluster_name}"
                ))
                .send()
                .await;
            match ignore_already_exists(result)
                .with_context(|| format!("Failed to create policy {policy_name}"))?
            {
                Some(_) => info!(policy = %policy_name, "Created scoped policy"),
                None => debug!(policy = %policy_name, "Scoped policy already exists"),
            }

            self.client()
                .attach_role_policy()
                .role_name(&role_name)
                .policy_arn(format!("arn:aws:iam::{account_id}:policy/{policy_name}"))
                .send()
                .await
                .with_context(|| format!("Failed to attach {policy_name} to {role_name}"))?;
            info!(policy = %policy_name, role_name = %role_name, "Attached scoped policy");
        }

        let inline_policy = load_policy_template(
            request.inline_template,
            &[
                ("ACCOUNT_ID", account_id.as_str()),
                ("CLUSTER_NAME", cluster_name),
                ("REPO_NAME", repo),
            ],
        )?;
        let inline_name = inline_policy_name(cluster_name, org, repo);
        self.client()
            .put_role_policy()
            .role_name(&role_name)
            .policy_name(&inline_name)
            .policy_document(inline_policy.to_string())
            .send()
            .await
            .with_context(|| format!("Failed to put inline policy {inline_name}"))?;

        info!(role_name = %role_name, arn = %role_arn, "Admin role setup complete");
        Ok(role_arn)
    }

    /// Delete the admin role of one repository and its scoped policies.
    pub async fn cleanup_admin_role(&self, cluster_name: &str, org: &str, repo: &str) -> Result<()> {
        let role_name = admin_role_name(cluster_name, org, repo);
        self.delete_role_with_policies(&role_name).await?;

        for (name, arn) in self.list_local_policies().await? {
            if !is_scoped_policy(&name, cluster_name, org, repo) {
                continue;
            }
            self.delete_policy_with_versions(&arn).await?;
            info!(policy = %name, "Deleted scoped policy");
        }
        Ok(())
    }

    /// Detach and delete every policy of a role, then the role itself.
    ///
    /// A missing role counts as deleted.
    pub async fn delete_role_with_policies(&self, role_name: &str) -> Result<()> {
        let attached = self
            .client()
            .list_attached_role_policies()
            .role_name(role_name)
            .send()
            .await;
        let Some(attached) =
            ignore_not_found(attached).context("Failed to list attached role policies")?
        else {
            debug!(role_name = %role_name, "IAM role already deleted");
            return Ok(());
        };

        for policy_arn in attached.attached_policies().iter().filter_map(|p| p.policy_arn()) {
            let result = self
                .client()
                .detach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send()
                .await;
            ignore_not_found(result).context("Failed to detach role policy")?;
        }

        let inline = self
            .client()
            .list_role_policies()
            .role_name(role_name)
            .send()
            .await
            .context("Failed to list inline role policies")?;
        for policy_name in inline.policy_names() {
            let result = self
                .client()
                .delete_role_policy()
                .role_name(role_name)
                .policy_name(policy_name)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete inline role policy")?;
        }

        let result = self.client().delete_role().role_name(role_name).send().await;
        match ignore_not_found(result).context("Failed to delete IAM role")? {
            Some(_) => info!(role_name = %role_name, "Deleted IAM role"),
            None => debug!(role_name = %role_name, "IAM role already deleted"),
        }
        Ok(())
    }

    /// `(name, arn)` of every customer-managed policy
    async fn list_local_policies(&self) -> Result<Vec<(String, String)>> {
        let mut policies = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .client()
                .list_policies()
                .scope(PolicyScopeType::Local)
                .set_marker(marker)
                .send()
                .await
                .context("Failed to list local policies")?;

            policies.extend(response.policies().iter().filter_map(|p| {
                Some((p.policy_name()?.to_string(), p.arn()?.to_string()))
            }));

            if !response.is_truncated() {
                break;
            }
            marker = response.marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        Ok(policies)
    }

    async fn delete_policy_with_versions(&self, policy_arn: &str) -> Result<()> {
        let versions = self
            .client()
            .list_policy_versions()
            .policy_arn(policy_arn)
            .send()
            .await
            .context("Failed to list policy versions")?;

        for version in versions.versions().iter().filter(|v| !v.is_default_version()) {
            let Some(version_id) = version.version_id() else {
                continue;
            };
            let result = self
                .client()
                .delete_policy_version()
                .policy_arn(policy_arn)
                .version_id(version_id)
                .send()
                .await;
            ignore_not_found(result).context("Failed to delete policy version")?;
        }

        let result = self.client().delete_policy().policy_arn(policy_arn).send().await;
        if ignore_not_found(result)
            .context("Failed to delete policy")?
            .is_none()
        {
            debug!(policy_arn = %policy_arn, "Policy already deleted");
        }
        Ok(())
    }
}
