//! Environment-derived configuration
//!
//! Settings that clap cannot resolve on its own: the region fallback chain
//! and the provisioning environment the Pulumi programs consume.

use cluster_infra_common::ConfigError;
use cluster_infra_common::defaults::{DEFAULT_AWS_REGION, DEFAULT_NODE_COUNT};
use cluster_infra_common::env::{
    self, AdminRepo, get_admin_repos, get_env_count, get_ports, get_project_names,
    parse_admin_repos,
};
use serde::Serialize;

/// Region from the flag (or `REGION`), then `AWS_REGION`, then the default.
pub fn resolve_region(explicit: Option<String>) -> String {
    explicit
        .or_else(|| env::var("AWS_REGION"))
        .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string())
}

/// Node count with the zero/unset fallback applied
pub fn effective_node_count(count: u32) -> u32 {
    if count == 0 { DEFAULT_NODE_COUNT } else { count }
}

/// Repositories an admin-role command acts on.
///
/// `--repo` accepts `org/repo` or a bare name combined with `--org`.
/// Without `--repo` every entry of `ADMIN_REPOS` is used.
pub fn admin_targets(
    org: Option<&str>,
    repo: Option<&str>,
) -> Result<Vec<AdminRepo>, ConfigError> {
    match (repo, org) {
        (Some(repo), _) if repo.contains('/') => parse_admin_repos(repo),
        (Some(repo), Some(org)) => parse_admin_repos(&format!("{org}/{repo}")),
        (Some(_), None) => Err(ConfigError::MissingVar {
            name: "GITHUB_ORGANIZATION_NAME".to_string(),
        }),
        (None, _) => {
            let repos = get_admin_repos()?;
            if repos.is_empty() {
                return Err(ConfigError::MissingVar {
                    name: "ADMIN_REPOS".to_string(),
                });
            }
            Ok(repos)
        }
    }
}

/// Validated provisioning environment, printed by `cluster-infra env`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentReport {
    pub cluster_name: Option<String>,
    pub region: String,
    pub ports: Vec<u16>,
    pub project_names: Vec<String>,
    pub default_node_count: u32,
    pub gpu_node_count: u32,
    pub admin_repos: Vec<AdminRepo>,
}

impl EnvironmentReport {
    /// Read and validate every provisioning variable.
    pub fn from_env(cluster_name: Option<String>, region: String) -> Result<Self, ConfigError> {
        Ok(Self {
            cluster_name,
            region,
            ports: get_ports()?,
            project_names: get_project_names()?,
            default_node_count: effective_node_count(get_env_count("DEFAULT_NODE_COUNT")?),
            gpu_node_count: get_env_count("GPU_NODE_COUNT")?,
            admin_repos: get_admin_repos()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_infra_test_utils::EnvGuard;

    #[test]
    fn test_resolve_region_order() {
        let _env = EnvGuard::new(&[("AWS_REGION", Some("eu-west-1"))]);
        assert_eq!(resolve_region(Some("us-east-2".into())), "us-east-2");
        assert_eq!(resolve_region(None), "eu-west-1");
    }

    #[test]
    fn test_resolve_region_default() {
        let _env = EnvGuard::new(&[("AWS_REGION", None)]);
        assert_eq!(resolve_region(None), DEFAULT_AWS_REGION);
    }

    #[test]
    fn test_effective_node_count() {
        assert_eq!(effective_node_count(0), DEFAULT_NODE_COUNT);
        assert_eq!(effective_node_count(3), 3);
    }

    #[test]
    fn test_admin_targets_from_flags() {
        let acme_infra = vec![AdminRepo {
            org: "acme".into(),
            repo: "infra".into(),
        }];
        assert_eq!(admin_targets(None, Some("acme/infra")).unwrap(), acme_infra);
        assert_eq!(admin_targets(Some("acme"), Some("infra")).unwrap(), acme_infra);
        assert!(matches!(
            admin_targets(None, Some("infra")),
            Err(ConfigError::MissingVar { .. })
        ));
    }

    #[test]
    fn test_admin_targets_from_env() {
        let _env = EnvGuard::new(&[("ADMIN_REPOS", Some("acme/infra, acme/web"))]);
        let repos = admin_targets(Some("ignored"), None).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[1].repo, "web");
    }

    #[test]
    fn test_admin_targets_requires_some_repo() {
        let _env = EnvGuard::new(&[("ADMIN_REPOS", None)]);
        assert!(matches!(
            admin_targets(None, None),
            Err(ConfigError::MissingVar { .. })
        ));
    }

    #[test]
    fn test_environment_report() {
        let _env = EnvGuard::new(&[
            ("PORT", Some("8080,9090")),
            ("PORTS", None),
            ("PROJECT_NAME", None),
            ("PROJECT_NAMES", Some("chat;notebooks")),
            ("DEFAULT_NODE_COUNT", None),
            ("GPU_NODE_COUNT", Some("2")),
            ("ADMIN_REPOS", Some("acme/infra")),
        ]);

        let report = EnvironmentReport::from_env(Some("prod".into()), "ca-central-1".into()).unwrap();

        assert_eq!(report.ports, vec![8080, 9090]);
        assert_eq!(report.project_names, vec!["chat", "notebooks"]);
        assert_eq!(report.default_node_count, DEFAULT_NODE_COUNT);
        assert_eq!(report.gpu_node_count, 2);
        assert_eq!(
            report.admin_repos,
            vec![AdminRepo {
                org: "acme".into(),
                repo: "infra".into()
            }]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cluster_name"], "prod");
        assert_eq!(json["admin_repos"][0]["repo"], "infra");
    }

    #[test]
    fn test_environment_report_requires_ports() {
        let _env = EnvGuard::new(&[
            ("PORT", None),
            ("PORTS", None),
            ("PROJECT_NAME", Some("chat")),
            ("PROJECT_NAMES", None),
        ]);

        let err = EnvironmentReport::from_env(None, "ca-central-1".into()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingList { .. }));
    }

    #[test]
    fn test_environment_report_rejects_bad_count() {
        let _env = EnvGuard::new(&[
            ("PORT", Some("80")),
            ("PORTS", None),
            ("PROJECT_NAME", Some("chat")),
            ("PROJECT_NAMES", None),
            ("DEFAULT_NODE_COUNT", Some("-1")),
        ]);

        let err = EnvironmentReport::from_env(None, "ca-central-1".into()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCount { .. }));
    }
}
