//! Resource tag keys
//!
//! The Pulumi programs tag every resource they create with these keys, and
//! the teardown and status commands discover resources through them.
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `cluster_name` | Logical cluster name (VPCs, subnets, clusters) |
//! | `project_names` | Comma-separated project names |
//! | `Name` | Human-readable name shown in the AWS console |
//! | `name` | Logical volume name (volumes and snapshots) |
//! | `kubernetes.io/cluster/<name>` | Subnet ownership for the AWS load balancer controller |

/// Tag key carrying the logical cluster name
pub const TAG_CLUSTER_NAME: &str = "cluster_name";

/// Tag key carrying the comma-separated project names
pub const TAG_PROJECT_NAMES: &str = "project_names";

/// Console display name
pub const TAG_DISPLAY_NAME: &str = "Name";

/// Tag (AWS) or label (Exoscale) key carrying a volume's logical name
pub const TAG_VOLUME_NAME: &str = "name";

/// Value marking a subnet as owned by a cluster
pub const KUBERNETES_OWNED: &str = "owned";

/// Subnet ownership tag key for a cluster
pub fn kubernetes_cluster_tag(cluster_name: &str) -> String {
    format!("kubernetes.io/cluster/{cluster_name}")
}

/// Read the display name from a set of tags, falling back to the lowercase key.
pub fn display_name<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
{
    tags.clone()
        .into_iter()
        .find(|(k, _)| *k == TAG_DISPLAY_NAME)
        .or_else(|| tags.into_iter().find(|(k, _)| *k == TAG_VOLUME_NAME))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubernetes_cluster_tag() {
        assert_eq!(kubernetes_cluster_tag("prod"), "kubernetes.io/cluster/prod");
    }

    #[test]
    fn test_display_name_prefers_capitalized() {
        let tags = [("name", "lower"), ("Name", "Upper")];
        assert_eq!(display_name(tags.iter().copied()), Some("Upper"));

        let tags = [("name", "lower")];
        assert_eq!(display_name(tags.iter().copied()), Some("lower"));

        let tags: [(&str, &str); 0] = [];
        assert_eq!(display_name(tags.iter().copied()), None);
    }
}
