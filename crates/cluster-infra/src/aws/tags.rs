//! EC2 tag and timestamp helpers
//!
//! Volumes and snapshots carry `name=<logical name>` (see
//! [`cluster_infra_common::tags`]) plus a console `Name`; discovery filters on
//! the same keys.

use aws_sdk_ec2::types::{Filter, ResourceType, Tag, TagSpecification};
use chrono::{DateTime, Utc};

/// Build an EC2 TagSpecification from key/value pairs.
pub fn ec2_tag_spec(resource_type: ResourceType, tags: &[(&str, &str)]) -> TagSpecification {
    let mut builder = TagSpecification::builder().resource_type(resource_type);
    for (k, v) in tags {
        builder = builder.tags(Tag::builder().key(*k).value(*v).build());
    }
    builder.build()
}

/// `tag:<key>` filter matching a single value
pub fn tag_filter(key: &str, value: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{key}"))
        .values(value)
        .build()
}

/// Value of `key` in an EC2 tag list
pub fn tag_value<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key() == Some(key))
        .and_then(|t| t.value())
}

/// Convert an SDK timestamp to chrono, `None` if out of range
pub fn to_chrono(time: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}
