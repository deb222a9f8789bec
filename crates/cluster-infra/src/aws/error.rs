//! AWS error classification and handling
//!
//! Classifies SDK errors by their `.code()` instead of string matching on the
//! Debug format. Teardown treats `NotFound` as "already deleted" and
//! provisioning treats `AlreadyExists` as success, which makes every command
//! safe to re-run.

use aws_sdk_ec2::error::ProvideErrorMetadata;
use thiserror::Error;

/// AWS error categories
#[derive(Debug, Error)]
pub enum AwsError {
    /// Resource was not found (already deleted)
    #[error("Resource not found: {message}")]
    NotFound { message: String },

    /// Resource already exists (safe to ignore in create operations)
    #[error("Resource already exists")]
    AlreadyExists,

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource has dependent objects (SG with attached ENI, cluster with node groups)
    #[error("Resource has dependent objects")]
    DependencyViolation,

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists)
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, AwsError::DependencyViolation)
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    // EC2
    "InvalidVpcID.NotFound",
    "InvalidSubnetID.NotFound",
    "InvalidNatGatewayID.NotFound",
    "InvalidInternetGatewayID.NotFound",
    "InvalidRouteTableID.NotFound",
    "InvalidRoute.NotFound",
    "InvalidAssociationID.NotFound",
    "InvalidNetworkInterfaceID.NotFound",
    "InvalidAllocationID.NotFound",
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "InvalidVolume.NotFound",
    "Gateway.NotAttached",
    // ELB
    "LoadBalancerNotFound",
    // EKS
    "ResourceNotFoundException",
    // IAM
    "NoSuchEntity",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "EntityAlreadyExists",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &[
    "DependencyViolation",
    "ResourceInUseException",
    "DeleteConflict",
];

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound { message },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists,
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation,
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

/// Classify any SDK error exposing error metadata.
///
/// `ProvideErrorMetadata` is shared by every `aws-sdk-*` crate, so this works
/// for EC2, ELB, EKS and IAM errors alike.
pub fn classify<E: ProvideErrorMetadata>(error: &E) -> AwsError {
    classify_aws_error(error.code(), error.message())
}

/// Map a not-found error to `Ok(None)`, propagating everything else.
///
/// Used by every delete, detach and release call during teardown.
pub fn ignore_not_found<T, E>(result: Result<T, E>) -> anyhow::Result<Option<T>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if classify(&e).is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Map an already-exists error to `Ok(None)`, propagating everything else.
pub fn ignore_already_exists<T, E>(result: Result<T, E>) -> anyhow::Result<Option<T>>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if classify(&e).is_already_exists() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;

    #[derive(Debug)]
    struct FakeSdkError(ErrorMetadata);

    impl std::fmt::Display for FakeSdkError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0.code())
        }
    }

    impl std::error::Error for FakeSdkError {}

    impl ProvideErrorMetadata for FakeSdkError {
        fn meta(&self) -> &ErrorMetadata {
            &self.0
        }
    }

    fn fake(code: &str) -> FakeSdkError {
        FakeSdkError(ErrorMetadata::builder().code(code).message("msg").build())
    }

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "Expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(matches!(err, AwsError::Throttled));
        }
    }

    #[test]
    fn dependency_codes() {
        for code in DEPENDENCY_CODES {
            let err = classify_aws_error(Some(code), Some("still in use"));
            assert!(err.is_dependency_violation(), "{code}");
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { .. }));

        let err2 = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err2, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn ignore_not_found_maps_to_none() {
        let result: Result<(), _> = Err(fake("InvalidSubnetID.NotFound"));
        assert!(ignore_not_found(result).unwrap().is_none());

        let result: Result<u32, FakeSdkError> = Ok(7);
        assert_eq!(ignore_not_found(result).unwrap(), Some(7));

        let result: Result<(), _> = Err(fake("DependencyViolation"));
        assert!(ignore_not_found(result).is_err());
    }

    #[test]
    fn ignore_already_exists_maps_to_none() {
        let result: Result<(), _> = Err(fake("EntityAlreadyExists"));
        assert!(ignore_already_exists(result).unwrap().is_none());

        let result: Result<(), _> = Err(fake("NoSuchEntity"));
        assert!(ignore_already_exists(result).is_err());
    }
}
