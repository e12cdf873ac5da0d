use std::fmt;

use serde::Serialize;

/// Build metadata stamped into a binary by its build script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} build, features: {}, built {} with {})",
            self.version,
            self.build_profile,
            self.build_features,
            self.build_timestamp,
            self.rust_version
        )
    }
}

/// Collect [`BuildInfo`] from the calling crate's compile-time environment.
/// Values the build script did not set read as `unknown`.
#[macro_export]
macro_rules! build_info {
    () => {{
        fn or_unknown(value: Option<&'static str>) -> &'static str {
            value.unwrap_or("unknown")
        }
        $crate::version::BuildInfo {
            build_profile: or_unknown(option_env!("BUILD_PROFILE")),
            build_features: or_unknown(option_env!("BUILD_FEATURES")),
            version: or_unknown(option_env!("REPO_VERSION")),
            build_timestamp: or_unknown(option_env!("BUILD_TIMESTAMP")),
            rust_version: or_unknown(option_env!("RUST_VERSION")),
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_missing_values_read_unknown() {
        let info = crate::build_info!();
        assert!(!info.version.is_empty());
        assert!(info.to_string().contains(info.build_profile));
    }
}
