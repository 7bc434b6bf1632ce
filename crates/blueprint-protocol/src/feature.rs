//! Capability negotiation
//!
//! Each peer advertises a [`FeatureSet`]. Released protocol versions map to
//! a well-known set through [`FeatureSet::from_version_string`]; a peer on an
//! unrecognized version is asked to enumerate its tags instead.

use std::collections::BTreeSet;

use tracing::debug;

/// Version string this build speaks
pub const PROTOCOL_VERSION: &str = "0.3.2";

/// A named capability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    /// Placement sharing, download and removal
    Core,
    /// Feature enumeration on request
    Feature,
    /// Modify locks and origin republishing
    Modify,
    /// User-facing notifications
    Message,
    /// Transfer quota enforcement
    Quota,
    /// Packet logging
    Debug,
    /// Last-modifier identity on republished updates
    CoreEx,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Core,
        Feature::Feature,
        Feature::Modify,
        Feature::Message,
        Feature::Quota,
        Feature::Debug,
        Feature::CoreEx,
    ];

    /// Wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Feature::Core => "CORE",
            Feature::Feature => "FEATURE",
            Feature::Modify => "MODIFY",
            Feature::Message => "MESSAGE",
            Feature::Quota => "QUOTA",
            Feature::Debug => "DEBUG",
            Feature::CoreEx => "CORE_EX",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.tag() == tag)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Well-known feature sets by version prefix
const VERSION_FEATURES: &[(&str, &[Feature])] = &[("0.1", &[Feature::Core])];

/// Immutable, ordered set of capability flags
///
/// Iteration follows insertion order; equality compares contents only.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: Vec<Feature>,
}

impl FeatureSet {
    /// Build a set, dropping duplicates while keeping first-seen order
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut ordered = Vec::new();
        for feature in features {
            if !ordered.contains(&feature) {
                ordered.push(feature);
            }
        }
        Self { features: ordered }
    }

    /// Map a peer's version string to its well-known feature set
    ///
    /// Accepts dotted numeric versions with three to five groups and strips
    /// trailing groups until a known prefix matches. Returns `None` for
    /// anything unrecognized, which callers answer with a feature request.
    pub fn from_version_string(version: &str) -> Option<Self> {
        let groups: Vec<&str> = version.split('.').collect();
        if !(3..=5).contains(&groups.len())
            || groups
                .iter()
                .any(|g| g.is_empty() || !g.bytes().all(|b| b.is_ascii_digit()))
        {
            return None;
        }

        // Never strip below two groups
        for len in (2..=groups.len()).rev() {
            let prefix = groups[..len].join(".");
            if let Some((_, features)) = VERSION_FEATURES.iter().find(|(v, _)| *v == prefix) {
                return Some(Self::new(features.iter().copied()));
            }
        }
        None
    }

    /// Build a set from an enumerated tag list
    ///
    /// Tags this build does not know are skipped, so a newer peer
    /// negotiates down to the capabilities both sides share.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        Self::new(tags.iter().filter_map(|tag| {
            let tag = tag.as_ref();
            let feature = Feature::from_tag(tag);
            if feature.is_none() {
                debug!(tag, "ignoring unknown capability tag");
            }
            feature
        }))
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn tags(&self) -> Vec<String> {
        self.features.iter().map(|f| f.tag().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.features.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl PartialEq for FeatureSet {
    fn eq(&self, other: &Self) -> bool {
        let ours: BTreeSet<Feature> = self.iter().collect();
        let theirs: BTreeSet<Feature> = other.iter().collect();
        ours == theirs
    }
}

impl Eq for FeatureSet {}

impl std::fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tags().join(","))
    }
}

/// Decides whether a partner's version is acceptable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Accept every version
    AcceptAll,
    /// Accept only the local version
    ExactMatch,
    /// Accept everything except the listed versions
    Deny(Vec<String>),
}

impl Default for VersionPolicy {
    fn default() -> Self {
        VersionPolicy::Deny(vec!["0.0.1".to_string()])
    }
}

impl VersionPolicy {
    pub fn accepts(&self, local: &str, remote: &str) -> bool {
        match self {
            VersionPolicy::AcceptAll => true,
            VersionPolicy::ExactMatch => local == remote,
            VersionPolicy::Deny(denied) => !denied.iter().any(|v| v == remote),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_version_prefix() {
        let fs = FeatureSet::from_version_string("0.1.0").unwrap();
        assert_eq!(fs, FeatureSet::new([Feature::Core]));
        assert_eq!(
            FeatureSet::from_version_string("0.1.7.2.9"),
            Some(FeatureSet::new([Feature::Core]))
        );
    }

    #[test]
    fn test_unrecognized_versions() {
        assert_eq!(FeatureSet::from_version_string("1.0"), None);
        assert_eq!(FeatureSet::from_version_string("0.1"), None);
        assert_eq!(FeatureSet::from_version_string("0.2.0"), None);
        assert_eq!(FeatureSet::from_version_string("0.1.x"), None);
        assert_eq!(FeatureSet::from_version_string("0.1.0.0.0.0"), None);
        assert_eq!(FeatureSet::from_version_string(""), None);
        assert_eq!(FeatureSet::from_version_string(PROTOCOL_VERSION), None);
    }

    #[test]
    fn test_version_lookup_is_pure() {
        for version in ["0.1.3", "1.0", "0.0.1", "banana"] {
            assert_eq!(
                FeatureSet::from_version_string(version),
                FeatureSet::from_version_string(version)
            );
        }
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = FeatureSet::new([Feature::Core, Feature::Message]);
        let b = FeatureSet::new([Feature::Message, Feature::Core, Feature::Core]);
        assert_eq!(a, b);
        assert_eq!(b.len(), 2);
        assert_eq!(b.tags(), vec!["MESSAGE", "CORE"]);
    }

    #[test]
    fn test_from_tags() {
        let fs = FeatureSet::from_tags(&["CORE", "MESSAGE"]);
        assert!(fs.has_feature(Feature::Core));
        assert!(fs.has_feature(Feature::Message));
        assert!(!fs.has_feature(Feature::Modify));

        let fs = FeatureSet::from_tags(&["CORE", "TELEPORT", "MODIFY"]);
        assert_eq!(fs, FeatureSet::new([Feature::Core, Feature::Modify]));
        assert!(FeatureSet::from_tags::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_version_policy() {
        let policy = VersionPolicy::default();
        assert!(!policy.accepts(PROTOCOL_VERSION, "0.0.1"));
        assert!(policy.accepts(PROTOCOL_VERSION, "1.0"));

        assert!(VersionPolicy::ExactMatch.accepts("0.3.2", "0.3.2"));
        assert!(!VersionPolicy::ExactMatch.accepts("0.3.2", "0.3.1"));
        assert!(VersionPolicy::AcceptAll.accepts("0.3.2", "0.0.1"));
    }
}
