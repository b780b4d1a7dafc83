//! Canonical image references, matching what the runtime prints in its pod
//! listing.

struct Distribution {
    prefix: &'static str,
    index: &'static str,
    repo_prefix: &'static str,
}

const DISTRIBUTIONS: &[Distribution] = &[
    Distribution {
        prefix: "docker://",
        index: "registry-1.docker.io/",
        repo_prefix: "library/",
    },
    Distribution {
        prefix: "docker:",
        index: "registry-1.docker.io/",
        repo_prefix: "library/",
    },
];

/// Expand convenience prefixes into full registry paths and make sure there
/// is a tag, appending `:latest` if needed.
pub fn canonical_image_name(raw: &str) -> String {
    let mut canonical = raw.to_owned();
    if let Some(d) = DISTRIBUTIONS.iter().find(|d| raw.starts_with(d.prefix)) {
        let rest = &raw[d.prefix.len()..];
        let repo_prefix = if rest.contains('/') { "" } else { d.repo_prefix };
        canonical = format!("{}{repo_prefix}{rest}", d.index);
    }

    if !canonical.contains(':') {
        canonical.push_str(":latest");
    }
    canonical
}
