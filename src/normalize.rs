//! Policy Normalizer — the defaulting/canonicalization pass a freshly
//! decoded [`crate::crd::SecurityPolicySpec`] or
//! [`crate::crd::HostSecurityPolicySpec`] goes through before it's usable
//! for matching. Steps run in the fixed order the source daemon uses:
//! severity default, action canonicalization, identity expansion,
//! comma-expansion of aggregated match entries, then per-match inheritance.
//!
//! None of these steps can fail on anything the CRD decoder already
//! accepted — there's no `InvalidSpec` path to implement today. A future
//! schema revision that adds a genuinely-repairable-vs-rejectable
//! distinction should introduce `Result` here rather than widening this
//! module's surface speculatively.

use crate::crd::{
    CapabilitiesSection, FileSection, HostSecurityPolicySpec, MatchCapability, MatchDirectory,
    MatchMeta, MatchPath, MatchPattern, MatchProtocol, MatchVolumeMount, NetworkSection,
    ProcessSection, SELinuxSection, SecurityPolicySpec,
};

/* ============================= SHARED STEPS ============================= */

fn canonicalize_action(action: &str) -> String {
    match action {
        "allow" => "Allow".to_string(),
        "audit" => "Audit".to_string(),
        "block" => "Block".to_string(),
        "" => "Block".to_string(),
        other => other.to_string(),
    }
}

/// If a single match entry's primary field is a comma-separated list,
/// duplicate the entry once per item, copying every other field from the
/// first occurrence.
fn comma_expand<T: Clone>(entries: &mut Vec<T>, primary: impl Fn(&T) -> &str, set_primary: impl Fn(&mut T, String)) {
    let mut expanded = Vec::with_capacity(entries.len());
    for entry in entries.drain(..) {
        let value = primary(&entry).to_string();
        if value.contains(',') {
            for part in value.split(',') {
                let mut clone = entry.clone();
                set_primary(&mut clone, part.to_string());
                expanded.push(clone);
            }
        } else {
            expanded.push(entry);
        }
    }
    *entries = expanded;
}

/// Inherit `severity`/`tags`/`message`/`action` from `section` (falling
/// through to `top`) onto every match entry whose own field is unset.
fn inherit_meta(meta: &mut MatchMeta, section: &MatchMeta, top: &MatchMeta) {
    if meta.severity == 0 {
        meta.severity = if section.severity != 0 {
            section.severity
        } else {
            top.severity
        };
    }
    if meta.tags.is_empty() {
        meta.tags = if !section.tags.is_empty() {
            section.tags.clone()
        } else {
            top.tags.clone()
        };
    }
    if meta.message.is_empty() {
        meta.message = if !section.message.is_empty() {
            section.message.clone()
        } else {
            top.message.clone()
        };
    }
    if meta.action.is_empty() {
        meta.action = if !section.action.is_empty() {
            section.action.clone()
        } else {
            top.action.clone()
        };
    }
}

/* ============================= WORKLOAD POLICY ============================= */

/// Normalize a workload `SecurityPolicy` for namespace `namespace`.
pub fn normalize_security_policy(mut spec: SecurityPolicySpec, namespace: &str) -> SecurityPolicySpec {
    if spec.severity == 0 {
        spec.severity = 1;
    }
    spec.action = canonicalize_action(&spec.action);

    let mut identities = vec![format!("namespaceName={namespace}")];
    for (k, v) in &spec.selector.match_labels {
        let id = format!("{k}={v}");
        if !identities.contains(&id) {
            identities.push(id);
        }
    }
    spec.selector.identities = identities;

    comma_expand(
        &mut spec.network.match_protocols,
        |e: &MatchProtocol| e.protocol.as_str(),
        |e, v| e.protocol = v,
    );
    comma_expand(
        &mut spec.capabilities.match_capabilities,
        |e: &MatchCapability| e.capability.as_str(),
        |e, v| e.capability = v,
    );

    let top = MatchMeta {
        severity: spec.severity,
        tags: spec.tags.clone(),
        message: spec.message.clone(),
        action: spec.action.clone(),
    };

    // Workload policy: all three Process match-lists inherit independently.
    for e in &mut spec.process.match_paths {
        inherit_meta(&mut e.meta, &spec.process.meta, &top);
    }
    for e in &mut spec.process.match_directories {
        inherit_meta(&mut e.meta, &spec.process.meta, &top);
    }
    for e in &mut spec.process.match_patterns {
        inherit_meta(&mut e.meta, &spec.process.meta, &top);
    }

    for e in &mut spec.file.match_paths {
        inherit_meta(&mut e.meta, &spec.file.meta, &top);
    }
    for e in &mut spec.file.match_directories {
        inherit_meta(&mut e.meta, &spec.file.meta, &top);
    }
    for e in &mut spec.file.match_patterns {
        inherit_meta(&mut e.meta, &spec.file.meta, &top);
    }

    for e in &mut spec.network.match_protocols {
        inherit_meta(&mut e.meta, &spec.network.meta, &top);
    }
    for e in &mut spec.capabilities.match_capabilities {
        inherit_meta(&mut e.meta, &spec.capabilities.meta, &top);
    }
    for e in &mut spec.selinux.match_volume_mounts {
        inherit_meta(&mut e.meta, &spec.selinux.meta, &top);
    }

    spec
}

/* ============================= HOST POLICY ============================= */

/// Normalize a `HostSecurityPolicy`.
///
/// Preserves the source quirk where the Process section's three
/// match-lists inherit via an else-if chain: only the first non-empty list
/// receives inheritance. Unclear whether intentional upstream; kept
/// verbatim (see DESIGN.md).
pub fn normalize_host_security_policy(mut spec: HostSecurityPolicySpec) -> HostSecurityPolicySpec {
    if spec.severity == 0 {
        spec.severity = 1;
    }
    spec.action = canonicalize_action(&spec.action);

    for (k, v) in &spec.node_selector.match_labels {
        let id = format!("{k}={v}");
        if !spec.node_selector.identities.contains(&id) {
            spec.node_selector.identities.push(id);
        }
    }

    comma_expand(
        &mut spec.network.match_protocols,
        |e: &MatchProtocol| e.protocol.as_str(),
        |e, v| e.protocol = v,
    );
    comma_expand(
        &mut spec.capabilities.match_capabilities,
        |e: &MatchCapability| e.capability.as_str(),
        |e, v| e.capability = v,
    );

    let top = MatchMeta {
        severity: spec.severity,
        tags: spec.tags.clone(),
        message: spec.message.clone(),
        action: spec.action.clone(),
    };

    normalize_host_process_inheritance(&mut spec.process, &top);

    for e in &mut spec.file.match_paths {
        inherit_meta(&mut e.meta, &spec.file.meta, &top);
    }
    if spec.file.match_paths.is_empty() {
        for e in &mut spec.file.match_directories {
            inherit_meta(&mut e.meta, &spec.file.meta, &top);
        }
        if spec.file.match_directories.is_empty() {
            for e in &mut spec.file.match_patterns {
                inherit_meta(&mut e.meta, &spec.file.meta, &top);
            }
        }
    }

    for e in &mut spec.network.match_protocols {
        inherit_meta(&mut e.meta, &spec.network.meta, &top);
    }
    for e in &mut spec.capabilities.match_capabilities {
        inherit_meta(&mut e.meta, &spec.capabilities.meta, &top);
    }

    spec
}

/// The else-if inheritance quirk for host-policy `Process` match-lists:
/// only the first non-empty of {paths, directories, patterns} is touched.
fn normalize_host_process_inheritance(process: &mut ProcessSection, top: &MatchMeta) {
    if !process.match_paths.is_empty() {
        for e in &mut process.match_paths {
            inherit_meta(&mut e.meta, &process.meta, top);
        }
    } else if !process.match_directories.is_empty() {
        for e in &mut process.match_directories {
            inherit_meta(&mut e.meta, &process.meta, top);
        }
    } else if !process.match_patterns.is_empty() {
        for e in &mut process.match_patterns {
            inherit_meta(&mut e.meta, &process.meta, top);
        }
    }
}
