//! Authorization Engine: tool-profile inheritance
//! resolution and glob-based permit/deny evaluation.

use std::collections::HashSet;

use globset::GlobBuilder;
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;

use crate::model::{RateLimits, ToolProfile};
use crate::repository::ToolProfileRepositoryLike;

pub const MAX_INHERITANCE_DEPTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Permit,
    Deny { reason: String, policy_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct EffectiveProfile {
    pub allowed: HashSet<String>,
    pub denied: HashSet<String>,
    pub rate_limits: RateLimits,
}

/// Walks `profile.inherited_from` up to [`MAX_INHERITANCE_DEPTH`],
/// accumulating `allowed`/`denied` as unions. Rate
/// limits follow "child overrides parent": the first non-`None` field seen
/// walking from the starting profile upward wins.
///
/// Idempotent by construction (testable property #3): it's a pure
/// function of the persisted profile chain.
pub async fn resolve_effective_profile(
    repo: &dyn ToolProfileRepositoryLike,
    profile_id: &WrappedUuidV4,
) -> Result<EffectiveProfile, CommonError> {
    let mut effective = EffectiveProfile::default();
    let mut visited = HashSet::new();
    let mut current_id = profile_id.clone();
    let mut depth = 0usize;

    loop {
        if !visited.insert(current_id.to_string()) {
            return Err(CommonError::CycleDetected {
                msg: format!("profile inheritance cycle detected at {current_id}"),
            });
        }
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(CommonError::CycleDetected {
                msg: format!(
                    "profile inheritance exceeds max depth of {MAX_INHERITANCE_DEPTH}"
                ),
            });
        }

        let profile = repo.get_by_id(&current_id).await?;
        effective.allowed.extend(profile.allowed_tools.iter().cloned());
        effective.denied.extend(profile.denied_tools.iter().cloned());
        merge_rate_limits_child_wins(&mut effective.rate_limits, &profile.rate_limits);

        match profile.inherited_from {
            Some(parent_id) => {
                current_id = parent_id;
                depth += 1;
            }
            None => break,
        }
    }

    Ok(effective)
}

/// Fills in any `None` field on `target` from `parent`. Called walking
/// child-to-parent, so the first write for each field always comes from
/// the most specific (child-most) profile that set it.
fn merge_rate_limits_child_wins(target: &mut RateLimits, parent: &RateLimits) {
    if target.rpm.is_none() {
        target.rpm = parent.rpm;
    }
    if target.rph.is_none() {
        target.rph = parent.rph;
    }
    if target.max_concurrent.is_none() {
        target.max_concurrent = parent.max_concurrent;
    }
}

/// `*` matches any run of characters except `.`; `**` matches any run
/// including `.`. Implemented by mapping `.` to the path separator globset
/// already treats specially under `literal_separator`.
pub fn glob_matches(pattern: &str, tool_name: &str) -> bool {
    let pattern = pattern.replace('.', "/");
    let tool_name = tool_name.replace('.', "/");

    let Ok(glob) = GlobBuilder::new(&pattern).literal_separator(true).build() else {
        return false;
    };
    glob.compile_matcher().is_match(&tool_name)
}

/// Validates that assigning `inherited_from` to `profile_id` would not
/// create a cycle and would not exceed [`MAX_INHERITANCE_DEPTH`] — the
/// write-time half of the cycle guard (the read-time half is
/// [`resolve_effective_profile`]'s own `visited` set).
pub async fn validate_inheritance_assignment(
    repo: &dyn ToolProfileRepositoryLike,
    profile_id: &WrappedUuidV4,
    new_parent_id: &WrappedUuidV4,
) -> Result<(), CommonError> {
    if profile_id == new_parent_id {
        return Err(CommonError::CycleDetected {
            msg: "a profile cannot inherit from itself".to_string(),
        });
    }

    let mut visited = HashSet::new();
    visited.insert(profile_id.to_string());
    let mut current_id = new_parent_id.clone();
    let mut depth = 0usize;

    loop {
        if !visited.insert(current_id.to_string()) {
            return Err(CommonError::CycleDetected {
                msg: "assigning this parent would create an inheritance cycle".to_string(),
            });
        }
        if depth > MAX_INHERITANCE_DEPTH {
            return Err(CommonError::CycleDetected {
                msg: format!("inheritance chain would exceed depth {MAX_INHERITANCE_DEPTH}"),
            });
        }

        let parent: ToolProfile = repo.get_by_id(&current_id).await?;
        match parent.inherited_from {
            Some(grandparent) => {
                current_id = grandparent;
                depth += 1;
            }
            None => break,
        }
    }

    Ok(())
}

/// Evaluates `(profile, tool_name)`: denied wins over allowed, and an empty
/// allow-list denies everything.
pub fn evaluate(effective: &EffectiveProfile, tool_name: &str, policy_id: &str) -> AuthzDecision {
    if effective.denied.iter().any(|pat| glob_matches(pat, tool_name)) {
        return AuthzDecision::Deny {
            reason: "denied by profile".to_string(),
            policy_id: policy_id.to_string(),
        };
    }

    if effective.allowed.iter().any(|pat| glob_matches(pat, tool_name)) {
        return AuthzDecision::Permit;
    }

    AuthzDecision::Deny {
        reason: "not in allowed list".to_string(),
        policy_id: policy_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_star_does_not_cross_dot() {
        assert!(glob_matches("filesystem.*", "filesystem.read_file"));
        assert!(!glob_matches("filesystem.*", "filesystem.read.file"));
    }

    #[test]
    fn double_star_crosses_dot() {
        assert!(glob_matches("filesystem.**", "filesystem.read.file"));
        assert!(glob_matches("**", "anything.at.all"));
    }

    #[test]
    fn denied_wins_over_allowed() {
        let mut effective = EffectiveProfile::default();
        effective.allowed.insert("filesystem.*".to_string());
        effective.denied.insert("filesystem.delete_file".to_string());

        assert_eq!(
            evaluate(&effective, "filesystem.delete_file", "p1"),
            AuthzDecision::Deny {
                reason: "denied by profile".to_string(),
                policy_id: "p1".to_string()
            }
        );
        assert_eq!(evaluate(&effective, "filesystem.read_file", "p1"), AuthzDecision::Permit);
    }

    #[test]
    fn not_in_allow_list_denies() {
        let effective = EffectiveProfile::default();
        assert_eq!(
            evaluate(&effective, "database.execute_query", "p1"),
            AuthzDecision::Deny {
                reason: "not in allowed list".to_string(),
                policy_id: "p1".to_string()
            }
        );
    }

    #[test]
    fn rate_limit_merge_prefers_child() {
        let mut target = RateLimits { rpm: Some(10), rph: None, max_concurrent: None };
        let parent = RateLimits { rpm: Some(999), rph: Some(500), max_concurrent: Some(3) };
        merge_rate_limits_child_wins(&mut target, &parent);
        assert_eq!(target.rpm, Some(10));
        assert_eq!(target.rph, Some(500));
        assert_eq!(target.max_concurrent, Some(3));
    }
}
