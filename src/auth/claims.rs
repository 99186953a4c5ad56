//! Verified identity claims.

/// Identity established for a connection or a frame.
///
/// Projected from the verified token on the handshake, or synthesized from
/// the Connections row on the per-frame fast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Stable user id (`sub`).
    pub user_id: String,
    /// Group names (`cognito:groups`, default empty).
    pub groups: Vec<String>,
    pub email: String,
    /// Directory username (`cognito:username`).
    pub username: String,
    /// Token audience, passed through untouched.
    pub audience: Option<String>,
}

impl Claims {
    /// Identifiers that may appear in a robot ACL, lowercased.
    ///
    /// An optional caller-supplied identifier is considered first, then
    /// email, username, and user id.
    pub fn acl_identifiers(&self, extra: Option<&str>) -> Vec<String> {
        let mut ids = Vec::with_capacity(4);
        for candidate in [
            extra.unwrap_or(""),
            &self.email,
            &self.username,
            &self.user_id,
        ] {
            if !candidate.is_empty() {
                ids.push(candidate.to_lowercase());
            }
        }
        ids
    }

    /// Groups joined with commas, the storage format of the Connections row.
    pub fn groups_joined(&self) -> String {
        self.groups.join(",")
    }
}
