//! User-Agent string sent with every outbound request.

/// Project URL advertised in the User-Agent (RFC 9308 good citizenship).
const PROJECT_UA_URL: &str = "https://github.com/docfetch/docfetch";

/// Default User-Agent for document fetches and blob requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("docfetch/{version} (bulk-document-archiver; +{PROJECT_UA_URL})")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_project_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("docfetch/")
                .and_then(|s| s.split(' ').next())
                .unwrap()
        );
    }
}
