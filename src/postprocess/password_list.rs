//! Password cascade for encrypted archives.
//!
//! Candidates are tried in a fixed order, cheapest/most-likely first:
//!
//! 1. The password carried on the download itself (NZB metadata or explicit override).
//! 2. The empty password, if [`ToolsConfig::try_empty_password`] allows it.
//! 3. The configured indexer name, original case then lowercased.
//! 4. The release-group token at the end of the download name (text after
//!    the last `-`), original case then lowercased.
//! 5. The fixed scene password list.
//!
//! Candidates are deduplicated in order, so a password appearing in more than
//! one step is only tried once.

use crate::config::{PasswordCascadeConfig, ToolsConfig};

/// Derive the release-group token from a release name, e.g.
/// `Some.Movie.2020.1080p-GROUP` -> `GROUP`. Returns `None` if there's no
/// `-` separator or the trailing token is empty.
fn release_group_token(name: &str) -> Option<&str> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _ext)| stem);
    let token = stem.rsplit('-').next()?;
    if token.is_empty() || token == stem {
        None
    } else {
        Some(token)
    }
}

/// Build the ordered, deduplicated list of password candidates to try.
pub fn build_candidates(
    download_password: Option<&str>,
    download_name: &str,
    tools: &ToolsConfig,
    passwords: &PasswordCascadeConfig,
) -> Vec<String> {
    let mut candidates = Vec::new();

    if let Some(p) = download_password {
        if !p.is_empty() {
            candidates.push(p.to_string());
        }
    }
    if tools.try_empty_password {
        candidates.push(String::new());
    }
    if let Some(indexer) = &passwords.indexer_name {
        candidates.push(indexer.clone());
        candidates.push(indexer.to_lowercase());
    }
    if let Some(token) = release_group_token(download_name) {
        candidates.push(token.to_string());
        candidates.push(token.to_lowercase());
    }
    candidates.extend(passwords.common_passwords.iter().cloned());

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> ToolsConfig {
        ToolsConfig {
            password_file: None,
            try_empty_password: true,
            unrar_path: None,
            unzip_path: None,
            sevenzip_path: None,
            search_path: true,
        }
    }

    fn passwords() -> PasswordCascadeConfig {
        PasswordCascadeConfig {
            indexer_name: Some("NZBGeek".into()),
            common_passwords: vec!["scene".into()],
        }
    }

    #[test]
    fn release_group_token_extracts_suffix_after_last_dash() {
        assert_eq!(
            release_group_token("Some.Movie.2020.1080p-GROUP.rar"),
            Some("GROUP")
        );
    }

    #[test]
    fn release_group_token_none_without_dash() {
        assert_eq!(release_group_token("plainname.rar"), None);
    }

    #[test]
    fn cascade_tries_download_password_first() {
        let candidates =
            build_candidates(Some("secret"), "Movie-GROUP.rar", &tools(), &passwords());
        assert_eq!(candidates[0], "secret");
    }

    #[test]
    fn cascade_includes_empty_password_when_enabled() {
        let candidates = build_candidates(None, "Movie-GROUP.rar", &tools(), &passwords());
        assert!(candidates.contains(&String::new()));
    }

    #[test]
    fn cascade_excludes_empty_password_when_disabled() {
        let mut t = tools();
        t.try_empty_password = false;
        let candidates = build_candidates(None, "Movie-GROUP.rar", &t, &passwords());
        assert!(!candidates.contains(&String::new()));
    }

    #[test]
    fn cascade_includes_indexer_name_both_cases() {
        let candidates = build_candidates(None, "Movie-GROUP.rar", &tools(), &passwords());
        assert!(candidates.contains(&"NZBGeek".to_string()));
        assert!(candidates.contains(&"nzbgeek".to_string()));
    }

    #[test]
    fn cascade_includes_release_group_token_both_cases() {
        let candidates = build_candidates(None, "Movie-GROUP.rar", &tools(), &passwords());
        assert!(candidates.contains(&"GROUP".to_string()));
        assert!(candidates.contains(&"group".to_string()));
    }

    #[test]
    fn cascade_ends_with_common_password_list() {
        let candidates = build_candidates(None, "Movie-GROUP.rar", &tools(), &passwords());
        assert!(candidates.contains(&"scene".to_string()));
    }

    #[test]
    fn cascade_deduplicates_candidates() {
        let mut passwords = passwords();
        passwords.common_passwords = vec!["group".into()];
        let candidates = build_candidates(None, "Movie-GROUP.rar", &tools(), &passwords);
        let count = candidates.iter().filter(|c| c.as_str() == "group").count();
        assert_eq!(count, 1);
    }
}
