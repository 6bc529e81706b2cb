//! Finalizer token bookkeeping
//!
//! Pure helpers over `ObjectMeta.finalizers`. The reconcilers check token
//! presence on the observed object before issuing any write, so repeated
//! ensure/release calls beyond the first produce zero additional writes.
//! While any token remains attached the object stays visible (soft-deleted
//! once a deletion timestamp is set); removing the last token is what lets
//! the store complete physical deletion.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Check whether `token` is attached to the object
pub fn has_token(meta: &ObjectMeta, token: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|t| t == token))
}

/// Finalizer list with `token` appended.
///
/// Never introduces a duplicate; if the token is already present the list is
/// returned unchanged.
pub fn with_token(meta: &ObjectMeta, token: &str) -> Vec<String> {
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|t| t == token) {
        finalizers.push(token.to_string());
    }
    finalizers
}

/// Finalizer list with every occurrence of `token` removed
pub fn without_token(meta: &ObjectMeta, token: &str) -> Vec<String> {
    meta.finalizers
        .as_ref()
        .map(|f| f.iter().filter(|t| *t != token).cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(finalizers: &[&str]) -> ObjectMeta {
        ObjectMeta {
            finalizers: Some(finalizers.iter().map(|s| (*s).to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_has_token() {
        assert!(has_token(&meta_with(&["finalizers/teams"]), "finalizers/teams"));
        assert!(!has_token(&meta_with(&["other"]), "finalizers/teams"));
        assert!(!has_token(&ObjectMeta::default(), "finalizers/teams"));
    }

    #[test]
    fn test_with_token_appends_once() {
        let meta = meta_with(&["other"]);
        let finalizers = with_token(&meta, "finalizers/teams");
        assert_eq!(finalizers, vec!["other", "finalizers/teams"]);

        // Applying again on the resulting state does not duplicate
        let meta = ObjectMeta {
            finalizers: Some(finalizers),
            ..Default::default()
        };
        assert_eq!(
            with_token(&meta, "finalizers/teams"),
            vec!["other", "finalizers/teams"]
        );
    }

    #[test]
    fn test_with_token_on_empty_metadata() {
        assert_eq!(
            with_token(&ObjectMeta::default(), "finalizers/namespaces"),
            vec!["finalizers/namespaces"]
        );
    }

    #[test]
    fn test_without_token_preserves_others() {
        let meta = meta_with(&["other", "finalizers/teams"]);
        assert_eq!(without_token(&meta, "finalizers/teams"), vec!["other"]);
        assert_eq!(without_token(&meta, "absent"), vec!["other", "finalizers/teams"]);
        assert!(without_token(&ObjectMeta::default(), "finalizers/teams").is_empty());
    }
}
