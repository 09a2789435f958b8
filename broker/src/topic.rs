/// Match a published topic against a subscription.
///
/// Levels are separated by `/`. `*` matches exactly one level and `>` as the
/// last level matches one or more remaining levels.
pub fn topic_matches(subscription: &str, topic: &str) -> bool {
    let mut pattern = subscription.split('/');
    let mut levels = topic.split('/');

    loop {
        match (pattern.next(), levels.next()) {
            (Some(">"), Some(_)) => return pattern.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(l)) if p == l => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A subscription is usable if `>` only appears as the whole last level and
/// `*` only as a whole level.
pub fn is_valid_subscription(subscription: &str) -> bool {
    if subscription.is_empty() {
        return false;
    }
    let levels: Vec<&str> = subscription.split('/').collect();
    levels.iter().enumerate().all(|(i, level)| {
        if level.is_empty() {
            return false;
        }
        if level.contains('>') {
            return *level == ">" && i == levels.len() - 1;
        }
        !level.contains('*') || *level == "*"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("fntest/input", "fntest/input"));
        assert!(!topic_matches("fntest/input", "fntest/inputs"));
        assert!(!topic_matches("fntest/input", "fntest"));
        assert!(!topic_matches("fntest", "fntest/input"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("trade/*/new", "trade/matcher/new"));
        assert!(!topic_matches("trade/*/new", "trade/matcher/x/new"));
        assert!(!topic_matches("trade/*", "trade"));
    }

    #[test]
    fn test_trailing_wildcard() {
        assert!(topic_matches("matcher/>", "matcher/active"));
        assert!(topic_matches("matcher/>", "matcher/active/1"));
        assert!(!topic_matches("matcher/>", "matcher"));
        assert!(topic_matches(">", "anything/at/all"));
    }

    #[test]
    fn test_subscription_validation() {
        assert!(is_valid_subscription("a/*/c"));
        assert!(is_valid_subscription("a/>"));
        assert!(!is_valid_subscription("a/>/c"));
        assert!(!is_valid_subscription("a/b*"));
        assert!(!is_valid_subscription("a//b"));
        assert!(!is_valid_subscription(""));
    }
}
