//! Username allow-list.

use std::collections::HashSet;

/// Telegram usernames allowed to talk to the bot.
///
/// Names are stored without a leading `@` and compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashSet<String>,
}

fn normalize(name: &str) -> Option<String> {
    let name = name.trim().trim_start_matches('@');
    (!name.is_empty()).then(|| name.to_lowercase())
}

impl AllowList {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            users: users.into_iter().filter_map(|u| normalize(u.as_ref())).collect(),
        }
    }

    /// Parse a comma-separated list such as `"alice, @bob"`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Users without a username are never allowed.
    pub fn is_allowed(&self, username: Option<&str>) -> bool {
        username
            .and_then(normalize)
            .is_some_and(|name| self.users.contains(&name))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_allowed() {
        let list = AllowList::new(["alice"]);
        assert!(list.is_allowed(Some("alice")));
        assert!(!list.is_allowed(Some("bob")));
    }

    #[test]
    fn test_no_username() {
        let list = AllowList::new(["alice"]);
        assert!(!list.is_allowed(None));
        assert!(!list.is_allowed(Some("")));
    }

    #[test]
    fn test_parse_comma_separated() {
        let list = AllowList::parse(" alice, @Bob ,,carol ");
        assert_eq!(list.len(), 3);
        assert!(list.is_allowed(Some("bob")));
        assert!(list.is_allowed(Some("@CAROL")));
    }

    #[test]
    fn test_empty_list_allows_nobody() {
        let list = AllowList::parse("");
        assert!(list.is_empty());
        assert!(!list.is_allowed(Some("alice")));
    }
}
