/// Username patterns that mark a sender as an admin.
///
/// Matching is case-insensitive. A pattern is an exact username or a glob
/// where `*` matches any run of characters. An empty list grants admin to
/// nobody, and a sender without a username is never an admin.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    patterns: Vec<String>,
}

impl AdminList {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        let username = username.to_lowercase();
        self.patterns.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, &username)
            } else {
                *pattern == username
            }
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// `*` matches any sequence of characters, including none.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = match (parts.first(), parts.last()) {
        (Some(first), Some(last)) if parts.len() > 1 => (*first, *last),
        _ => return pattern == text,
    };

    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
