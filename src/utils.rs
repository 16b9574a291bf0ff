//! Small shared helpers with no better home — currently just the glob
//! matcher wildcard key/value specs and the tag universe use to expand
//! patterns like `addr:*` or `*_link`.

pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let mut remaining = value;
    if !pattern.starts_with('*') {
        let prefix = parts.first().unwrap();
        if !remaining.starts_with(prefix) {
            return false;
        }
        remaining = &remaining[prefix.len()..];
    }

    if !pattern.ends_with('*') {
        let suffix = parts.last().unwrap();
        if !remaining.ends_with(suffix) {
            return false;
        }
    }

    for part in parts.iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(idx) => {
                remaining = &remaining[idx + part.len()..];
            }
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_supports_star_suffix() {
        assert!(glob_match("*_link", "motorway_link"));
        assert!(!glob_match("*_link", "motorway"));
    }

    #[test]
    fn glob_match_supports_star_prefix() {
        assert!(glob_match("addr:*", "addr:housenumber"));
        assert!(!glob_match("addr:*", "name"));
    }
}
