//! Service name patterns.
//!
//! A pattern matches a name when both have the same number of `/`
//! separated segments and every segment matches its counterpart. Inside a
//! segment `*` matches any run of characters and `?` exactly one.

/// Checks `name` against `pattern`.
pub fn service_matches(pattern: &str, name: &str) -> bool {
    if pattern == name {
        return true;
    }
    if pattern.matches('/').count() != name.matches('/').count() {
        return false;
    }
    pattern
        .split('/')
        .zip(name.split('/'))
        .all(|(p, n)| segment_matches(p.as_bytes(), n.as_bytes()))
}

pub fn is_pattern(s: &str) -> bool {
    s.contains(['*', '?'])
}

fn segment_matches(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name() {
        assert!(service_matches("daemon/syslog", "daemon/syslog"));
        assert!(!service_matches("daemon/syslog", "daemon/sshd"));
    }

    #[test]
    fn test_star_stays_inside_segment() {
        assert!(service_matches("net/*", "net/eth0"));
        assert!(!service_matches("net/*", "net/eth0/alias"));
        assert!(!service_matches("*", "net/eth0"));
        assert!(service_matches("*/*", "net/eth0"));
    }

    #[test]
    fn test_question_mark_and_mixed() {
        assert!(service_matches("net/eth?", "net/eth1"));
        assert!(!service_matches("net/eth?", "net/eth10"));
        assert!(service_matches("d*n/s*g", "daemon/syslog"));
        assert!(service_matches("net/*0", "net/wlan0"));
        assert!(!service_matches("net/*0", "net/wlan1"));
    }

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("net/*"));
        assert!(is_pattern("tty?"));
        assert!(!is_pattern("daemon/syslog"));
    }
}
