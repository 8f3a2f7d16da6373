/// The pieces of a service name that template variables refer to.
///
/// For `net/eth0`: `service` is `net/eth0`, `name` is `eth0` and `class` is
/// `net`. A name without a slash has an empty class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameParts<'a> {
    pub service: &'a str,
    pub name: &'a str,
    pub class: &'a str,
}

impl<'a> NameParts<'a> {
    pub fn of(service: &'a str) -> Self {
        let name = service.rsplit('/').next().unwrap_or(service);
        let class = match service.split_once('/') {
            Some((class, _)) => class,
            None => "",
        };
        Self {
            service,
            name,
            class,
        }
    }
}

/// Substitutes `$SERVICE`, `$NAME` and `$CLASS` in a dependency target with
/// the parts of `service_name`. Substituted text is never rescanned and
/// unknown `$` sequences are kept as written.
pub fn expand_target(target: &str, service_name: &str) -> String {
    if !target.contains('$') {
        return target.to_string();
    }
    let parts = NameParts::of(service_name);
    let mut out = String::with_capacity(target.len() + service_name.len());
    let mut rest = target;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (value, consumed) = if tail.starts_with("$SERVICE") {
            (parts.service, "$SERVICE".len())
        } else if tail.starts_with("$NAME") {
            (parts.name, "$NAME".len())
        } else if tail.starts_with("$CLASS") {
            (parts.class, "$CLASS".len())
        } else {
            ("$", 1)
        };
        out.push_str(value);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_parts() {
        let parts = NameParts::of("net/wlan/wlan0");
        assert_eq!(parts.name, "wlan0");
        assert_eq!(parts.class, "net");

        let flat = NameParts::of("sshd");
        assert_eq!(flat.name, "sshd");
        assert_eq!(flat.class, "");
    }

    #[test]
    fn test_expand_target() {
        assert_eq!(expand_target("fsck/$NAME", "mount/home"), "fsck/home");
        assert_eq!(expand_target("$CLASS/lo", "net/eth0"), "net/lo");
        assert_eq!(expand_target("log/$SERVICE", "net/eth0"), "log/net/eth0");
        assert_eq!(expand_target("plain", "net/eth0"), "plain");
    }

    #[test]
    fn test_expand_keeps_unknown_variables() {
        assert_eq!(expand_target("$HOME/$NAME", "a/b"), "$HOME/b");
        assert_eq!(expand_target("cost$", "x"), "cost$");
    }

    #[test]
    fn test_expanded_text_is_not_rescanned() {
        assert_eq!(expand_target("$NAME", "weird/$CLASS"), "$CLASS");
    }
}
