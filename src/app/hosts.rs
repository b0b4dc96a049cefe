use std::collections::HashMap;

use url::Url;

/// Host component exactly as written in `host`, without userinfo or port.
/// Anything the URL parser rejects collapses to the empty hostname.
pub fn hostname(host: &str) -> String {
    if Url::parse(host).is_err() {
        return String::new();
    }
    let Some((_, rest)) = host.split_once("://") else {
        return String::new();
    };
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    match authority.strip_prefix('[') {
        Some(v6) => match v6.split_once(']') {
            Some((addr, _)) => format!("[{addr}]"),
            None => String::new(),
        },
        None => authority.split(':').next().unwrap_or_default().to_string(),
    }
}

pub fn group_hosts(hosts: &[String]) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for host in hosts {
        grouped
            .entry(hostname(host))
            .or_default()
            .push(host.clone());
    }
    grouped
}

pub fn canonical_forms(hostname: &str, with_trailing_slash: bool) -> [String; 2] {
    let slash = if with_trailing_slash { "/" } else { "" };
    [
        format!("https://{hostname}{slash}"),
        format!("https://{hostname}:443{slash}"),
    ]
}

pub fn contains_any(haystack: &[String], needles: &[String]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

// A fetched chain carries the client's serialization (lowercase, punycode,
// default port dropped), so hops are compared as parsed URLs too.
pub fn passes_through(chain: &[String], targets: &[String]) -> bool {
    let parsed = targets
        .iter()
        .filter_map(|t| Url::parse(t).ok())
        .collect::<Vec<_>>();
    chain.iter().any(|hop| {
        targets.contains(hop) || Url::parse(hop).is_ok_and(|url| parsed.contains(&url))
    })
}

pub fn remove_first(hosts: &mut Vec<String>, value: &str) -> bool {
    match hosts.iter().position(|h| h == value) {
        Some(idx) => {
            hosts.remove(idx);
            true
        }
        None => false,
    }
}

/// Apply a batch of removal reports collected from workers. Each report drops
/// one occurrence, so a host listed twice needs two reports to vanish entirely.
pub fn apply_removals<I, S>(hosts: Vec<String>, removals: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut removed = vec![false; hosts.len()];
    for target in removals {
        let target = target.as_ref();
        if let Some(idx) = hosts
            .iter()
            .enumerate()
            .position(|(i, h)| !removed[i] && h == target)
        {
            removed[idx] = true;
        }
    }

    hosts
        .into_iter()
        .zip(removed)
        .filter_map(|(host, gone)| (!gone).then_some(host))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hostname_strips_scheme_port_and_path() {
        assert_eq!(hostname("https://a.com"), "a.com");
        assert_eq!(hostname("https://a.com:8443/login?x=1"), "a.com");
        assert_eq!(hostname("http://user:pw@b.a.com:80"), "b.a.com");
        assert_eq!(hostname("http://[::1]:8080/"), "[::1]");
    }

    #[test]
    fn hostname_keeps_the_spelling_it_was_given() {
        assert_eq!(hostname("https://Example.com"), "Example.com");
        assert_eq!(hostname("http://Example.COM:8080/Path"), "Example.COM");
        assert_eq!(hostname("https://bücher.de/"), "bücher.de");
        assert_eq!(hostname("https://a.com?q=1"), "a.com");
        assert_eq!(hostname("https://a.com#top"), "a.com");

        let grouped = group_hosts(&owned(&["https://Example.com", "http://Example.com"]));
        assert_eq!(grouped.len(), 1);
        assert_eq!(
            grouped["Example.com"],
            owned(&["https://Example.com", "http://Example.com"])
        );
        let group = &grouped["Example.com"];
        assert!(contains_any(group, &canonical_forms("Example.com", false)));
    }

    #[test]
    fn chain_matches_canonical_forms_after_normalization() {
        let forms = canonical_forms("Example.com", true);
        let fetched = owned(&["http://example.com/", "https://example.com/"]);
        assert!(passes_through(&fetched, &forms));
        assert!(passes_through(&owned(&["https://Example.com:443/"]), &forms));
        assert!(!passes_through(&owned(&["https://example.com/home"]), &forms));

        let forms = canonical_forms("bücher.de", true);
        assert!(passes_through(&owned(&["https://xn--bcher-kva.de/"]), &forms));
    }

    #[test]
    fn malformed_hosts_share_the_empty_hostname() {
        assert_eq!(hostname("a.com"), "");
        assert_eq!(hostname(""), "");

        let grouped = group_hosts(&owned(&["a.com", "not a url", "https://a.com"]));
        assert_eq!(grouped[""], owned(&["a.com", "not a url"]));
        assert_eq!(grouped["a.com"], owned(&["https://a.com"]));
    }

    #[test]
    fn grouping_keeps_order_within_a_group() {
        let hosts = owned(&[
            "http://a.com",
            "https://b.com",
            "https://a.com:443",
            "https://a.com",
            "http://b.com:8080",
        ]);
        let grouped = group_hosts(&hosts);

        assert_eq!(grouped.len(), 2);
        assert_eq!(
            grouped["a.com"],
            owned(&["http://a.com", "https://a.com:443", "https://a.com"])
        );
        assert_eq!(grouped["b.com"], owned(&["https://b.com", "http://b.com:8080"]));
        let total: usize = grouped.values().map(Vec::len).sum();
        assert_eq!(total, hosts.len());
    }

    #[test]
    fn canonical_forms_with_and_without_slash() {
        assert_eq!(
            canonical_forms("a.com", false),
            ["https://a.com".to_string(), "https://a.com:443".to_string()]
        );
        assert_eq!(
            canonical_forms("a.com", true),
            ["https://a.com/".to_string(), "https://a.com:443/".to_string()]
        );
    }

    #[test]
    fn contains_any_matches_exact_strings_only() {
        let group = owned(&["https://a.com/", "http://a.com"]);
        assert!(!contains_any(&group, &canonical_forms("a.com", false)));
        assert!(contains_any(&group, &canonical_forms("a.com", true)));
    }

    #[test]
    fn remove_first_drops_a_single_occurrence() {
        let mut hosts = owned(&["x", "y", "x"]);
        assert!(remove_first(&mut hosts, "x"));
        assert_eq!(hosts, owned(&["y", "x"]));
        assert!(!remove_first(&mut hosts, "z"));
    }

    #[test]
    fn removals_preserve_order_and_count_occurrences() {
        let hosts = owned(&["a", "b", "c", "b", "d"]);
        let out = apply_removals(hosts, ["b", "d", "missing"]);
        assert_eq!(out, owned(&["a", "c", "b"]));

        let hosts = owned(&["a", "b", "c", "b"]);
        let out = apply_removals(hosts, vec!["b".to_string(), "b".to_string()]);
        assert_eq!(out, owned(&["a", "c"]));
    }
}
