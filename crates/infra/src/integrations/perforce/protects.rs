//! Parsers for `p4` command output
//!
//! Perforce protection tables are line oriented:
//!
//! ```text
//! ## comment
//! read user alice * //depot/project/...
//! list group contractors * -//depot/project/secret/...
//! ```
//!
//! Fields are `level kind name host depot`; a depot path starting with `-`
//! revokes instead of granting.

const WILDCARD_ALL: &str = "%";
const WILDCARD_SEGMENT: &str = "[^/]+";

/// Whether a protection level grants read access.
pub(crate) fn can_grant_read(level: &str) -> bool {
    matches!(
        level,
        "read" | "=read" | "open" | "=open" | "write" | "=write" | "review" | "owner" | "admin" | "super"
    )
}

/// Whether a protection level on an exclusion line takes read access away.
pub(crate) fn can_revoke_read(level: &str) -> bool {
    matches!(
        level,
        "list" | "read" | "=read" | "open" | "write" | "review" | "owner" | "admin" | "super"
    )
}

/// One entry of a protection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProtectionLine<'a> {
    pub level: &'a str,
    pub kind: &'a str,
    pub name: &'a str,
    pub depot: &'a str,
}

impl ProtectionLine<'_> {
    pub(crate) fn is_exclusion(&self) -> bool {
        self.depot.starts_with('-')
    }
}

/// Parse a protection line; `None` for comments and short lines.
pub(crate) fn parse_protection(line: &str) -> Option<ProtectionLine<'_>> {
    if line.starts_with("##") {
        return None;
    }
    let line = line.find("##").map_or(line, |i| &line[..i]);

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    Some(ProtectionLine { level: fields[0], kind: fields[1], name: fields[2], depot: fields[4] })
}

/// Translate a depot path into a contains pattern, without the final `%`.
fn depot_pattern(depot: &str) -> String {
    depot
        .trim_end_matches('.')
        .replace("...", WILDCARD_ALL)
        .replace('*', WILDCARD_SEGMENT)
}

/// Include and exclude patterns granted to one user.
///
/// Later lines win over earlier ones, so a plain exclusion that exactly
/// matches an include removes it. A plain exclusion below an include is kept,
/// and one without any covering include is dropped. Wildcard exclusions are
/// always kept since what they match is unknown. Every resulting path is
/// treated as a prefix.
pub(crate) fn user_depot_patterns(output: &str) -> (Vec<String>, Vec<String>) {
    let mut includes: Vec<String> = Vec::new();
    let mut excludes: Vec<String> = Vec::new();

    for line in output.lines().filter_map(parse_protection) {
        let pattern = depot_pattern(line.depot);

        let Some(excluded) = pattern.strip_prefix('-') else {
            if can_grant_read(line.level) {
                includes.push(pattern);
            }
            continue;
        };
        if !can_revoke_read(line.level) {
            continue;
        }

        if excluded.contains(WILDCARD_ALL) || excluded.contains(WILDCARD_SEGMENT) {
            excludes.push(excluded.to_string());
            continue;
        }
        if let Some(i) = includes.iter().position(|prefix| excluded.starts_with(prefix.as_str())) {
            if includes[i] == excluded {
                includes.remove(i);
            } else {
                excludes.push(excluded.to_string());
            }
        }
    }

    let as_prefix = |p: String| format!("{p}{WILDCARD_ALL}");
    (includes.into_iter().map(as_prefix).collect(), excludes.into_iter().map(as_prefix).collect())
}

/// `(username, email)` pairs from `p4 users`.
///
/// Lines look like `alice <alice@example.com> (Alice) accessed 2020/12/04`.
pub(crate) fn parse_users(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let username = fields.next()?;
            let email = fields.next()?.trim_matches(|c| c == '<' || c == '>');
            Some((username.to_string(), email.to_string()))
        })
        .collect()
}

/// Members listed in the `Users:` section of `p4 group -o`.
pub(crate) fn parse_group_members(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("Users:"))
        .skip(1)
        .take_while(|line| line.starts_with('\t'))
        .map(|line| line.trim().to_string())
        .filter(|member| !member.is_empty())
        .collect()
}
