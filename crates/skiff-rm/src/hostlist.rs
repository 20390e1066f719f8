use skiff_core::CoreError;

/// Expand a compact nodelist expression (`nid[00001-00003,00007],login1`)
/// into individual hostnames, preserving order and zero padding.
pub fn expand(expr: &str) -> Result<Vec<String>, CoreError> {
    let mut hosts = Vec::new();
    for part in split_top_level(expr)? {
        expand_part(&part, &mut hosts)?;
    }
    Ok(hosts)
}

/// Split on commas that are not inside brackets.
fn split_top_level(expr: &str) -> Result<Vec<String>, CoreError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in expr.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| malformed(expr, "unbalanced `]`"))?;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(malformed(expr, "unbalanced `[`"));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

fn expand_part(part: &str, hosts: &mut Vec<String>) -> Result<(), CoreError> {
    let Some(open) = part.find('[') else {
        hosts.push(part.to_string());
        return Ok(());
    };
    let close = part.rfind(']').ok_or_else(|| malformed(part, "missing `]`"))?;
    let prefix = &part[..open];
    let body = &part[open + 1..close];
    let suffix = &part[close + 1..];

    for item in body.split(',') {
        match item.split_once('-') {
            Some((lo, hi)) => {
                let width = lo.len();
                let lo: u64 = lo.parse().map_err(|_| malformed(part, "bad range start"))?;
                let hi: u64 = hi.parse().map_err(|_| malformed(part, "bad range end"))?;
                if hi < lo {
                    return Err(malformed(part, "descending range"));
                }
                for n in lo..=hi {
                    hosts.push(format!("{prefix}{n:0width$}{suffix}"));
                }
            }
            None => hosts.push(format!("{prefix}{item}{suffix}")),
        }
    }
    Ok(())
}

fn malformed(expr: &str, why: &str) -> CoreError {
    CoreError::AllocationUnreadable(format!("malformed hostlist `{expr}`: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(expand("login1").unwrap(), vec!["login1"]);
        assert_eq!(expand("a,b").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn ranges_keep_zero_padding() {
        assert_eq!(
            expand("nid[00001-00003]").unwrap(),
            vec!["nid00001", "nid00002", "nid00003"]
        );
    }

    #[test]
    fn mixed_ranges_and_singles() {
        assert_eq!(
            expand("n[1-2,5],login").unwrap(),
            vec!["n1", "n2", "n5", "login"]
        );
    }

    #[test]
    fn suffix_after_brackets() {
        assert_eq!(
            expand("n[1-2]-ib").unwrap(),
            vec!["n1-ib", "n2-ib"]
        );
    }

    #[test]
    fn malformed_lists_are_rejected() {
        assert!(expand("n[1-").is_err());
        assert!(expand("n[3-1]").is_err());
        assert!(expand("n]1[").is_err());
    }
}
