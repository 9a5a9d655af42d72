//! Dotted-name utilities
//!
//! Name syntax: `Device.LAN.1.IPAddress` style dotted paths. A trailing `.`
//! marks an object node; a `..` inside the name marks an uninstantiated
//! prototype; `!` separates a synthetic sub-value (`Foo!Average`). Relative
//! names in expressions use their leading-dot count as "levels up from the
//! destination parameter".

use smallvec::SmallVec;

/// Dotted names rarely run deeper than this; segment scratch space stays on
/// the stack below it
type Segments<'a> = SmallVec<[&'a str; 8]>;

/// True when `name` denotes an object node
pub fn is_node(name: &str) -> bool {
    name.ends_with('.')
}

/// True when `name` contains an uninstantiated prototype marker
pub fn is_proto(name: &str) -> bool {
    name.contains("..")
}

/// A parameter is valuable iff it is a leaf and not a prototype
pub fn is_valuable(name: &str) -> bool {
    !is_node(name) && !is_proto(name)
}

/// Enclosing object name (`A.B.C` → `A.B.`; `A.B.` → `A.`)
pub fn parent(name: &str) -> Option<&str> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    trimmed.rfind('.').map(|idx| &name[..=idx])
}

/// Last name segment, without the trailing dot for objects
pub fn short_name(name: &str) -> &str {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    match trimmed.rfind('.') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Derive the prototype name by blanking the deepest numeric instance segment
///
/// `A.B.3.C` → `A.B..C`, `A.2.B.3.C` → `A.2.B..C` (deepest instance first;
/// the caller repeats for nested dimensions). Returns `None` when no numeric
/// segment remains.
pub fn compute_proto(name: &str) -> Option<String> {
    let segments: Segments<'_> = name.split('.').collect();
    for idx in (0..segments.len()).rev() {
        let seg = segments[idx];
        if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
            let mut out = segments.clone();
            out[idx] = "";
            return Some(out.join("."));
        }
    }
    None
}

/// Instance number of the deepest numeric segment, if any
pub fn deepest_instance(name: &str) -> Option<u32> {
    name.split('.')
        .rev()
        .find(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|seg| seg.parse().ok())
}

/// Resolve a possibly-relative expression name against the destination
/// parameter's path
///
/// Each leading dot strips one trailing segment from the destination (the
/// destination leaf itself counts first), so with destination
/// `Device.A.B.Leaf`, `.Rtt` resolves to `Device.A.B.Rtt` and `..Rtt` to
/// `Device.A.Rtt`. Absolute names pass through unchanged.
pub fn resolve_relative(name: &str, dest: &str) -> String {
    let levels = name.len() - name.trim_start_matches('.').len();
    if levels == 0 {
        return name.to_string();
    }
    let rest = &name[levels..];
    let base = dest.strip_suffix('.').unwrap_or(dest);
    let mut segments: Segments<'_> = base.split('.').collect();
    let keep = segments.len().saturating_sub(levels);
    segments.truncate(keep);
    if segments.is_empty() {
        return rest.to_string();
    }
    format!("{}.{rest}", segments.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classification() {
        assert!(is_node("Device.LAN."));
        assert!(!is_node("Device.LAN.IPAddress"));
        assert!(is_proto("Device.LAN..IPAddress"));
        assert!(is_valuable("Device.LAN.1.IPAddress"));
        assert!(!is_valuable("Device.LAN."));
        assert!(!is_valuable("Device.LAN..IPAddress"));
    }

    #[test]
    fn parents_and_short_names() {
        assert_eq!(parent("Device.LAN.IPAddress"), Some("Device.LAN."));
        assert_eq!(parent("Device.LAN."), Some("Device."));
        assert_eq!(parent("Device"), None);
        assert_eq!(short_name("Device.LAN.IPAddress"), "IPAddress");
        assert_eq!(short_name("Device.LAN."), "LAN");
    }

    #[test]
    fn proto_derivation_is_deepest_first() {
        assert_eq!(compute_proto("A.B.3.C"), Some("A.B..C".to_string()));
        assert_eq!(compute_proto("A.2.B.3.C"), Some("A.2.B..C".to_string()));
        assert_eq!(compute_proto("A.12."), Some("A..".to_string()));
        assert_eq!(compute_proto("A.B.C"), None);
    }

    #[test]
    fn adjacent_and_multi_digit_segments() {
        assert_eq!(compute_proto("A.10.11.C"), Some("A.10..C".to_string()));
        assert_eq!(deepest_instance("A.10.11.C"), Some(11));
    }

    #[test]
    fn relative_resolution_counts_leading_dots() {
        assert_eq!(
            resolve_relative(".Rtt", "Device.A.B.Leaf"),
            "Device.A.B.Rtt"
        );
        assert_eq!(resolve_relative("..Rtt", "Device.A.B.Leaf"), "Device.A.Rtt");
        assert_eq!(
            resolve_relative("Device.X", "Device.A.B.Leaf"),
            "Device.X"
        );
        assert_eq!(
            resolve_relative(".Sub.Val", "Device.A.Obj."),
            "Device.A.Sub.Val"
        );
    }
}
