use std::net::Ipv4Addr;

/// Parse a dotted-decimal IPv4 address, rejecting anything with extra text
pub fn parse_ipv4(ip: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    ip.parse().ok()
}

/// Prefix length of a dotted-decimal netmask, or None when the mask is not contiguous
pub fn mask_to_prefix(mask: &str) -> Option<u8> {
    let bits = u32::from(parse_ipv4(mask)?);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) != 0 {
        return None;
    }
    Some(prefix as u8)
}

/// Whether two addresses fall in the same network under `mask`
pub fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let m = u32::from(mask);
    u32::from(a) & m == u32::from(b) & m
}

/// Strip a "/len" suffix from an address in CIDR notation
/// e.g., "10.0.0.1/24" -> "10.0.0.1"
pub fn strip_prefix_len(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Truncate output to a maximum number of lines
pub fn truncate_lines(s: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= max_lines {
        s.to_string()
    } else {
        let truncated: Vec<&str> = lines[..max_lines].to_vec();
        format!("{}\n... ({} more lines)", truncated.join("\n"), lines.len() - max_lines)
    }
}
