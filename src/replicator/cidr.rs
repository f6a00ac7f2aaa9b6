//! CIDR range expansion and allow-list merging
//!
//! Turns a (subnet, prefix length) pair into the inclusive IPv4 range the
//! general-purpose provisioner understands, and merges ranges into an
//! existing allow-list without duplicates.

use crate::crd::IpFilter;
use crate::error::{Error, Result};
use std::net::Ipv4Addr;

/// Expand `subnet/prefix_length` into its inclusive (start, end) range.
///
/// Host bits in `subnet` are ignored: 10.0.0.17/24 yields 10.0.0.0..10.0.0.255.
pub fn ip_range(subnet: &str, prefix_length: u32) -> Result<(Ipv4Addr, Ipv4Addr)> {
    let invalid = |reason: &str| Error::InvalidCidr {
        subnet: subnet.to_string(),
        prefix_length,
        reason: reason.to_string(),
    };

    if prefix_length > 32 {
        return Err(invalid("prefix length must be between 0 and 32"));
    }
    let addr: Ipv4Addr = subnet
        .trim()
        .parse()
        .map_err(|_| invalid("not an IPv4 address"))?;

    let mask: u32 = if prefix_length == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_length)
    };
    let start = u32::from(addr) & mask;
    let end = start | !mask;

    Ok((Ipv4Addr::from(start), Ipv4Addr::from(end)))
}

/// Expand a CIDR into the provisioner's filter representation
pub fn ip_filter(subnet: &str, prefix_length: u32) -> Result<IpFilter> {
    let (start, end) = ip_range(subnet, prefix_length)?;
    Ok(IpFilter {
        start: start.to_string(),
        end: end.to_string(),
    })
}

/// Append every filter from `incoming` not already present in `existing`.
///
/// Equality is exact on (start, end), compared case-insensitively. Existing
/// entries are never removed or reordered. Returns how many were added.
pub fn merge_filters(existing: &mut Vec<IpFilter>, incoming: impl IntoIterator<Item = IpFilter>) -> usize {
    let mut added = 0;
    for filter in incoming {
        let duplicate = existing.iter().any(|f| {
            f.start.eq_ignore_ascii_case(&filter.start) && f.end.eq_ignore_ascii_case(&filter.end)
        });
        if !duplicate {
            existing.push(filter);
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_range_slash_24() {
        let (start, end) = ip_range("10.0.0.0", 24).unwrap();
        assert_eq!(start, Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(end, Ipv4Addr::new(10, 0, 0, 255));
    }

    #[test]
    fn test_ip_range_ignores_host_bits() {
        let (start, end) = ip_range("192.168.17.45", 20).unwrap();
        assert_eq!(start, Ipv4Addr::new(192, 168, 16, 0));
        assert_eq!(end, Ipv4Addr::new(192, 168, 31, 255));
    }

    #[test]
    fn test_ip_range_edges() {
        let (start, end) = ip_range("172.16.4.9", 32).unwrap();
        assert_eq!(start, Ipv4Addr::new(172, 16, 4, 9));
        assert_eq!(end, Ipv4Addr::new(172, 16, 4, 9));

        let (start, end) = ip_range("8.8.8.8", 0).unwrap();
        assert_eq!(start, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(end, Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn test_ip_range_rejects_garbage() {
        assert!(matches!(ip_range("10.0.0.0", 33), Err(Error::InvalidCidr { .. })));
        assert!(ip_range("not-an-ip", 24).is_err());
        assert!(ip_range("fd00::1", 64).is_err());
    }

    #[test]
    fn test_merge_deduplicates() {
        let mut existing = vec![ip_filter("10.0.0.0", 24).unwrap()];

        // 10.0.0.128/24 collapses onto the same range as 10.0.0.0/24
        let added = merge_filters(
            &mut existing,
            vec![
                ip_filter("10.0.0.128", 24).unwrap(),
                ip_filter("10.1.0.0", 16).unwrap(),
                ip_filter("10.1.2.3", 16).unwrap(),
            ],
        );

        assert_eq!(added, 1);
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[1].start, "10.1.0.0");
        assert_eq!(existing[1].end, "10.1.255.255");
    }

    #[test]
    fn test_merge_keeps_existing_entries() {
        let mut existing = vec![ip_filter("192.168.0.0", 24).unwrap()];
        merge_filters(&mut existing, vec![ip_filter("10.0.0.0", 8).unwrap()]);
        assert_eq!(existing[0].start, "192.168.0.0");
        assert_eq!(existing.len(), 2);
    }
}
