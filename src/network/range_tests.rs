//! Tests for address range expansion

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::error::Error;
    use ipnetwork::Ipv4Network;
    use std::net::Ipv4Addr;

    #[test]
    fn test_is_special_address_network() {
        let subnet: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        let network_addr: Ipv4Addr = "192.168.1.0".parse().unwrap();

        assert!(is_special_address(network_addr, &subnet));
    }

    #[test]
    fn test_is_special_address_broadcast() {
        let subnet: Ipv4Network = "192.168.1.0/24".parse().unwrap();
        let broadcast_addr: Ipv4Addr = "192.168.1.255".parse().unwrap();

        assert!(is_special_address(broadcast_addr, &subnet));
    }

    #[test]
    fn test_expand_class_c() {
        let ips = expand_range("192.168.1.0/24", 1022).unwrap();
        assert_eq!(ips.len(), 254);

        assert!(!ips.contains(&"192.168.1.0".parse().unwrap()));
        assert!(!ips.contains(&"192.168.1.255".parse().unwrap()));
        assert!(ips.contains(&"192.168.1.1".parse().unwrap()));
        assert!(ips.contains(&"192.168.1.254".parse().unwrap()));
    }

    #[test]
    fn test_expand_slash_30_probes_two_hosts() {
        let ips = expand_range("10.0.0.0/30", 1022).unwrap();
        let expected: Vec<Ipv4Addr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        assert_eq!(ips, expected);
    }

    #[test]
    fn test_expand_point_to_point_and_single_host() {
        assert_eq!(expand_range("10.0.0.0/31", 10).unwrap().len(), 2);
        assert_eq!(
            expand_range("10.0.0.7/32", 10).unwrap(),
            vec!["10.0.0.7".parse::<Ipv4Addr>().unwrap()]
        );
        assert_eq!(
            expand_range(" 10.0.0.7 ", 10).unwrap(),
            vec!["10.0.0.7".parse::<Ipv4Addr>().unwrap()]
        );
    }

    #[test]
    fn test_expand_normalizes_host_bits() {
        let ips = expand_range("10.0.0.5/30", 10).unwrap();
        assert_eq!(ips.first(), Some(&"10.0.0.5".parse().unwrap()));
        assert_eq!(ips.len(), 2);
    }

    #[test]
    fn test_expand_rejects_oversized_range_without_truncating() {
        let err = expand_range("10.0.0.0/16", 1022).unwrap_err();
        match err {
            Error::RangeTooLarge { requested, limit } => {
                assert_eq!(requested, 65_534);
                assert_eq!(limit, 1022);
            }
            other => panic!("expected RangeTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_rejects_malformed_input() {
        for input in ["", "   ", "10.0.0.0/33", "10.0.0.1/abc", "not-an-ip", "300.1.1.1"] {
            assert!(
                matches!(expand_range(input, 1022), Err(Error::Validation(_))),
                "input {input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_expand_rejects_ipv6() {
        assert!(matches!(
            expand_range("fe80::/64", 1022),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_parse_single_address() {
        assert_eq!(
            parse_single_address("10.0.0.5").unwrap(),
            "10.0.0.5".parse::<Ipv4Addr>().unwrap()
        );
        assert!(parse_single_address("10.0.0.5/32").is_ok());
        assert!(matches!(
            parse_single_address("10.0.0.0/24"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(parse_single_address("::1"), Err(Error::Validation(_))));
    }

    #[test]
    fn test_usable_host_count() {
        let net: Ipv4Network = "10.0.0.0/22".parse().unwrap();
        assert_eq!(usable_host_count(&net), 1022);
    }
}
