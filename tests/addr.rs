//! Address parser round-trip laws (§8).

use ansibug::socket::Addr;

#[test]
fn parses_tcp_host_port() {
    let addr = Addr::parse("tcp://127.0.0.1:34567").unwrap();
    assert_eq!(
        addr,
        Addr::Tcp {
            host: "127.0.0.1".to_string(),
            port: 34567,
        }
    );
    assert!(!addr.is_bind_all());
}

#[test]
fn parses_tcp_bind_all() {
    let addr = Addr::parse("tcp://:8080").unwrap();
    assert!(addr.is_bind_all());
    assert_eq!(
        addr,
        Addr::Tcp {
            host: String::new(),
            port: 8080,
        }
    );
}

#[test]
fn parses_tcp_bracketed_ipv6() {
    let addr = Addr::parse("tcp://[::1]:9229").unwrap();
    assert_eq!(
        addr,
        Addr::Tcp {
            host: "::1".to_string(),
            port: 9229,
        }
    );
}

#[test]
fn parses_uds_absolute_path() {
    let addr = Addr::parse("uds:///tmp/ansibug.sock").unwrap();
    assert_eq!(addr, Addr::Uds("/tmp/ansibug.sock".into()));
}

#[test]
fn parses_uds_auto_generated_under_tmpdir() {
    let addr = Addr::parse("uds://").unwrap();
    let Addr::Uds(path) = addr else {
        panic!("expected a Uds address");
    };
    assert!(path.starts_with(ansibug::socket::addr::temp_dir()));
}

#[test]
fn rejects_unknown_scheme() {
    assert!(Addr::parse("http://example.com").is_err());
}

#[test]
fn display_round_trips_tcp() {
    let addr = Addr::Tcp {
        host: "example.org".to_string(),
        port: 443,
    };
    assert_eq!(addr.to_string(), "tcp://example.org:443");
}

#[test]
fn display_round_trips_ipv6_with_brackets() {
    let addr = Addr::Tcp {
        host: "::1".to_string(),
        port: 443,
    };
    assert_eq!(addr.to_string(), "tcp://[::1]:443");
}
