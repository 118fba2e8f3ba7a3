// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use super::{AddrOption, Config, DEFAULT_DOMAIN_SOCKET, DEFAULT_TCP_PORT, DEV_TCP_PORT};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| map.get(name).cloned()
}

#[test]
fn defaults_resolve_to_well_known_addresses() {
    let config = Config::default();
    assert_eq!(config.resolved_domain_socket().as_deref(), Some(DEFAULT_DOMAIN_SOCKET));
    assert_eq!(
        config.resolved_tcp_addr_with_dev(false),
        Some(format!("127.0.0.1:{DEFAULT_TCP_PORT}"))
    );
    assert!(!config.is_disabled());
}

#[test]
fn dev_config_switches_default_tcp_port() {
    let config = Config::default();
    assert_eq!(config.resolved_tcp_addr_with_dev(true), Some(format!("127.0.0.1:{DEV_TCP_PORT}")));
}

#[test]
fn dash_disables_a_transport() {
    let config = Config::from_lookup(lookup(&[("OUTRIG_TCPADDR", "-")]));
    assert_eq!(config.tcp_addr, AddrOption::Disabled);
    assert_eq!(config.resolved_tcp_addr_with_dev(false), None);
    assert!(!config.is_disabled(), "domain socket still enabled");
}

#[test]
fn explicit_value_overrides_default() {
    let config = Config::from_lookup(lookup(&[("OUTRIG_DOMAINSOCKET", "/run/custom.sock")]));
    assert_eq!(config.resolved_domain_socket().as_deref(), Some("/run/custom.sock"));
}

#[test]
fn outrig_disabled_turns_off_both_transports() {
    let config = Config::from_lookup(lookup(&[("OUTRIG_DISABLED", "true")]));
    assert!(config.is_disabled());
    assert_eq!(config.resolved_domain_socket(), None);
    assert_eq!(config.resolved_tcp_addr_with_dev(false), None);
}

#[test]
fn external_log_capture_env_var_enables_log_processor() {
    let config = Config::from_lookup(lookup(&[("OUTRIG_EXTERNALLOGCAPTURE", "1")]));
    assert!(config.log_processor.enabled);
}

#[test]
fn unset_env_vars_leave_defaults_untouched() {
    let config = Config::from_lookup(lookup(&[]));
    assert_eq!(config.domain_socket_path, AddrOption::Default);
    assert_eq!(config.tcp_addr, AddrOption::Default);
    assert!(config.collectors.watch_enabled);
    assert!(config.collectors.goroutine_enabled);
    assert!(config.collectors.runtime_stats_enabled);
}

#[test]
fn effective_module_name_prefers_explicit_value() {
    let mut config = Config::default();
    config.module_name = "my-service".to_owned();
    assert_eq!(config.effective_module_name(), "my-service");
}

#[test]
fn docker_probe_addr_defaults_to_host_docker_internal() {
    let config = Config::default();
    assert_eq!(
        config.docker_probe_addr_with_dev(false),
        Some(format!("host.docker.internal:{DEFAULT_TCP_PORT}"))
    );
    assert_eq!(
        config.docker_probe_addr_with_dev(true),
        Some(format!("host.docker.internal:{DEV_TCP_PORT}"))
    );
}

#[test]
fn disable_docker_probe_suppresses_the_fallback() {
    let mut config = Config::default();
    config.disable_docker_probe = true;
    assert_eq!(config.docker_probe_addr_with_dev(false), None);
}

#[test]
fn explicit_tcp_addr_suppresses_the_docker_probe() {
    let config = Config::from_lookup(lookup(&[("OUTRIG_TCPADDR", "127.0.0.1:9999")]));
    assert_eq!(config.docker_probe_addr_with_dev(false), None);
}
