// tests/sniffer_runner_tests.rs
//
// Topology scenarios sampled through the OpenFlow sniffer's REST surface. The
// sniffer is a local HTTP endpoint whose counters grow on every read.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nstat::config::{TestConfig, TestType};
use nstat::runner::{RunnerOptions, TestRunner};
use nstat::testkit::{controller_host, ScriptedConnector, ScriptedShell};

const SNIFFER_YAML: &str = r#"
controller:
  name: ODL
  node: {ip: 10.0.0.1, username: nstat, password: nstat}
  base_dir: /opt/odl
  handlers:
    build: build.sh
    start: start.sh
    stop: stop.sh
    status: status.sh
    clean: clean.sh
    statistics: change_stats.sh
    oper_switches: oper_switches.sh
  start_timeout_ms: 2000
  stop_timeout_ms: 2000
sb_emulator:
  name: MULTINET
  node: {ip: 10.0.0.2, username: nstat, password: nstat}
  base_dir: /opt/multinet
  handlers:
    deploy: deploy.py
    init_topos: init_topos.py
    start_topos: start_topos.py
    stop_topos: stop_topos.py
    cleanup: cleanup.py
    traffic_gen: traffic_gen.py
    get_switches: get_switches.py
sniffer:
  name: OFTRAF
  node: {ip: 127.0.0.1, username: nstat, password: nstat}
  base_dir: /opt/oftraf
  rest_port: 0
  handlers:
    start: start.sh
    stop: stop.sh
dimensions:
  topology_size: [10]
  topology_type: [Linear]
  topology_hosts_per_switch: [1]
  topology_group_size: [5]
  topology_group_delay_ms: [100]
  multinet_traffic_gen_duration_ms: [1000]
  interpacket_delay_ms: [50]
scenario:
  repeats: 2
  sample_interval_ms: 5
  discovery_deadline_ms: 200
"#;

/// Serve `get_of_counts` with counters that grow by a fixed step per request.
fn spawn_counter_endpoint() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for (k, stream) in listener.incoming().enumerate() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let k = k as u64 + 1;
            let body = format!(
                "{{\"OF_in_counts\": [{}, {}], \"OF_out_counts\": [{}, {}]}}",
                100 * k,
                10_000 * k,
                50 * k,
                5_000 * k
            );
            let resp = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes());
        }
    });
    port
}

fn setup_with<F>(test_type: TestType, tweak: F) -> (TestRunner, ScriptedShell, ScriptedShell, ScriptedShell)
where
    F: FnOnce(&mut TestConfig),
{
    let mut cfg = TestConfig::from_yaml_str(SNIFFER_YAML).unwrap();
    if let Some(sn) = cfg.sniffer.as_mut() {
        sn.rest_port = spawn_counter_endpoint();
    }
    tweak(&mut cfg);
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "10");
    let emu = ScriptedShell::new();
    let sniffer = ScriptedShell::new();
    let connector = ScriptedConnector::default()
        .with_host("10.0.0.1", ctrl.clone())
        .with_host("10.0.0.2", emu.clone())
        .with_host("127.0.0.1", sniffer.clone());
    let opts = RunnerOptions {
        poll_interval: Duration::from_millis(1),
        line_timeout: Duration::from_secs(5),
    };
    let runner = TestRunner::new(test_type, cfg, Arc::new(connector)).with_options(opts);
    (runner, ctrl, emu, sniffer)
}

fn setup(test_type: TestType) -> (TestRunner, ScriptedShell, ScriptedShell, ScriptedShell) {
    setup_with(test_type, |_| {})
}

#[test]
fn test_active_multinet_rates_over_traffic_window() {
    let (mut runner, _ctrl, emu, sniffer) = setup(TestType::SbActiveScalabilityMultinet);

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    let samples = runner.series().samples();
    assert_eq!(samples.len(), 1);
    let s = &samples[0];
    assert!(s.get_f64("of_in_packets_per_sec").unwrap() > 0.0);
    assert!(s.get_f64("of_out_bytes_per_sec").unwrap() > 0.0);
    assert_eq!(s.get_i64("discovered_switches"), Some(10));
    assert_eq!(s.get_i64("interpacket_delay_ms"), Some(50));

    assert_eq!(emu.count("/opt/multinet/traffic_gen.py' "), 1);
    // sniffer started on the controller's OpenFlow port, then stopped
    assert!(sniffer.count("'6653'") >= 1);
    assert!(sniffer.count("/opt/oftraf/stop.sh' ") >= 1);
}

#[test]
fn test_idle_stability_one_rate_sample_per_repeat() {
    let (mut runner, ctrl, _emu, _sniffer) = setup(TestType::SbIdleStabilityMultinet);

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    let samples = runner.series().samples();
    assert_eq!(samples.len(), 2);
    for (i, s) in samples.iter().enumerate() {
        assert_eq!(s.get_i64("repeat_id"), Some(i as i64));
        assert!(s.get_f64("of_in_packets_per_sec").unwrap() > 0.0);
        assert_eq!(s.get_i64("current_oper_switches"), Some(10));
    }
    assert_eq!(ctrl.count("/opt/odl/change_stats.sh"), 0);
}

#[test]
fn test_statistics_period_axis() {
    let (mut runner, ctrl, _emu, _sniffer) = setup_with(TestType::SbIdleStabilityMultinet, |cfg| {
        cfg.dimensions.controller_statistics_period_ms = vec![5000, 10000];
    });

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    assert_eq!(summary.points, 2);
    assert_eq!(ctrl.count("'/opt/odl/change_stats.sh' '5000'"), 1);
    assert_eq!(ctrl.count("'/opt/odl/change_stats.sh' '10000'"), 1);
    let periods: Vec<i64> = runner
        .series()
        .samples()
        .iter()
        .filter_map(|s| s.get_i64("controller_statistics_period_ms"))
        .collect();
    assert_eq!(periods, vec![5000, 5000, 10000, 10000]);
    // one boot to generate configuration files, then one per point
    let log = ctrl.log();
    let starts = log
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("/opt/odl/start.sh") && !c.starts_with("test "))
        .count();
    assert_eq!(starts, 3);
}
