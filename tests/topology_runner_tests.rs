// tests/topology_runner_tests.rs
//
// Sweeps of the topology generator test types against scripted hosts.

use std::sync::Arc;
use std::time::Duration;

use nstat::config::{TestConfig, TestType};
use nstat::handle::emulator::TopologyConfig;
use nstat::runner::{RunnerOptions, TestRunner};
use nstat::testkit::{controller_host, ScriptedConnector, ScriptedShell};

const TOPO_YAML: &str = r#"
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
    get_switches: get_switches.py
    get_flows: get_flows.py
nb_emulator:
  name: NB_GENERATOR
  node: {ip: 10.0.0.4, username: nstat, password: nstat}
  base_dir: /opt/nb
  handlers:
    run: run_handler.sh
dimensions:
  topology_size: [50]
  topology_type: [Linear]
  topology_hosts_per_switch: [1]
  topology_group_size: [5]
  topology_group_delay_ms: [100]
  total_flows: [1000]
  flow_workers: [4]
  flow_operations_delay_ms: [0]
scenario:
  discovery_deadline_ms: 40
"#;

const NB_REPORT: &str = r#"{"add_flows_transmission_time": 0.5, "add_flows_time": 1.25, "delete_flows_transmission_time": 0.4, "delete_flows_time": 0.9, "failed_flow_operations": 0}"#;

fn options() -> RunnerOptions {
    RunnerOptions {
        poll_interval: Duration::from_millis(1),
        line_timeout: Duration::from_secs(5),
    }
}

fn connector(ctrl: &ScriptedShell, emu: &ScriptedShell, nb: &ScriptedShell) -> Arc<ScriptedConnector> {
    Arc::new(
        ScriptedConnector::default()
            .with_host("10.0.0.1", ctrl.clone())
            .with_host("10.0.0.2", emu.clone())
            .with_host("10.0.0.4", nb.clone()),
    )
}

fn invoked(shell: &ScriptedShell, path: &str) -> bool {
    let log = shell.log();
    let log = log.lock().unwrap();
    log.iter().any(|c| c.contains(path) && !c.starts_with("test "))
}

#[test]
fn test_idle_topology_stalls_below_target() {
    let cfg = TestConfig::from_yaml_str(TOPO_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "49");
    let emu = ScriptedShell::new();
    let nb = ScriptedShell::new();
    let mut runner = TestRunner::new(TestType::SbIdleScalabilityMultinet, cfg, connector(&ctrl, &emu, &nb))
        .with_options(options());

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    let samples = runner.series().samples();
    assert_eq!(samples.len(), 1);
    let s = &samples[0];
    assert_eq!(s.get_f64("bootup_time_secs"), Some(-1.0));
    assert_eq!(s.get_i64("discovered_switches"), Some(49));
    assert_eq!(s.get_i64("max_discovered_switches"), Some(49));
    assert_eq!(s.get_i64("discovered_switches_error_code"), Some(201));
    assert_eq!(s.get_i64("topology_size"), Some(50));
    assert_eq!(s.get("topology_type").and_then(|v| v.as_str()), Some("Linear"));

    // the topology was shipped with the controller endpoint, booted and torn down
    let files = emu.files();
    let files = files.lock().unwrap();
    let shipped = files.get("/opt/multinet/nstat_topology_config.json").unwrap();
    let topo = TopologyConfig::from_json(shipped).unwrap();
    assert_eq!(topo.topo.controller_ip_address, "10.0.0.1");
    assert_eq!(topo.topo.topo_size, 50);
    for step in ["deploy.py", "init_topos.py", "start_topos.py", "stop_topos.py", "cleanup.py"] {
        assert!(invoked(&emu, &format!("/opt/multinet/{}", step)) || invoked(&emu, step), "{step}");
    }
    // the nb generator is not part of this test type
    assert!(nb.log().lock().unwrap().is_empty());
}

#[test]
fn test_failed_topology_start_fails_point_and_cleans_up() {
    let cfg = TestConfig::from_yaml_str(TOPO_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "0");
    let emu = ScriptedShell::new().reply("start_topos.py", 1, "worker 10.0.0.3 unreachable");
    let nb = ScriptedShell::new();
    let mut runner = TestRunner::new(TestType::SbIdleScalabilityMultinet, cfg, connector(&ctrl, &emu, &nb))
        .with_options(options());

    let summary = runner.run();
    assert_eq!(summary.failed_points, 1);
    assert!(runner.series().is_empty());
    // initialized topology is stopped and cleaned by the point teardown
    assert!(invoked(&emu, "stop_topos.py"));
    assert!(invoked(&emu, "cleanup.py"));
    assert!(invoked(&ctrl, "/opt/odl/stop.sh"));
}

#[test]
fn test_nb_flows_confirmed_on_switches() {
    let cfg = TestConfig::from_yaml_str(TOPO_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "50");
    let emu = ScriptedShell::new().reply(
        "get_flows.py",
        0,
        "[get_flows][response data] [{\"10.0.0.2\": 0}]",
    );
    let nb = ScriptedShell::new().reply("/opt/nb/run_handler.sh", 0, &format!("starting\n{}\n", NB_REPORT));
    let mut runner = TestRunner::new(TestType::NbActiveScalabilityMultinet, cfg, connector(&ctrl, &emu, &nb))
        .with_options(options());

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    let samples = runner.series().samples();
    assert_eq!(samples.len(), 1);
    let s = &samples[0];
    assert_eq!(s.get_f64("add_flows_transmission_time"), Some(0.5));
    assert_eq!(s.get_f64("add_flows_time"), Some(1.25));
    assert_eq!(s.get_f64("delete_flows_transmission_time"), Some(0.4));
    assert_eq!(s.get_f64("delete_flows_time"), Some(0.9));
    assert_eq!(s.get_i64("failed_flow_operations"), Some(0));
    assert_eq!(s.get_i64("total_flows"), Some(1000));
    assert_eq!(s.get_i64("discovered_switches_error_code"), Some(0));
    assert!(s.get_f64("end_to_end_flows_operation_time").unwrap() >= 0.0);

    // generator arguments: controller endpoint, flows, workers, delay, delete flag, credentials
    let log = nb.log();
    let log = log.lock().unwrap();
    let run = log.iter().find(|c| c.starts_with("'/opt/nb/run_handler.sh'")).unwrap();
    assert!(run.contains("'10.0.0.1' '8181' '1000' '4' '0' 'true' 'admin' 'admin'"));
}

#[test]
fn test_nb_flows_never_confirmed() {
    let cfg = TestConfig::from_yaml_str(TOPO_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "50");
    let emu = ScriptedShell::new().reply(
        "get_flows.py",
        0,
        "[get_flows][response data] [{\"10.0.0.2\": 12}]",
    );
    let nb = ScriptedShell::new().reply("/opt/nb/run_handler.sh", 0, NB_REPORT);
    let mut runner = TestRunner::new(TestType::NbActiveScalabilityMultinet, cfg, connector(&ctrl, &emu, &nb))
        .with_options(options());

    assert!(runner.run().success());
    let s = &runner.series().samples()[0];
    assert_eq!(s.get_f64("end_to_end_flows_operation_time"), Some(-1.0));
}

#[test]
fn test_nb_delete_deadline_sentinel_reaches_sample() {
    let cfg = TestConfig::from_yaml_str(TOPO_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "50");
    let emu = ScriptedShell::new().reply(
        "get_flows.py",
        0,
        "[get_flows][response data] [{\"10.0.0.2\": 0}]",
    );
    let stalled = r#"{"add_flows_transmission_time": 0.5, "add_flows_time": 1.25, "delete_flows_transmission_time": 0.4, "delete_flows_time": -1.0, "failed_flow_operations": 3}"#;
    let nb = ScriptedShell::new().reply("/opt/nb/run_handler.sh", 0, stalled);
    let mut runner = TestRunner::new(TestType::NbActiveScalabilityMultinet, cfg, connector(&ctrl, &emu, &nb))
        .with_options(options());

    assert!(runner.run().success());
    let s = &runner.series().samples()[0];
    assert_eq!(s.get_f64("add_flows_transmission_time"), Some(0.5));
    assert_eq!(s.get_f64("add_flows_time"), Some(1.25));
    assert_eq!(s.get_f64("delete_flows_transmission_time"), Some(0.4));
    assert_eq!(s.get_f64("delete_flows_time"), Some(-1.0));
    assert_eq!(s.get_i64("failed_flow_operations"), Some(3));
}
