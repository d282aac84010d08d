// tests/flood_runner_tests.rs
//
// End-to-end sweeps of the flood generator test types against scripted hosts.

use std::sync::Arc;
use std::time::Duration;

use nstat::config::{TestConfig, TestType};
use nstat::runner::{RunnerOptions, TestRunner};
use nstat::sample::ResultSeries;
use nstat::testkit::{controller_host, ScriptedConnector, ScriptedShell};

const FLOOD_YAML: &str = r#"
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
  name: MTCBENCH
  node: {ip: 10.0.0.2, username: nstat, password: nstat}
  base_dir: /opt/mtcbench
  handlers:
    run: run.sh
dimensions:
  mtcbench_threads: [4]
  mtcbench_switches_per_thread: [8]
  mtcbench_thread_creation_delay_ms: [500]
  mtcbench_delay_before_traffic_ms: [0]
  mtcbench_simulated_hosts: [100]
scenario:
  repeats: 1
  discovery_deadline_ms: 50
"#;

const GENERATOR_OUTPUT: &str = "connecting switches\n\
    00:01 4 switches: flows/sec:  3000 3000 3000 3000 total = 12.0 per ms\n\
    00:02 4 switches: flows/sec:  3500 3500 3500 3500 total = 14.0 per ms\n\
    00:03 4 switches: flows/sec:  4000 4000 4000 4000 total = 16.0 per ms\n\
    RESULT: 4 switches 3 tests min/max/avg/stdev = 12000/16000/14000/1632";

fn options() -> RunnerOptions {
    RunnerOptions {
        poll_interval: Duration::from_millis(1),
        line_timeout: Duration::from_secs(5),
    }
}

/// Commands that invoked `path` (not the existence checks on it).
fn invocations(shell: &ScriptedShell, path: &str) -> usize {
    let log = shell.log();
    let log = log.lock().unwrap();
    log.iter()
        .filter(|c| c.contains(path) && !c.starts_with("test "))
        .count()
}

fn runner(cfg: TestConfig, test_type: TestType, ctrl: &ScriptedShell, emu: &ScriptedShell) -> TestRunner {
    let connector = ScriptedConnector::default()
        .with_host("10.0.0.1", ctrl.clone())
        .with_host("10.0.0.2", emu.clone());
    TestRunner::new(test_type, cfg, Arc::new(connector)).with_options(options())
}

#[test]
fn test_active_flood_produces_one_sample_per_throughput_line() {
    let cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0);
    let emu = ScriptedShell::new().reply("/opt/mtcbench/run.sh", 0, GENERATOR_OUTPUT);
    let mut runner = runner(cfg, TestType::SbActiveScalabilityMtcbench, &ctrl, &emu);

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("results.json");
    let summary = runner.run_to(&output).unwrap();
    assert!(summary.success(), "{summary:?}");
    assert_eq!(summary.points, 1);
    assert_eq!(summary.samples, 3);

    let samples = ResultSeries::read_json(&output).unwrap();
    let rates: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.get_f64("throughput_responses_sec"))
        .collect();
    assert_eq!(rates, vec![12000.0, 14000.0, 16000.0]);
    for (i, s) in samples.iter().enumerate() {
        assert_eq!(s.get_i64("global_sample_id"), Some(i as i64));
        assert_eq!(s.get_i64("mtcbench_threads"), Some(4));
        assert_eq!(s.get_i64("repeat_id"), Some(0));
        assert_eq!(
            s.get("test_type").and_then(|v| v.as_str()),
            Some("sb_active_scalability_mtcbench")
        );
        assert_eq!(s.get("controller_name").and_then(|v| v.as_str()), Some("ODL"));
    }

    // the generator was handed the controller endpoint and the point's dimensions
    let log = emu.log();
    let log = log.lock().unwrap();
    let run = log
        .iter()
        .find(|c| c.starts_with("'/opt/mtcbench/run.sh'"))
        .unwrap();
    assert!(run.contains("'10.0.0.1' '6653' '4' '8'"));

    // started once, stopped after the point, cleaned at the end
    assert_eq!(invocations(&ctrl, "/opt/odl/start.sh"), 1);
    assert_eq!(invocations(&ctrl, "/opt/odl/stop.sh"), 1);
    assert_eq!(invocations(&ctrl, "/opt/odl/clean.sh"), 1);
}

#[test]
fn test_port_conflict_fails_only_its_point() {
    let mut cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    cfg.dimensions.mtcbench_threads = vec![1, 2];
    let ctrl = controller_host("/opt/odl", 1);
    let emu = ScriptedShell::new().reply("/opt/mtcbench/run.sh", 0, GENERATOR_OUTPUT);
    let mut runner = runner(cfg, TestType::SbActiveScalabilityMtcbench, &ctrl, &emu);

    let summary = runner.run();
    assert!(summary.setup_ok);
    assert_eq!(summary.points, 2);
    assert_eq!(summary.failed_points, 1);
    assert!(!summary.success());

    let samples = runner.series().samples();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.get_i64("mtcbench_threads") == Some(2)));
    assert_eq!(invocations(&ctrl, "/opt/odl/start.sh"), 1);
    assert_eq!(invocations(&emu, "/opt/mtcbench/run.sh"), 1);
}

#[test]
fn test_failed_generator_records_sentinel_sample() {
    let cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0);
    let emu = ScriptedShell::new().reply(
        "/opt/mtcbench/run.sh",
        1,
        "00:01 total = 12.0 per ms\nconnection reset by peer",
    );
    let mut runner = runner(cfg, TestType::SbActiveScalabilityMtcbench, &ctrl, &emu);

    let summary = runner.run();
    assert_eq!(summary.failed_points, 1);
    let rates: Vec<f64> = runner
        .series()
        .samples()
        .iter()
        .filter_map(|s| s.get_f64("throughput_responses_sec"))
        .collect();
    assert_eq!(rates, vec![12000.0, -1.0]);
    // the failed point still brings the controller down
    assert_eq!(invocations(&ctrl, "/opt/odl/stop.sh"), 1);
}

#[test]
fn test_stability_keeps_controller_up_between_repeats() {
    let mut cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    cfg.scenario.repeats = 3;
    cfg.dimensions.mtcbench_threads = vec![1, 2];
    let ctrl = controller_host("/opt/odl", 0);
    let emu = ScriptedShell::new().reply("/opt/mtcbench/run.sh", 0, "total = 10.0 per ms");
    let mut runner = runner(cfg, TestType::SbActiveStabilityMtcbench, &ctrl, &emu);

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    assert_eq!(summary.samples, 6);
    let repeats: Vec<i64> = runner
        .series()
        .samples()
        .iter()
        .filter_map(|s| s.get_i64("repeat_id"))
        .collect();
    assert_eq!(repeats, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(invocations(&ctrl, "/opt/odl/start.sh"), 1);
    assert_eq!(invocations(&ctrl, "/opt/odl/stop.sh"), 1);
}

#[test]
fn test_idle_flood_discovery_deadline() {
    let cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "31");
    let emu = ScriptedShell::new();
    let mut runner = runner(cfg, TestType::SbIdleScalabilityMtcbench, &ctrl, &emu);

    let summary = runner.run();
    assert!(summary.success(), "{summary:?}");
    let samples = runner.series().samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].get_f64("bootup_time_secs"), Some(-1.0));
    assert_eq!(samples[0].get_i64("discovered_switches"), Some(31));
    assert_eq!(samples[0].get_i64("max_discovered_switches"), Some(31));
    assert_eq!(samples[0].get_i64("discovered_switches_error_code"), Some(201));
}

#[test]
fn test_idle_flood_discovery_success() {
    let cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    let ctrl = controller_host("/opt/odl", 0).reply("/opt/odl/oper_switches.sh", 0, "32");
    let emu = ScriptedShell::new();
    let mut runner = runner(cfg, TestType::SbIdleScalabilityMtcbench, &ctrl, &emu);

    assert!(runner.run().success());
    let sample = &runner.series().samples()[0];
    assert!(sample.get_f64("bootup_time_secs").unwrap() >= 0.0);
    assert_eq!(sample.get_i64("discovered_switches"), Some(32));
    assert_eq!(sample.get_i64("discovered_switches_error_code"), Some(0));
}

#[test]
fn test_invalid_config_skips_everything() {
    let mut cfg = TestConfig::from_yaml_str(FLOOD_YAML).unwrap();
    cfg.dimensions.mtcbench_switches_per_thread.clear();
    let ctrl = controller_host("/opt/odl", 0);
    let emu = ScriptedShell::new();
    let mut runner = runner(cfg, TestType::SbActiveScalabilityMtcbench, &ctrl, &emu);

    let summary = runner.run();
    assert!(!summary.setup_ok);
    assert_eq!(summary.points, 0);
    assert!(ctrl.log().lock().unwrap().is_empty());
}
