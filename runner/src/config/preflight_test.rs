use super::RunnerConfig;

fn parse(yaml: &str) -> RunnerConfig {
    serde_yaml::from_str(yaml).expect("valid test config")
}

fn minimal() -> String {
    r#"
cluster: {}
container:
  image: /images/fim.sif
stages:
  pre: { script: /foss_fim/fim_pre_processing.sh }
  unit: { script: /foss_fim/fim_process_unit_wb.sh }
  post: { script: /foss_fim/fim_post_processing.sh }
"#
    .to_owned()
}

#[test]
pub fn defaults_fill_the_gaps() {
    let config = parse(&minimal());

    assert_eq!(config.cluster.sbatch, "sbatch");
    assert_eq!(config.cluster.squeue, "squeue");
    assert_eq!(config.cluster.compute_pool_prefix, "compute");
    assert_eq!(config.cluster.poll_interval_secs, 15);
    assert_eq!(config.cluster.max_schedule_wait_secs, 900);
    assert_eq!(config.cluster.array_throttle, None);
    assert_eq!(config.container.runtime, "singularity");
    assert_eq!(config.stages.unit.walltime, "08:00:00");

    assert!(!config.preflight_checks());
}

#[test]
pub fn unknown_keys_are_rejected() {
    let yaml = minimal().replace("cluster: {}", "cluster: { sbatchh: typo }");

    assert!(serde_yaml::from_str::<RunnerConfig>(&yaml).is_err());
}

#[test]
pub fn preflight_collects_every_problem() {
    let mut config = parse(&minimal());
    config.cluster.poll_interval_secs = 0;
    config.cluster.compute_pool_prefix.clear();
    config.stages.post.script.clear();
    config.stages.unit.walltime = "forever".to_owned();

    assert!(config.preflight_checks());
}

#[test]
pub fn bind_pairs_need_a_colon() {
    let mut config = parse(&minimal());
    config.container.binds = vec!["/efs/inputs".to_owned()];

    assert!(config.preflight_checks());

    config.container.binds = vec!["/efs/inputs:/inputs".to_owned()];
    assert!(!config.preflight_checks());
}
