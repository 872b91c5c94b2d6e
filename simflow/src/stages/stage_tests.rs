//! Comprehensive tests for the stage exec lifecycle.

#[cfg(test)]
mod tests {
    use crate::context::RunContext;
    use crate::errors::SimflowError;
    use crate::resources::FileOrigin;
    use crate::settings::RunSettings;
    use crate::stages::{Executable, InputOptions, OutputScan, ProgramStage, StageState};
    use crate::testing::{init_test_logging, shell, ProbeStage, TestRun};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exec_success_brackets_hooks() {
        init_test_logging();
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::new("geogrid");
        let log = stage.log();
        stage.export_config().unwrap();
        assert_eq!(stage.state(), StageState::Configured);

        stage.exec(run.ctx()).await.unwrap();

        assert_eq!(stage.state(), StageState::Completed);
        assert_eq!(
            log.entries(),
            vec![
                "generate_custom_config".to_string(),
                "before_exec".to_string(),
                "after_exec".to_string(),
                "generate_custom_config".to_string(),
            ]
        );
        assert!(run.ctx().registry().contains("geogrid"));
    }

    #[tokio::test]
    async fn test_exec_failure_still_runs_after_exec() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::failing("ungrib");
        let log = stage.log();
        stage.export_config().unwrap();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        match err {
            SimflowError::ExternalProgram(inner) => {
                assert_eq!(inner.status, Some(3));
                assert!(inner.stderr_tail.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log.count("before_exec"), 1);
        assert_eq!(log.count("after_exec"), 1);
        assert_eq!(stage.state(), StageState::Failed);
        assert!(!run.ctx().registry().contains("ungrib"));
    }

    #[tokio::test]
    async fn test_exec_unconfigured_rejected() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::new("metgrid");
        let log = stage.log();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::StageState(_)));
        assert!(log.entries().is_empty());
        assert_eq!(stage.state(), StageState::Unconfigured);
    }

    #[tokio::test]
    async fn test_failed_stage_is_terminal() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::failing("wrf");
        let log = stage.log();
        stage.export_config().unwrap();
        stage.exec(run.ctx()).await.unwrap_err();
        assert_eq!(stage.state(), StageState::Failed);

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::StageState(_)));
        assert_eq!(log.count("after_exec"), 1);
    }

    #[tokio::test]
    async fn test_completed_stage_reexec_hits_duplicate_registration() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::new("real");
        stage.export_config().unwrap();
        stage.exec(run.ctx()).await.unwrap();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::DuplicateStage(_)));
        assert_eq!(stage.state(), StageState::Completed);
        assert_eq!(run.ctx().registry().len(), 1);
    }

    #[tokio::test]
    async fn test_reexec_allowed_with_recording_off() {
        let dir = TempDir::new().unwrap();
        let settings = RunSettings::new().with_workspace(dir.path().join("ws"));
        let ctx = RunContext::new(settings).with_recording(false);
        ctx.prepare().unwrap();

        let mut stage = ProbeStage::new("real");
        let log = stage.log();
        stage.export_config().unwrap();
        stage.exec(&ctx).await.unwrap();
        stage.exec(&ctx).await.unwrap();

        assert_eq!(log.count("after_exec"), 2);
        assert!(ctx.registry().is_empty());
    }

    #[tokio::test]
    async fn test_before_exec_failure_skips_program_and_after_exec() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::new("ndown").fail_before_exec();
        let log = stage.log();
        stage.export_config().unwrap();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::UnresolvableFile(_)));
        assert_eq!(log.count("before_exec"), 1);
        assert_eq!(log.count("after_exec"), 0);
        assert_eq!(stage.state(), StageState::Failed);
    }

    #[tokio::test]
    async fn test_after_exec_failure_fails_stage() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::new("tc").fail_after_exec();
        stage.export_config().unwrap();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::NoOutputFile(_)));
        assert_eq!(stage.state(), StageState::Failed);
        assert!(!run.ctx().registry().contains("tc"));
    }

    #[tokio::test]
    async fn test_program_error_outranks_after_exec_error() {
        let run = TestRun::new().unwrap();
        let mut stage = ProbeStage::failing("wrf").fail_after_exec();
        let log = stage.log();
        stage.export_config().unwrap();

        let err = stage.exec(run.ctx()).await.unwrap_err();

        assert!(matches!(err, SimflowError::ExternalProgram(_)));
        assert_eq!(log.count("after_exec"), 1);
        assert_eq!(stage.state(), StageState::Failed);
    }

    #[tokio::test]
    async fn test_dry_run_skips_external_program() {
        let dir = TempDir::new().unwrap();
        let settings = RunSettings::new().with_workspace(dir.path().join("ws"));
        let ctx = RunContext::new(settings).with_dry_run(true);
        ctx.prepare().unwrap();

        let mut stage = ProbeStage::with_command(
            "geogrid",
            crate::stages::CommandSpec::new("/nonexistent/geogrid.exe"),
        );
        stage.export_config().unwrap();

        stage.exec(&ctx).await.unwrap();

        assert_eq!(stage.state(), StageState::Completed);
        assert!(ctx.registry().contains("geogrid"));
        assert!(!ctx.workspace().logs_dir().join("geogrid.log").exists());
    }

    #[tokio::test]
    async fn test_program_stage_end_to_end() {
        init_test_logging();
        let run = TestRun::new().unwrap();
        let sounding = run.write_file("inputs/sounding.txt", "1000 25.0 14.0").unwrap();

        let mut stage = ProgramStage::new("ideal", shell("cp sounding.txt profile.nc"))
            .with_output_scan(OutputScan::new().with_suffix(".nc"));
        stage
            .add_input_files(run.ctx(), sounding.to_str().unwrap().into())
            .unwrap();

        stage.exec(run.ctx()).await.unwrap();

        let collected = run
            .ctx()
            .workspace()
            .outputs_dir()
            .join("ideal")
            .join("profile.nc");
        assert!(collected.is_file());
        assert_eq!(
            std::fs::read_to_string(&collected).unwrap(),
            "1000 25.0 14.0"
        );

        let config = run.ctx().registry().get("ideal").unwrap();
        assert_eq!(config.inputs.len(), 1);
        assert_eq!(config.inputs[0].origin, FileOrigin::UserResource);
        assert!(!config.inputs[0].is_output);
        assert_eq!(config.outputs.len(), 1);
        assert_eq!(config.outputs[0].save_path, "outputs://ideal");
        assert!(config.outputs[0].is_output);
    }

    #[tokio::test]
    async fn test_exec_places_upstream_product_inputs() {
        let run = TestRun::new().unwrap();
        let upstream = run.write_file("shared/geo_em.d01.nc", "terrain").unwrap();

        // Products of an earlier stage arrive with the output flag set; the
        // program still needs them in its work dir.
        let mut stage = ProgramStage::new("metgrid", shell("test -e geo_em.d01.nc"));
        stage
            .add_input_files_with(
                run.ctx(),
                upstream.to_str().unwrap().into(),
                InputOptions {
                    is_data: true,
                    is_output: true,
                },
            )
            .unwrap();

        stage.exec(run.ctx()).await.unwrap();

        let placed = run
            .ctx()
            .roots()
            .resolve("workspace://run/metgrid")
            .unwrap()
            .join("geo_em.d01.nc");
        assert!(placed.exists());
        assert_eq!(stage.state(), StageState::Completed);
    }

    #[tokio::test]
    async fn test_from_config_replays_a_recorded_stage() {
        let run = TestRun::new().unwrap();
        let sounding = run.write_file("inputs/sounding.txt", "surface 300K").unwrap();

        let mut stage = ProgramStage::new("ideal", shell("cp sounding.txt wrfinput_d01"))
            .with_output_scan(OutputScan::new().with_prefix("wrfinput"));
        stage
            .add_input_files(run.ctx(), sounding.to_str().unwrap().into())
            .unwrap();
        stage.exec(run.ctx()).await.unwrap();
        let recorded = run.ctx().registry().get("ideal").unwrap();

        let replay_ctx = run.replay_ctx().unwrap();
        let mut replayed = ProgramStage::from_config(&recorded).unwrap();
        assert_eq!(replayed.state(), StageState::Configured);
        replayed.exec(&replay_ctx).await.unwrap();

        let collected = replay_ctx
            .workspace()
            .outputs_dir()
            .join("ideal")
            .join("wrfinput_d01");
        assert!(collected.is_file());
        assert!(replay_ctx.registry().is_empty());
    }
}
