//! Integration tests exercising `execute_pipeline` end-to-end against
//! the allow-listed `jq` and `head`/`cat`-equivalent utilities (§8
//! "End-to-end scenarios").

use mcsh::config::{EngineConfig, Limits};
use mcsh::facade::Engine;
use mcsh::pipeline::{Pipeline, Stage};
use tokio_util::sync::CancellationToken;

fn engine() -> Engine {
    Engine::new(&EngineConfig {
        runtime_addr: None,
        bind_host: "127.0.0.1".to_string(),
        bind_port: 7887,
        limits: Limits::default(),
    })
}

#[tokio::test]
async fn simple_transform_scenario() {
    let engine = engine();
    let pipeline = Pipeline {
        stages: vec![Stage::Command {
            command: "jq".into(),
            args: vec![".a".into()],
            for_each: false,
            save_to: None,
        }],
        initial_input: Some("{\"a\":1,\"b\":2}".into()),
    };
    let envelope = engine
        .execute_pipeline(&pipeline, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.output, "1\n");
}

#[tokio::test]
async fn two_stage_pass_through_is_byte_identical() {
    let engine = engine();
    let pipeline = Pipeline {
        stages: vec![
            Stage::Command {
                command: "jq".into(),
                args: vec!["-c".into(), ".".into()],
                for_each: false,
                save_to: None,
            },
            Stage::Command {
                command: "jq".into(),
                args: vec!["-c".into(), ".".into()],
                for_each: false,
                save_to: None,
            },
        ],
        initial_input: Some("{\"a\":1}".into()),
    };
    let envelope = engine
        .execute_pipeline(&pipeline, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.output, "{\"a\":1}\n");
}

#[tokio::test]
async fn disallowed_command_reports_command_not_allowed_before_any_side_effect() {
    let engine = engine();
    let pipeline = Pipeline {
        stages: vec![Stage::Command {
            command: "rm".into(),
            args: vec!["-rf".into(), "/".into()],
            for_each: false,
            save_to: None,
        }],
        initial_input: None,
    };
    let err = engine
        .execute_pipeline(&pipeline, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "CommandNotAllowed");
}

#[tokio::test]
async fn fan_out_over_zero_lines_emits_an_empty_array() {
    let engine = engine();
    let pipeline = Pipeline {
        stages: vec![Stage::Command {
            command: "jq".into(),
            args: vec!["-c".into(), ".".into()],
            for_each: true,
            save_to: None,
        }],
        initial_input: Some(String::new()),
    };
    let envelope = engine
        .execute_pipeline(&pipeline, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(envelope.output, "[]");
}

#[tokio::test]
async fn cancellation_before_execution_returns_a_cancelled_envelope() {
    let engine = engine();
    let pipeline = Pipeline {
        stages: vec![Stage::Command {
            command: "sleep".into(),
            args: vec!["5".into()],
            for_each: false,
            save_to: None,
        }],
        initial_input: None,
    };
    let cancel = CancellationToken::new();
    cancel.cancel();
    let envelope = engine.execute_pipeline(&pipeline, cancel).await.unwrap();
    assert!(matches!(envelope.status, mcsh::orchestrator::Status::Cancelled));
}

#[tokio::test]
async fn list_available_shell_commands_matches_the_fixed_allow_list() {
    let engine = engine();
    let commands = engine.list_available_shell_commands();
    assert!(commands.contains(&"jq"));
    assert!(!commands.contains(&"rm"));
    assert_eq!(commands.len(), 17);
}

#[tokio::test]
async fn list_all_tools_is_empty_with_no_runtime_pointer_configured() {
    let engine = engine();
    let tools = engine.list_all_tools().await.unwrap();
    assert!(tools.is_empty());
}
