//! The pipeline data model (§3) and its validation rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// One unit of work in a pipeline, identified by its `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Stage {
    Tool {
        name: String,
        server: String,
        #[serde(default)]
        args: Map<String, Value>,
        #[serde(default)]
        for_each: bool,
        #[serde(default)]
        save_to: Option<String>,
    },
    Command {
        command: String,
        args: Vec<String>,
        #[serde(default)]
        for_each: bool,
        #[serde(default)]
        save_to: Option<String>,
    },
    Preview {
        chars: usize,
    },
    ReadBuffers {
        buffers: Vec<String>,
    },
}

impl Stage {
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Tool { .. } => "tool",
            Stage::Command { .. } => "command",
            Stage::Preview { .. } => "preview",
            Stage::ReadBuffers { .. } => "read_buffers",
        }
    }

    pub fn for_each(&self) -> bool {
        match self {
            Stage::Tool { for_each, .. } | Stage::Command { for_each, .. } => *for_each,
            Stage::Preview { .. } | Stage::ReadBuffers { .. } => false,
        }
    }

    pub fn save_to(&self) -> Option<&str> {
        match self {
            Stage::Tool { save_to, .. } | Stage::Command { save_to, .. } => save_to.as_deref(),
            Stage::Preview { .. } | Stage::ReadBuffers { .. } => None,
        }
    }
}

/// An ordered sequence of stages plus an optional initial input fed to
/// the first stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub initial_input: Option<String>,
}

impl Pipeline {
    /// Validates every invariant in §3 before any subprocess or tool
    /// call is made. On failure, names the offending stage index and
    /// field path (§6 "Stage schema").
    pub fn validate(&self) -> EngineResult<()> {
        if self.stages.is_empty() {
            return Err(EngineError::Validation {
                stage_index: 0,
                path: "stages".to_string(),
                message: "a pipeline must have at least one stage".to_string(),
            });
        }

        for (index, stage) in self.stages.iter().enumerate() {
            if index == 0 && stage.for_each() {
                return Err(EngineError::Validation {
                    stage_index: index,
                    path: "for_each".to_string(),
                    message: "for_each on the first stage has no upstream JSON-lines producer"
                        .to_string(),
                });
            }

            match stage {
                Stage::Command { command, .. } => {
                    if !crate::allowlist::contains(command) {
                        return Err(EngineError::Validation {
                            stage_index: index,
                            path: "command".to_string(),
                            message: format!("{command:?} is not in the allow-list"),
                        });
                    }
                }
                Stage::Preview { .. } => {
                    if index == 0 {
                        return Err(EngineError::Validation {
                            stage_index: index,
                            path: "type".to_string(),
                            message: "preview has no upstream stage to summarize".to_string(),
                        });
                    }
                }
                Stage::ReadBuffers { buffers } => {
                    if buffers.is_empty() {
                        return Err(EngineError::Validation {
                            stage_index: index,
                            path: "buffers".to_string(),
                            message: "read_buffers requires at least one buffer name".to_string(),
                        });
                    }
                }
                Stage::Tool { name, server, .. } => {
                    if name.is_empty() || server.is_empty() {
                        return Err(EngineError::Validation {
                            stage_index: index,
                            path: "name/server".to_string(),
                            message: "tool stages require a non-empty name and server".to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pipeline_is_rejected() {
        let pipeline = Pipeline {
            stages: vec![],
            initial_input: None,
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn disallowed_command_fails_validation_before_execution() {
        let pipeline = Pipeline {
            stages: vec![Stage::Command {
                command: "rm".into(),
                args: vec!["-rf".into(), "/".into()],
                for_each: false,
                save_to: None,
            }],
            initial_input: None,
        };
        let err = pipeline.validate().unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn for_each_on_first_stage_is_rejected() {
        let pipeline = Pipeline {
            stages: vec![Stage::Command {
                command: "jq".into(),
                args: vec![".".into()],
                for_each: true,
                save_to: None,
            }],
            initial_input: None,
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn preview_as_first_stage_is_rejected() {
        let pipeline = Pipeline {
            stages: vec![Stage::Preview { chars: 64 }],
            initial_input: None,
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn preview_chars_zero_is_a_valid_boundary() {
        let pipeline = Pipeline {
            stages: vec![
                Stage::Command {
                    command: "jq".into(),
                    args: vec![".".into()],
                    for_each: false,
                    save_to: None,
                },
                Stage::Preview { chars: 0 },
            ],
            initial_input: None,
        };
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn read_buffers_requires_at_least_one_name() {
        let pipeline = Pipeline {
            stages: vec![Stage::ReadBuffers { buffers: vec![] }],
            initial_input: None,
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn unknown_stage_fields_are_rejected_at_deserialization() {
        let raw = serde_json::json!({
            "type": "command",
            "command": "jq",
            "args": ["."],
            "bogus_field": true,
        });
        let result: Result<Stage, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn a_valid_multi_stage_pipeline_passes() {
        let pipeline = Pipeline {
            stages: vec![
                Stage::Command {
                    command: "jq".into(),
                    args: vec![".".into()],
                    for_each: false,
                    save_to: Some("raw".into()),
                },
                Stage::ReadBuffers {
                    buffers: vec!["raw".into()],
                },
            ],
            initial_input: Some("{\"x\":7}".into()),
        };
        assert!(pipeline.validate().is_ok());
    }
}
