//! Tool catalogue.
//!
//! Each tool name is parsed once into a [`ToolName`], and its arguments are
//! decoded into the typed struct for that tool. Input schemas are fixed and
//! published through `tools/list`.

use std::collections::BTreeMap;

use octopus_fabric::DEFAULT_PEEK_TIMEOUT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::gate::AccessLevel;
use crate::mcp::{McpAnnotations, McpTool};

/// Longest wait a caller may request from `consume_latest_event`.
pub const MAX_CONSUME_TIMEOUT_S: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    DiasporaAuthenticate,
    CompleteDiasporaAuth,
    Logout,
    CreateKey,
    ListTopics,
    RegisterTopic,
    UnregisterTopic,
    ProduceEvent,
    ConsumeLatestEvent,
}

impl ToolName {
    pub const ALL: [ToolName; 9] = [
        ToolName::DiasporaAuthenticate,
        ToolName::CompleteDiasporaAuth,
        ToolName::Logout,
        ToolName::CreateKey,
        ToolName::ListTopics,
        ToolName::RegisterTopic,
        ToolName::UnregisterTopic,
        ToolName::ProduceEvent,
        ToolName::ConsumeLatestEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::DiasporaAuthenticate => "diaspora_authenticate",
            ToolName::CompleteDiasporaAuth => "complete_diaspora_auth",
            ToolName::Logout => "logout",
            ToolName::CreateKey => "create_key",
            ToolName::ListTopics => "list_topics",
            ToolName::RegisterTopic => "register_topic",
            ToolName::UnregisterTopic => "unregister_topic",
            ToolName::ProduceEvent => "produce_event",
            ToolName::ConsumeLatestEvent => "consume_latest_event",
        }
    }

    /// Resolve a tool name, accepting the short login aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "authenticate" => return Some(ToolName::DiasporaAuthenticate),
            "complete_auth" => return Some(ToolName::CompleteDiasporaAuth),
            _ => {}
        }
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Gate level the tool runs under; `None` for the login lifecycle.
    pub fn access_level(&self) -> Option<AccessLevel> {
        match self {
            ToolName::DiasporaAuthenticate | ToolName::CompleteDiasporaAuth | ToolName::Logout => {
                None
            }
            ToolName::CreateKey
            | ToolName::ListTopics
            | ToolName::RegisterTopic
            | ToolName::UnregisterTopic => Some(AccessLevel::ControlPlane),
            ToolName::ProduceEvent | ToolName::ConsumeLatestEvent => Some(AccessLevel::DataPlane),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::DiasporaAuthenticate => {
                "Start the native-app login flow and return the authorization URL."
            }
            ToolName::CompleteDiasporaAuth => {
                "Exchange the authorization code for tokens and cache them."
            }
            ToolName::Logout => "Revoke tokens and clear cached clients.",
            ToolName::CreateKey => {
                "Rotate the broker access key. Required once before producing or consuming."
            }
            ToolName::ListTopics => "List the topics registered for the current identity.",
            ToolName::RegisterTopic => "Register a topic for the current identity.",
            ToolName::UnregisterTopic => "Unregister a topic for the current identity.",
            ToolName::ProduceEvent => {
                "Publish a message. With sync=true waits for the broker acknowledgment."
            }
            ToolName::ConsumeLatestEvent => {
                "Return the most recent message on a topic, or null if none arrives in time."
            }
        }
    }

    pub fn input_schema(&self) -> Value {
        let topic = json!({ "type": "string", "description": "Topic name" });
        match self {
            ToolName::DiasporaAuthenticate
            | ToolName::Logout
            | ToolName::CreateKey
            | ToolName::ListTopics => json!({ "type": "object", "properties": {} }),
            ToolName::CompleteDiasporaAuth => json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Authorization code shown after approval" }
                },
                "required": ["code"]
            }),
            ToolName::RegisterTopic | ToolName::UnregisterTopic => json!({
                "type": "object",
                "properties": { "topic": topic },
                "required": ["topic"]
            }),
            ToolName::ProduceEvent => json!({
                "type": "object",
                "properties": {
                    "topic": topic,
                    "value": { "type": "string" },
                    "key": { "type": ["string", "null"], "default": null },
                    "headers": {
                        "type": ["object", "null"],
                        "additionalProperties": { "type": "string" },
                        "default": null
                    },
                    "sync": { "type": "boolean", "default": true }
                },
                "required": ["topic", "value"]
            }),
            ToolName::ConsumeLatestEvent => json!({
                "type": "object",
                "properties": {
                    "topic": topic,
                    "timeout_s": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_CONSUME_TIMEOUT_S,
                        "default": DEFAULT_PEEK_TIMEOUT.as_secs()
                    }
                },
                "required": ["topic"]
            }),
        }
    }

    fn annotations(&self) -> McpAnnotations {
        let read_only = matches!(self, ToolName::ListTopics | ToolName::ConsumeLatestEvent);
        let destructive = matches!(self, ToolName::UnregisterTopic);
        McpAnnotations {
            title: None,
            read_only_hint: Some(read_only),
            destructive_hint: Some(destructive),
            idempotent_hint: Some(matches!(
                self,
                ToolName::ListTopics | ToolName::Logout | ToolName::RegisterTopic
            )),
        }
    }

    pub fn definition(&self) -> McpTool {
        McpTool {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            annotations: self.annotations(),
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definitions for `tools/list`, in catalogue order.
pub fn tool_definitions() -> Vec<McpTool> {
    ToolName::ALL.iter().map(ToolName::definition).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CompleteAuthArgs {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicArgs {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProduceEventArgs {
    pub topic: String,
    pub value: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default = "default_sync")]
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsumeLatestArgs {
    pub topic: String,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_sync() -> bool {
    true
}

fn default_timeout_s() -> u64 {
    DEFAULT_PEEK_TIMEOUT.as_secs()
}

/// A tool invocation with decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    DiasporaAuthenticate,
    CompleteDiasporaAuth(CompleteAuthArgs),
    Logout,
    CreateKey,
    ListTopics,
    RegisterTopic(TopicArgs),
    UnregisterTopic(TopicArgs),
    ProduceEvent(ProduceEventArgs),
    ConsumeLatestEvent(ConsumeLatestArgs),
}

impl ToolCall {
    /// Resolve `name` and decode `arguments` (an object, or null for none).
    pub fn parse(name: &str, arguments: Value) -> Result<Self, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let call = match tool {
            ToolName::DiasporaAuthenticate => ToolCall::DiasporaAuthenticate,
            ToolName::CompleteDiasporaAuth => ToolCall::CompleteDiasporaAuth(decode(tool, arguments)?),
            ToolName::Logout => ToolCall::Logout,
            ToolName::CreateKey => ToolCall::CreateKey,
            ToolName::ListTopics => ToolCall::ListTopics,
            ToolName::RegisterTopic => ToolCall::RegisterTopic(decode(tool, arguments)?),
            ToolName::UnregisterTopic => ToolCall::UnregisterTopic(decode(tool, arguments)?),
            ToolName::ProduceEvent => ToolCall::ProduceEvent(decode(tool, arguments)?),
            ToolName::ConsumeLatestEvent => {
                let args: ConsumeLatestArgs = decode(tool, arguments)?;
                if args.timeout_s == 0 || args.timeout_s > MAX_CONSUME_TIMEOUT_S {
                    return Err(ToolError::InvalidArguments {
                        tool: tool.as_str(),
                        reason: format!(
                            "timeout_s must be between 1 and {}",
                            MAX_CONSUME_TIMEOUT_S
                        ),
                    });
                }
                ToolCall::ConsumeLatestEvent(args)
            }
        };
        Ok(call)
    }

    pub fn name(&self) -> ToolName {
        match self {
            ToolCall::DiasporaAuthenticate => ToolName::DiasporaAuthenticate,
            ToolCall::CompleteDiasporaAuth(_) => ToolName::CompleteDiasporaAuth,
            ToolCall::Logout => ToolName::Logout,
            ToolCall::CreateKey => ToolName::CreateKey,
            ToolCall::ListTopics => ToolName::ListTopics,
            ToolCall::RegisterTopic(_) => ToolName::RegisterTopic,
            ToolCall::UnregisterTopic(_) => ToolName::UnregisterTopic,
            ToolCall::ProduceEvent(_) => ToolName::ProduceEvent,
            ToolCall::ConsumeLatestEvent(_) => ToolName::ConsumeLatestEvent,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.as_str(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_aliases_resolve() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolName::parse("authenticate"), Some(ToolName::DiasporaAuthenticate));
        assert_eq!(ToolName::parse("complete_auth"), Some(ToolName::CompleteDiasporaAuth));
        assert_eq!(ToolName::parse("exec_python"), None);
    }

    #[test]
    fn gate_levels() {
        assert_eq!(ToolName::Logout.access_level(), None);
        assert_eq!(ToolName::CreateKey.access_level(), Some(AccessLevel::ControlPlane));
        assert_eq!(ToolName::RegisterTopic.access_level(), Some(AccessLevel::ControlPlane));
        assert_eq!(ToolName::ProduceEvent.access_level(), Some(AccessLevel::DataPlane));
        assert_eq!(ToolName::ConsumeLatestEvent.access_level(), Some(AccessLevel::DataPlane));
    }

    #[test]
    fn produce_defaults() {
        let call = ToolCall::parse(
            "produce_event",
            json!({ "topic": "alerts", "value": "hello" }),
        )
        .unwrap();
        let ToolCall::ProduceEvent(args) = call else {
            panic!("wrong variant");
        };
        assert!(args.sync);
        assert_eq!(args.key, None);
        assert_eq!(args.headers, None);
    }

    #[test]
    fn consume_defaults_and_bounds() {
        let call = ToolCall::parse("consume_latest_event", json!({ "topic": "t" })).unwrap();
        assert_eq!(
            call,
            ToolCall::ConsumeLatestEvent(ConsumeLatestArgs {
                topic: "t".into(),
                timeout_s: 5
            })
        );

        let err = ToolCall::parse("consume_latest_event", json!({ "topic": "t", "timeout_s": 0 }))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { tool: "consume_latest_event", .. }));
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let err = ToolCall::parse("register_topic", Value::Null).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { tool: "register_topic", .. }));
    }

    #[test]
    fn argumentless_tools_accept_null() {
        assert_eq!(ToolCall::parse("logout", Value::Null).unwrap(), ToolCall::Logout);
        assert_eq!(
            ToolCall::parse("complete_auth", json!({ "code": "abc" })).unwrap().name(),
            ToolName::CompleteDiasporaAuth
        );
    }

    #[test]
    fn unknown_tool() {
        let err = ToolCall::parse("drop_tables", json!({})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "drop_tables"));
    }

    #[test]
    fn every_definition_has_an_object_schema() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 9);
        for def in defs {
            assert_eq!(def.input_schema["type"], "object", "{}", def.name);
        }
    }
}
