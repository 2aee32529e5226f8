use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value as JsonValue, json};

use bgw_protocol::bedrock::converse::request::ConverseRequest;
use bgw_protocol::bedrock::converse::types::{
    ContentBlock, ConversationRole, ImageBlock, ImageFormat, ImageSource, InferenceConfig, Message,
    SystemContentBlock, Tool, ToolChoice as ConverseToolChoice, ToolConfig, ToolInputSchema,
    ToolResultBlock, ToolResultContentBlock, ToolResultStatus, ToolSpec, ToolUseBlock,
};
use bgw_protocol::openai::chat_completions::request::ChatCompletionRequest;
use bgw_protocol::openai::chat_completions::types::{
    AssistantMessage, ChatRequestMessage, ContentPart, MessageContent, StopSequences,
    ThinkingConfig, ToolChoice, ToolChoiceMode, ToolDefinition, ToolMessage, UserMessage,
};

use crate::{FeatureGates, TranslateError};

/// Converse accepts at most this many stop sequences.
const MAX_STOP_SEQUENCES: usize = 4;
/// Applied when the client omits max_tokens; Converse requires a bound.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Convert an OpenAI chat-completions request into a Converse request
/// for the already-resolved upstream model id.
pub fn translate_request(
    request: &ChatCompletionRequest,
    model_id: &str,
    gates: &FeatureGates,
) -> Result<ConverseRequest, TranslateError> {
    validate(request, gates)?;

    let mut system = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message {
            ChatRequestMessage::System(sys) => {
                system.push(SystemContentBlock::Text(sys.content.to_text()));
            }
            ChatRequestMessage::User(user) => {
                push_message(&mut messages, ConversationRole::User, map_user(user, gates)?);
            }
            ChatRequestMessage::Assistant(assistant) => {
                push_message(
                    &mut messages,
                    ConversationRole::Assistant,
                    map_assistant(assistant)?,
                );
            }
            ChatRequestMessage::Tool(tool) => {
                push_message(&mut messages, ConversationRole::User, map_tool(tool));
            }
        }
    }

    let tool_config = map_tool_config(request.tools.as_deref(), request.tool_choice.as_ref());
    let additional_model_request_fields = map_thinking(request.thinking.as_ref());
    let temperature = if additional_model_request_fields.is_some() {
        None
    } else {
        request.temperature.map(|t| t.min(1.0))
    };

    Ok(ConverseRequest {
        model_id: model_id.to_string(),
        messages,
        system,
        inference_config: InferenceConfig {
            max_tokens: Some(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
            temperature,
            top_p: request.top_p,
            stop_sequences: map_stop(request.stop.as_ref()),
        },
        tool_config,
        additional_model_request_fields,
    })
}

fn validate(request: &ChatCompletionRequest, gates: &FeatureGates) -> Result<(), TranslateError> {
    if request.messages.is_empty() {
        return Err(TranslateError::with_param(
            "messages must contain at least one entry",
            "messages",
        ));
    }
    if let Some(n) = request.n
        && n > 1
    {
        return Err(TranslateError::with_param(
            "only n=1 is supported",
            "n",
        ));
    }
    if let Some(temperature) = request.temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        return Err(TranslateError::with_param(
            "temperature must be between 0 and 2",
            "temperature",
        ));
    }
    if let Some(top_p) = request.top_p
        && !(top_p > 0.0 && top_p <= 1.0)
    {
        return Err(TranslateError::with_param(
            "top_p must be in (0, 1]",
            "top_p",
        ));
    }
    if let Some(max_tokens) = request.max_tokens
        && max_tokens == 0
    {
        return Err(TranslateError::with_param(
            "max_tokens must be at least 1",
            "max_tokens",
        ));
    }
    if request.tools.is_some() && !gates.tool_use {
        return Err(TranslateError::with_param(
            "tool use is disabled on this gateway",
            "tools",
        ));
    }
    match request.thinking {
        Some(ThinkingConfig::Enabled { budget_tokens }) => {
            if !gates.extended_thinking {
                return Err(TranslateError::with_param(
                    "extended thinking is disabled on this gateway",
                    "thinking",
                ));
            }
            if budget_tokens == 0 {
                return Err(TranslateError::with_param(
                    "thinking.budget_tokens must be positive",
                    "thinking.budget_tokens",
                ));
            }
            // The upstream rejects sampling temperature alongside
            // thinking; surface the conflict instead of dropping one.
            if request.temperature.is_some() {
                return Err(TranslateError::with_param(
                    "temperature cannot be combined with extended thinking",
                    "temperature",
                ));
            }
        }
        Some(ThinkingConfig::Disabled) | None => {}
    }
    Ok(())
}

/// Appends content blocks, coalescing into the previous message when the
/// role repeats. Converse requires alternating user/assistant turns.
fn push_message(messages: &mut Vec<Message>, role: ConversationRole, blocks: Vec<ContentBlock>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        last.content.extend(blocks);
        return;
    }
    messages.push(Message {
        role,
        content: blocks,
    });
}

fn map_user(message: &UserMessage, gates: &FeatureGates) -> Result<Vec<ContentBlock>, TranslateError> {
    match &message.content {
        MessageContent::Text(text) => Ok(vec![ContentBlock::Text(text.clone())]),
        MessageContent::Parts(parts) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        if !gates.vision {
                            return Err(TranslateError::with_param(
                                "image input is disabled on this gateway",
                                "messages.content.image_url",
                            ));
                        }
                        blocks.push(map_image_url(&image_url.url)?);
                    }
                }
            }
            Ok(blocks)
        }
    }
}

fn map_assistant(message: &AssistantMessage) -> Result<Vec<ContentBlock>, TranslateError> {
    let mut blocks = Vec::new();

    if let Some(content) = &message.content {
        let text = content.to_text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text(text));
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        for tool_call in tool_calls {
            let input: JsonValue =
                serde_json::from_str(&tool_call.function.arguments).map_err(|_| {
                    TranslateError::with_param(
                        format!(
                            "tool call {} carries arguments that are not valid JSON",
                            tool_call.id
                        ),
                        "tool_calls.arguments",
                    )
                })?;
            blocks.push(ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: tool_call.id.clone(),
                name: tool_call.function.name.clone(),
                input,
            }));
        }
    }

    Ok(blocks)
}

/// Tool results travel upstream as user-role messages.
fn map_tool(message: &ToolMessage) -> Vec<ContentBlock> {
    vec![ContentBlock::ToolResult(ToolResultBlock {
        tool_use_id: message.tool_call_id.clone(),
        content: vec![ToolResultContentBlock::Text(message.content.to_text())],
        status: Some(ToolResultStatus::Success),
    })]
}

fn map_image_url(url: &str) -> Result<ContentBlock, TranslateError> {
    let Some((media_type, payload)) = parse_data_url(url) else {
        return Err(TranslateError::with_param(
            "image_url must be a base64 data URL",
            "messages.content.image_url",
        ));
    };
    let Some(format) = ImageFormat::from_media_type(media_type) else {
        return Err(TranslateError::with_param(
            format!("unsupported image media type {media_type}"),
            "messages.content.image_url",
        ));
    };
    let bytes = BASE64.decode(payload.as_bytes()).map_err(|_| {
        TranslateError::with_param(
            "image data URL carries invalid base64",
            "messages.content.image_url",
        )
    })?;
    Ok(ContentBlock::Image(ImageBlock {
        format,
        source: ImageSource { bytes },
    }))
}

fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let (media_type, encoding) = meta.split_once(';')?;
    if encoding != "base64" {
        return None;
    }
    Some((media_type, payload))
}

fn map_tool_config(
    tools: Option<&[ToolDefinition]>,
    tool_choice: Option<&ToolChoice>,
) -> Option<ToolConfig> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    // tool_choice "none" removes the tool surface entirely so the
    // upstream cannot issue tool uses.
    if matches!(tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::None))) {
        return None;
    }

    let specs = tools
        .iter()
        .map(|tool| {
            Tool::ToolSpec(ToolSpec {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: ToolInputSchema::Json(
                    tool.function
                        .parameters
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                ),
            })
        })
        .collect();

    let tool_choice = match tool_choice {
        Some(ToolChoice::Mode(ToolChoiceMode::Auto)) => Some(ConverseToolChoice::Auto {}),
        Some(ToolChoice::Mode(ToolChoiceMode::Required)) => Some(ConverseToolChoice::Any {}),
        Some(ToolChoice::Named(named)) => Some(ConverseToolChoice::Tool {
            name: named.function.name.clone(),
        }),
        Some(ToolChoice::Mode(ToolChoiceMode::None)) | None => None,
    };

    Some(ToolConfig {
        tools: specs,
        tool_choice,
    })
}

fn map_thinking(thinking: Option<&ThinkingConfig>) -> Option<JsonValue> {
    match thinking {
        Some(ThinkingConfig::Enabled { budget_tokens }) => Some(json!({
            "thinking": {"type": "enabled", "budget_tokens": budget_tokens}
        })),
        Some(ThinkingConfig::Disabled) | None => None,
    }
}

fn map_stop(stop: Option<&StopSequences>) -> Option<Vec<String>> {
    let sequences: Vec<String> = match stop? {
        StopSequences::Single(value) => vec![value.clone()],
        StopSequences::Many(values) => values.iter().take(MAX_STOP_SEQUENCES).cloned().collect(),
    };
    if sequences.is_empty() {
        None
    } else {
        Some(sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgw_protocol::openai::chat_completions::types::{
        FunctionCall, FunctionDefinition, ImageUrl, SystemMessage, ToolCall, ToolCallKind,
    };

    fn user_text(text: &str) -> ChatRequestMessage {
        ChatRequestMessage::User(UserMessage {
            content: MessageContent::Text(text.to_string()),
            name: None,
        })
    }

    fn system_text(text: &str) -> ChatRequestMessage {
        ChatRequestMessage::System(SystemMessage {
            content: MessageContent::Text(text.to_string()),
            name: None,
        })
    }

    fn request_with(messages: Vec<ChatRequestMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "claude-sonnet-4-5".to_string(),
            messages,
            max_tokens: None,
            temperature: None,
            top_p: None,
            n: None,
            stream: None,
            stream_options: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            tools: None,
            tool_choice: None,
            user: None,
            thinking: None,
        }
    }

    #[test]
    fn simple_user_message() {
        let request = request_with(vec![user_text("Hi")]);
        let out = translate_request(
            &request,
            "global.anthropic.claude-sonnet-4-5-20250929-v1:0",
            &FeatureGates::default(),
        )
        .unwrap();

        assert_eq!(out.model_id, "global.anthropic.claude-sonnet-4-5-20250929-v1:0");
        assert!(out.system.is_empty());
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].role, ConversationRole::User);
        assert_eq!(
            out.messages[0].content,
            vec![ContentBlock::Text("Hi".to_string())]
        );
        assert!(out.tool_config.is_none());
    }

    #[test]
    fn system_messages_hoist_in_order_and_users_coalesce() {
        let request = request_with(vec![
            system_text("S1"),
            user_text("U1"),
            system_text("S2"),
            user_text("U2"),
        ]);
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();

        assert_eq!(
            out.system,
            vec![
                SystemContentBlock::Text("S1".to_string()),
                SystemContentBlock::Text("S2".to_string()),
            ]
        );
        assert_eq!(out.messages.len(), 1);
        assert_eq!(
            out.messages[0].content,
            vec![
                ContentBlock::Text("U1".to_string()),
                ContentBlock::Text("U2".to_string()),
            ]
        );
    }

    #[test]
    fn tool_follow_up_becomes_tool_use_then_tool_result() {
        let request = request_with(vec![
            ChatRequestMessage::Assistant(AssistantMessage {
                content: None,
                tool_calls: Some(vec![ToolCall {
                    id: "tu_1".to_string(),
                    kind: ToolCallKind::Function,
                    function: FunctionCall {
                        name: "get_weather".to_string(),
                        arguments: "{\"location\":\"Tokyo\"}".to_string(),
                    },
                }]),
                name: None,
            }),
            ChatRequestMessage::Tool(ToolMessage {
                content: MessageContent::Text("22C".to_string()),
                tool_call_id: "tu_1".to_string(),
            }),
        ]);
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();

        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, ConversationRole::Assistant);
        match &out.messages[0].content[0] {
            ContentBlock::ToolUse(tool_use) => {
                assert_eq!(tool_use.tool_use_id, "tu_1");
                assert_eq!(tool_use.name, "get_weather");
                assert_eq!(tool_use.input, json!({"location": "Tokyo"}));
            }
            other => panic!("expected toolUse, got {other:?}"),
        }
        assert_eq!(out.messages[1].role, ConversationRole::User);
        match &out.messages[1].content[0] {
            ContentBlock::ToolResult(result) => {
                assert_eq!(result.tool_use_id, "tu_1");
                assert_eq!(
                    result.content,
                    vec![ToolResultContentBlock::Text("22C".to_string())]
                );
            }
            other => panic!("expected toolResult, got {other:?}"),
        }
    }

    #[test]
    fn assistant_tool_use_ids_preserve_order() {
        let calls: Vec<ToolCall> = (0..3)
            .map(|i| ToolCall {
                id: format!("tu_{i}"),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: format!("fn_{i}"),
                    arguments: "{}".to_string(),
                },
            })
            .collect();
        let request = request_with(vec![ChatRequestMessage::Assistant(AssistantMessage {
            content: Some(MessageContent::Text("working on it".to_string())),
            tool_calls: Some(calls),
            name: None,
        })]);
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();

        let blocks = &out.messages[0].content;
        assert!(matches!(&blocks[0], ContentBlock::Text(t) if t == "working on it"));
        let ids: Vec<&str> = blocks[1..]
            .iter()
            .map(|block| match block {
                ContentBlock::ToolUse(tool_use) => tool_use.tool_use_id.as_str(),
                other => panic!("expected toolUse, got {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec!["tu_0", "tu_1", "tu_2"]);
    }

    #[test]
    fn bad_tool_arguments_name_the_param() {
        let request = request_with(vec![ChatRequestMessage::Assistant(AssistantMessage {
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "tu_1".to_string(),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: "f".to_string(),
                    arguments: "{not json".to_string(),
                },
            }]),
            name: None,
        })]);
        let err = translate_request(&request, "m", &FeatureGates::default()).unwrap_err();
        assert_eq!(err.param.as_deref(), Some("tool_calls.arguments"));
    }

    #[test]
    fn data_url_image_decodes() {
        let payload = BASE64.encode(b"\x89PNG fake");
        let request = request_with(vec![ChatRequestMessage::User(UserMessage {
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{payload}"),
                    detail: None,
                },
            }]),
            name: None,
        })]);
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();

        match &out.messages[0].content[0] {
            ContentBlock::Image(image) => {
                assert_eq!(image.format, ImageFormat::Png);
                assert_eq!(image.source.bytes, b"\x89PNG fake");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_image_media_type_is_rejected() {
        let request = request_with(vec![ChatRequestMessage::User(UserMessage {
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/tiff;base64,AAAA".to_string(),
                    detail: None,
                },
            }]),
            name: None,
        })]);
        let err = translate_request(&request, "m", &FeatureGates::default()).unwrap_err();
        assert_eq!(err.param.as_deref(), Some("messages.content.image_url"));
    }

    #[test]
    fn tool_choice_none_drops_tool_config() {
        let mut request = request_with(vec![user_text("hi")]);
        request.tools = Some(vec![ToolDefinition {
            kind: ToolCallKind::Function,
            function: FunctionDefinition {
                name: "get_weather".to_string(),
                description: None,
                parameters: None,
            },
        }]);
        request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::None));
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();
        assert!(out.tool_config.is_none());
    }

    #[test]
    fn tool_choice_required_maps_to_any() {
        let mut request = request_with(vec![user_text("hi")]);
        request.tools = Some(vec![ToolDefinition {
            kind: ToolCallKind::Function,
            function: FunctionDefinition {
                name: "get_weather".to_string(),
                description: Some("weather lookup".to_string()),
                parameters: Some(json!({"type":"object","properties":{"location":{"type":"string"}}})),
            },
        }]);
        request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Required));
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();
        let config = out.tool_config.unwrap();
        assert_eq!(config.tool_choice, Some(ConverseToolChoice::Any {}));
        let Tool::ToolSpec(spec) = &config.tools[0];
        assert_eq!(spec.name, "get_weather");
    }

    #[test]
    fn empty_stop_list_is_omitted() {
        let mut request = request_with(vec![user_text("hi")]);
        request.stop = Some(StopSequences::Many(vec![]));
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();
        assert!(out.inference_config.stop_sequences.is_none());

        request.stop = Some(StopSequences::Single("END".to_string()));
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();
        assert_eq!(
            out.inference_config.stop_sequences,
            Some(vec!["END".to_string()])
        );
    }

    #[test]
    fn thinking_conflicts_with_temperature() {
        let mut request = request_with(vec![user_text("hi")]);
        request.thinking = Some(ThinkingConfig::Enabled {
            budget_tokens: 2048,
        });
        request.temperature = Some(0.7);
        let err = translate_request(&request, "m", &FeatureGates::default()).unwrap_err();
        assert_eq!(err.param.as_deref(), Some("temperature"));

        request.temperature = None;
        let out = translate_request(&request, "m", &FeatureGates::default()).unwrap();
        assert_eq!(
            out.additional_model_request_fields,
            Some(json!({"thinking": {"type": "enabled", "budget_tokens": 2048}}))
        );
        assert!(out.inference_config.temperature.is_none());
    }

    #[test]
    fn gates_reject_disabled_features() {
        let gates = FeatureGates {
            vision: false,
            tool_use: false,
            extended_thinking: false,
        };

        let mut request = request_with(vec![user_text("hi")]);
        request.tools = Some(vec![]);
        assert!(translate_request(&request, "m", &gates).is_err());

        let mut request = request_with(vec![user_text("hi")]);
        request.thinking = Some(ThinkingConfig::Enabled { budget_tokens: 1 });
        assert!(translate_request(&request, "m", &gates).is_err());
    }

    #[test]
    fn validation_ranges() {
        let mut request = request_with(vec![user_text("hi")]);
        request.temperature = Some(2.5);
        assert!(translate_request(&request, "m", &FeatureGates::default()).is_err());

        let mut request = request_with(vec![user_text("hi")]);
        request.top_p = Some(0.0);
        assert!(translate_request(&request, "m", &FeatureGates::default()).is_err());

        let request = request_with(vec![]);
        assert!(translate_request(&request, "m", &FeatureGates::default()).is_err());
    }
}
