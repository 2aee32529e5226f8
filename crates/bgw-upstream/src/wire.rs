//! Two-way mapping between the gateway's Converse wire types and the
//! SDK's generated types.

use aws_sdk_bedrockruntime::operation::converse::ConverseOutput as ConverseOperationOutput;
use aws_sdk_bedrockruntime::operation::converse::builders::ConverseFluentBuilder;
use aws_sdk_bedrockruntime::operation::converse_stream::builders::ConverseStreamFluentBuilder;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types as sdk;

use bgw_core::upstream::UpstreamError;
use bgw_protocol::bedrock::converse::request::ConverseRequest;
use bgw_protocol::bedrock::converse::response::{ConverseOutput, ConverseResponse};
use bgw_protocol::bedrock::converse::stream as wire_stream;
use bgw_protocol::bedrock::converse::types as wire;

use crate::document::{document_to_json, json_to_document};

struct RequestParts {
    messages: Vec<sdk::Message>,
    system: Vec<sdk::SystemContentBlock>,
    inference: sdk::InferenceConfiguration,
    tool_config: Option<sdk::ToolConfiguration>,
    additional: Option<aws_smithy_types::Document>,
}

pub(crate) fn apply_request(
    builder: ConverseFluentBuilder,
    request: &ConverseRequest,
) -> Result<ConverseFluentBuilder, UpstreamError> {
    let parts = build_parts(request)?;
    Ok(builder
        .model_id(&request.model_id)
        .set_messages(Some(parts.messages))
        .set_system((!parts.system.is_empty()).then_some(parts.system))
        .inference_config(parts.inference)
        .set_tool_config(parts.tool_config)
        .set_additional_model_request_fields(parts.additional))
}

pub(crate) fn apply_stream_request(
    builder: ConverseStreamFluentBuilder,
    request: &ConverseRequest,
) -> Result<ConverseStreamFluentBuilder, UpstreamError> {
    let parts = build_parts(request)?;
    Ok(builder
        .model_id(&request.model_id)
        .set_messages(Some(parts.messages))
        .set_system((!parts.system.is_empty()).then_some(parts.system))
        .inference_config(parts.inference)
        .set_tool_config(parts.tool_config)
        .set_additional_model_request_fields(parts.additional))
}

fn build_parts(request: &ConverseRequest) -> Result<RequestParts, UpstreamError> {
    let messages = request
        .messages
        .iter()
        .map(to_sdk_message)
        .collect::<Result<Vec<_>, _>>()?;
    let system = request
        .system
        .iter()
        .map(|block| match block {
            wire::SystemContentBlock::Text(text) => sdk::SystemContentBlock::Text(text.clone()),
        })
        .collect();
    let inference = to_sdk_inference(&request.inference_config);
    let tool_config = request
        .tool_config
        .as_ref()
        .map(to_sdk_tool_config)
        .transpose()?;
    let additional = request
        .additional_model_request_fields
        .as_ref()
        .map(json_to_document);

    Ok(RequestParts {
        messages,
        system,
        inference,
        tool_config,
        additional,
    })
}

fn to_sdk_message(message: &wire::Message) -> Result<sdk::Message, UpstreamError> {
    let content = message
        .content
        .iter()
        .map(to_sdk_content_block)
        .collect::<Result<Vec<_>, _>>()?;
    sdk::Message::builder()
        .role(to_sdk_role(message.role))
        .set_content(Some(content))
        .build()
        .map_err(build_error)
}

fn to_sdk_content_block(block: &wire::ContentBlock) -> Result<sdk::ContentBlock, UpstreamError> {
    match block {
        wire::ContentBlock::Text(text) => Ok(sdk::ContentBlock::Text(text.clone())),
        wire::ContentBlock::Image(image) => {
            let image = sdk::ImageBlock::builder()
                .format(to_sdk_image_format(image.format))
                .source(sdk::ImageSource::Bytes(Blob::new(
                    image.source.bytes.clone(),
                )))
                .build()
                .map_err(build_error)?;
            Ok(sdk::ContentBlock::Image(image))
        }
        wire::ContentBlock::ToolUse(tool_use) => {
            let tool_use = sdk::ToolUseBlock::builder()
                .tool_use_id(&tool_use.tool_use_id)
                .name(&tool_use.name)
                .input(json_to_document(&tool_use.input))
                .build()
                .map_err(build_error)?;
            Ok(sdk::ContentBlock::ToolUse(tool_use))
        }
        wire::ContentBlock::ToolResult(result) => {
            let content = result
                .content
                .iter()
                .map(|block| match block {
                    wire::ToolResultContentBlock::Text(text) => {
                        sdk::ToolResultContentBlock::Text(text.clone())
                    }
                    wire::ToolResultContentBlock::Json(value) => {
                        sdk::ToolResultContentBlock::Json(json_to_document(value))
                    }
                })
                .collect();
            let result = sdk::ToolResultBlock::builder()
                .tool_use_id(&result.tool_use_id)
                .set_content(Some(content))
                .set_status(result.status.map(|status| match status {
                    wire::ToolResultStatus::Success => sdk::ToolResultStatus::Success,
                    wire::ToolResultStatus::Error => sdk::ToolResultStatus::Error,
                }))
                .build()
                .map_err(build_error)?;
            Ok(sdk::ContentBlock::ToolResult(result))
        }
        wire::ContentBlock::ReasoningContent(reasoning) => {
            let text_block = sdk::ReasoningTextBlock::builder()
                .text(&reasoning.reasoning_text.text)
                .set_signature(reasoning.reasoning_text.signature.clone())
                .build()
                .map_err(build_error)?;
            Ok(sdk::ContentBlock::ReasoningContent(
                sdk::ReasoningContentBlock::ReasoningText(text_block),
            ))
        }
    }
}

fn to_sdk_inference(config: &wire::InferenceConfig) -> sdk::InferenceConfiguration {
    sdk::InferenceConfiguration::builder()
        .set_max_tokens(config.max_tokens.map(|tokens| tokens as i32))
        .set_temperature(config.temperature.map(|value| value as f32))
        .set_top_p(config.top_p.map(|value| value as f32))
        .set_stop_sequences(config.stop_sequences.clone())
        .build()
}

fn to_sdk_tool_config(
    config: &wire::ToolConfig,
) -> Result<sdk::ToolConfiguration, UpstreamError> {
    let tools = config
        .tools
        .iter()
        .map(|tool| match tool {
            wire::Tool::ToolSpec(spec) => {
                let wire::ToolInputSchema::Json(schema) = &spec.input_schema;
                sdk::ToolSpecification::builder()
                    .name(&spec.name)
                    .set_description(spec.description.clone())
                    .input_schema(sdk::ToolInputSchema::Json(json_to_document(schema)))
                    .build()
                    .map(sdk::Tool::ToolSpec)
                    .map_err(build_error)
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let tool_choice = config
        .tool_choice
        .as_ref()
        .map(|choice| match choice {
            wire::ToolChoice::Auto {} => Ok(sdk::ToolChoice::Auto(
                sdk::AutoToolChoice::builder().build(),
            )),
            wire::ToolChoice::Any {} => {
                Ok(sdk::ToolChoice::Any(sdk::AnyToolChoice::builder().build()))
            }
            wire::ToolChoice::Tool { name } => sdk::SpecificToolChoice::builder()
                .name(name)
                .build()
                .map(sdk::ToolChoice::Tool)
                .map_err(build_error),
        })
        .transpose()?;

    sdk::ToolConfiguration::builder()
        .set_tools(Some(tools))
        .set_tool_choice(tool_choice)
        .build()
        .map_err(build_error)
}

pub(crate) fn from_converse_output(
    output: ConverseOperationOutput,
) -> Result<ConverseResponse, UpstreamError> {
    let Some(sdk::ConverseOutput::Message(message)) = output.output() else {
        return Err(UpstreamError::Server(
            "converse response carried no message output".to_string(),
        ));
    };

    let content = message
        .content()
        .iter()
        .filter_map(from_sdk_content_block)
        .collect();

    let usage = output
        .usage()
        .map(from_sdk_usage)
        .unwrap_or(wire::TokenUsage {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        });

    Ok(ConverseResponse {
        output: ConverseOutput::Message(wire::Message {
            role: wire::ConversationRole::Assistant,
            content,
        }),
        stop_reason: from_sdk_stop_reason(output.stop_reason()),
        usage,
    })
}

fn from_sdk_content_block(block: &sdk::ContentBlock) -> Option<wire::ContentBlock> {
    match block {
        sdk::ContentBlock::Text(text) => Some(wire::ContentBlock::Text(text.clone())),
        sdk::ContentBlock::ToolUse(tool_use) => {
            Some(wire::ContentBlock::ToolUse(wire::ToolUseBlock {
                tool_use_id: tool_use.tool_use_id().to_string(),
                name: tool_use.name().to_string(),
                input: document_to_json(tool_use.input()),
            }))
        }
        sdk::ContentBlock::ReasoningContent(sdk::ReasoningContentBlock::ReasoningText(text)) => {
            Some(wire::ContentBlock::ReasoningContent(wire::ReasoningBlock {
                reasoning_text: wire::ReasoningText {
                    text: text.text().to_string(),
                    signature: text.signature().map(str::to_string),
                },
            }))
        }
        _ => None,
    }
}

pub(crate) fn from_stream_event(
    event: sdk::ConverseStreamOutput,
) -> Vec<wire_stream::ConverseStreamEvent> {
    match event {
        sdk::ConverseStreamOutput::MessageStart(start) => {
            vec![wire_stream::ConverseStreamEvent::MessageStart(
                wire_stream::MessageStartEvent {
                    role: from_sdk_role(start.role()),
                },
            )]
        }
        sdk::ConverseStreamOutput::ContentBlockStart(start) => {
            let tool_use = start.start().and_then(|block_start| match block_start {
                sdk::ContentBlockStart::ToolUse(tool_use) => {
                    Some(wire_stream::ContentBlockStart::ToolUse(
                        wire_stream::ToolUseStart {
                            tool_use_id: tool_use.tool_use_id().to_string(),
                            name: tool_use.name().to_string(),
                        },
                    ))
                }
                _ => None,
            });
            vec![wire_stream::ConverseStreamEvent::ContentBlockStart(
                wire_stream::ContentBlockStartEvent {
                    content_block_index: start.content_block_index().max(0) as u32,
                    start: tool_use,
                },
            )]
        }
        sdk::ConverseStreamOutput::ContentBlockDelta(delta_event) => {
            let index = delta_event.content_block_index().max(0) as u32;
            let Some(delta) = delta_event.delta() else {
                return Vec::new();
            };
            let delta = match delta {
                sdk::ContentBlockDelta::Text(text) => {
                    wire_stream::ContentBlockDelta::Text(text.clone())
                }
                sdk::ContentBlockDelta::ToolUse(tool_use) => {
                    wire_stream::ContentBlockDelta::ToolUse(wire_stream::ToolUseDelta {
                        input: tool_use.input().to_string(),
                    })
                }
                sdk::ContentBlockDelta::ReasoningContent(reasoning) => match reasoning {
                    sdk::ReasoningContentBlockDelta::Text(text) => {
                        wire_stream::ContentBlockDelta::ReasoningContent(
                            wire_stream::ReasoningDelta {
                                text: Some(text.clone()),
                                signature: None,
                            },
                        )
                    }
                    sdk::ReasoningContentBlockDelta::Signature(signature) => {
                        wire_stream::ContentBlockDelta::ReasoningContent(
                            wire_stream::ReasoningDelta {
                                text: None,
                                signature: Some(signature.clone()),
                            },
                        )
                    }
                    _ => return Vec::new(),
                },
                _ => return Vec::new(),
            };
            vec![wire_stream::ConverseStreamEvent::ContentBlockDelta(
                wire_stream::ContentBlockDeltaEvent {
                    content_block_index: index,
                    delta,
                },
            )]
        }
        sdk::ConverseStreamOutput::ContentBlockStop(stop) => {
            vec![wire_stream::ConverseStreamEvent::ContentBlockStop(
                wire_stream::ContentBlockStopEvent {
                    content_block_index: stop.content_block_index().max(0) as u32,
                },
            )]
        }
        sdk::ConverseStreamOutput::MessageStop(stop) => {
            vec![wire_stream::ConverseStreamEvent::MessageDelta(
                wire_stream::MessageDeltaEvent {
                    stop_reason: Some(from_sdk_stop_reason(stop.stop_reason())),
                    usage: None,
                },
            )]
        }
        sdk::ConverseStreamOutput::Metadata(metadata) => match metadata.usage() {
            Some(usage) => vec![wire_stream::ConverseStreamEvent::MessageDelta(
                wire_stream::MessageDeltaEvent {
                    stop_reason: None,
                    usage: Some(from_sdk_usage(usage)),
                },
            )],
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn to_sdk_role(role: wire::ConversationRole) -> sdk::ConversationRole {
    match role {
        wire::ConversationRole::User => sdk::ConversationRole::User,
        wire::ConversationRole::Assistant => sdk::ConversationRole::Assistant,
    }
}

fn from_sdk_role(role: &sdk::ConversationRole) -> wire::ConversationRole {
    match role {
        sdk::ConversationRole::Assistant => wire::ConversationRole::Assistant,
        _ => wire::ConversationRole::User,
    }
}

fn to_sdk_image_format(format: wire::ImageFormat) -> sdk::ImageFormat {
    match format {
        wire::ImageFormat::Jpeg => sdk::ImageFormat::Jpeg,
        wire::ImageFormat::Png => sdk::ImageFormat::Png,
        wire::ImageFormat::Gif => sdk::ImageFormat::Gif,
        wire::ImageFormat::Webp => sdk::ImageFormat::Webp,
    }
}

fn from_sdk_stop_reason(reason: &sdk::StopReason) -> wire::StopReason {
    match reason {
        sdk::StopReason::EndTurn => wire::StopReason::EndTurn,
        sdk::StopReason::StopSequence => wire::StopReason::StopSequence,
        sdk::StopReason::MaxTokens => wire::StopReason::MaxTokens,
        sdk::StopReason::ToolUse => wire::StopReason::ToolUse,
        sdk::StopReason::ContentFiltered => wire::StopReason::ContentFiltered,
        sdk::StopReason::GuardrailIntervened => wire::StopReason::GuardrailIntervened,
        _ => wire::StopReason::EndTurn,
    }
}

/// SDK builder failures mean the translated request itself cannot be
/// expressed, so they surface as invalid-request errors.
fn build_error(err: impl std::fmt::Display) -> UpstreamError {
    UpstreamError::Invalid(err.to_string())
}

fn from_sdk_usage(usage: &sdk::TokenUsage) -> wire::TokenUsage {
    let input_tokens = usage.input_tokens().max(0) as u32;
    let output_tokens = usage.output_tokens().max(0) as u32;
    wire::TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
    }
}
