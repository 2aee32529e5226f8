use bgw_protocol::bedrock::converse::response::{ConverseOutput, ConverseResponse};
use bgw_protocol::bedrock::converse::types::{ContentBlock, StopReason};
use bgw_protocol::openai::chat_completions::response::{
    ChatChoice, ChatCompletionObject, ChatCompletionResponse,
};
use bgw_protocol::openai::chat_completions::types::{
    AssistantRole, FinishReason, FunctionCall, ResponseMessage, ToolCall, ToolCallKind, Usage,
};

pub fn map_stop_reason(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::ContentFiltered => FinishReason::ContentFilter,
        StopReason::GuardrailIntervened => FinishReason::Stop,
    }
}

/// Convert a terminal Converse response into an OpenAI chat completion.
/// `model` is the client-supplied id; `id` and `created` are assigned by
/// the caller so that unary and streaming paths share one id scheme.
pub fn translate_response(
    response: &ConverseResponse,
    model: &str,
    id: String,
    created: i64,
) -> ChatCompletionResponse {
    let ConverseOutput::Message(message) = &response.output;

    let mut text = String::new();
    let mut thinking = String::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text(part) => text.push_str(part),
            ContentBlock::ToolUse(tool_use) => tool_calls.push(ToolCall {
                id: tool_use.tool_use_id.clone(),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: tool_use.name.clone(),
                    arguments: serde_json::to_string(&tool_use.input)
                        .unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            ContentBlock::ReasoningContent(reasoning) => {
                thinking.push_str(&reasoning.reasoning_text.text);
            }
            // Image and toolResult blocks do not occur in model output.
            ContentBlock::Image(_) | ContentBlock::ToolResult(_) => {}
        }
    }

    let usage = Usage {
        prompt_tokens: response.usage.input_tokens,
        completion_tokens: response.usage.output_tokens,
        total_tokens: response.usage.input_tokens + response.usage.output_tokens,
    };

    ChatCompletionResponse {
        id,
        object: ChatCompletionObject::ChatCompletion,
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: AssistantRole::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                thinking: if thinking.is_empty() {
                    None
                } else {
                    Some(thinking)
                },
            },
            finish_reason: map_stop_reason(response.stop_reason),
        }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgw_protocol::bedrock::converse::types::{
        ConversationRole, Message, ReasoningBlock, ReasoningText, TokenUsage, ToolUseBlock,
    };
    use serde_json::json;

    fn response_with(content: Vec<ContentBlock>, stop_reason: StopReason) -> ConverseResponse {
        ConverseResponse {
            output: ConverseOutput::Message(Message {
                role: ConversationRole::Assistant,
                content,
            }),
            stop_reason,
            usage: TokenUsage {
                input_tokens: 3,
                output_tokens: 2,
                total_tokens: 5,
            },
        }
    }

    #[test]
    fn text_response_maps_to_single_choice() {
        let response = response_with(
            vec![ContentBlock::Text("Hello".to_string())],
            StopReason::EndTurn,
        );
        let out = translate_response(&response, "claude-sonnet-4-5", "chatcmpl-x".to_string(), 7);

        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].index, 0);
        assert_eq!(out.choices[0].message.content.as_deref(), Some("Hello"));
        assert_eq!(out.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(out.usage.total_tokens, 5);
        assert_eq!(out.model, "claude-sonnet-4-5");
        assert_eq!(out.created, 7);
    }

    #[test]
    fn tool_use_becomes_tool_calls_with_null_content() {
        let response = response_with(
            vec![ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: "tu_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({"location": "Tokyo"}),
            })],
            StopReason::ToolUse,
        );
        let out = translate_response(&response, "m", "chatcmpl-x".to_string(), 0);

        let message = &out.choices[0].message;
        assert!(message.content.is_none());
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "tu_1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"location\":\"Tokyo\"}");
        assert_eq!(out.choices[0].finish_reason, FinishReason::ToolCalls);
    }

    #[test]
    fn reasoning_blocks_concatenate_into_thinking() {
        let response = response_with(
            vec![
                ContentBlock::ReasoningContent(ReasoningBlock {
                    reasoning_text: ReasoningText {
                        text: "step one. ".to_string(),
                        signature: None,
                    },
                }),
                ContentBlock::ReasoningContent(ReasoningBlock {
                    reasoning_text: ReasoningText {
                        text: "step two.".to_string(),
                        signature: None,
                    },
                }),
                ContentBlock::Text("answer".to_string()),
            ],
            StopReason::EndTurn,
        );
        let out = translate_response(&response, "m", "chatcmpl-x".to_string(), 0);

        let message = &out.choices[0].message;
        assert_eq!(message.thinking.as_deref(), Some("step one. step two."));
        assert_eq!(message.content.as_deref(), Some("answer"));
    }

    #[test]
    fn finish_reason_table() {
        for (stop, finish) in [
            (StopReason::EndTurn, FinishReason::Stop),
            (StopReason::StopSequence, FinishReason::Stop),
            (StopReason::MaxTokens, FinishReason::Length),
            (StopReason::ToolUse, FinishReason::ToolCalls),
            (StopReason::ContentFiltered, FinishReason::ContentFilter),
            (StopReason::GuardrailIntervened, FinishReason::Stop),
        ] {
            assert_eq!(map_stop_reason(stop), finish);
        }
    }

    #[test]
    fn usage_total_is_recomputed() {
        let mut response = response_with(
            vec![ContentBlock::Text("x".to_string())],
            StopReason::EndTurn,
        );
        response.usage.total_tokens = 0;
        let out = translate_response(&response, "m", "chatcmpl-x".to_string(), 0);
        assert_eq!(out.usage.total_tokens, 5);
    }
}
