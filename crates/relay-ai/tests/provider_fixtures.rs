use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use relay_ai::{
    assemble_message, create_provider, AbortController, PartStream, ProviderKind,
    ProviderRequest, ProviderSettings, StopReason, StreamedPart, WireMessage,
};
use serde_json::{json, Value};

fn sse_body(events: &[Value], append_done: bool) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("data: ");
        body.push_str(&serde_json::to_string(event).expect("serialize event"));
        body.push_str("\n\n");
    }
    if append_done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

fn anthropic_tool_turn() -> Vec<Value> {
    vec![
        json!({"type":"message_start","message":{"id":"msg_01","usage":{"input_tokens":25,"output_tokens":1}}}),
        json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":"","signature":""}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Need to read "}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"the file."}}),
        json!({"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"EqQB"}}),
        json!({"type":"content_block_stop","index":0}),
        json!({"type":"ping"}),
        json!({"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Reading "}}),
        json!({"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"it now."}}),
        json!({"type":"content_block_stop","index":1}),
        json!({"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"tc1","name":"read","input":{}}}),
        json!({"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":""}}),
        json!({"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"{\"pa"}}),
        json!({"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"th\":\"/tmp\"}"}}),
        json!({"type":"content_block_stop","index":2}),
        json!({"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":57}}),
        json!({"type":"message_stop"}),
    ]
}

async fn drain(mut stream: PartStream) -> (Vec<StreamedPart>, PartStream) {
    let mut parts = Vec::new();
    while let Some(part) = stream.next().await {
        parts.push(part.expect("part"));
    }
    (parts, stream)
}

#[tokio::test]
async fn anthropic_events_assemble_thinking_text_and_tool_call() {
    let stream = PartStream::from_wire_events(ProviderKind::Anthropic, anthropic_tool_turn());
    let (parts, stream) = drain(stream).await;
    let message = assemble_message(parts);

    assert_eq!(message.text(), "Reading it now.");
    assert_eq!(message.tool_calls().len(), 1);
    assert_eq!(message.tool_calls()[0].id, "tc1");
    assert_eq!(message.tool_calls()[0].arguments, r#"{"path":"/tmp"}"#);
    assert_eq!(
        message.tool_calls()[0].parse_arguments().expect("json"),
        json!({ "path": "/tmp" })
    );

    assert_eq!(stream.response_id(), Some("msg_01"));
    assert_eq!(stream.stop_reason(), Some(StopReason::ToolUse));
    assert_eq!(stream.usage().input_other, 25);
    assert_eq!(stream.usage().output, 57);
    assert_eq!(stream.usage().input_cache_read, 0);
    assert_eq!(stream.usage().input_cache_creation, 0);
}

#[tokio::test]
async fn unknown_wire_events_produce_nothing() {
    let anthropic = PartStream::from_wire_events(
        ProviderKind::Anthropic,
        vec![
            json!({"type":"brand_new_event","payload":{"x":1}}),
            json!({"no_type": true}),
        ],
    );
    let (parts, _) = drain(anthropic).await;
    assert!(parts.is_empty());

    let openai = PartStream::from_wire_events(
        ProviderKind::Openai,
        vec![json!({"object":"something.else"}), json!({"choices":[{"index":0}]})],
    );
    let (parts, _) = drain(openai).await;
    assert!(parts.is_empty());
}

#[tokio::test]
async fn openai_sse_body_assembles_text_and_tool_call() {
    let body = sse_body(
        &[
            json!({"id":"chatcmpl-7","choices":[{"delta":{"role":"assistant","content":"Let me "}}]}),
            json!({"choices":[{"delta":{"content":"look."}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"glob","arguments":""}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pattern\":"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"*.rs\"}"}}]},"finish_reason":"tool_calls"}]}),
            json!({"choices":[],"usage":{"prompt_tokens":30,"completion_tokens":12}}),
        ],
        true,
    );

    let stream = PartStream::from_response_body(ProviderKind::Openai, &body).expect("stream");
    let (parts, stream) = drain(stream).await;
    let message = assemble_message(parts);

    assert_eq!(message.text(), "Let me look.");
    assert_eq!(message.tool_calls()[0].name, "glob");
    assert_eq!(message.tool_calls()[0].arguments, r#"{"pattern":"*.rs"}"#);
    assert_eq!(stream.response_id(), Some("chatcmpl-7"));
    assert_eq!(stream.usage().input_other, 30);
    assert_eq!(stream.usage().output, 12);
}

#[tokio::test]
async fn complete_anthropic_response_maps_blocks_without_deltas() {
    let body = json!({
        "id": "msg_full",
        "type": "message",
        "role": "assistant",
        "content": [
            {"type":"thinking","thinking":"short plan","signature":"sig-x"},
            {"type":"text","text":"Done."},
            {"type":"tool_use","id":"tu_9","name":"write","input":{"path":"a.txt","content":"hi"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 11, "output_tokens": 4, "cache_creation_input_tokens": 3}
    })
    .to_string();

    let stream = PartStream::from_response_body(ProviderKind::Anthropic, &body).expect("stream");
    let (parts, stream) = drain(stream).await;
    assert!(parts
        .iter()
        .all(|part| !matches!(part, StreamedPart::ToolCallDelta { .. })));

    let message = assemble_message(parts);
    assert_eq!(message.text(), "Done.");
    assert_eq!(
        message.tool_calls()[0].parse_arguments().expect("json"),
        json!({"path":"a.txt","content":"hi"})
    );
    assert_eq!(stream.usage().input_cache_creation, 3);
    assert_eq!(stream.response_id(), Some("msg_full"));
}

#[tokio::test]
async fn anthropic_provider_streams_from_http_server() {
    let body = sse_body(&anthropic_tool_turn(), false);
    let (base_url, captured) = spawn_server(http_response(
        "200 OK",
        "text/event-stream",
        &[],
        &body,
    ));
    let provider = create_provider(settings(ProviderKind::Anthropic, base_url));

    let request = ProviderRequest {
        system: Some("You are terse".to_string()),
        messages: vec![WireMessage::user_text("read /tmp")],
        ..ProviderRequest::default()
    };
    let stream = provider.stream(&request, None).await.expect("stream opens");
    let (parts, stream) = drain(stream).await;

    assert_eq!(assemble_message(parts).tool_calls()[0].arguments, r#"{"path":"/tmp"}"#);
    assert_eq!(stream.usage().output, 57);

    let request_text = captured
        .lock()
        .expect("capture lock")
        .clone()
        .expect("request captured");
    assert!(request_text.starts_with("POST /v1/messages"));
    assert!(request_text.contains("x-api-key: test-key"));
    assert!(request_text.contains("\"system\":\"You are terse\""));
}

#[tokio::test]
async fn openai_provider_handles_complete_json_response() {
    let body = json!({
        "id": "chatcmpl-full",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role":"assistant","content":"hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1}
    })
    .to_string();
    let (base_url, captured) =
        spawn_server(http_response("200 OK", "application/json", &[], &body));
    let provider = create_provider(settings(ProviderKind::Openai, base_url));

    let stream = provider
        .stream(&ProviderRequest::default(), None)
        .await
        .expect("stream opens");
    let (parts, stream) = drain(stream).await;

    assert_eq!(assemble_message(parts).text(), "hello");
    assert_eq!(stream.stop_reason(), Some(StopReason::Stop));

    let request_text = captured
        .lock()
        .expect("capture lock")
        .clone()
        .expect("request captured");
    assert!(request_text.starts_with("POST /v1/chat/completions"));
    assert!(request_text.to_ascii_lowercase().contains("authorization: bearer test-key"));
}

#[tokio::test]
async fn http_status_codes_map_to_typed_errors() {
    let cases = [
        ("401 Unauthorized", Vec::new(), "authentication", None),
        ("403 Forbidden", Vec::new(), "authentication", None),
        (
            "429 Too Many Requests",
            vec![("Retry-After", "7")],
            "rate_limit",
            Some(Duration::from_secs(7)),
        ),
        ("500 Internal Server Error", Vec::new(), "status", None),
    ];

    for (status, headers, kind, retry_after) in cases {
        let (base_url, _) = spawn_server(http_response(
            status,
            "application/json",
            &headers,
            r#"{"error":{"message":"nope"}}"#,
        ));
        let provider = create_provider(settings(ProviderKind::Anthropic, base_url));
        let error = match provider.stream(&ProviderRequest::default(), None).await {
            Ok(_) => panic!("{status} should fail"),
            Err(error) => error,
        };

        assert_eq!(error.kind(), kind, "{status}");
        assert_eq!(error.retry_after(), retry_after, "{status}");
        if kind == "status" {
            assert_eq!(error.status(), Some(500));
        }
    }
}

#[tokio::test]
async fn connection_refused_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("addr");
    drop(listener);

    let provider = create_provider(settings(ProviderKind::Openai, format!("http://{address}/v1")));
    let error = match provider.stream(&ProviderRequest::default(), None).await {
        Ok(_) => panic!("nothing is listening"),
        Err(error) => error,
    };
    assert_eq!(error.kind(), "connection");
}

#[tokio::test]
async fn missing_api_key_is_an_authentication_error() {
    let mut settings = settings(ProviderKind::Anthropic, "http://127.0.0.1:9/v1".to_string());
    settings.api_key = None;
    std::env::remove_var("ANTHROPIC_API_KEY");

    let provider = create_provider(settings);
    let error = match provider.stream(&ProviderRequest::default(), None).await {
        Ok(_) => panic!("no key configured"),
        Err(error) => error,
    };
    assert_eq!(error.kind(), "authentication");
}

#[tokio::test]
async fn abort_interrupts_an_in_flight_read() {
    let first = sse_body(
        &[
            json!({"type":"message_start","message":{"id":"msg_slow","usage":{"input_tokens":1}}}),
            json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":"partial"}}),
        ],
        false,
    );
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("addr");
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let _ = read_http_request(&mut socket);
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";
            let _ = socket.write_all(head.as_bytes());
            let _ = socket.write_all(first.as_bytes());
            let _ = socket.flush();
            thread::sleep(Duration::from_secs(3));
        }
    });

    let provider = create_provider(settings(ProviderKind::Anthropic, format!("http://{address}/v1")));
    let controller = AbortController::new();
    let mut stream = provider
        .stream(&ProviderRequest::default(), Some(controller.signal()))
        .await
        .expect("stream opens");

    let first_part = stream.next().await.expect("first part").expect("ok");
    assert_eq!(first_part, StreamedPart::text("partial"));

    controller.abort();
    let error = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("abort is observed promptly")
        .expect("an item")
        .expect_err("aborted read fails");
    assert_eq!(error.kind(), "unclassified");
    assert!(stream.next().await.is_none());
}

fn settings(kind: ProviderKind, base_url: String) -> ProviderSettings {
    let mut settings = ProviderSettings::new(kind, "test-model");
    settings.base_url = Some(base_url);
    settings.api_key = Some("test-key".to_string());
    settings
}

fn http_response(status: &str, content_type: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response
}

fn spawn_server(response: String) -> (String, Arc<Mutex<Option<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local test server");
    let address = listener.local_addr().expect("server local addr");
    let captured = Arc::new(Mutex::new(None));
    let captured_thread = Arc::clone(&captured);

    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let request = read_http_request(&mut socket);
            *captured_thread.lock().expect("capture lock") = request;
            socket
                .write_all(response.as_bytes())
                .expect("write response");
            let _ = socket.flush();
        }
    });

    (format!("http://{address}/v1"), captured)
}

/// Reads headers plus a `Content-Length` body.
fn read_http_request(socket: &mut TcpStream) -> Option<String> {
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut data = Vec::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read_len = socket.read(&mut buffer).ok()?;
        if read_len == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..read_len]);

        let text = String::from_utf8_lossy(&data).to_string();
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        if data.len() >= header_end + 4 + content_length {
            break;
        }
    }
    Some(String::from_utf8_lossy(&data).to_string())
}
