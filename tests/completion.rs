//! HTTP client integration tests against in-process mock servers

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, Uri, header};
use futures::StreamExt;
use secrecy::SecretString;

use laasya_assistant::Error;
use laasya_assistant::completion::{
    CompletionBackend, CompletionRequest, FragmentStream, GeminiClient, UserMessage,
};
use laasya_assistant::conversation::Utterance;
use laasya_assistant::voice::{
    AudioFormat, ElevenLabsSynthesizer, SpeechSynthesizer, SpeechToText, Transcriber,
};

/// A request as seen by the mock server
#[derive(Debug, Clone)]
struct Seen {
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

type Log = Arc<Mutex<Vec<Seen>>>;

/// Serve one canned response for every request, recording what arrives
async fn mock_server(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> (String, Log) {
    let log: Log = Arc::default();
    let seen = Arc::clone(&log);

    let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, request: Bytes| {
        let seen = Arc::clone(&seen);
        let body = body.clone();
        async move {
            seen.lock().unwrap().push(Seen {
                uri,
                headers,
                body: request,
            });
            (status, [(header::CONTENT_TYPE, content_type)], body)
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), log)
}

fn chunk(text: &str) -> String {
    let payload = serde_json::json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    });
    format!("data: {payload}\r\n\r\n")
}

fn gemini(base_url: &str) -> GeminiClient {
    GeminiClient::new(
        reqwest::Client::new(),
        SecretString::from("gemini-key".to_string()),
        "test-model",
    )
    .unwrap()
    .with_base_url(base_url)
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest {
        system_prompt: "నువ్వు డాక్టర్ లాస్య.".to_string(),
        history: vec![Utterance::user("హలో"), Utterance::assistant("నమస్కారమండి!")],
        message: UserMessage::text(text),
    }
}

async fn collect(stream: FragmentStream) -> Vec<String> {
    stream.map(|item| item.unwrap()).collect().await
}

fn expect_err<T>(result: laasya_assistant::Result<T>) -> Error {
    match result {
        Ok(_) => panic!("expected an error"),
        Err(e) => e,
    }
}

#[tokio::test]
async fn test_gemini_streams_fragments_in_order() {
    let body = [
        chunk("అర్థ"),
        "data: {not json}\n\n".to_string(),
        ": keep-alive\n\n".to_string(),
        chunk("మైందండి. "),
        chunk("తులసి కషాయం తాగండి."),
    ]
    .concat();
    let (base, log) = mock_server(StatusCode::OK, "text/event-stream", body.into_bytes()).await;

    let stream = gemini(&base)
        .stream_completion(request("నాకు జలుబు"))
        .await
        .unwrap();
    let fragments = collect(stream).await;

    assert_eq!(fragments, vec!["అర్థ", "మైందండి. ", "తులసి కషాయం తాగండి."]);

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.uri.path(), "/models/test-model:streamGenerateContent");
    assert_eq!(seen.uri.query(), Some("alt=sse"));
    assert_eq!(seen.header("x-goog-api-key"), Some("gemini-key"));

    let json = seen.json();
    let contents = json["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[2]["parts"][0]["text"], "నాకు జలుబు");
    assert_eq!(json["systemInstruction"]["parts"][0]["text"], "నువ్వు డాక్టర్ లాస్య.");
    assert_eq!(json["generationConfig"]["maxOutputTokens"], 300);
}

#[tokio::test]
async fn test_gemini_stops_at_done() {
    let body = [chunk("ఒకటి"), "data: [DONE]\n\n".to_string(), chunk("రెండు")].concat();
    let (base, _) = mock_server(StatusCode::OK, "text/event-stream", body.into_bytes()).await;

    let stream = gemini(&base).stream_completion(request("హలో")).await.unwrap();
    assert_eq!(collect(stream).await, vec!["ఒకటి"]);
}

#[tokio::test]
async fn test_gemini_final_line_without_newline() {
    let body = chunk("చివరి");
    let body = body.trim_end().to_string();
    let (base, _) = mock_server(StatusCode::OK, "text/event-stream", body.into_bytes()).await;

    let stream = gemini(&base).stream_completion(request("హలో")).await.unwrap();
    assert_eq!(collect(stream).await, vec!["చివరి"]);
}

#[tokio::test]
async fn test_gemini_rejection_is_upstream_error() {
    let (base, _) = mock_server(
        StatusCode::TOO_MANY_REQUESTS,
        "application/json",
        br#"{"error":"quota exceeded"}"#.to_vec(),
    )
    .await;

    let err = expect_err(gemini(&base).stream_completion(request("హలో")).await);
    assert_eq!(err.upstream_status(), Some(429));
    assert!(err.to_string().contains("quota exceeded"));
}

#[tokio::test]
async fn test_gemini_unreachable_is_http_error() {
    let err = expect_err(
        gemini("http://127.0.0.1:9")
            .stream_completion(request("హలో"))
            .await,
    );
    assert!(matches!(err, Error::Http(_)));
}

#[tokio::test]
async fn test_elevenlabs_returns_mp3() {
    let audio = vec![0xFF, 0xFB, 0x90, 0x00, 0x01];
    let (base, log) = mock_server(StatusCode::OK, "audio/mpeg", audio.clone()).await;

    let synth = ElevenLabsSynthesizer::new(
        reqwest::Client::new(),
        SecretString::from("xi-key".to_string()),
        "voice-1",
    )
    .unwrap()
    .with_base_url(&base);

    let result = synth.synthesize("నమస్కారం").await.unwrap();
    assert_eq!(result.bytes, audio);
    assert_eq!(result.format, AudioFormat::Mp3);

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.uri.path(), "/text-to-speech/voice-1/stream");
    assert_eq!(seen.header("xi-api-key"), Some("xi-key"));

    let json = seen.json();
    assert_eq!(json["text"], "నమస్కారం");
    assert_eq!(json["model_id"], "eleven_multilingual_v2");
    assert_eq!(json["voice_settings"]["use_speaker_boost"], true);
    let stability = json["voice_settings"]["stability"].as_f64().unwrap();
    assert!((stability - 0.78).abs() < 1e-6);
}

#[tokio::test]
async fn test_elevenlabs_rejection() {
    let (base, _) = mock_server(StatusCode::UNAUTHORIZED, "application/json", b"{}".to_vec()).await;

    let synth = ElevenLabsSynthesizer::new(
        reqwest::Client::new(),
        SecretString::from("bad-key".to_string()),
        "voice-1",
    )
    .unwrap()
    .with_base_url(&base);

    let err = expect_err(synth.synthesize("హలో").await);
    assert_eq!(err.upstream_status(), Some(401));
}

#[tokio::test]
async fn test_elevenlabs_empty_audio_is_error() {
    let (base, _) = mock_server(StatusCode::OK, "audio/mpeg", Vec::new()).await;

    let synth = ElevenLabsSynthesizer::new(
        reqwest::Client::new(),
        SecretString::from("xi-key".to_string()),
        "voice-1",
    )
    .unwrap()
    .with_base_url(&base);

    assert!(matches!(expect_err(synth.synthesize("హలో").await), Error::Tts(_)));
}

#[tokio::test]
async fn test_whisper_transcribes_with_language_hint() {
    let (base, log) = mock_server(
        StatusCode::OK,
        "application/json",
        r#"{"text":"నాకు తలనొప్పిగా ఉంది"}"#.as_bytes().to_vec(),
    )
    .await;

    let stt = SpeechToText::new_whisper(
        reqwest::Client::new(),
        SecretString::from("openai-key".to_string()),
        "whisper-1",
    )
    .unwrap()
    .with_language("te")
    .with_base_url(&base);

    let wav = laasya_assistant::voice::samples_to_wav(&[0.0; 160], 16000).unwrap();
    let text = stt.transcribe(&wav).await.unwrap();
    assert_eq!(text, "నాకు తలనొప్పిగా ఉంది");

    let seen = log.lock().unwrap()[0].clone();
    assert_eq!(seen.uri.path(), "/audio/transcriptions");
    assert_eq!(seen.header("authorization"), Some("Bearer openai-key"));

    let form = String::from_utf8_lossy(&seen.body);
    assert!(form.contains(r#"name="model""#));
    assert!(form.contains("whisper-1"));
    assert!(form.contains(r#"name="language""#));
    assert!(form.contains(r#"filename="audio.wav""#));
}

#[tokio::test]
async fn test_whisper_rejection() {
    let (base, _) = mock_server(StatusCode::BAD_REQUEST, "application/json", b"{}".to_vec()).await;

    let stt = SpeechToText::new_whisper(
        reqwest::Client::new(),
        SecretString::from("openai-key".to_string()),
        "whisper-1",
    )
    .unwrap()
    .with_base_url(&base);

    let err = expect_err(stt.transcribe(b"RIFF").await);
    assert_eq!(err.upstream_status(), Some(400));
}
