//! Client for an OpenAI-compatible speech endpoint (Kokoro-FastAPI by default).

use serde::Serialize;
use serde_json::Value;

use crate::config::ReaderConfig;
use crate::error::ReadAloudError;

const MAX_AUDIO_BYTES: u64 = 256 * 1024 * 1024;
const MAX_ERROR_BYTES: u64 = 200_000;
const SNIPPET_CHARS: usize = 300;

/// Turns text into encoded audio bytes.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, ReadAloudError>;

    /// Container/codec of the returned bytes; used as the decoder hint.
    fn format(&self) -> &str;
}

#[derive(Debug, Serialize, PartialEq)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

pub struct SpeechClient {
    agent: ureq::Agent,
    url: String,
    voice: String,
    response_format: String,
    speed: f32,
}

impl SpeechClient {
    pub fn new(config: &ReaderConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.request_timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            url: config.api_url.clone(),
            voice: config.voice.clone(),
            response_format: config.response_format.clone(),
            speed: config.speed,
        }
    }
}

impl SpeechSynthesizer for SpeechClient {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, ReadAloudError> {
        let request = SpeechRequest {
            input: text,
            voice: &self.voice,
            response_format: &self.response_format,
            speed: self.speed,
        };
        tracing::debug!(url = %self.url, voice = %self.voice, chars = text.chars().count(), "speech request");

        let resp = self
            .agent
            .post(&self.url)
            .send_json(&request)
            .map_err(|e| ReadAloudError::RequestFailed(format!("{}: {e}", self.url)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .into_body()
                .with_config()
                .limit(MAX_ERROR_BYTES)
                .read_to_string()
                .unwrap_or_default();
            let message = error_message(&body, &status.to_string());
            tracing::warn!(status = status.as_u16(), %message, "speech request rejected");
            return Err(ReadAloudError::RequestFailed(message));
        }

        let audio = resp
            .into_body()
            .with_config()
            .limit(MAX_AUDIO_BYTES)
            .read_to_vec()
            .map_err(|e| ReadAloudError::RequestFailed(format!("read audio body: {e}")))?;
        tracing::debug!(bytes = audio.len(), "speech audio received");
        Ok(audio)
    }

    fn format(&self) -> &str {
        &self.response_format
    }
}

/// Human-readable reason from a failed response body.
///
/// Accepts `{"message": ..}`, `{"detail": {"message": ..}}` and `{"detail": ".."}`;
/// otherwise a snippet of the raw body, or `status` when the body is empty.
fn error_message(body: &str, status: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let found = json
            .get("message")
            .or_else(|| json.get("detail").and_then(|d| d.get("message")))
            .or_else(|| json.get("detail"))
            .and_then(Value::as_str);
        if let Some(message) = found {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.to_string();
    }
    let snippet: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    if trimmed.chars().count() > SNIPPET_CHARS {
        format!("{status}: {snippet}...")
    } else {
        format!("{status}: {snippet}")
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::cli::Args;
    use crate::config::FileConfig;

    #[test]
    fn message_from_top_level_field() {
        assert_eq!(
            error_message(r#"{"message":"voice not found"}"#, "400 Bad Request"),
            "voice not found"
        );
    }

    #[test]
    fn message_nested_under_detail() {
        let body = r#"{"detail":{"error":"validation_error","message":"Invalid voice 'zz'"}}"#;
        assert_eq!(error_message(body, "400 Bad Request"), "Invalid voice 'zz'");
    }

    #[test]
    fn message_as_plain_detail() {
        assert_eq!(error_message(r#"{"detail":"Not Found"}"#, "404"), "Not Found");
    }

    #[test]
    fn falls_back_to_status() {
        assert_eq!(error_message("", "502 Bad Gateway"), "502 Bad Gateway");
        assert_eq!(
            error_message("upstream down", "502 Bad Gateway"),
            "502 Bad Gateway: upstream down"
        );
    }

    #[test]
    fn request_body_shape() {
        let req = SpeechRequest {
            input: "hello",
            voice: "af_sky+af_bella",
            response_format: "mp3",
            speed: 1.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "input": "hello",
                "voice": "af_sky+af_bella",
                "response_format": "mp3",
                "speed": 1.0
            })
        );
    }

    /// Serve one HTTP request with `status` and `body`, returning the request body.
    fn serve_once(status: &'static str, body: &'static [u8]) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/audio/speech", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(body).unwrap();
            stream.flush().unwrap();
            String::from_utf8(request_body).unwrap()
        });
        (url, handle)
    }

    fn client_for(url: String) -> SpeechClient {
        let args = Args {
            api_url: Some(url),
            request_timeout_ms: Some(5_000),
            ..Args::default()
        };
        SpeechClient::new(&ReaderConfig::resolve(&args, FileConfig::default()).unwrap())
    }

    #[test]
    fn returns_audio_bytes_on_success() {
        let (url, server) = serve_once("200 OK", b"ID3fakeaudio");
        let client = client_for(url);

        let audio = client.synthesize("Hello there").unwrap();

        assert_eq!(audio, b"ID3fakeaudio");
        let sent: Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(sent["input"], "Hello there");
        assert_eq!(sent["voice"], "af_sky+af_bella");
        assert_eq!(sent["response_format"], "mp3");
        assert_eq!(client.format(), "mp3");
    }

    #[test]
    fn error_status_becomes_request_failed() {
        let (url, server) = serve_once(
            "400 Bad Request",
            br#"{"detail":{"message":"Invalid voice"}}"#,
        );
        let client = client_for(url);

        let err = client.synthesize("Hello").unwrap_err();

        assert_eq!(err, ReadAloudError::RequestFailed("Invalid voice".to_string()));
        server.join().unwrap();
    }

    #[test]
    fn unreachable_server_is_request_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/audio/speech", listener.local_addr().unwrap());
        drop(listener);
        thread::sleep(Duration::from_millis(10));

        let err = client_for(url).synthesize("Hello").unwrap_err();
        assert!(matches!(err, ReadAloudError::RequestFailed(_)));
    }
}
