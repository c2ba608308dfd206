//! One-shot greeting synthesis.
//!
//! Before the main session connects, the character greets the player by name
//! through a plain request/response speech call. Failure here is explicitly
//! non-fatal; the orchestrator logs it and proceeds straight to connecting.

use crate::error::{SessionError, SessionResult};
use tracing::info;

const DEFAULT_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Build the greeting line spoken before the session opens.
pub fn greeting_text(player_name: &str) -> String {
    format!("Hi {}! I'm so excited to talk with you. Let's chat!", player_name)
}

/// Synthesize one utterance and return the raw PCM16 payload.
pub async fn synthesize_greeting(
    api_key: &str,
    voice: &str,
    text: &str,
) -> SessionResult<Vec<u8>> {
    let url =
        std::env::var("COMPANION_SPEECH_URL").unwrap_or_else(|_| DEFAULT_SPEECH_URL.to_string());
    let body = serde_json::json!({
        "model": "tts-1",
        "input": text,
        "voice": voice,
        "response_format": "pcm",
    });

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| SessionError::Connection(e.to_string()))?;
    let res = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| SessionError::Connection(e.to_string()))?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(SessionError::Connection(format!(
            "speech API error {}: {}",
            status, body
        )));
    }

    let bytes = res
        .bytes()
        .await
        .map_err(|e| SessionError::Connection(e.to_string()))?;
    info!("Greeting synthesized: {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_addresses_the_player_by_name() {
        let text = greeting_text("Alex");
        assert!(text.contains("Alex"));
    }
}
