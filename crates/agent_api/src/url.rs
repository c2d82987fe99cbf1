/// Default base URL for a locally hosted agent backend.
pub const DEFAULT_AGENT_BASE_URL: &str = "http://127.0.0.1:4096";

/// Normalize a base URL: trim whitespace, apply the default when empty, and
/// strip trailing slashes so path joins stay deterministic.
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_AGENT_BASE_URL
    } else {
        input.trim()
    };

    base.trim_end_matches('/').to_string()
}

/// Streaming chat endpoint for one session.
pub fn chat_url(base_url: &str, session_id: &str) -> String {
    format!("{}/chat/{session_id}", normalize_base_url(base_url))
}

/// Best-effort retry endpoint for one session.
pub fn retry_url(base_url: &str, session_id: &str) -> String {
    format!("{}/sessions/{session_id}/retry", normalize_base_url(base_url))
}

/// Best-effort stop endpoint for one session. The exact route is not
/// load-bearing; local state never waits on the response.
pub fn stop_url(base_url: &str, session_id: &str) -> String {
    format!("{}/sessions/{session_id}/stop", normalize_base_url(base_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_falls_back_to_default() {
        assert_eq!(normalize_base_url("   "), DEFAULT_AGENT_BASE_URL);
    }

    #[test]
    fn trailing_slashes_are_stripped_before_joining() {
        assert_eq!(
            chat_url("https://agent.example.com/api/", "s-42"),
            "https://agent.example.com/api/chat/s-42"
        );
        assert_eq!(
            retry_url("https://agent.example.com", "s-42"),
            "https://agent.example.com/sessions/s-42/retry"
        );
        assert_eq!(
            stop_url("https://agent.example.com", "s-42"),
            "https://agent.example.com/sessions/s-42/stop"
        );
    }
}
