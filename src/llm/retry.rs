//! Error classification for single-pass provider fallbacks.
//!
//! Providers report a rejected source image or voice only through free-text
//! error messages, so the adapters decide whether to try the next candidate
//! by matching on the rendered error. All of that matching lives here.

use crate::Error;

/// Returns true when a provider rejected the `image` request parameter.
///
/// Image generation moves on to the next source-image encoding when this
/// matches; any other failure aborts the attempt.
#[must_use]
pub fn is_invalid_image_param_error(err: &Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("invalid url specified")
        || message.contains("parameter `image`")
        || message.contains("parameter \"image\"")
}

/// Returns true when a provider rejected the requested voice.
#[must_use]
pub fn is_invalid_voice_error(err: &Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("voice")
        && ["invalid", "illegal", "not found"]
            .iter()
            .any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn upstream(cause: &str) -> Error {
        Error::UpstreamRequestFailed {
            operation: "generate_image".to_string(),
            status: Some(400),
            cause: cause.to_string(),
        }
    }

    #[test_case("Invalid URL specified for image" ; "invalid url")]
    #[test_case("The parameter `image` is malformed" ; "backticked param")]
    #[test_case(r#"parameter "image" must be a url"# ; "quoted param")]
    fn test_invalid_image_param_matches(cause: &str) {
        assert!(is_invalid_image_param_error(&upstream(cause)));
    }

    #[test]
    fn test_invalid_image_param_ignores_other_failures() {
        assert!(!is_invalid_image_param_error(&upstream("quota exceeded")));
        assert!(!is_invalid_image_param_error(&Error::InvalidResponse(
            "no image in response".to_string()
        )));
    }

    #[test_case("voice Serena is invalid", true)]
    #[test_case("Illegal voice parameter", true)]
    #[test_case("voice not found: Luna", true)]
    #[test_case("voice synthesis timed out", false)]
    #[test_case("model not found", false)]
    fn test_invalid_voice(cause: &str, expected: bool) {
        assert_eq!(is_invalid_voice_error(&upstream(cause)), expected);
    }
}
