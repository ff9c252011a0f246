//! Content-Type to audio file extension mapping.

/// Maps a declared audio content type to a file extension.
///
/// Returns `None` for anything the archive does not recognize; ingestion
/// treats that as a hard input error rather than guessing.
pub fn audio_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let extension = match essence.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/ogg" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/webm" => "weba",
        "audio/amr" => "amr",
        "audio/3gpp" => "3gp",
        _ => return None,
    };
    Some(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_common_audio_types() {
        assert_eq!(audio_extension("audio/x-wav"), Some("wav"));
        assert_eq!(audio_extension("audio/wav"), Some("wav"));
        assert_eq!(audio_extension("audio/mpeg"), Some("mp3"));
        assert_eq!(audio_extension("audio/mp4"), Some("m4a"));
    }

    #[test]
    fn strips_parameters_and_case() {
        assert_eq!(audio_extension("Audio/OGG; codecs=opus"), Some("ogg"));
        assert_eq!(audio_extension("audio/wav ; charset=binary"), Some("wav"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert_eq!(audio_extension("audio/gibberishhs"), None);
        assert_eq!(audio_extension("image/png"), None);
        assert_eq!(audio_extension(""), None);
    }
}
