//! Splitting a chat model reply into the visible answer and the history
//! note that is persisted with the conversation.

/// The reply did not contain the expected separator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model reply does not contain the separator {separator:?}")]
pub struct FormatError {
    pub separator: String,
}

/// A chat reply after the separator convention has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    /// Returned to the caller.
    pub visible_answer: String,
    /// Stored as the `system` turn of the conversation.
    pub history_note: String,
}

/// Split `reply` at the first occurrence of `separator`.
///
/// Both halves are trimmed. An empty separator never matches.
pub fn split_reply(reply: &str, separator: &str) -> Result<GeneratedReply, FormatError> {
    if separator.is_empty() {
        return Err(FormatError {
            separator: String::new(),
        });
    }
    match reply.split_once(separator) {
        Some((visible, history)) => Ok(GeneratedReply {
            visible_answer: visible.trim().to_string(),
            history_note: history.trim().to_string(),
        }),
        None => Err(FormatError {
            separator: separator.to_string(),
        }),
    }
}

/// Like [`split_reply`], but a reply without the separator is used whole
/// for both halves.
pub fn split_reply_lenient(reply: &str, separator: &str) -> GeneratedReply {
    split_reply(reply, separator).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "using the whole reply as answer and history");
        let whole = reply.trim().to_string();
        GeneratedReply {
            visible_answer: whole.clone(),
            history_note: whole,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_trimmed_halves() {
        let cases = [
            ("Answer text.", "Summary."),
            ("  padded answer \n", "\n padded note  "),
            ("", "only history"),
            ("only answer", ""),
            ("multi\nline\nanswer", "multi\nline note"),
        ];
        for (a, b) in cases {
            let reply = format!("{a}<<<HISTORY>>>{b}");
            let parts = split_reply(&reply, "<<<HISTORY>>>").unwrap();
            assert_eq!(parts.visible_answer, a.trim());
            assert_eq!(parts.history_note, b.trim());
        }
    }

    #[test]
    fn splits_at_first_occurrence() {
        let parts = split_reply("a ## b ## c", "##").unwrap();
        assert_eq!(parts.visible_answer, "a");
        assert_eq!(parts.history_note, "b ## c");
    }

    #[test]
    fn missing_separator_is_format_error() {
        let err = split_reply("no separator here", "<<<HISTORY>>>").unwrap_err();
        assert_eq!(err.separator, "<<<HISTORY>>>");
    }

    #[test]
    fn empty_separator_is_format_error() {
        assert!(split_reply("anything", "").is_err());
    }

    #[test]
    fn lenient_uses_whole_reply() {
        let parts = split_reply_lenient("  just an answer ", "<<<HISTORY>>>");
        assert_eq!(parts.visible_answer, "just an answer");
        assert_eq!(parts.history_note, "just an answer");
    }
}
