// Provider result parsing
//
// Normalizes the raw recognition output of the provider into ordered
// segments. The provider answers with a JSON array of sentence objects, a
// single object, or plain text when recognition produced a bare transcript.

use serde_json::{Map, Value};
use std::fmt::Write;
use thiserror::Error;

use crate::models::Segment;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Provider produced no output at all
    #[error("Provider returned an empty result")]
    Empty,
}

/// Parse raw provider output into segments
pub fn parse_raw_result(raw: &str) -> Result<Vec<Segment>, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items
            .iter()
            .filter_map(Value::as_object)
            .map(parse_segment)
            .collect()),
        Ok(Value::Object(object)) => Ok(vec![parse_segment(&object)]),
        // A JSON string may wrap the real payload
        Ok(Value::String(inner)) if inner.trim() != raw => parse_raw_result(&inner),
        Ok(_) => Ok(Vec::new()),
        Err(_) => Ok(vec![Segment {
            text: raw.to_string(),
            ..Default::default()
        }]),
    }
}

fn parse_segment(segment: &Map<String, Value>) -> Segment {
    let text = non_empty_str(segment.get("FinalSentence"))
        .or_else(|| non_empty_str(segment.get("Text")))
        .unwrap_or_default();

    let speaker_id = segment
        .get("SpeechSegment")
        .and_then(Value::as_object)
        .and_then(|s| s.get("SpeakerId"))
        .and_then(Value::as_i64);

    let emotion_info = segment.get("EmotionInfo").and_then(Value::as_object);
    let emotion = emotion_info
        .and_then(|e| non_empty_str(e.get("EmotionType")));
    let emotion_score = emotion_info
        .and_then(|e| e.get("EmotionScore"))
        .and_then(Value::as_f64);

    Segment {
        text,
        start_time: seconds(segment, "StartMs", "StartTime"),
        end_time: seconds(segment, "EndMs", "EndTime"),
        speaker_id,
        emotion,
        emotion_score,
    }
}

/// Millisecond field wins when present and non-zero, else the seconds field
fn seconds(segment: &Map<String, Value>, ms_key: &str, secs_key: &str) -> f64 {
    match segment.get(ms_key).and_then(Value::as_f64) {
        Some(ms) if ms != 0.0 => ms / 1000.0,
        _ => segment
            .get(secs_key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Render segments as a human readable report
pub fn format_report(segments: &[Segment]) -> String {
    let separator = "-".repeat(50);
    let mut out = String::new();
    let _ = writeln!(out, "Transcription summary:");
    let _ = writeln!(out, "{}", separator);
    for segment in segments {
        let _ = writeln!(
            out,
            "Time: {:.2}s - {:.2}s",
            segment.start_time, segment.end_time
        );
        if let Some(speaker) = segment.speaker_id {
            let _ = writeln!(out, "Speaker: {}", speaker);
        }
        if let Some(emotion) = &segment.emotion {
            let _ = writeln!(
                out,
                "Emotion: {} (confidence: {:.2})",
                emotion,
                segment.emotion_score.unwrap_or(0.0)
            );
        }
        let _ = writeln!(out, "Content: {}", segment.text);
        let _ = writeln!(out, "{}", separator);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_sentence_list() {
        let raw = r#"[
            {"FinalSentence": "你好", "StartMs": 1500, "EndMs": 3250,
             "SpeechSegment": {"SpeakerId": 1},
             "EmotionInfo": {"EmotionType": "happy", "EmotionScore": 0.82}},
            {"Text": "second", "StartTime": 3.5, "EndTime": 4.0}
        ]"#;
        let segments = parse_raw_result(raw).unwrap();
        assert_eq!(segments.len(), 2);

        assert_eq!(segments[0].text, "你好");
        assert_eq!(segments[0].start_time, 1.5);
        assert_eq!(segments[0].end_time, 3.25);
        assert_eq!(segments[0].speaker_id, Some(1));
        assert_eq!(segments[0].emotion.as_deref(), Some("happy"));
        assert_eq!(segments[0].emotion_score, Some(0.82));

        assert_eq!(segments[1].text, "second");
        assert_eq!(segments[1].start_time, 3.5);
        assert_eq!(segments[1].speaker_id, None);
        assert_eq!(segments[1].emotion, None);
    }

    #[test]
    fn single_object_becomes_one_segment() {
        let segments = parse_raw_result(r#"{"FinalSentence": "solo"}"#).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "solo");
        assert_eq!(segments[0].end_time, 0.0);
    }

    #[test]
    fn non_object_items_are_skipped() {
        let segments = parse_raw_result(r#"[1, "x", {"Text": "kept"}]"#).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "kept");
    }

    #[test]
    fn plain_text_is_a_single_segment() {
        let segments = parse_raw_result("just words, no json").unwrap();
        assert_eq!(
            segments,
            vec![Segment {
                text: "just words, no json".into(),
                ..Default::default()
            }]
        );
    }

    #[test]
    fn json_string_payload_is_unwrapped() {
        let raw = serde_json::to_string(r#"[{"Text": "inner"}]"#).unwrap();
        let segments = parse_raw_result(&raw).unwrap();
        assert_eq!(segments[0].text, "inner");
    }

    #[test]
    fn empty_output_is_an_error() {
        assert_eq!(parse_raw_result("  \n"), Err(ParseError::Empty));
    }

    #[test]
    fn report_lists_optional_fields_only_when_present() {
        let report = format_report(&[
            Segment {
                text: "hello".into(),
                start_time: 0.0,
                end_time: 1.0,
                speaker_id: Some(2),
                emotion: Some("neutral".into()),
                emotion_score: Some(0.5),
            },
            Segment {
                text: "bye".into(),
                start_time: 1.0,
                end_time: 2.0,
                ..Default::default()
            },
        ]);
        assert!(report.contains("Time: 0.00s - 1.00s"));
        assert!(report.contains("Speaker: 2"));
        assert!(report.contains("Emotion: neutral (confidence: 0.50)"));
        assert_eq!(report.matches("Speaker:").count(), 1);
        assert!(report.contains("Content: bye"));
    }
}
