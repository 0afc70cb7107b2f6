use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::{SubtitleError, SubtitleResult};

/// Status code the subtitle service embeds when it failed server side.
const REMOTE_FAILURE_CODE: &str = "500";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleRecord {
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub lang_desc: String,
    #[serde(default)]
    pub content: String,
}

/// Subtitle tracks extracted for one video page.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub vid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub host: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub host_alias: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(rename = "subtitleItemVoList", default, deserialize_with = "null_as_empty")]
    pub subtitles: Vec<SubtitleRecord>,
}

impl SubtitleInfo {
    pub fn has_subtitles(&self) -> bool {
        !self.subtitles.is_empty()
    }
}

/// Parses the blob read from the subtitle page.
///
/// A blob carrying `code: 500` (number or string) is the service's failure
/// envelope, e.g. `{"code":500,"message":"...","data":null}`.
pub fn parse_payload(raw: &str) -> SubtitleResult<SubtitleInfo> {
    let value: Value = serde_json::from_str(raw)?;
    if let Some(code) = value.get("code").and_then(scalar_to_string) {
        if code == REMOTE_FAILURE_CODE {
            return Err(SubtitleError::RemoteService { code });
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// True for blobs that carry nothing, as returned before the page state is
/// populated.
pub(crate) fn is_blank_payload(raw: &str) -> bool {
    matches!(raw.trim(), "" | "null" | "undefined")
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string).unwrap_or_default())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SubtitleRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<SubtitleRecord>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{
        "vid": "BV1JcCUYSEEL",
        "host": "bilibili",
        "hostAlias": "哔哩哔哩",
        "title": "复古小卧室",
        "status": 1,
        "subtitleItemVoList": [
            {"lang": "zh-CN", "langDesc": "中文（中国）", "content": "1\n00:00:01,000 --> 00:00:02,000\n你好\n"},
            {"lang": "ai-zh", "langDesc": "中文（自动生成）", "content": ""}
        ]
    }"#;

    #[test]
    fn parses_service_payload() {
        let info = parse_payload(PAYLOAD).unwrap();
        assert_eq!(info.vid, "BV1JcCUYSEEL");
        assert_eq!(info.host_alias, "哔哩哔哩");
        assert_eq!(info.status, "1");
        assert_eq!(info.subtitles.len(), 2);
        assert_eq!(info.subtitles[0].lang_desc, "中文（中国）");
        assert!(info.has_subtitles());
    }

    #[test]
    fn code_500_is_a_remote_failure() {
        for raw in [
            r#"{"code":500,"message":"未知错误，请确保链接正确！","data":null}"#,
            r#"{"code":"500","data":null}"#,
        ] {
            let err = parse_payload(raw).unwrap_err();
            assert!(matches!(err, SubtitleError::RemoteService { ref code } if code == "500"));
        }
    }

    #[test]
    fn other_codes_parse_normally() {
        let info = parse_payload(r#"{"code":200,"title":"t","subtitleItemVoList":null}"#).unwrap();
        assert_eq!(info.title, "t");
        assert!(!info.has_subtitles());
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(
            parse_payload("{oops").unwrap_err(),
            SubtitleError::Parse(_)
        ));
    }

    #[test]
    fn blank_payloads() {
        assert!(is_blank_payload(""));
        assert!(is_blank_payload(" null "));
        assert!(is_blank_payload("undefined"));
        assert!(!is_blank_payload("{}"));
    }
}
