use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a decoded media attachment, applied on send and receive.
pub const MAX_MEDIA_BYTES: usize = 5 * 1024 * 1024;
/// Largest base64 body a `MAX_MEDIA_BYTES` attachment can produce.
pub const MAX_MEDIA_ENCODED_BYTES: usize = MAX_MEDIA_BYTES.div_ceil(3) * 4;
/// Largest text frame either side should accept.
pub const MAX_FRAME_BYTES: usize = MAX_MEDIA_ENCODED_BYTES + 64 * 1024;
pub const MAX_FILE_NAME_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 64;

const FALLBACK_FILE_NAME: &str = "unnamed";

/// Allowed attachment types, keyed by lower-case file extension.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("svg", "image/svg+xml"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
];

/// Frames the client sends. Serialized as `{"action": "<name>", ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    SetName {
        name: String,
    },
    SendPublic {
        message: String,
    },
    SendPrivate {
        message: String,
        to: String,
    },
    SendMedia {
        data: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },
}

impl ClientAction {
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::SetName { .. } => "setName",
            ClientAction::SendPublic { .. } => "sendPublic",
            ClientAction::SendPrivate { .. } => "sendPrivate",
            ClientAction::SendMedia { .. } => "sendMedia",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPayload {
    #[serde(rename = "media")]
    pub data: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Frames the server sends. Exactly one recognized field per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Members(Vec<String>),
    Public(String),
    Private(String),
    System(String),
    Media(MediaPayload),
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Members(_) => "members",
            ServerFrame::Public(_) => "publicMessage",
            ServerFrame::Private(_) => "privateMessage",
            ServerFrame::System(_) => "systemMessage",
            ServerFrame::Media(_) => "media",
        }
    }
}

// Flat view of every field a server frame may carry. `ServerFrame` is built
// from it only when exactly one shape is present.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    members: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
}

impl From<&ServerFrame> for RawServerFrame {
    fn from(frame: &ServerFrame) -> Self {
        let mut raw = RawServerFrame::default();
        match frame {
            ServerFrame::Members(members) => raw.members = Some(members.clone()),
            ServerFrame::Public(text) => raw.public_message = Some(text.clone()),
            ServerFrame::Private(text) => raw.private_message = Some(text.clone()),
            ServerFrame::System(text) => raw.system_message = Some(text.clone()),
            ServerFrame::Media(payload) => {
                raw.media = Some(payload.data.clone());
                raw.file_name = Some(payload.file_name.clone());
            }
        }
        raw
    }
}

/// A validated, decoded media attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMedia {
    pub file_name: String,
    pub media_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("frame carries none of the recognized fields")]
    UnrecognizedFrame,
    #[error("frame carries more than one recognized field: {0}")]
    AmbiguousFrame(String),
    #[error("private message needs a recipient")]
    MissingRecipient,
    #[error("media attachment is empty")]
    EmptyMedia,
    #[error("media attachment is {size} bytes (max {max})")]
    MediaTooLarge { size: usize, max: usize },
    #[error("unsupported media type for {0}")]
    UnsupportedMediaType(String),
    #[error("invalid media encoding: {0}")]
    InvalidMediaEncoding(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Whether a message or name has anything besides whitespace.
pub fn has_content(text: &str) -> bool {
    !text.trim().is_empty()
}

pub fn encode_action(action: &ClientAction) -> Result<String, CoreError> {
    serde_json::to_string(action).map_err(|err| CoreError::Serialization(err.to_string()))
}

pub fn decode_action(text: &str) -> Result<ClientAction, CoreError> {
    serde_json::from_str(text).map_err(|err| CoreError::MalformedFrame(err.to_string()))
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, CoreError> {
    serde_json::to_string(&RawServerFrame::from(frame))
        .map_err(|err| CoreError::Serialization(err.to_string()))
}

/// Decode one incoming text frame.
///
/// The frame must be a JSON object carrying exactly one of `members`,
/// `publicMessage`, `privateMessage`, `systemMessage` or `media` (with its
/// `fileName`). Extra unknown fields are ignored; `null` counts as absent.
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, CoreError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| CoreError::MalformedFrame(err.to_string()))?;
    if !value.is_object() {
        return Err(CoreError::MalformedFrame(
            "frame is not a JSON object".to_owned(),
        ));
    }

    let raw: RawServerFrame = serde_json::from_value(value)
        .map_err(|err| CoreError::MalformedFrame(err.to_string()))?;

    let mut found = Vec::with_capacity(1);
    if let Some(members) = raw.members {
        found.push(ServerFrame::Members(members));
    }
    if let Some(text) = raw.public_message {
        found.push(ServerFrame::Public(text));
    }
    if let Some(text) = raw.private_message {
        found.push(ServerFrame::Private(text));
    }
    if let Some(text) = raw.system_message {
        found.push(ServerFrame::System(text));
    }
    match (raw.media, raw.file_name) {
        (Some(data), Some(file_name)) => {
            found.push(ServerFrame::Media(MediaPayload { data, file_name }));
        }
        (Some(_), None) => {
            return Err(CoreError::MalformedFrame(
                "media frame without fileName".to_owned(),
            ));
        }
        (None, _) => {}
    }

    if found.len() > 1 {
        let kinds = found
            .iter()
            .map(ServerFrame::kind)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(CoreError::AmbiguousFrame(kinds));
    }
    found.pop().ok_or(CoreError::UnrecognizedFrame)
}

pub fn media_type_for(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    MEDIA_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, media_type)| *media_type)
}

/// Check an attachment against the size cap and the content-type allowlist.
pub fn validate_media(file_name: &str, size: usize) -> Result<&'static str, CoreError> {
    if size == 0 {
        return Err(CoreError::EmptyMedia);
    }
    if size > MAX_MEDIA_BYTES {
        return Err(CoreError::MediaTooLarge {
            size,
            max: MAX_MEDIA_BYTES,
        });
    }
    media_type_for(file_name).ok_or_else(|| CoreError::UnsupportedMediaType(file_name.to_owned()))
}

/// Build a `sendMedia` action from raw file contents.
pub fn encode_media(file_name: &str, bytes: &[u8]) -> Result<ClientAction, CoreError> {
    let file_name = sanitize_file_name(file_name);
    validate_media(&file_name, bytes.len())?;
    Ok(ClientAction::SendMedia {
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
        file_name,
    })
}

/// Validate and decode an incoming (or relayed) media payload.
///
/// Browser peers may send a full data URL; the `data:<type>;base64,` prefix
/// is stripped before decoding.
pub fn decode_media(data: &str, file_name: &str) -> Result<DecodedMedia, CoreError> {
    let body = strip_data_url_prefix(data);
    if body.len() > MAX_MEDIA_ENCODED_BYTES {
        return Err(CoreError::MediaTooLarge {
            size: body.len() / 4 * 3,
            max: MAX_MEDIA_BYTES,
        });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|err| CoreError::InvalidMediaEncoding(err.to_string()))?;
    let file_name = sanitize_file_name(file_name);
    let media_type = validate_media(&file_name, bytes.len())?;
    Ok(DecodedMedia {
        file_name,
        media_type,
        bytes,
    })
}

fn strip_data_url_prefix(data: &str) -> &str {
    if !data.starts_with("data:") {
        return data;
    }
    match data.split_once(";base64,") {
        Some((_, body)) => body,
        None => data,
    }
}

/// Reduce an untrusted file name to a single safe path component.
pub fn sanitize_file_name(name: &str) -> String {
    let trimmed = name.trim();
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars().take(MAX_FILE_NAME_LEN) {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_control() {
            out.push('_');
        } else {
            out.push(ch);
        }
    }

    if out.chars().all(|ch| ch == '.') {
        return FALLBACK_FILE_NAME.to_owned();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_to_wire_shape() {
        let set_name = encode_action(&ClientAction::SetName {
            name: "alice".to_owned(),
        })
        .unwrap();
        assert_eq!(set_name, r#"{"action":"setName","name":"alice"}"#);

        let private = encode_action(&ClientAction::SendPrivate {
            message: "psst".to_owned(),
            to: "bob".to_owned(),
        })
        .unwrap();
        assert_eq!(
            private,
            r#"{"action":"sendPrivate","message":"psst","to":"bob"}"#
        );

        let media = encode_action(&ClientAction::SendMedia {
            data: "aGk=".to_owned(),
            file_name: "hi.txt".to_owned(),
        })
        .unwrap();
        assert_eq!(
            media,
            r#"{"action":"sendMedia","data":"aGk=","fileName":"hi.txt"}"#
        );
    }

    #[test]
    fn decodes_each_frame_shape() {
        assert_eq!(
            decode_server_frame(r#"{"members":["alice","bob"]}"#).unwrap(),
            ServerFrame::Members(vec!["alice".to_owned(), "bob".to_owned()])
        );
        assert_eq!(
            decode_server_frame(r#"{"publicMessage":"hi"}"#).unwrap(),
            ServerFrame::Public("hi".to_owned())
        );
        assert_eq!(
            decode_server_frame(r#"{"privateMessage":"psst"}"#).unwrap(),
            ServerFrame::Private("psst".to_owned())
        );
        assert_eq!(
            decode_server_frame(r#"{"systemMessage":"bob has joined the chat"}"#).unwrap(),
            ServerFrame::System("bob has joined the chat".to_owned())
        );
        assert_eq!(
            decode_server_frame(r#"{"media":"aGk=","fileName":"hi.txt"}"#).unwrap(),
            ServerFrame::Media(MediaPayload {
                data: "aGk=".to_owned(),
                file_name: "hi.txt".to_owned(),
            })
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let frame = decode_server_frame(r#"{"publicMessage":"hi","requestId":"abc"}"#).unwrap();
        assert_eq!(frame, ServerFrame::Public("hi".to_owned()));
    }

    #[test]
    fn frame_without_recognized_fields_is_unrecognized() {
        let err = decode_server_frame(r#"{"hello":"world"}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnrecognizedFrame));

        let err = decode_server_frame(r#"{"members":null}"#).unwrap_err();
        assert!(matches!(err, CoreError::UnrecognizedFrame));
    }

    #[test]
    fn frame_with_two_shapes_is_ambiguous() {
        let err = decode_server_frame(r#"{"publicMessage":"a","systemMessage":"b"}"#).unwrap_err();
        match err {
            CoreError::AmbiguousFrame(kinds) => {
                assert_eq!(kinds, "publicMessage, systemMessage");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_frames_are_rejected() {
        for text in [
            "not json",
            r#"["publicMessage"]"#,
            r#"{"members":"alice"}"#,
            r#"{"publicMessage":42}"#,
            r#"{"media":"aGk="}"#,
        ] {
            let err = decode_server_frame(text).unwrap_err();
            assert!(
                matches!(err, CoreError::MalformedFrame(_)),
                "{text} gave {err}"
            );
        }
    }

    #[test]
    fn server_frames_encode_to_single_field_objects() {
        let text = encode_server_frame(&ServerFrame::Members(vec!["alice".to_owned()])).unwrap();
        assert_eq!(text, r#"{"members":["alice"]}"#);

        let text = encode_server_frame(&ServerFrame::Media(MediaPayload {
            data: "aGk=".to_owned(),
            file_name: "hi.txt".to_owned(),
        }))
        .unwrap();
        assert_eq!(text, r#"{"media":"aGk=","fileName":"hi.txt"}"#);
    }

    #[test]
    fn decode_action_reads_browser_frames() {
        let action = decode_action(r#"{"action":"sendPublic","message":"hello"}"#).unwrap();
        assert_eq!(
            action,
            ClientAction::SendPublic {
                message: "hello".to_owned()
            }
        );
        assert!(decode_action(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn media_validation_enforces_size_and_type() {
        assert_eq!(validate_media("cat.PNG", 10).unwrap(), "image/png");
        assert!(matches!(
            validate_media("cat.png", 0),
            Err(CoreError::EmptyMedia)
        ));
        assert!(matches!(
            validate_media("cat.png", MAX_MEDIA_BYTES + 1),
            Err(CoreError::MediaTooLarge { .. })
        ));
        assert!(matches!(
            validate_media("setup.exe", 10),
            Err(CoreError::UnsupportedMediaType(_))
        ));
        assert!(matches!(
            validate_media("README", 10),
            Err(CoreError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn media_encoding_survives_the_wire() {
        let action = encode_media("notes.txt", b"hello media").unwrap();
        let ClientAction::SendMedia { data, file_name } = action else {
            panic!("expected sendMedia");
        };
        assert_eq!(file_name, "notes.txt");

        let decoded = decode_media(&data, &file_name).unwrap();
        assert_eq!(decoded.bytes, b"hello media");
        assert_eq!(decoded.media_type, "text/plain");
    }

    #[test]
    fn decode_media_accepts_data_urls() {
        let decoded = decode_media("data:text/plain;base64,aGk=", "hi.txt").unwrap();
        assert_eq!(decoded.bytes, b"hi");
    }

    #[test]
    fn decode_media_rejects_bad_base64() {
        let err = decode_media("***", "hi.txt").unwrap_err();
        assert!(matches!(err, CoreError::InvalidMediaEncoding(_)));
    }

    #[test]
    fn sanitize_file_name_blocks_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("a\u{0}b.png"), "a_b.png");

        let long = "é".repeat(MAX_FILE_NAME_LEN * 2);
        assert_eq!(sanitize_file_name(&long).chars().count(), MAX_FILE_NAME_LEN);
    }
}
