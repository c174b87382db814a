//! Action metadata decoding.
//!
//! Each action carries an opaque protobuf payload whose schema is keyed by
//! the action type. Known schemas decode into a neutral JSON map so the rest
//! of the system never touches protobuf types. Unknown types and decode
//! failures are non-fatal: the raw bytes are kept and the structured form
//! stays empty.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use prost::Message;
use serde::Serialize;
use serde_json::Value;

pub const ACTION_TYPE_CASCADE: &str = "ACTION_TYPE_CASCADE";
pub const ACTION_TYPE_SENSE: &str = "ACTION_TYPE_SENSE";

const OCTET_STREAM: &str = "application/octet-stream";

/// Metadata attached to a cascade (file storage) action.
#[derive(Clone, PartialEq, Message, Serialize)]
pub struct CascadeMetadata {
    #[prost(string, tag = "1")]
    pub data_hash: String,
    #[prost(string, tag = "2")]
    pub file_name: String,
    #[prost(uint64, tag = "3")]
    pub rq_ids_ic: u64,
    #[prost(uint64, tag = "4")]
    pub rq_ids_max: u64,
    #[prost(string, tag = "5")]
    pub signatures: String,
}

/// Metadata attached to a sense (near-duplicate detection) action.
#[derive(Clone, PartialEq, Message, Serialize)]
pub struct SenseMetadata {
    #[prost(string, tag = "1")]
    pub data_hash: String,
    #[prost(uint64, tag = "2")]
    pub dd_and_fingerprints_ic: u64,
    #[prost(uint64, tag = "3")]
    pub dd_and_fingerprints_max: u64,
    #[prost(string, tag = "4")]
    pub collection_id: String,
    #[prost(string, tag = "5")]
    pub group_id: String,
    #[prost(string, tag = "6")]
    pub signatures: String,
}

/// Decodes a base64 metadata payload according to the action type.
///
/// Returns the raw bytes and, for known types that decode cleanly, a JSON
/// object view of the message. A failed base64 layer yields empty bytes;
/// a failed protobuf or JSON layer yields raw bytes with no structured form.
pub fn decode_action_metadata(action_type: &str, metadata_b64: &str) -> (Vec<u8>, Option<Value>) {
    let raw = match BASE64.decode(metadata_b64) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("metadata base64 decode failed: {e}");
            return (Vec::new(), None);
        }
    };
    let decoded = match action_type {
        ACTION_TYPE_CASCADE => decode_as::<CascadeMetadata>(&raw),
        ACTION_TYPE_SENSE => decode_as::<SenseMetadata>(&raw),
        _ => None,
    };
    (raw, decoded)
}

fn decode_as<M: Message + Serialize + Default>(raw: &[u8]) -> Option<Value> {
    let message = match M::decode(raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("metadata proto decode failed: {e}");
            return None;
        }
    };
    serde_json::to_value(&message).ok()
}

/// Derives a MIME type from the `file_name` field of decoded metadata.
///
/// Cascade metadata names the stored file; everything else falls back to
/// `application/octet-stream`. Charset parameters are stripped.
pub fn mime_type_from_metadata(decoded: Option<&Value>) -> String {
    let file_name = match decoded
        .and_then(|v| v.get("file_name"))
        .and_then(Value::as_str)
    {
        Some(name) if !name.is_empty() => name,
        _ => return OCTET_STREAM.to_owned(),
    };
    match mime_guess::from_path(file_name).first() {
        Some(mime) => mime.essence_str().to_owned(),
        None => OCTET_STREAM.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn cascade_metadata_roundtrip() {
        let meta = CascadeMetadata {
            data_hash: "abc123".to_owned(),
            file_name: "photo.jpg".to_owned(),
            rq_ids_ic: 5,
            rq_ids_max: 50,
            signatures: "sig".to_owned(),
        };
        let b64 = BASE64.encode(meta.encode_to_vec());
        let (raw, decoded) = decode_action_metadata(ACTION_TYPE_CASCADE, &b64);
        assert_eq!(raw, meta.encode_to_vec());
        let decoded = decoded.unwrap();
        assert_eq!(decoded["data_hash"], "abc123");
        assert_eq!(decoded["file_name"], "photo.jpg");
        assert_eq!(decoded["rq_ids_max"], 50);
    }

    #[test]
    fn sense_metadata_decodes() {
        let meta = SenseMetadata {
            data_hash: "def".to_owned(),
            dd_and_fingerprints_ic: 1,
            dd_and_fingerprints_max: 10,
            collection_id: "col".to_owned(),
            group_id: "grp".to_owned(),
            signatures: String::new(),
        };
        let b64 = BASE64.encode(meta.encode_to_vec());
        let (_, decoded) = decode_action_metadata(ACTION_TYPE_SENSE, &b64);
        assert_eq!(decoded.unwrap()["collection_id"], "col");
    }

    #[test]
    fn unknown_action_type_keeps_raw_only() {
        let b64 = BASE64.encode(b"whatever");
        let (raw, decoded) = decode_action_metadata("ACTION_TYPE_FUTURE", &b64);
        assert_eq!(raw, b"whatever");
        assert_eq!(decoded, None);
    }

    #[test]
    fn bad_base64_is_recoverable() {
        let (raw, decoded) = decode_action_metadata(ACTION_TYPE_CASCADE, "!!!not-base64!!!");
        assert!(raw.is_empty());
        assert_eq!(decoded, None);
    }

    #[test]
    fn bad_proto_keeps_raw_bytes() {
        // Valid base64, not a valid CascadeMetadata message.
        let b64 = BASE64.encode([0xff, 0xff, 0xff, 0xff]);
        let (raw, decoded) = decode_action_metadata(ACTION_TYPE_CASCADE, &b64);
        assert_eq!(raw, vec![0xff, 0xff, 0xff, 0xff]);
        assert_eq!(decoded, None);
    }

    #[test]
    fn mime_type_table() {
        let cases = [
            (json!({"file_name": "photo.jpg"}), "image/jpeg"),
            (json!({"file_name": "photo.JPG"}), "image/jpeg"),
            (json!({"file_name": "image.png"}), "image/png"),
            (json!({"file_name": "document.pdf"}), "application/pdf"),
            (json!({"file_name": "readme.txt"}), "text/plain"),
            (json!({"file_name": "index.html"}), "text/html"),
            (json!({"file_name": "data.json"}), "application/json"),
            (json!({"file_name": "archive.zip"}), "application/zip"),
            (json!({"file_name": "video.mp4"}), "video/mp4"),
            (json!({"file_name": "animation.gif"}), "image/gif"),
            (json!({"file_name": "my.file.photo.jpg"}), "image/jpeg"),
            (json!({"file_name": ".hidden.txt"}), "text/plain"),
            (json!({"file_name": "myfile"}), OCTET_STREAM),
            (json!({"file_name": "file.xyz123"}), OCTET_STREAM),
            (json!({"file_name": ""}), OCTET_STREAM),
            (json!({"file_name": 12345}), OCTET_STREAM),
            (json!({"other_field": "value"}), OCTET_STREAM),
            (json!({}), OCTET_STREAM),
        ];
        for (decoded, expected) in cases {
            assert_eq!(
                mime_type_from_metadata(Some(&decoded)),
                expected,
                "for {decoded}"
            );
        }
        assert_eq!(mime_type_from_metadata(None), OCTET_STREAM);
    }
}
