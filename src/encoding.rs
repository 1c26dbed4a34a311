//! [`serde`](https://serde.rs/) helpers for binary fields on the wire.
//!
//! Every binary field crosses the key-share service boundary as a standard (padded) base64
//! string. Use with `#[serde(with = "crate::encoding::base64_bytes")]`. If the serializer is not
//! human-readable, the bytes are written as-is instead.

/// Serialize a `Vec<u8>` as a base64 string.
pub mod base64_bytes {
    use std::fmt;

    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{
        de::{Deserializer, Error, SeqAccess, Visitor},
        ser::Serializer,
    };

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&STANDARD.encode(bytes))
        } else {
            serializer.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(BytesVisitor)
        } else {
            deserializer.deserialize_byte_buf(BytesVisitor)
        }
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt.write_str("base64 string or byte sequence")
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            STANDARD
                .decode(v)
                .map_err(|e| E::custom(format!("invalid base64: {}", e)))
        }

        fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super::base64_bytes")]
        data: Vec<u8>,
    }

    #[test]
    fn json_uses_padded_base64() {
        let w = Wrapper {
            data: vec![0xde, 0xad, 0xbe, 0xef, 0x01],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":"3q2+7wE="}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn rejects_bad_base64() {
        let err = serde_json::from_str::<Wrapper>(r#"{"data":"not base64!"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn empty_field() {
        let back: Wrapper = serde_json::from_str(r#"{"data":""}"#).unwrap();
        assert!(back.data.is_empty());
    }
}
